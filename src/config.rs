/// Coordinator configuration, supplied by the background script at startup
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_LOGIN_PAGE: &str = "login.html";
pub const DEFAULT_RETRY_INTERVAL_MS: u32 = 400;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    pub api_base_url: String,
    pub refresh_path: String,
    pub login_page: String,
    pub retry_interval_ms: u32,
    pub max_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_page: DEFAULT_LOGIN_PAGE.to_string(),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: CoordinatorConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.retry_interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "retryIntervalMs",
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "maxAttempts",
            });
        }
        Ok(())
    }

    /// Parsed API base URL, always ending in '/' so relative paths join under it
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn retry_policy(&self) -> crate::delivery::RetryPolicy {
        crate::delivery::RetryPolicy {
            interval_ms: self.retry_interval_ms,
            max_attempts: self.max_attempts,
        }
    }
}
