/// Backend credentials kept in chrome.storage.local
use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl CredentialSet {
    pub fn new(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        CredentialSet {
            access_token: non_blank(access_token),
            refresh_token: non_blank(refresh_token),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    /// Credentials after a successful refresh; keeps the old refresh token
    /// unless the backend rotated it
    pub fn refreshed(&self, access_token: String, rotated_refresh: Option<String>) -> Self {
        CredentialSet::new(
            Some(access_token),
            non_blank(rotated_refresh).or_else(|| self.refresh_token.clone()),
        )
    }
}

fn non_blank(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.trim().is_empty())
}

/// Durable key-value storage holding the `CredentialSet`
#[async_trait(?Send)]
pub trait CredentialStore {
    async fn load(&self) -> Result<CredentialSet, StorageError>;
    async fn persist(&self, credentials: &CredentialSet) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}
