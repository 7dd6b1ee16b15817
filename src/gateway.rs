/// Authenticated requests against the backend
///
/// `AuthGateway::send` attaches the stored access token and recovers from a
/// single expired-token 401: one refresh call, then exactly one retry of the
/// original request. A call therefore costs at most three round trips.
///
/// Concurrent calls are not coordinated. Two requests that both see a 401
/// each run their own refresh.
use crate::credentials::{CredentialSet, CredentialStore};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use url::Url;

pub const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Option<HttpMethod> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn json_body(mut self, body: &serde_json::Value) -> Self {
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        self.body = Some(body.to_string());
        self
    }

    /// Copy of the request carrying `token` as its only bearer credential
    fn with_bearer(&self, token: Option<&str>) -> HttpRequest {
        let mut request = self.clone();
        request
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        if let Some(token) = token {
            request
                .headers
                .push(("authorization".to_string(), format!("Bearer {token}")));
        }
        request
    }

    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .and_then(|(_, value)| value.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait(?Send)]
pub trait HttpTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Opens the login surface when the session cannot be recovered
pub trait SessionNavigator {
    fn open_login(&self, session_expired: bool);
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token", rename = "accessToken")]
    access_token: Option<String>,
    #[serde(alias = "refresh_token", rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum RefreshFailure {
    #[error(transparent)]
    Transport(TransportError),
    #[error("refresh rejected with {0}")]
    Rejected(u16),
    #[error("refresh response has no access token")]
    MissingToken,
}

pub struct AuthGateway {
    transport: Rc<dyn HttpTransport>,
    credentials: Rc<dyn CredentialStore>,
    navigator: Rc<dyn SessionNavigator>,
    base_url: Url,
    refresh_url: Url,
}

impl AuthGateway {
    pub fn new(
        transport: Rc<dyn HttpTransport>,
        credentials: Rc<dyn CredentialStore>,
        navigator: Rc<dyn SessionNavigator>,
        base_url: Url,
        refresh_path: &str,
    ) -> Result<Self, url::ParseError> {
        let refresh_url = base_url.join(refresh_path.trim_start_matches('/'))?;
        Ok(AuthGateway {
            transport,
            credentials,
            navigator,
            base_url,
            refresh_url,
        })
    }

    /// Resolve a backend path against the API base URL. Anything that lands
    /// on another origin is refused, since the access token rides along.
    pub fn endpoint(&self, path: &str) -> Option<Url> {
        let url = self.base_url.join(path.trim_start_matches('/')).ok()?;
        (url.origin() == self.base_url.origin()).then_some(url)
    }

    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let stored = self.load_credentials().await;

        let response = self
            .transport
            .send(&request.with_bearer(stored.access_token.as_deref()))
            .await?;
        if response.status != UNAUTHORIZED {
            return Ok(response);
        }

        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            log::debug!(
                "{} {} unauthorized, no refresh token stored",
                request.method.as_str(),
                request.url
            );
            return Ok(response);
        };

        match self.refresh(refresh_token).await {
            Ok((access_token, rotated)) => {
                let renewed = stored.refreshed(access_token, rotated);
                if let Err(e) = self.credentials.persist(&renewed).await {
                    log::warn!("Failed to persist refreshed credentials: {}", e);
                }
                log::info!("Access token refreshed, retrying {}", request.url);
                self.transport
                    .send(&request.with_bearer(renewed.access_token.as_deref()))
                    .await
            }
            Err(failure) => {
                log::warn!("Session refresh failed: {}", failure);
                if let Err(e) = self.credentials.clear().await {
                    log::warn!("Failed to clear credentials: {}", e);
                }
                self.navigator.open_login(true);
                Ok(response)
            }
        }
    }

    async fn load_credentials(&self) -> CredentialSet {
        match self.credentials.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                log::warn!("Reading credentials failed, sending unauthenticated: {}", e);
                CredentialSet::default()
            }
        }
    }

    async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<(String, Option<String>), RefreshFailure> {
        let request = HttpRequest::new(HttpMethod::Post, self.refresh_url.as_str())
            .with_bearer(Some(refresh_token));

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(RefreshFailure::Transport)?;
        if !response.is_success() {
            return Err(RefreshFailure::Rejected(response.status));
        }

        let parsed: RefreshResponse =
            serde_json::from_str(&response.body).map_err(|_| RefreshFailure::MissingToken)?;
        match parsed.access_token.filter(|t| !t.trim().is_empty()) {
            Some(access_token) => Ok((access_token, parsed.refresh_token)),
            None => Err(RefreshFailure::MissingToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        DeferredTransport, MemoryCredentialStore, RecordingNavigator, ScriptedTransport,
    };
    use futures::executor::block_on;

    const BASE: &str = "https://api.example.com/";
    const REFRESH: &str = "https://api.example.com/auth/refresh";
    const POSTS: &str = "https://api.example.com/posts";

    struct Harness {
        transport: Rc<ScriptedTransport>,
        store: Rc<MemoryCredentialStore>,
        navigator: Rc<RecordingNavigator>,
        gateway: AuthGateway,
    }

    fn harness(access: Option<&str>, refresh: Option<&str>) -> Harness {
        let transport = Rc::new(ScriptedTransport::default());
        let store = Rc::new(MemoryCredentialStore::with(CredentialSet::new(
            access.map(str::to_string),
            refresh.map(str::to_string),
        )));
        let navigator = Rc::new(RecordingNavigator::default());
        let gateway = AuthGateway::new(
            transport.clone(),
            store.clone(),
            navigator.clone(),
            Url::parse(BASE).unwrap(),
            "/auth/refresh",
        )
        .unwrap();
        Harness {
            transport,
            store,
            navigator,
            gateway,
        }
    }

    fn get_posts() -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, POSTS)
    }

    #[test]
    fn test_attaches_stored_access_token() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(200, "[]")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(h.transport.calls_to(POSTS), 1);
        assert_eq!(h.transport.calls_to(REFRESH), 0);
    }

    #[test]
    fn test_non_401_errors_pass_through() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(500, "boom")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response, HttpResponse::new(500, "boom"));
        assert_eq!(h.transport.calls_to(REFRESH), 0);
    }

    #[test]
    fn test_sends_without_credentials_when_store_is_empty() {
        let h = harness(None, None);
        h.transport.respond(POSTS, None, Ok(HttpResponse::new(200, "public")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response.body, "public");
        assert_eq!(h.transport.requests()[0].bearer(), None);
    }

    #[test]
    fn test_401_without_refresh_token_is_returned() {
        let h = harness(Some("A"), None);
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(h.transport.calls_to(REFRESH), 0);
        assert_eq!(h.transport.calls_to(POSTS), 1);
        assert!(h.navigator.opened().is_empty());
    }

    #[test]
    fn test_refresh_then_single_retry() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));
        h.transport.respond(
            REFRESH,
            Some("R"),
            Ok(HttpResponse::new(200, r#"{"accessToken": "B"}"#)),
        );
        h.transport.respond(POSTS, Some("B"), Ok(HttpResponse::new(200, "posts")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response, HttpResponse::new(200, "posts"));
        assert_eq!(h.transport.calls_to(REFRESH), 1);
        assert_eq!(h.transport.calls_to(POSTS), 2);
        let stored = h.store.snapshot();
        assert_eq!(stored.access_token.as_deref(), Some("B"));
        assert_eq!(stored.refresh_token.as_deref(), Some("R"));
    }

    #[test]
    fn test_second_401_is_not_retried_again() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));
        h.transport.respond(
            REFRESH,
            Some("R"),
            Ok(HttpResponse::new(200, r#"{"access_token": "B", "refresh_token": "R2"}"#)),
        );
        h.transport.respond(POSTS, Some("B"), Ok(HttpResponse::new(401, "still no")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(h.transport.requests().len(), 3);
        assert_eq!(h.store.snapshot().refresh_token.as_deref(), Some("R2"));
        assert!(h.navigator.opened().is_empty());
    }

    #[test]
    fn test_rejected_refresh_clears_credentials_and_opens_login() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));
        h.transport.respond(REFRESH, Some("R"), Ok(HttpResponse::new(403, "revoked")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response, HttpResponse::new(401, "expired"));
        assert!(h.store.snapshot().is_empty());
        assert_eq!(h.navigator.opened(), vec![true]);
        assert_eq!(h.transport.calls_to(POSTS), 1);
    }

    #[test]
    fn test_later_calls_see_cleared_credentials() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));
        h.transport.respond(
            REFRESH,
            Some("R"),
            Err(TransportError::new("connection reset")),
        );
        h.transport.respond(POSTS, None, Ok(HttpResponse::new(401, "anonymous")));

        block_on(h.gateway.send(&get_posts())).unwrap();
        let second = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(second.body, "anonymous");
        assert_eq!(h.transport.calls_to(REFRESH), 1);
        assert_eq!(h.navigator.opened(), vec![true]);
    }

    #[test]
    fn test_refresh_body_without_token_is_a_failed_refresh() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));
        h.transport.respond(REFRESH, Some("R"), Ok(HttpResponse::new(200, "{}")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response.status, 401);
        assert!(h.store.snapshot().is_empty());
    }

    #[test]
    fn test_transport_failure_passes_through() {
        let h = harness(Some("A"), Some("R"));
        h.transport.respond(POSTS, Some("A"), Err(TransportError::new("offline")));

        let error = block_on(h.gateway.send(&get_posts())).unwrap_err();

        assert_eq!(error, TransportError::new("offline"));
        assert_eq!(h.transport.calls_to(REFRESH), 0);
    }

    #[test]
    fn test_unreadable_store_sends_unauthenticated() {
        let h = harness(Some("A"), Some("R"));
        h.store.fail_reads();
        h.transport.respond(POSTS, None, Ok(HttpResponse::new(401, "who")));

        let response = block_on(h.gateway.send(&get_posts())).unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(h.transport.calls_to(REFRESH), 0);
    }

    #[test]
    fn test_caller_authorization_header_is_replaced() {
        let h = harness(Some("A"), None);
        h.transport.respond(POSTS, Some("A"), Ok(HttpResponse::new(200, "ok")));
        let mut request = get_posts();
        request
            .headers
            .push(("Authorization".to_string(), "Bearer stale".to_string()));

        block_on(h.gateway.send(&request)).unwrap();

        let sent = h.transport.requests();
        assert_eq!(sent[0].bearer(), Some("A"));
        assert_eq!(sent[0].headers.len(), 1);
    }

    #[test]
    fn test_concurrent_401s_refresh_independently() {
        let transport = Rc::new(DeferredTransport::default());
        let store = Rc::new(MemoryCredentialStore::with(CredentialSet::new(
            Some("A".to_string()),
            Some("R".to_string()),
        )));
        let gateway = AuthGateway::new(
            transport.clone(),
            store.clone(),
            Rc::new(RecordingNavigator::default()),
            Url::parse(BASE).unwrap(),
            "/auth/refresh",
        )
        .unwrap();
        let script = &transport.script;
        script.respond(POSTS, Some("A"), Ok(HttpResponse::new(401, "expired")));
        script.respond(
            REFRESH,
            Some("R"),
            Ok(HttpResponse::new(200, r#"{"accessToken": "B"}"#)),
        );
        script.respond(POSTS, Some("B"), Ok(HttpResponse::new(200, "posts")));
        let first = get_posts();
        let second = get_posts();

        let (a, b) =
            block_on(async { futures::join!(gateway.send(&first), gateway.send(&second)) });

        assert_eq!(a.unwrap().status, 200);
        assert_eq!(b.unwrap().status, 200);
        assert_eq!(script.calls_to(REFRESH), 2);
        assert_eq!(script.calls_to(POSTS), 4);
        assert_eq!(script.requests().len(), 6);
        assert_eq!(store.snapshot().access_token.as_deref(), Some("B"));
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let transport = Rc::new(ScriptedTransport::default());
        let gateway = AuthGateway::new(
            transport,
            Rc::new(MemoryCredentialStore::default()),
            Rc::new(RecordingNavigator::default()),
            Url::parse("https://api.example.com/v1/").unwrap(),
            "/auth/refresh",
        )
        .unwrap();

        assert_eq!(
            gateway.endpoint("/posts?limit=5").unwrap().as_str(),
            "https://api.example.com/v1/posts?limit=5"
        );
        assert_eq!(
            gateway.endpoint("https://api.example.com/v1/me").unwrap().as_str(),
            "https://api.example.com/v1/me"
        );
        assert!(gateway.endpoint("https://evil.example/collect").is_none());
        assert!(gateway.endpoint("http://api.example.com/v1/posts").is_none());
        assert_eq!(
            gateway.refresh_url.as_str(),
            "https://api.example.com/v1/auth/refresh"
        );
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpMethod::parse("post"), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::parse("TRACE"), None);
    }
}
