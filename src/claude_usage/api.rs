use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;

use super::credentials::{AccessToken, CredentialStore};
use super::error::{ClientError, CredentialError};
use super::types::UsageSnapshot;

/// API endpoint for usage limits
pub const USAGE_API_URL: &str = "https://api.anthropic.com/api/oauth/usage";

/// Beta header required for OAuth API
pub const ANTHROPIC_BETA_HEADER: &str = "anthropic-beta";
pub const ANTHROPIC_BETA_VALUE: &str = "oauth-2025-04-20";

/// Upper bound for one request, so a stalled connection cannot hang the poll loop
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const MONITOR_USER_AGENT: &str = concat!("claude-usage-monitor/", env!("CARGO_PKG_VERSION"));

/// Anything that can produce a fresh usage snapshot
pub trait UsageSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<UsageSnapshot, ClientError>> + Send;
}

/// Client for the OAuth usage endpoint
pub struct UsageClient {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    endpoint: String,
}

impl UsageClient {
    pub fn new(credentials: CredentialStore) -> Self {
        Self::with_endpoint(credentials, USAGE_API_URL)
    }

    pub fn with_endpoint(credentials: CredentialStore, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: Arc::new(credentials),
            endpoint: endpoint.into(),
        }
    }

    /// Build the request for `token` without sending it
    pub fn build_request(&self, token: &AccessToken) -> Result<reqwest::Request, ClientError> {
        build_request(&self.http, &self.endpoint, token)
    }

    /// Fetch usage limits from the Anthropic API
    ///
    /// No retries: the next poll is the retry.
    pub async fn fetch(&self) -> Result<UsageSnapshot, ClientError> {
        let token = self.read_token().await?;
        let request = self.build_request(&token)?;

        log::debug!("Fetching usage limits from {}", self.endpoint);
        let response = self.http.execute(request).await.map_err(|e| {
            log::warn!("Usage request failed: {e}");
            ClientError::InvalidResponse(format!("Failed to fetch usage limits: {e}"))
        })?;

        classify_status(response.status())?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("Failed to read response body: {e}")))?;

        parse_response(&body)
    }

    /// The secret store may shell out, so the lookup runs off the async workers
    async fn read_token(&self) -> Result<AccessToken, ClientError> {
        let credentials = Arc::clone(&self.credentials);
        let token = tokio::task::spawn_blocking(move || credentials.get_access_token())
            .await
            .map_err(|e| CredentialError::BackendError {
                code: None,
                message: format!("Credential lookup task failed: {e}"),
            })??;
        Ok(token)
    }
}

impl UsageSource for UsageClient {
    fn fetch(&self) -> impl Future<Output = Result<UsageSnapshot, ClientError>> + Send {
        UsageClient::fetch(self)
    }
}

/// Build the usage request: bearer auth, JSON accept, OAuth beta header and a
/// fixed timeout. Pure: nothing is sent.
pub fn build_request(
    client: &reqwest::Client,
    endpoint: &str,
    token: &AccessToken,
) -> Result<reqwest::Request, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| CredentialError::InvalidData)?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        ANTHROPIC_BETA_HEADER,
        HeaderValue::from_static(ANTHROPIC_BETA_VALUE),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(MONITOR_USER_AGENT));

    client
        .get(endpoint)
        .headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ClientError::InvalidResponse(format!("Invalid usage request: {e}")))
}

/// 401/403 mean the token is no longer accepted; other non-2xx are plain HTTP errors
pub fn classify_status(status: StatusCode) -> Result<(), ClientError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::TokenExpired),
        s if s.is_success() => Ok(()),
        s => Err(ClientError::HttpError(s.as_u16())),
    }
}

/// Decode a 2xx body into a snapshot
pub fn parse_response(body: &[u8]) -> Result<UsageSnapshot, ClientError> {
    serde_json::from_slice(body)
        .map_err(|e| ClientError::InvalidResponse(format!("Failed to parse usage limits response: {e}")))
}
