use thiserror::Error;

/// Failures while reading the OAuth token out of the secret store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No credential entry exists for the current user
    #[error("Claude Code credentials not found")]
    NotFound,
    /// The stored secret is not a JSON object
    #[error("credential data is not valid JSON")]
    InvalidData,
    /// The JSON envelope has no usable `claudeAiOauth.accessToken`
    #[error("credentials are missing an accessToken")]
    MissingToken,
    /// The secret store itself failed (exit status or OS error code when known)
    #[error("secret store query failed: {message}")]
    BackendError { code: Option<i32>, message: String },
}

/// Failures of a single usage fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// Transport failure, or a body that does not decode as a usage snapshot
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// 401/403: the user must log in again with the Claude CLI
    #[error("OAuth token expired, run `claude` in a terminal to log in again")]
    TokenExpired,
}

impl ClientError {
    /// Whether this failure needs the user to re-authenticate out-of-band
    /// rather than wait for the next poll.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, ClientError::TokenExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message() {
        assert_eq!(ClientError::HttpError(500).to_string(), "HTTP error: 500");
    }

    #[test]
    fn test_credential_error_is_transparent() {
        let err: ClientError = CredentialError::NotFound.into();
        assert_eq!(err.to_string(), "Claude Code credentials not found");
        assert!(!err.is_token_expired());
    }

    #[test]
    fn test_token_expired_flag() {
        assert!(ClientError::TokenExpired.is_token_expired());
        assert!(!ClientError::HttpError(401).is_token_expired());
    }
}
