use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

use super::error::CredentialError;

/// Keychain service name the Claude CLI stores its OAuth credentials under
pub const KEYCHAIN_SERVICE: &str = "Claude Code-credentials";

/// `security` exits with this status when no matching item exists
const SEC_ITEM_NOT_FOUND: i32 = 44;

/// OAuth bearer token. `Debug` is redacted so it never lands in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A read-only source of the raw credentials secret
pub trait SecretStore: Send + Sync {
    /// Read the raw secret, or `CredentialError::NotFound` when no entry exists
    fn read_secret(&self) -> Result<String, CredentialError>;
}

/// macOS Keychain, queried through the `security` CLI
#[derive(Debug, Clone)]
pub struct KeychainSecretStore {
    service: String,
    account: String,
}

impl KeychainSecretStore {
    /// The Claude CLI entry for the current OS user
    pub fn new() -> Self {
        Self {
            service: KEYCHAIN_SERVICE.to_string(),
            account: whoami::username(),
        }
    }
}

impl Default for KeychainSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeychainSecretStore {
    fn read_secret(&self) -> Result<String, CredentialError> {
        let output = Command::new("/usr/bin/security")
            .args([
                "find-generic-password",
                "-s",
                &self.service,
                "-a",
                &self.account,
                "-w",
            ])
            .output()
            .map_err(|e| CredentialError::BackendError {
                code: e.raw_os_error(),
                message: format!("Failed to execute security command: {e}"),
            })?;

        if !output.status.success() {
            return Err(security_exit_error(output.status.code(), &output.stderr));
        }

        String::from_utf8(output.stdout).map_err(|_| CredentialError::InvalidData)
    }
}

/// Map a failed `security` exit status to a credential error
fn security_exit_error(code: Option<i32>, stderr: &[u8]) -> CredentialError {
    match code {
        Some(SEC_ITEM_NOT_FOUND) => CredentialError::NotFound,
        code => CredentialError::BackendError {
            code,
            message: String::from_utf8_lossy(stderr).trim().to_string(),
        },
    }
}

/// `~/.claude/.credentials.json`, where the CLI keeps credentials off macOS
#[derive(Debug, Clone)]
pub struct CredentialsFileStore {
    path: PathBuf,
}

impl CredentialsFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location, if a home directory can be resolved
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".claude").join(".credentials.json")))
    }
}

impl SecretStore for CredentialsFileStore {
    fn read_secret(&self) -> Result<String, CredentialError> {
        match fs::read(&self.path) {
            Ok(bytes) => String::from_utf8(bytes).map_err(|_| CredentialError::InvalidData),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CredentialError::NotFound),
            Err(e) => Err(CredentialError::BackendError {
                code: e.raw_os_error(),
                message: format!("Failed to read {}: {e}", self.path.display()),
            }),
        }
    }
}

/// Tries each store in order and returns the first secret found.
///
/// When every store fails, the first failure other than `NotFound` wins so
/// a broken keychain is not masked by a missing fallback file.
pub struct ChainedSecretStore {
    stores: Vec<Box<dyn SecretStore>>,
}

impl ChainedSecretStore {
    pub fn new(stores: Vec<Box<dyn SecretStore>>) -> Self {
        Self { stores }
    }
}

impl SecretStore for ChainedSecretStore {
    fn read_secret(&self) -> Result<String, CredentialError> {
        let mut first_failure = None;
        for store in &self.stores {
            match store.read_secret() {
                Ok(secret) => return Ok(secret),
                Err(CredentialError::NotFound) => {}
                Err(e) => {
                    log::debug!("Secret store failed, trying next: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }
        Err(first_failure.unwrap_or(CredentialError::NotFound))
    }
}

/// Reads the Claude OAuth access token.
///
/// The token is re-read on every call so that a `claude` login performed
/// in a terminal takes effect on the next poll.
pub struct CredentialStore {
    store: Box<dyn SecretStore>,
}

impl CredentialStore {
    pub fn new(store: impl SecretStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Keychain first on macOS, then the credentials file
    pub fn platform_default() -> Self {
        let mut stores: Vec<Box<dyn SecretStore>> = Vec::new();

        #[cfg(target_os = "macos")]
        stores.push(Box::new(KeychainSecretStore::new()));

        if let Some(file) = CredentialsFileStore::default_location() {
            stores.push(Box::new(file));
        }

        Self::new(ChainedSecretStore::new(stores))
    }

    pub fn get_access_token(&self) -> Result<AccessToken, CredentialError> {
        let raw = self.store.read_secret()?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CredentialError::InvalidData);
        }
        parse_access_token(raw)
    }

    /// Check if a token is available without handing it out
    pub fn has_credentials(&self) -> bool {
        self.get_access_token().is_ok()
    }
}

/// Extract `claudeAiOauth.accessToken` from the stored JSON envelope
pub fn parse_access_token(raw: &str) -> Result<AccessToken, CredentialError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|_| CredentialError::InvalidData)?;
    let root = value.as_object().ok_or(CredentialError::InvalidData)?;

    root.get("claudeAiOauth")
        .and_then(Value::as_object)
        .and_then(|oauth| oauth.get("accessToken"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(|token| AccessToken(token.to_string()))
        .ok_or(CredentialError::MissingToken)
}
