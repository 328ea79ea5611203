//! Claude Usage module
//!
//! Polls the Anthropic OAuth usage API and keeps the result presentable:
//! - OAuth token retrieval from Keychain/file
//! - Usage limits from Anthropic API (5-hour and 7-day windows)
//! - Pace, utilization tier and countdown derived per window
//! - Polling monitor that keeps the last good snapshot across failures

pub mod api;
pub mod credentials;
pub mod error;
pub mod monitor;
pub mod pace;
pub mod report;
pub mod types;

pub use api::{UsageClient, UsageSource};
pub use credentials::{AccessToken, CredentialStore, SecretStore};
pub use error::{ClientError, CredentialError};
pub use monitor::{CachedSnapshot, MonitorState, UsageMonitor};
pub use pace::{Countdown, PaceMetrics, PaceStatus, UtilizationTier};
pub use report::{UsageReport, WindowReport};
pub use types::{UsageSnapshot, UsageWindow, WindowKind};
