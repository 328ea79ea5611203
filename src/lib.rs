pub mod claude_usage;
pub mod config;

pub use claude_usage::{
    ClientError, CredentialError, CredentialStore, MonitorState, UsageClient, UsageMonitor,
    UsageReport, UsageSnapshot,
};
pub use config::{RefreshInterval, Settings};
