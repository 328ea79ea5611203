//! Display-ready view of the monitor, consumed by the status bar and popover

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::monitor::{CachedSnapshot, MonitorState};
use super::pace::{countdown_at, Countdown, PaceMetrics};
use super::types::{UsageSnapshot, UsageWindow, WindowKind};

/// One window with all derived metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub kind: WindowKind,
    pub label: &'static str,
    pub utilization: f64,
    pub resets_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: PaceMetrics,
    pub countdown: Countdown,
}

impl WindowReport {
    pub fn new(kind: WindowKind, window: &UsageWindow, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            label: kind.label(),
            utilization: window.utilization,
            resets_at: window.resets_at,
            metrics: PaceMetrics::compute_at(window, kind.duration(), now),
            countdown: countdown_at(window, now),
        }
    }

    /// Whole-percent utilization as shown in the menu bar
    pub fn percent_label(&self) -> String {
        format!("{:.0}%", self.utilization.trunc())
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<22} {:>5}  {:<8}  {}, {}",
            self.label,
            self.percent_label(),
            self.metrics.tier,
            self.metrics.pace_status,
            self.countdown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    /// Empty until the first successful fetch
    pub windows: Vec<WindowReport>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub is_loading: bool,
    /// Only set while there is no data to show
    pub error: Option<String>,
    /// The error needs a `claude` login rather than a retry
    pub token_expired: bool,
}

impl UsageReport {
    pub fn from_snapshot(
        snapshot: &UsageSnapshot,
        fetched_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            windows: WindowKind::ALL
                .iter()
                .map(|&kind| WindowReport::new(kind, snapshot.window(kind), now))
                .collect(),
            last_updated_at: fetched_at,
            is_loading: false,
            error: None,
            token_expired: false,
        }
    }

    pub fn from_state(
        state: &MonitorState,
        cached: Option<&CachedSnapshot>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut report = match (state, cached) {
            (MonitorState::Cached { snapshot, fetched_at }, _) => {
                Self::from_snapshot(snapshot, Some(*fetched_at), now)
            }
            (_, Some(cached)) => Self::from_snapshot(&cached.snapshot, Some(cached.fetched_at), now),
            (_, None) => Self::empty(),
        };

        report.is_loading = state.is_loading();
        if let Some(err) = state.error() {
            report.error = Some(err.to_string());
            report.token_expired = err.is_token_expired();
        }
        report
    }

    fn empty() -> Self {
        Self {
            windows: Vec::new(),
            last_updated_at: None,
            is_loading: false,
            error: None,
            token_expired: false,
        }
    }

    pub fn window(&self, kind: WindowKind) -> Option<&WindowReport> {
        self.windows.iter().find(|w| w.kind == kind)
    }

    /// Compact one-line summary, e.g. `5h 45% · 7d 12%`
    pub fn status_line(&self) -> String {
        if self.windows.is_empty() {
            return match (&self.error, self.is_loading) {
                (Some(err), _) => format!("-- ({err})"),
                (None, true) => "-- (loading)".to_string(),
                (None, false) => "--".to_string(),
            };
        }

        let line = self
            .windows
            .iter()
            .map(|w| format!("{} {}", w.kind.short_label(), w.percent_label()))
            .collect::<Vec<_>>()
            .join(" · ");

        if self.is_loading {
            format!("{line} (refreshing)")
        } else {
            line
        }
    }
}
