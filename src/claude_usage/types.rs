use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single quota window (5-hour or 7-day)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Utilization percentage, 0-100 expected but not clamped
    pub utilization: f64,
    /// When the window resets
    pub resets_at: DateTime<Utc>,
}

/// Usage limits as returned by `GET /api/oauth/usage`
///
/// Both windows are required; extra windows the API may add are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub five_hour: UsageWindow,
    pub seven_day: UsageWindow,
}

impl UsageSnapshot {
    pub fn window(&self, kind: WindowKind) -> &UsageWindow {
        match kind {
            WindowKind::FiveHour => &self.five_hour,
            WindowKind::SevenDay => &self.seven_day,
        }
    }
}

/// The quota windows tracked by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowKind {
    FiveHour,
    SevenDay,
}

impl WindowKind {
    pub const ALL: [WindowKind; 2] = [WindowKind::FiveHour, WindowKind::SevenDay];

    /// Full length of the window, used as the time budget for pace math
    pub fn duration(self) -> Duration {
        match self {
            WindowKind::FiveHour => Duration::hours(5),
            WindowKind::SevenDay => Duration::days(7),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WindowKind::FiveHour => "Current session (5h)",
            WindowKind::SevenDay => "Weekly limit (7d)",
        }
    }

    pub fn short_label(self) -> &'static str {
        match self {
            WindowKind::FiveHour => "5h",
            WindowKind::SevenDay => "7d",
        }
    }
}
