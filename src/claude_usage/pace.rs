//! Pace math over a single usage window
//!
//! Everything here is derived on demand from a [`UsageWindow`] and the
//! window's full length. The `*_at` variants take an explicit `now`; the
//! plain variants read the wall clock.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::types::UsageWindow;

/// Gap (in percentage points) that must be exceeded to leave `OnPace`
pub const PACE_DEAD_ZONE: f64 = 5.0;

/// Utilization at which a window turns `Warning`
pub const WARNING_THRESHOLD: f64 = 50.0;

/// Utilization at which a window turns `Critical`
pub const CRITICAL_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UtilizationTier {
    Normal,
    Warning,
    Critical,
}

impl UtilizationTier {
    /// Boundaries are inclusive-low: exactly 50 is `Warning`, exactly 80 is `Critical`
    pub fn from_percentage(pct: f64) -> Self {
        if pct < WARNING_THRESHOLD {
            UtilizationTier::Normal
        } else if pct < CRITICAL_THRESHOLD {
            UtilizationTier::Warning
        } else {
            UtilizationTier::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UtilizationTier::Normal => "normal",
            UtilizationTier::Warning => "warning",
            UtilizationTier::Critical => "critical",
        }
    }
}

impl fmt::Display for UtilizationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Consumption relative to elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "gap", rename_all = "camelCase")]
pub enum PaceStatus {
    /// Using quota faster than time passes
    Ahead(f64),
    OnPace,
    /// Using quota slower than time passes
    Behind(f64),
}

impl PaceStatus {
    pub fn from_gap(gap: f64) -> Self {
        if gap > PACE_DEAD_ZONE {
            PaceStatus::Ahead(gap)
        } else if gap < -PACE_DEAD_ZONE {
            PaceStatus::Behind(gap)
        } else {
            PaceStatus::OnPace
        }
    }
}

impl fmt::Display for PaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaceStatus::Ahead(gap) => write!(f, "{gap:+.0}% ahead of pace"),
            PaceStatus::OnPace => f.write_str("on pace"),
            PaceStatus::Behind(gap) => write!(f, "{gap:+.0}% behind pace"),
        }
    }
}

/// Time left until a window resets, never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Countdown {
    Imminent,
    In { hours: i64, minutes: i64 },
}

impl Countdown {
    pub fn from_remaining(remaining: Duration) -> Self {
        if remaining <= Duration::zero() {
            return Countdown::Imminent;
        }
        let minutes = remaining.num_minutes();
        Countdown::In {
            hours: minutes / 60,
            minutes: minutes % 60,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Countdown::Imminent => f.write_str("reset imminent"),
            Countdown::In { hours: 0, minutes } => write!(f, "resets in {minutes}m"),
            Countdown::In { hours, minutes } => write!(f, "resets in {hours}h {minutes}m"),
        }
    }
}

/// All derived metrics for one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaceMetrics {
    pub time_progress_pct: f64,
    pub gap_pct: f64,
    pub tier: UtilizationTier,
    pub pace_status: PaceStatus,
}

impl PaceMetrics {
    pub fn compute(window: &UsageWindow, window_duration: Duration) -> Self {
        Self::compute_at(window, window_duration, Utc::now())
    }

    pub fn compute_at(window: &UsageWindow, window_duration: Duration, now: DateTime<Utc>) -> Self {
        let time_progress_pct = time_progress_at(window, window_duration, now);
        let gap_pct = window.utilization - time_progress_pct;
        Self {
            time_progress_pct,
            gap_pct,
            tier: utilization_tier(window.utilization),
            pace_status: pace_status(gap_pct),
        }
    }
}

fn as_secs_f64(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Share of the window that has elapsed, in `[0, 100]`
pub fn time_progress(window: &UsageWindow, window_duration: Duration) -> f64 {
    time_progress_at(window, window_duration, Utc::now())
}

pub fn time_progress_at(window: &UsageWindow, window_duration: Duration, now: DateTime<Utc>) -> f64 {
    let remaining = as_secs_f64(window.resets_at - now);
    let total = as_secs_f64(window_duration);
    if remaining <= 0.0 || total <= 0.0 {
        return 100.0;
    }
    let elapsed = total - remaining;
    (elapsed / total * 100.0).clamp(0.0, 100.0)
}

/// Utilization minus time progress; positive means over-pace
pub fn pace_gap(window: &UsageWindow, window_duration: Duration) -> f64 {
    pace_gap_at(window, window_duration, Utc::now())
}

pub fn pace_gap_at(window: &UsageWindow, window_duration: Duration, now: DateTime<Utc>) -> f64 {
    window.utilization - time_progress_at(window, window_duration, now)
}

pub fn pace_status(gap: f64) -> PaceStatus {
    PaceStatus::from_gap(gap)
}

pub fn utilization_tier(pct: f64) -> UtilizationTier {
    UtilizationTier::from_percentage(pct)
}

/// `resets_at - now`, clamped to zero once the reset time has passed
pub fn time_remaining(window: &UsageWindow) -> Duration {
    time_remaining_at(window, Utc::now())
}

pub fn time_remaining_at(window: &UsageWindow, now: DateTime<Utc>) -> Duration {
    (window.resets_at - now).max(Duration::zero())
}

pub fn countdown(window: &UsageWindow) -> Countdown {
    Countdown::from_remaining(time_remaining(window))
}

pub fn countdown_at(window: &UsageWindow, now: DateTime<Utc>) -> Countdown {
    Countdown::from_remaining(time_remaining_at(window, now))
}
