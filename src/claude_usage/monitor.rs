//! Polling loop and the cached/error state machine
//!
//! A [`UsageMonitor`] owns the only writable copy of [`MonitorState`]. At
//! most one fetch runs at a time; timer ticks or manual refreshes that
//! arrive while a fetch is in flight are dropped. Once a snapshot has been
//! fetched, later failures keep reporting it instead of an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::api::UsageSource;
use super::error::ClientError;
use super::report::UsageReport;
use super::types::UsageSnapshot;
use crate::config::{ConfigError, RefreshInterval};

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorState {
    /// Nothing fetched yet
    Idle,
    /// A fetch is in flight. Does not invalidate the cached snapshot.
    Loading,
    Cached {
        snapshot: UsageSnapshot,
        fetched_at: DateTime<Utc>,
    },
    /// Only reachable while no fetch has ever succeeded
    Failed(ClientError),
}

impl MonitorState {
    pub fn is_loading(&self) -> bool {
        matches!(self, MonitorState::Loading)
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            MonitorState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Text for the error shown in place of data
    pub fn error_message(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }
}

/// Last successful fetch
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot {
    pub snapshot: UsageSnapshot,
    pub fetched_at: DateTime<Utc>,
}

impl From<CachedSnapshot> for MonitorState {
    fn from(cached: CachedSnapshot) -> Self {
        MonitorState::Cached {
            snapshot: cached.snapshot,
            fetched_at: cached.fetched_at,
        }
    }
}

pub struct UsageMonitor<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for UsageMonitor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    source: S,
    state: watch::Sender<MonitorState>,
    last_good: Mutex<Option<CachedSnapshot>>,
    in_flight: AtomicBool,
    interval: Mutex<RefreshInterval>,
    /// Lock order: `timer` before `interval`
    timer: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> Inner<S> {
    fn settle(&self, result: Result<UsageSnapshot, ClientError>) -> MonitorState {
        let mut last_good = lock(&self.last_good);
        match result {
            Ok(snapshot) => {
                let cached = CachedSnapshot {
                    snapshot,
                    fetched_at: Utc::now(),
                };
                log::info!(
                    "Usage updated: 5h {:.1}%, 7d {:.1}%",
                    cached.snapshot.five_hour.utilization,
                    cached.snapshot.seven_day.utilization
                );
                *last_good = Some(cached.clone());
                cached.into()
            }
            Err(err) => match last_good.as_ref() {
                Some(cached) => {
                    log::warn!(
                        "Usage fetch failed, keeping snapshot from {}: {err}",
                        cached.fetched_at
                    );
                    cached.clone().into()
                }
                None => {
                    log::warn!("Usage fetch failed: {err}");
                    MonitorState::Failed(err)
                }
            },
        }
    }

    /// State to fall back to when a fetch ends without a result
    fn resting_state(&self, before: MonitorState) -> MonitorState {
        match lock(&self.last_good).clone() {
            Some(cached) => cached.into(),
            None => before,
        }
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}

/// Held for the duration of one fetch. Clears the in-flight flag on drop
/// and, if the fetch was abandoned mid-way, takes the state out of `Loading`.
struct FetchGuard<'a, S> {
    inner: &'a Inner<S>,
    before: Option<MonitorState>,
}

impl<S> Drop for FetchGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(before) = self.before.take() {
            log::debug!("Usage fetch abandoned before completion");
            let resting = self.inner.resting_state(before);
            self.inner.state.send_replace(resting);
        }
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl<S: UsageSource> UsageMonitor<S> {
    pub fn new(source: S, interval: RefreshInterval) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            inner: Arc::new(Inner {
                source,
                state,
                last_good: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                interval: Mutex::new(interval),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Fetch immediately, then poll at the current refresh interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.spawn_fetch();
        let mut timer = lock(&self.inner.timer);
        let interval = *lock(&self.inner.interval);
        self.arm(&mut timer, interval);
    }

    /// Disarm the timer. A fetch already in flight is left to finish.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
            log::debug!("Usage polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    pub fn refresh_interval(&self) -> RefreshInterval {
        *lock(&self.inner.interval)
    }

    /// Change the polling interval. A running timer is replaced, never
    /// duplicated; a stopped monitor stays stopped.
    pub fn set_refresh_interval(&self, interval: RefreshInterval) {
        let mut timer = lock(&self.inner.timer);
        *lock(&self.inner.interval) = interval;
        if timer.is_some() {
            self.arm(&mut timer, interval);
        }
    }

    pub fn set_refresh_interval_secs(&self, secs: u64) -> Result<(), ConfigError> {
        self.set_refresh_interval(RefreshInterval::try_from(secs)?);
        Ok(())
    }

    /// Run one fetch now. Returns `false` without fetching if another fetch
    /// is already in flight.
    pub async fn fetch_now(&self) -> bool {
        let inner = &*self.inner;
        if inner.in_flight.swap(true, Ordering::AcqRel) {
            log::debug!("Usage fetch already in flight, skipping");
            return false;
        }

        let before = inner.state.send_replace(MonitorState::Loading);
        let mut guard = FetchGuard {
            inner,
            before: Some(before),
        };

        let result = inner.source.fetch().await;
        let next = inner.settle(result);
        guard.before = None;
        inner.state.send_replace(next);
        true
    }

    pub fn state(&self) -> MonitorState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.inner.state.subscribe()
    }

    /// Most recent successful snapshot, also while a refresh is loading
    pub fn snapshot(&self) -> Option<CachedSnapshot> {
        lock(&self.inner.last_good).clone()
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.last_good).as_ref().map(|c| c.fetched_at)
    }

    /// Derived, display-ready view of the current state
    pub fn report(&self) -> UsageReport {
        UsageReport::from_state(&self.state(), self.snapshot().as_ref(), Utc::now())
    }

    fn spawn_fetch(&self) {
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.fetch_now().await;
        });
    }

    fn arm(&self, timer: &mut Option<JoinHandle<()>>, interval: RefreshInterval) {
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        let weak = Arc::downgrade(&self.inner);
        *timer = Some(tokio::spawn(run_timer(weak, interval.as_duration())));
        log::debug!("Usage polling armed every {interval}");
    }
}

async fn run_timer<S: UsageSource>(inner: Weak<Inner<S>>, period: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        UsageMonitor { inner }.spawn_fetch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude_usage::types::UsageWindow;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    fn snapshot(five_hour: f64) -> UsageSnapshot {
        let resets_at = Utc::now() + chrono::Duration::hours(2);
        UsageSnapshot {
            five_hour: UsageWindow {
                utilization: five_hour,
                resets_at,
            },
            seven_day: UsageWindow {
                utilization: 12.3,
                resets_at: resets_at + chrono::Duration::days(3),
            },
        }
    }

    /// Replays scripted results, then keeps failing with 503
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<UsageSnapshot, ClientError>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<UsageSnapshot, ClientError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn always_ok() -> Self {
            Self::new(vec![Ok(snapshot(10.0)); 64])
        }
    }

    impl UsageSource for ScriptedSource {
        fn fetch(&self) -> impl Future<Output = Result<UsageSnapshot, ClientError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = lock(&self.results)
                .pop_front()
                .unwrap_or(Err(ClientError::HttpError(503)));
            async move { next }
        }
    }

    /// Blocks each fetch until a permit is released
    struct GatedSource {
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
    }

    impl UsageSource for GatedSource {
        fn fetch(&self) -> impl Future<Output = Result<UsageSnapshot, ClientError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&self.gate);
            async move {
                gate.acquire().await.unwrap().forget();
                Ok(snapshot(40.0))
            }
        }
    }

    fn gated() -> (GatedSource, Arc<Semaphore>, Arc<AtomicUsize>) {
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            gate: Arc::clone(&gate),
            calls: Arc::clone(&calls),
        };
        (source, gate, calls)
    }

    #[tokio::test]
    async fn test_sticky_success_scenario() {
        let expected = snapshot(45.5);
        let source = ScriptedSource::new(vec![
            Err(ClientError::HttpError(500)),
            Ok(expected.clone()),
            Err(ClientError::TokenExpired),
        ]);
        let monitor = UsageMonitor::new(source, RefreshInterval::default());
        assert_eq!(monitor.state(), MonitorState::Idle);

        assert!(monitor.fetch_now().await);
        assert_eq!(
            monitor.state(),
            MonitorState::Failed(ClientError::HttpError(500))
        );
        assert_eq!(
            monitor.state().error_message().as_deref(),
            Some("HTTP error: 500")
        );
        assert_eq!(monitor.last_updated_at(), None);

        assert!(monitor.fetch_now().await);
        let MonitorState::Cached {
            snapshot: cached,
            fetched_at: t1,
        } = monitor.state()
        else {
            panic!("expected cached state, got {:?}", monitor.state());
        };
        assert_eq!(cached, expected);
        assert_eq!(monitor.last_updated_at(), Some(t1));

        assert!(monitor.fetch_now().await);
        assert_eq!(
            monitor.state(),
            MonitorState::Cached {
                snapshot: expected,
                fetched_at: t1,
            }
        );
        assert_eq!(monitor.last_updated_at(), Some(t1));
    }

    #[tokio::test]
    async fn test_newer_success_replaces_snapshot() {
        let source = ScriptedSource::new(vec![Ok(snapshot(10.0)), Ok(snapshot(20.0))]);
        let monitor = UsageMonitor::new(source, RefreshInterval::default());

        monitor.fetch_now().await;
        monitor.fetch_now().await;

        let cached = monitor.snapshot().unwrap();
        assert_eq!(cached.snapshot.five_hour.utilization, 20.0);
    }

    #[tokio::test]
    async fn test_repeated_failures_without_data_stay_failed() {
        let source = ScriptedSource::new(vec![
            Err(ClientError::InvalidResponse("boom".to_string())),
            Err(ClientError::TokenExpired),
        ]);
        let monitor = UsageMonitor::new(source, RefreshInterval::default());

        monitor.fetch_now().await;
        monitor.fetch_now().await;

        let state = monitor.state();
        assert_eq!(state, MonitorState::Failed(ClientError::TokenExpired));
        assert!(state.error().unwrap().is_token_expired());
    }

    #[tokio::test]
    async fn test_loading_keeps_cached_snapshot() {
        let (source, gate, _calls) = gated();
        let monitor = UsageMonitor::new(source, RefreshInterval::default());

        gate.add_permits(1);
        monitor.fetch_now().await;
        let first = monitor.snapshot().unwrap();

        let background = monitor.clone();
        let pending = tokio::spawn(async move { background.fetch_now().await });
        tokio::task::yield_now().await;

        assert!(monitor.state().is_loading());
        assert_eq!(monitor.snapshot(), Some(first.clone()));
        assert_eq!(monitor.last_updated_at(), Some(first.fetched_at));

        gate.add_permits(1);
        assert!(pending.await.unwrap());
        assert!(matches!(monitor.state(), MonitorState::Cached { .. }));
    }

    #[tokio::test]
    async fn test_at_most_one_fetch_in_flight() {
        let (source, gate, calls) = gated();
        let monitor = UsageMonitor::new(source, RefreshInterval::default());

        let background = monitor.clone();
        let pending = tokio::spawn(async move { background.fetch_now().await });
        tokio::task::yield_now().await;

        assert!(!monitor.fetch_now().await);
        assert!(!monitor.fetch_now().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.add_permits(1);
        assert!(pending.await.unwrap());

        gate.add_permits(1);
        assert!(monitor.fetch_now().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_leaves_loading() {
        let (source, _gate, _calls) = gated();
        let monitor = UsageMonitor::new(source, RefreshInterval::default());

        let result = time::timeout(Duration::from_millis(20), monitor.fetch_now()).await;

        assert!(result.is_err());
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert!(!monitor.inner.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = UsageMonitor::new(ScriptedSource::always_ok(), RefreshInterval::default());
        let mut rx = monitor.subscribe();

        monitor.fetch_now().await;

        assert!(rx.has_changed().unwrap());
        assert!(matches!(
            *rx.borrow_and_update(),
            MonitorState::Cached { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fetches_then_polls() {
        let source = ScriptedSource::always_ok();
        let calls = Arc::clone(&source.calls);
        let monitor = UsageMonitor::new(source, RefreshInterval::ThirtySeconds);

        monitor.start();
        assert!(monitor.is_running());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(90)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refresh_interval_replaces_timer() {
        let source = ScriptedSource::always_ok();
        let calls = Arc::clone(&source.calls);
        let monitor = UsageMonitor::new(source, RefreshInterval::ThirtySeconds);

        monitor.start();
        time::sleep(Duration::from_secs(95)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        monitor.set_refresh_interval(RefreshInterval::OneMinute);
        assert_eq!(monitor.refresh_interval(), RefreshInterval::OneMinute);

        // new ticks at +60s and +120s only; a leftover 30s timer would add four more
        time::sleep(Duration::from_secs(130)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refresh_interval_while_stopped_does_not_start() {
        let source = ScriptedSource::always_ok();
        let calls = Arc::clone(&source.calls);
        let monitor = UsageMonitor::new(source, RefreshInterval::default());

        monitor.set_refresh_interval_secs(30).unwrap();
        assert!(!monitor.is_running());
        assert!(monitor.set_refresh_interval_secs(45).is_err());
        assert_eq!(monitor.refresh_interval(), RefreshInterval::ThirtySeconds);

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let source = ScriptedSource::always_ok();
        let calls = Arc::clone(&source.calls);
        let monitor = UsageMonitor::new(source, RefreshInterval::ThirtySeconds);

        monitor.start();
        time::sleep(Duration::from_secs(1)).await;
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_monitor_stops_timer() {
        let source = ScriptedSource::always_ok();
        let calls = Arc::clone(&source.calls);
        let monitor = UsageMonitor::new(source, RefreshInterval::ThirtySeconds);

        monitor.start();
        time::sleep(Duration::from_secs(1)).await;
        drop(monitor);

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_tick_during_slow_fetch_is_skipped() {
        let (source, gate, calls) = gated();
        let monitor = UsageMonitor::new(source, RefreshInterval::ThirtySeconds);

        monitor.start();
        time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.add_permits(1);
        time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(monitor.state(), MonitorState::Cached { .. }));
        monitor.stop();
    }
}
