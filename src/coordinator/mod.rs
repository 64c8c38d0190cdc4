//! Periodic coordinators
//!
//! One [`Coordinator`] drives one pipeline: it runs an awaited first refresh,
//! then polls on an interval until stopped. A coordinator whose first refresh
//! failed retries with backoff, capped at its interval, until it commits. At
//! most one poll per coordinator is in flight at any time, whether it came from
//! a tick or a manual refresh, and ticks that fire while a poll is running are
//! dropped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod store;

pub use store::{CoordinatorReader, PollStatus, SnapshotStore};

use crate::config::PollOptions;
use crate::errors::{AppError, AppResult, DeviceError};
use crate::pipelines::PollPipeline;
use crate::utils::Backoff;

/// Shortest interval a coordinator will tick at
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Committed,
    Failed(DeviceError),
    /// Another poll was already in flight
    Skipped,
    /// The coordinator was stopped before the poll finished
    Cancelled,
}

/// Where a coordinator takes its interval from
#[derive(Debug, Clone)]
pub enum IntervalSource {
    Fixed(Duration),
    /// Follows `poll_interval` of the live options
    Options(watch::Receiver<PollOptions>),
}

impl IntervalSource {
    fn current(&mut self) -> Duration {
        let interval = match self {
            Self::Fixed(interval) => *interval,
            Self::Options(rx) => rx.borrow_and_update().poll_interval,
        };
        interval.max(MIN_INTERVAL)
    }

    /// Resolves with the new interval when it changes, never for fixed sources
    async fn changed(&mut self) -> Duration {
        if let Self::Options(rx) = self {
            if rx.changed().await.is_ok() {
                return rx.borrow_and_update().poll_interval.max(MIN_INTERVAL);
            }
        }
        std::future::pending().await
    }
}

/// Releases the single-flight flag when the poll ends or is abandoned
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared<P: PollPipeline> {
    pipeline: P,
    store: SnapshotStore<P::Output>,
    in_flight: AtomicBool,
}

impl<P: PollPipeline> Shared<P> {
    async fn refresh(&self) -> RefreshOutcome {
        let name = self.pipeline.name();
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("{} poll already in flight, skipping", name);
            return RefreshOutcome::Skipped;
        };

        match self.pipeline.poll().await {
            Ok(payload) => {
                let snapshot = self.store.commit(payload);
                debug!("{} snapshot committed at {}", name, snapshot.fetched_at);
                self.pipeline.on_commit(&snapshot);
                RefreshOutcome::Committed
            }
            Err(e) => {
                if e.is_auth_failure() {
                    error!("{} poll rejected credentials, re-authentication required: {}", name, e);
                } else {
                    warn!("{} poll failed ({}): {}", name, e.kind(), e);
                }
                self.store.record_failure(&e);
                RefreshOutcome::Failed(e)
            }
        }
    }
}

/// Schedules one pipeline and owns its snapshot store
pub struct Coordinator<P: PollPipeline> {
    shared: Arc<Shared<P>>,
    interval: IntervalSource,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: PollPipeline> Coordinator<P> {
    pub fn new(pipeline: P, interval: IntervalSource, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                pipeline,
                store: SnapshotStore::new(),
                in_flight: AtomicBool::new(false),
            }),
            interval,
            cancel,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.pipeline.name()
    }

    pub fn pipeline(&self) -> &P {
        &self.shared.pipeline
    }

    pub fn reader(&self) -> CoordinatorReader<P::Output> {
        self.shared.store.reader()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Run one poll now, subject to the single-flight guard
    pub async fn refresh(&self) -> RefreshOutcome {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => RefreshOutcome::Cancelled,
            outcome = self.shared.refresh() => outcome,
        }
    }

    /// Awaited initial poll, the coordinator is ready only if it commits
    pub async fn first_refresh(&self) -> AppResult<()> {
        match self.refresh().await {
            RefreshOutcome::Committed => {
                info!("{} coordinator ready", self.name());
                Ok(())
            }
            RefreshOutcome::Failed(e) => Err(AppError::not_ready(self.name(), e)),
            RefreshOutcome::Skipped => Err(AppError::internal(format!(
                "{} first refresh overlapped another poll",
                self.name()
            ))),
            RefreshOutcome::Cancelled => Err(AppError::internal(format!(
                "{} coordinator stopped during first refresh",
                self.name()
            ))),
        }
    }

    /// Start the periodic loop, the first tick comes one interval from now
    pub fn spawn(&self) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!("{} coordinator already running", self.name());
            return;
        }

        let shared = self.shared.clone();
        let mut interval = self.interval.clone();
        let cancel = self.cancel.clone();
        *slot = Some(tokio::spawn(async move {
            run_loop(shared, &mut interval, cancel).await;
        }));
    }

    /// Cancel the loop and wait for it to exit. An in-flight poll is dropped
    /// without publishing.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("{} coordinator task ended abnormally: {}", self.name(), e);
            }
            info!("{} coordinator stopped", self.name());
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_loop<P: PollPipeline>(
    shared: Arc<Shared<P>>,
    interval: &mut IntervalSource,
    cancel: CancellationToken,
) {
    let name = shared.pipeline.name();
    if !shared.store.is_ready() && !retry_until_ready(&shared, interval.current(), &cancel).await {
        return;
    }

    let mut period = interval.current();
    let mut ticks = ticker(period);
    let mut current: Option<JoinHandle<()>> = None;
    info!("{} coordinator polling every {:?}", name, period);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = interval.changed() => {
                if next != period {
                    info!("{} coordinator interval changed {:?} -> {:?}", name, period, next);
                    period = next;
                    ticks = ticker(period);
                }
            }
            _ = ticks.tick() => {
                if current.as_ref().is_some_and(|poll| !poll.is_finished()) {
                    debug!("{} tick dropped, poll still in flight", name);
                    continue;
                }
                let shared = shared.clone();
                current = Some(tokio::spawn(async move {
                    let outcome = shared.refresh().await;
                    debug!("{} scheduled refresh: {:?}", shared.pipeline.name(), outcome);
                }));
            }
        }
    }

    if let Some(poll) = current.take() {
        if !poll.is_finished() {
            debug!("{} poll abandoned on shutdown", name);
        }
        poll.abort();
        let _ = poll.await;
    }
}

/// Retry a coordinator that is not ready yet. False when cancelled first.
async fn retry_until_ready<P: PollPipeline>(
    shared: &Shared<P>,
    period: Duration,
    cancel: &CancellationToken,
) -> bool {
    let name = shared.pipeline.name();
    let backoff = Backoff::default();
    let mut attempt = 0u32;
    while !shared.store.is_ready() {
        attempt = attempt.saturating_add(1);
        let delay = backoff.delay(attempt).min(period);
        debug!("{} not ready, retry {} in {:?}", name, attempt, delay);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            outcome = async {
                time::sleep(delay).await;
                shared.refresh().await
            } => outcome,
        };
        if outcome == RefreshOutcome::Committed {
            info!("{} coordinator ready after {} retries", name, attempt);
        }
    }
    true
}
