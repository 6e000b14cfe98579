//! Read-through cache for the single defaults entry.
//!
//! The cache holds at most one value. Readers never wait on storage once a
//! value has been installed, even a stale one; only a reader arriving before
//! anything was ever cached blocks, and all such readers share one fetch.
//! Fetches always run on the [`RefreshExecutor`], never under the state lock.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use concern_core::{
    CachedEntry, ConfigError, DefaultsError, DefaultsResult, DefaultsValue, OperationContext,
    StorageError,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::freshness::{should_replace, EntryState};
use super::stats::{CacheCounters, CacheStats};
use crate::executor::RefreshExecutor;
use crate::fetcher::DefaultsFetcher;

/// Configuration for the defaults cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on a single fetch; expiry counts as a fetch failure.
    pub fetch_timeout: Duration,
    /// Minimum spacing between opportunistic retries after a failed refresh.
    pub stale_retry_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            stale_retry_backoff: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upper bound on a single fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the minimum spacing between retries after a failed refresh.
    pub fn with_stale_retry_backoff(mut self, backoff: Duration) -> Self {
        self.stale_retry_backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "fetch_timeout".to_string(),
                value: format!("{:?}", self.fetch_timeout),
                reason: "fetch_timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
enum Slot {
    /// No entry was ever installed.
    #[default]
    Empty,
    /// An entry was installed. `None` means the store holds no defaults.
    Filled(Option<Arc<CachedEntry>>),
}

impl Slot {
    fn filled(&self) -> Option<Option<Arc<CachedEntry>>> {
        match self {
            Slot::Empty => None,
            Slot::Filled(entry) => Some(entry.clone()),
        }
    }

    fn cached_value(&self) -> Option<&DefaultsValue> {
        match self {
            Slot::Filled(Some(entry)) => Some(&entry.defaults),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct CacheState {
    slot: Slot,
    stale: bool,
    /// Ticket the next dispatched fetch will carry.
    next_ticket: u64,
    /// Ticket of the fetch in flight. At most one at a time.
    running: Option<u64>,
    /// A fetch that starts after the running one finishes has been requested.
    rerun_requested: bool,
    /// Fetches with a ticket at or below this were overtaken by `set`; their
    /// results are discarded.
    superseded_through: u64,
    last_failure: Option<Instant>,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            slot: Slot::Empty,
            stale: false,
            next_ticket: 1,
            running: None,
            rerun_requested: false,
            superseded_through: 0,
            last_failure: None,
        }
    }
}

impl CacheState {
    fn entry_state(&self) -> EntryState {
        match (&self.slot, self.stale) {
            (Slot::Empty, _) => EntryState::Absent,
            (Slot::Filled(_), false) => EntryState::Valid,
            (Slot::Filled(_), true) => EntryState::Stale,
        }
    }
}

/// Completion notice for a fetch, published to every waiter.
#[derive(Debug, Clone)]
struct FetchReport {
    ticket: u64,
    outcome: Result<(), DefaultsError>,
}

struct CacheInner {
    fetcher: Arc<dyn DefaultsFetcher>,
    executor: Arc<RefreshExecutor>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    reports: watch::Sender<FetchReport>,
    counters: CacheCounters,
}

/// A fetch that holds a ticket but has not been handed to the executor yet.
///
/// Reserved under the state lock, dispatched after it is released.
#[must_use]
struct PendingFetch {
    ticket: u64,
    ctx: OperationContext,
}

impl CacheInner {
    /// Claim the next ticket and mark it running. Caller holds the state lock
    /// and has checked that no fetch is running.
    fn reserve_fetch(&self, state: &mut CacheState, ctx: OperationContext) -> PendingFetch {
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.running = Some(ticket);
        self.counters.fetch();
        PendingFetch { ticket, ctx }
    }

    /// Hand reserved fetches to the executor. Must not be called with the
    /// state lock held.
    fn dispatch(self: &Arc<Self>, mut pending: Option<PendingFetch>) {
        while let Some(PendingFetch { ticket, ctx }) = pending.take() {
            let inner = Arc::clone(self);
            let task_ctx = ctx.clone();
            let spawned = self.executor.spawn(move || {
                let task = FetchTask {
                    inner,
                    ticket,
                    ctx: task_ctx,
                };
                task.run()
            });
            match spawned {
                Ok(()) => {
                    tracing::debug!(ticket, "Scheduled read/write concern defaults fetch");
                }
                Err(err) => {
                    let mut state = self.state.lock();
                    pending = self.settle(&mut state, ticket, &ctx, Err(err));
                }
            }
        }
    }

    async fn run_fetch(self: &Arc<Self>, ticket: u64, ctx: &OperationContext) {
        let fetched =
            match tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::FetchTimedOut {
                    after: self.config.fetch_timeout,
                }
                .into()),
            };
        let follow_up = {
            let mut state = self.state.lock();
            self.settle(&mut state, ticket, ctx, fetched)
        };
        self.dispatch(follow_up);
    }

    /// Record the result of fetch `ticket` and wake its waiters.
    ///
    /// Returns the follow-up fetch if an invalidation arrived meanwhile.
    fn settle(
        &self,
        state: &mut CacheState,
        ticket: u64,
        ctx: &OperationContext,
        fetched: DefaultsResult<Option<DefaultsValue>>,
    ) -> Option<PendingFetch> {
        state.running = None;
        let outcome = match fetched {
            Ok(latest) => {
                state.last_failure = None;
                self.install_fetched(state, ticket, latest);
                Ok(())
            }
            Err(err) => {
                state.last_failure = Some(Instant::now());
                self.counters.fetch_failure();
                tracing::warn!(
                    ticket,
                    op_id = %ctx.op_id(),
                    error = %err,
                    "Failed to fetch read/write concern defaults; keeping cached entry"
                );
                Err(err)
            }
        };
        // Published under the lock so reports always arrive in ticket order.
        self.reports.send_replace(FetchReport { ticket, outcome });

        if std::mem::take(&mut state.rerun_requested) {
            Some(self.reserve_fetch(state, OperationContext::background()))
        } else {
            None
        }
    }

    fn install_fetched(&self, state: &mut CacheState, ticket: u64, latest: Option<DefaultsValue>) {
        if ticket <= state.superseded_through {
            tracing::debug!(ticket, "Discarding fetch result overtaken by an installed value");
        } else if should_replace(state.slot.cached_value(), latest.as_ref()) {
            let epoch = latest.as_ref().map(|value| value.epoch);
            state.slot = Slot::Filled(latest.map(|value| Arc::new(CachedEntry::new(value))));
            self.counters.replacement();
            tracing::debug!(epoch = ?epoch, "Installed fetched read/write concern defaults");
        } else {
            tracing::trace!("Fetched read/write concern defaults are not newer than cached");
        }
        // A pending rerun means an invalidation arrived while this fetch ran.
        state.stale = state.rerun_requested;
    }

    fn invalidate(self: &Arc<Self>) {
        self.counters.invalidation();
        let (populated, pending) = {
            let mut state = self.state.lock();
            let populated = state.entry_state().is_populated();
            if populated {
                state.stale = true;
            }
            let pending = if state.running.is_some() {
                state.rerun_requested = true;
                None
            } else if populated {
                Some(self.reserve_fetch(&mut state, OperationContext::background()))
            } else {
                None
            };
            (populated, pending)
        };
        self.dispatch(pending);
        tracing::debug!(populated, "Invalidated read/write concern defaults");
    }

    /// Reserve a retry for a stale entry whose last refresh failed, once the
    /// backoff has passed.
    fn retry_stale_refresh(&self, state: &mut CacheState) -> Option<PendingFetch> {
        if state.running.is_some() {
            return None;
        }
        if let Some(failed_at) = state.last_failure {
            if failed_at.elapsed() < self.config.stale_retry_backoff {
                return None;
            }
        }
        Some(self.reserve_fetch(state, OperationContext::background()))
    }
}

/// One dispatched fetch.
///
/// Owns the fetch until it settles. If the task is dropped first (the fetcher
/// panicked, or shutdown aborted the task), `Drop` settles it as failed so
/// waiters wake and later reads can start a new fetch.
struct FetchTask {
    inner: Arc<CacheInner>,
    ticket: u64,
    ctx: OperationContext,
}

impl FetchTask {
    async fn run(self) {
        self.inner.run_fetch(self.ticket, &self.ctx).await;
    }
}

impl Drop for FetchTask {
    fn drop(&mut self) {
        let follow_up = {
            let mut state = self.inner.state.lock();
            if state.running != Some(self.ticket) {
                return;
            }
            if std::thread::panicking() {
                let err = StorageError::FetchFailed {
                    reason: "fetch task panicked".to_string(),
                };
                self.inner
                    .settle(&mut state, self.ticket, &self.ctx, Err(err.into()))
            } else {
                // Aborted or never polled: the executor takes no more work, and
                // this may run inside its spawn. Fail the follow-up in place.
                let mut follow_up = self.inner.settle(
                    &mut state,
                    self.ticket,
                    &self.ctx,
                    Err(StorageError::ExecutorShutdown.into()),
                );
                while let Some(PendingFetch { ticket, ctx }) = follow_up.take() {
                    follow_up = self.inner.settle(
                        &mut state,
                        ticket,
                        &ctx,
                        Err(StorageError::ExecutorShutdown.into()),
                    );
                }
                None
            }
        };
        self.inner.dispatch(follow_up);
    }
}

/// Wait until a fetch with `ticket` or later has reported.
///
/// A later report supersedes an earlier one: it describes a fetch that started
/// no earlier than the one the caller asked for.
async fn wait_for_report(
    reports: &mut watch::Receiver<FetchReport>,
    ticket: u64,
    ctx: &OperationContext,
) -> DefaultsResult<FetchReport> {
    let wait = async {
        reports
            .wait_for(|report| report.ticket >= ticket)
            .await
            .map(|report| (*report).clone())
    };
    let waited = match ctx.remaining() {
        Some(remaining) => tokio::time::timeout(remaining, wait)
            .await
            .map_err(|_| StorageError::WaitTimedOut)?,
        None => wait.await,
    };
    waited.map_err(|_| StorageError::ExecutorShutdown.into())
}

/// Read-through, singleflight cache holding the read/write concern defaults.
///
/// # State machine
///
/// `Absent -> Valid` on the first fetch, `Valid -> Stale` on `invalidate`,
/// `Stale -> Valid` when a refresh completes (the value may be unchanged if the
/// fetched epoch was not greater), and any state `-> Valid` on `set`.
///
/// # Example
///
/// ```ignore
/// let cache = DefaultsCache::new(fetcher, executor, CacheConfig::default());
///
/// // Blocks only the first time; afterwards answers from memory.
/// let entry = cache.read(&ctx).await?;
///
/// // Returns immediately; the refresh happens on the executor.
/// cache.invalidate();
/// ```
#[derive(Clone)]
pub struct DefaultsCache {
    inner: Arc<CacheInner>,
}

impl DefaultsCache {
    pub fn new(
        fetcher: Arc<dyn DefaultsFetcher>,
        executor: Arc<RefreshExecutor>,
        config: CacheConfig,
    ) -> Self {
        let (reports, _) = watch::channel(FetchReport {
            ticket: 0,
            outcome: Ok(()),
        });
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                executor,
                config,
                state: Mutex::new(CacheState::default()),
                reports,
                counters: CacheCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the cached entry, fetching only if nothing was ever cached.
    ///
    /// `Ok(None)` means no defaults are configured. A stale entry is returned
    /// as is; if its last refresh failed, a retry is scheduled in the background.
    pub async fn read(&self, ctx: &OperationContext) -> DefaultsResult<Option<Arc<CachedEntry>>> {
        loop {
            let (ticket, mut reports) = {
                let mut state = self.inner.state.lock();
                if let Some(entry) = state.slot.filled() {
                    self.inner.counters.hit();
                    let retry = if state.stale {
                        self.inner.retry_stale_refresh(&mut state)
                    } else {
                        None
                    };
                    drop(state);
                    self.inner.dispatch(retry);
                    return Ok(entry);
                }
                self.inner.counters.miss();
                let (ticket, pending) = match state.running {
                    Some(ticket) => (ticket, None),
                    None => {
                        let pending = self.inner.reserve_fetch(&mut state, ctx.clone());
                        (pending.ticket, Some(pending))
                    }
                };
                let reports = self.inner.reports.subscribe();
                drop(state);
                self.inner.dispatch(pending);
                (ticket, reports)
            };

            let report = wait_for_report(&mut reports, ticket, ctx).await?;
            // A concurrent `set` may have filled the entry even if the fetch failed.
            let filled = self.inner.state.lock().slot.filled();
            match (filled, report.outcome) {
                (Some(entry), _) => return Ok(entry),
                (None, Err(err)) => return Err(err),
                (None, Ok(())) => continue,
            }
        }
    }

    /// Mark the entry stale and schedule a refresh. Never waits.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Fetch the latest value and apply it under the epoch rule, waiting for
    /// the result.
    ///
    /// If a fetch is already running, a follow-up fetch is requested and
    /// awaited instead, since the running one may predate the caller.
    pub async fn refresh_now(&self, ctx: &OperationContext) -> DefaultsResult<()> {
        let (ticket, mut reports) = {
            let mut state = self.inner.state.lock();
            let (ticket, pending) = if state.running.is_some() {
                state.rerun_requested = true;
                (state.next_ticket, None)
            } else {
                let pending = self.inner.reserve_fetch(&mut state, ctx.clone());
                (pending.ticket, Some(pending))
            };
            let reports = self.inner.reports.subscribe();
            drop(state);
            self.inner.dispatch(pending);
            (ticket, reports)
        };
        wait_for_report(&mut reports, ticket, ctx).await?.outcome
    }

    /// Install `value` unconditionally, stamped with the current time.
    ///
    /// A fetch already in flight is superseded: its waiters still wake, but
    /// its result is discarded. Fetches started afterwards apply as usual.
    pub fn set(&self, value: DefaultsValue) {
        let epoch = value.epoch;
        let entry = Arc::new(CachedEntry::new(value));
        let mut state = self.inner.state.lock();
        if let Some(ticket) = state.running {
            state.superseded_through = ticket;
        }
        state.slot = Slot::Filled(Some(entry));
        state.stale = false;
        self.inner.counters.replacement();
        tracing::debug!(%epoch, "Installed read/write concern defaults");
    }

    /// Current entry without fetching. `None` if nothing was ever cached.
    pub fn peek(&self) -> Option<Option<Arc<CachedEntry>>> {
        self.inner.state.lock().slot.filled()
    }

    pub fn state(&self) -> EntryState {
        self.inner.state.lock().entry_state()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// Weak handle that can invalidate this cache from commit callbacks.
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Invalidation handle that does not keep the cache alive.
#[derive(Clone)]
pub struct CacheInvalidator {
    inner: Weak<CacheInner>,
}

impl CacheInvalidator {
    /// Invalidate the cache if it still exists. Returns false once it is gone.
    pub fn invalidate(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.invalidate();
                true
            }
            None => false,
        }
    }
}
