//! Single-flight sync runs for one dataset.
//!
//! A run walks `Fetching → Validating → Writing` and ends idle, either with
//! a recorded success or a recorded [`ErrorKind`]. Concurrent callers share
//! one run: the in-flight slot stores a weak handle to the shared future, so
//! when every caller drops its handle the run is cancelled and the slot
//! empties itself.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use log::{debug, error, info, warn};
use thiserror::Error;
use transit_core::{SqliteStore, StoreError, StoreTransaction};

use super::{ErrorKind, SyncPhase, SyncPolicy, SyncState, SyncUrgency, last_success_key};
use crate::{
    api::{ApiError, PayloadError, TransitApi},
    flags::FeatureFlags,
    ratelimit::{AcquireResult, RateLimiter},
};

/// Errors returned by a sync run.
///
/// Cloneable so every caller joined to one run receives the same error.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The transit API request failed.
    #[error("transit API request failed: {0}")]
    Api(#[from] ApiError),
    /// The rate limiter refused the request.
    #[error("rate limit exhausted; retry after {retry_after:?}")]
    RateLimited {
        /// Wait reported by the limiter.
        retry_after: Duration,
    },
    /// The payload failed validation.
    #[error("payload rejected: {0}")]
    InvalidPayload(#[from] PayloadError),
    /// The store rejected the write.
    #[error("store write failed: {0}")]
    Storage(#[source] Arc<StoreError>),
    /// The blocking store task panicked or was cancelled.
    #[error("store task did not complete: {message}")]
    StorageTask {
        /// Join error text.
        message: String,
    },
}

impl SyncError {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(ApiError::Decode { .. }) | Self::InvalidPayload(_) => {
                ErrorKind::InvalidPayload
            }
            Self::Api(_) => ErrorKind::Network,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Storage(err) if err.is_migration_failure() => ErrorKind::MigrationFailed,
            Self::Storage(_) | Self::StorageTask { .. } => ErrorKind::StorageFailure,
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Api(err) => err.is_transient(),
            Self::RateLimited { .. } => true,
            Self::InvalidPayload(_) | Self::Storage(_) | Self::StorageTask { .. } => false,
        }
    }

    fn storage(err: StoreError) -> Self {
        Self::Storage(Arc::new(err))
    }

    fn task(err: &tokio::task::JoinError) -> Self {
        Self::StorageTask {
            message: err.to_string(),
        }
    }
}

/// Result of a sync call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A run fetched, validated and committed a batch.
    Synced(SyncReport),
    /// Feature flags leave nothing to sync; the network was not touched.
    Skipped {
        /// Why the run was skipped.
        reason: &'static str,
    },
    /// The persisted data is younger than the requested maximum age.
    Fresh {
        /// Completion time of the last successful run.
        last_success: SystemTime,
    },
}

/// Summary of a committed sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Dataset name.
    pub dataset: &'static str,
    /// Records upserted in the committed transaction.
    pub records_written: usize,
    /// Most attempts any single request needed, including rate-limit waits.
    pub attempts: u32,
    /// When the transaction committed.
    pub completed_at: SystemTime,
}

/// Rate limiting and retries for the requests of one sync run.
///
/// Each request passed to [`RequestGate::send`] retries on its own, so a
/// payload already downloaded by an earlier request of the run survives a
/// later request's rate-limit wait.
#[derive(Debug)]
pub struct RequestGate<'a> {
    limiter: &'a RateLimiter,
    policy: SyncPolicy,
    urgency: SyncUrgency,
    reserved: AtomicU32,
    attempts: AtomicU32,
}

impl<'a> RequestGate<'a> {
    /// Gate requests through `limiter`, retrying as `policy` and `urgency`
    /// allow.
    #[must_use]
    pub const fn new(limiter: &'a RateLimiter, policy: SyncPolicy, urgency: SyncUrgency) -> Self {
        Self {
            limiter,
            policy,
            urgency,
            reserved: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Reserve tokens for `requests` requests up front.
    ///
    /// Foreground runs fail here when the window cannot fit the whole run,
    /// before anything is downloaded. Background runs reserve nothing and
    /// wait per request instead.
    pub fn reserve(&self, requests: u32) -> Result<(), SyncError> {
        if self.urgency == SyncUrgency::Background {
            return Ok(());
        }
        match self.limiter.try_acquire_many(requests) {
            AcquireResult::Allowed => {
                self.reserved.store(requests, Ordering::Relaxed);
                Ok(())
            }
            AcquireResult::Denied { retry_after } => Err(SyncError::RateLimited { retry_after }),
        }
    }

    /// Highest attempt number any request of the run needed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed).max(1)
    }

    /// Send one request, retrying it until it succeeds or the policy gives
    /// up.
    ///
    /// A rate-limit denial fails a foreground run at once. A background run
    /// waits out the denial once per request; a second denial fails the
    /// run. Transient API errors back off between attempts. Every attempt,
    /// including a rate-limit wait, counts against the attempt budget.
    pub async fn send<T, F, Fut>(
        &self,
        endpoint: &'static str,
        mut request: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;
        let mut waited_for_window = false;
        loop {
            let err = match self.acquire() {
                AcquireResult::Allowed => match request().await {
                    Ok(value) => {
                        self.attempts.fetch_max(attempt, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(err) => SyncError::Api(err),
                },
                AcquireResult::Denied { retry_after } => SyncError::RateLimited { retry_after },
            };

            let delay = match &err {
                SyncError::RateLimited { retry_after }
                    if self.urgency == SyncUrgency::Background && !waited_for_window =>
                {
                    waited_for_window = true;
                    Some(*retry_after)
                }
                SyncError::RateLimited { .. } => None,
                other if other.is_transient() => Some(self.policy.backoff_after(attempt)),
                _ => None,
            };
            match delay {
                Some(delay) if attempt < max_attempts => {
                    warn!(
                        "{endpoint} request attempt {attempt}/{max_attempts} failed: {err}; \
                         retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    self.attempts.fetch_max(attempt, Ordering::Relaxed);
                    warn!("{endpoint} request failed after {attempt} attempt(s): {err}");
                    return Err(err);
                }
            }
        }
    }

    fn acquire(&self) -> AcquireResult {
        let reserved = self
            .reserved
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| left.checked_sub(1));
        if reserved.is_ok() {
            AcquireResult::Allowed
        } else {
            self.limiter.try_acquire()
        }
    }
}

/// A remote dataset that can be fetched, validated and written.
#[async_trait]
pub trait Dataset: Send + Sync + 'static {
    /// Raw documents returned by the API.
    type Payload: Send;
    /// Validated records ready to write.
    type Batch: Send + 'static;

    /// Name used in logs and bookkeeping keys.
    const NAME: &'static str;

    /// API requests one run sends when nothing needs retrying.
    const REQUESTS: u32;

    /// Reason to skip the run under `flags`, checked before any request.
    fn skip_reason(&self, _flags: &dyn FeatureFlags) -> Option<&'static str> {
        None
    }

    /// Fetch the raw payload. Every request must go through
    /// [`RequestGate::send`].
    async fn fetch(
        &self,
        api: &dyn TransitApi,
        gate: &RequestGate<'_>,
    ) -> Result<Self::Payload, SyncError>;

    /// Turn the payload into a writable batch.
    fn validate(
        &self,
        payload: Self::Payload,
        flags: &dyn FeatureFlags,
    ) -> Result<Self::Batch, PayloadError>;

    /// Write `batch` inside the sync transaction. Returns the number of
    /// records written.
    fn write(transaction: &StoreTransaction<'_>, batch: &Self::Batch) -> Result<usize, StoreError>;
}

/// Collaborators shared by every sync service of one process.
#[derive(Clone)]
pub struct SyncResources {
    /// Transit API client.
    pub api: Arc<dyn TransitApi>,
    /// Destination store.
    pub store: Arc<SqliteStore>,
    /// Limiter guarding every API request.
    pub limiter: Arc<RateLimiter>,
    /// Remote feature flags.
    pub flags: Arc<dyn FeatureFlags>,
}

impl fmt::Debug for SyncResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncResources")
            .field("store", &self.store)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

type RunFuture = BoxFuture<'static, Result<SyncOutcome, SyncError>>;

struct InFlight {
    generation: u64,
    run: WeakShared<RunFuture>,
}

/// Sync service for dataset `D`.
///
/// Cloning yields another handle to the same service and state.
pub struct SyncService<D: Dataset> {
    inner: Arc<Inner<D>>,
}

impl<D: Dataset> Clone for SyncService<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dataset> fmt::Debug for SyncService<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("dataset", &D::NAME)
            .field("policy", &self.inner.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Inner<D> {
    dataset: D,
    resources: SyncResources,
    policy: SyncPolicy,
    state: Mutex<SyncState>,
    in_flight: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: Dataset> SyncService<D> {
    /// Create a service for `dataset`.
    pub fn new(dataset: D, resources: SyncResources, policy: SyncPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                dataset,
                resources,
                policy,
                state: Mutex::new(SyncState::default()),
                in_flight: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Run a sync, or join the one already running.
    ///
    /// A joined caller shares the running attempt's urgency and result.
    pub async fn sync(&self, urgency: SyncUrgency) -> Result<SyncOutcome, SyncError> {
        self.join_or_start(urgency).await
    }

    /// Sync only when the last persisted success is older than `max_age`.
    pub async fn sync_if_stale(
        &self,
        urgency: SyncUrgency,
        max_age: Duration,
    ) -> Result<SyncOutcome, SyncError> {
        if let Some(last_success) = self.last_success().await? {
            let age = SystemTime::now()
                .duration_since(last_success)
                .unwrap_or(Duration::ZERO);
            if age < max_age {
                debug!("{} data is {age:?} old; skipping sync", D::NAME);
                return Ok(SyncOutcome::Fresh { last_success });
            }
        }
        self.sync(urgency).await
    }

    /// Last successful completion recorded in the store, across restarts.
    pub async fn last_success(&self) -> Result<Option<SystemTime>, SyncError> {
        let store = Arc::clone(&self.inner.resources.store);
        let key = last_success_key(D::NAME);
        let stored = tokio::task::spawn_blocking(move || store.preference(&key))
            .await
            .map_err(|err| SyncError::task(&err))?
            .map_err(SyncError::storage)?;
        Ok(stored.and_then(|value| match value.parse::<u64>() {
            Ok(millis) => Some(UNIX_EPOCH + Duration::from_millis(millis)),
            Err(_) => {
                warn!("ignoring unreadable {} sync timestamp {value:?}", D::NAME);
                None
            }
        }))
    }

    /// Snapshot of the service state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        lock(&self.inner.state).clone()
    }

    fn join_or_start(&self, urgency: SyncUrgency) -> Shared<RunFuture> {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(run) = slot.as_ref().and_then(|in_flight| in_flight.run.upgrade()) {
            debug!("{} sync already running; joining it", D::NAME);
            return run;
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let run = async move {
            let result = inner.run(urgency).await;
            inner.release(generation);
            result
        }
        .boxed()
        .shared();
        *slot = run
            .downgrade()
            .map(|weak| InFlight { generation, run: weak });
        run
    }
}

impl<D: Dataset> Inner<D> {
    fn release(&self, generation: u64) {
        let mut slot = lock(&self.in_flight);
        if slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            *slot = None;
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        lock(&self.state).phase = phase;
    }

    async fn run(&self, urgency: SyncUrgency) -> Result<SyncOutcome, SyncError> {
        let _active = ActiveRun::enter(&self.state);
        let result = self.execute(urgency).await;
        self.record(&result);
        result
    }

    async fn execute(&self, urgency: SyncUrgency) -> Result<SyncOutcome, SyncError> {
        let flags = self.resources.flags.as_ref();
        if let Some(reason) = self.dataset.skip_reason(flags) {
            info!("{} sync skipped: {reason}", D::NAME);
            return Ok(SyncOutcome::Skipped { reason });
        }

        let (payload, attempts) = self.fetch_payload(urgency).await?;

        self.set_phase(SyncPhase::Validating);
        let batch = self
            .dataset
            .validate(payload, flags)
            .inspect_err(|err| error!("{} payload rejected: {err}", D::NAME))?;

        self.set_phase(SyncPhase::Writing);
        let (records_written, completed_at) = self.write(batch).await?;
        info!(
            "{} sync committed {records_written} records after {attempts} attempt(s)",
            D::NAME
        );
        Ok(SyncOutcome::Synced(SyncReport {
            dataset: D::NAME,
            records_written,
            attempts,
            completed_at,
        }))
    }

    async fn fetch_payload(&self, urgency: SyncUrgency) -> Result<(D::Payload, u32), SyncError> {
        let gate = RequestGate::new(&self.resources.limiter, self.policy, urgency);
        gate.reserve(D::REQUESTS)
            .inspect_err(|err| warn!("{} sync not started: {err}", D::NAME))?;
        let payload = self
            .dataset
            .fetch(self.resources.api.as_ref(), &gate)
            .await?;
        Ok((payload, gate.attempts()))
    }

    async fn write(&self, batch: D::Batch) -> Result<(usize, SystemTime), SyncError> {
        let store = Arc::clone(&self.resources.store);
        let key = last_success_key(D::NAME);
        tokio::task::spawn_blocking(move || {
            let completed_at = SystemTime::now();
            let stamp = epoch_millis(completed_at).to_string();
            store
                .write(D::NAME, |transaction| {
                    let written = D::write(transaction, &batch)?;
                    transaction.set_preference(&key, &stamp)?;
                    Ok(written)
                })
                .map(|written| (written, completed_at))
        })
        .await
        .map_err(|err| SyncError::task(&err))?
        .map_err(|err| {
            error!("{} write failed; keeping previous data: {err}", D::NAME);
            SyncError::storage(err)
        })
    }

    fn record(&self, result: &Result<SyncOutcome, SyncError>) {
        let mut state = lock(&self.state);
        match result {
            Ok(SyncOutcome::Synced(report)) => {
                state.last_success = Some(report.completed_at);
                state.last_error = None;
            }
            Ok(SyncOutcome::Skipped { .. } | SyncOutcome::Fresh { .. }) => {}
            Err(err) => state.last_error = Some(err.kind()),
        }
    }
}

/// Marks a run active; clearing happens on drop so cancelled runs reset too.
struct ActiveRun<'a> {
    state: &'a Mutex<SyncState>,
}

impl<'a> ActiveRun<'a> {
    fn enter(state: &'a Mutex<SyncState>) -> Self {
        let mut guard = lock(state);
        guard.in_progress = true;
        guard.phase = SyncPhase::Fetching;
        drop(guard);
        Self { state }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.in_progress = false;
        state.phase = SyncPhase::Idle;
    }
}

fn epoch_millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
}
