//! Job manager: turns refresh signals into jobs and validates shares against
//! them.
//!
//! One dispatcher task ([`JobManager::run`]) drains the refresh queue in
//! arrival order, fetching a template, building a job and publishing it for
//! each request that needs one. Share submission runs concurrently from any
//! number of connection tasks through [`JobManager::submit_share`].
//!
//! ```text
//!  sources ──► refresh queue ──► dispatcher ──► fetch ──► build ──► JobStore
//!                   ▲                                         │
//!                   │                                         ├──► JobBroadcast
//!                   │                                         └──► NewChainHeight
//!  submit_share ──► validate ──► (candidate) submitblock ─────┘
//!                                       │
//!                                       └── block-found ──► refresh queue
//! ```

pub mod fetcher;
pub mod store;

use std::future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::ChainParams;
use crate::config::PoolConfig;
use crate::extranonce::{Extranonce1, ExtranonceError, ExtranonceProvider};
use crate::job::{self, BuildError, Job, JobBroadcast, JobBuilder, JobId, JobIdSequence};
use crate::notification::PoolNotification;
use crate::rpc::BlockchainDaemon;
use crate::share::{BlockReconciler, Share, ShareError, ShareValidator, Submission, WorkerContext};
use crate::template_source::{
    BootstrapSource, ForceRefreshClock, PollSource, PushSource, RefreshReason, RefreshRequest,
    RefreshSender, StreamSource, TemplateSourceMode,
};
use crate::tracing::prelude::*;
use crate::types::{AlarmStatus, DebouncedAlarm};
use fetcher::FetchError;
use store::JobStore;

const REFRESH_QUEUE_DEPTH: usize = 32;
const JOB_BROADCAST_CAPACITY: usize = 16;
const NOTIFICATION_CAPACITY: usize = 64;

/// How long refreshes must keep failing before it is logged as an error.
const REFRESH_ALARM_DEBOUNCE: Duration = Duration::from_secs(30);

/// Errors from one refresh cycle. Logged by the dispatcher, never fatal.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("job build failed: {0}")]
    Build(#[from] BuildError),
}

/// What a refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New block: window cleared, job broadcast with `clean_jobs`.
    NewBlock(JobId),

    /// Same block, forced: job added to the window and broadcast.
    Refreshed(JobId),

    /// Same block, not forced: nothing built.
    Unchanged,
}

impl RefreshOutcome {
    pub fn broadcast(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Job manager settings.
#[derive(Debug, Clone)]
pub struct JobManagerSettings {
    pub pool_id: String,
    pub max_active_jobs: usize,

    /// Zero disables rebroadcasting.
    pub job_rebroadcast_timeout: Duration,

    pub extranonce1_size: u8,
}

impl From<&PoolConfig> for JobManagerSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            pool_id: config.pool_id.clone(),
            max_active_jobs: config.max_active_jobs,
            job_rebroadcast_timeout: config.job_rebroadcast_timeout,
            extranonce1_size: config.extranonce1_size,
        }
    }
}

/// Consumer side of the refresh queue, handed to [`JobManager::run`].
pub struct RefreshQueue(mpsc::Receiver<RefreshRequest>);

pub struct JobManager {
    settings: JobManagerSettings,
    chain: ChainParams,
    daemon: Arc<dyn BlockchainDaemon>,
    builder: Arc<dyn JobBuilder>,
    store: Arc<JobStore>,
    ids: JobIdSequence,
    validator: ShareValidator,
    reconciler: BlockReconciler,
    extranonces: ExtranonceProvider,
    refresh_tx: RefreshSender,
    jobs_tx: broadcast::Sender<JobBroadcast>,
    notifications_tx: broadcast::Sender<PoolNotification>,
    clock: ForceRefreshClock,
}

impl JobManager {
    pub fn new(
        settings: JobManagerSettings,
        chain: ChainParams,
        daemon: Arc<dyn BlockchainDaemon>,
        builder: Arc<dyn JobBuilder>,
        verifier: Arc<dyn crate::verifier::SolutionVerifier>,
    ) -> Result<(Arc<Self>, RefreshQueue), ExtranonceError> {
        let extranonces = ExtranonceProvider::new(settings.extranonce1_size)?;
        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE_DEPTH);
        let (jobs_tx, _) = broadcast::channel(JOB_BROADCAST_CAPACITY);
        let (notifications_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let store = Arc::new(JobStore::new(settings.max_active_jobs));
        let validator = ShareValidator::new(store.clone(), chain.clone(), verifier);
        let reconciler = BlockReconciler::new(
            daemon.clone(),
            refresh_tx.clone(),
            notifications_tx.clone(),
            settings.pool_id.clone(),
        );

        let manager = Arc::new(Self {
            settings,
            chain,
            daemon,
            builder,
            store,
            ids: JobIdSequence::new(),
            validator,
            reconciler,
            extranonces,
            refresh_tx,
            jobs_tx,
            notifications_tx,
            clock: ForceRefreshClock::default(),
        });

        Ok((manager, RefreshQueue(refresh_rx)))
    }

    /// Run the dispatcher and the signal sources for `mode` until `shutdown`.
    ///
    /// Requests are processed one at a time; requests queued behind the one
    /// in flight are coalesced into a single follow-up.
    ///
    /// The rebroadcast deadline restarts only after a job is broadcast or a
    /// rebroadcast tick is processed. A poll or push signal that leaves the
    /// job unchanged does not restart it, otherwise a poll interval shorter
    /// than the timeout would keep the timer from ever firing. Stream mode and
    /// a zero timeout disable the timer.
    pub async fn run(
        self: Arc<Self>,
        queue: RefreshQueue,
        mode: TemplateSourceMode,
        shutdown: CancellationToken,
    ) {
        let RefreshQueue(mut rx) = queue;
        let rebroadcast = self.rebroadcast_timeout(&mode);

        info!(
            pool_id = %self.settings.pool_id,
            mode = mode.name(),
            max_active_jobs = self.settings.max_active_jobs,
            "Job manager started"
        );

        let first_job = CancellationToken::new();
        let sources = TaskTracker::new();
        sources.spawn(BootstrapSource::new(self.refresh_tx.clone(), first_job.clone()).run());
        self.spawn_source(&sources, mode, shutdown.clone());
        sources.close();

        let mut deadline = rebroadcast.map(|timeout| Instant::now() + timeout);
        let mut pending: Option<RefreshRequest> = None;
        let mut alarm = DebouncedAlarm::new(REFRESH_ALARM_DEBOUNCE);

        loop {
            let mut request = match pending.take() {
                Some(request) => request,
                None => tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(request) => request,
                        None => break,
                    },
                    _ = rebroadcast_due(deadline) => {
                        RefreshRequest::new(true, RefreshReason::JobRefresh)
                    }
                },
            };

            while let Ok(next) = rx.try_recv() {
                if !request.coalesce(&next) {
                    pending = Some(next);
                    break;
                }
            }

            let result = self.process_refresh(&request).await;
            let broadcast = result.as_ref().is_ok_and(RefreshOutcome::broadcast);

            if broadcast {
                first_job.cancel();
            }
            if let Some(timeout) = rebroadcast {
                if broadcast || request.reason == RefreshReason::JobRefresh {
                    deadline = Some(Instant::now() + timeout);
                }
            }

            match result {
                Ok(_) => {
                    if alarm.check(false) == AlarmStatus::Resolved {
                        info!("Template refresh recovered");
                    }
                }
                Err(e) => match alarm.check(true) {
                    AlarmStatus::Triggered => error!(
                        reason = %request.reason,
                        error = %e,
                        "Template refresh failing for {}s",
                        REFRESH_ALARM_DEBOUNCE.as_secs()
                    ),
                    AlarmStatus::Active => {
                        debug!(reason = %request.reason, error = %e, "Template refresh failed")
                    }
                    _ => warn!(reason = %request.reason, error = %e, "Template refresh failed"),
                },
            }
        }

        first_job.cancel();
        drop(rx);
        sources.wait().await;
        info!("Job manager stopped");
    }

    fn rebroadcast_timeout(&self, mode: &TemplateSourceMode) -> Option<Duration> {
        let timeout = self.settings.job_rebroadcast_timeout;
        (!mode.is_stream() && !timeout.is_zero()).then_some(timeout)
    }

    fn spawn_source(&self, sources: &TaskTracker, mode: TemplateSourceMode, shutdown: CancellationToken) {
        let tx = self.refresh_tx.clone();
        match mode {
            TemplateSourceMode::Poll { interval } => {
                sources.spawn(PollSource::new(interval, tx, shutdown).run());
            }
            TemplateSourceMode::Push { frames } => {
                sources.spawn(PushSource::new(frames, tx, shutdown).run());
            }
            TemplateSourceMode::Stream { payloads } => {
                sources.spawn(
                    StreamSource::new(
                        payloads,
                        tx,
                        self.clock.clone(),
                        self.settings.job_rebroadcast_timeout,
                        shutdown,
                    )
                    .run(),
                );
            }
        }
    }

    /// Handle one refresh request: fetch, classify, and build and publish a
    /// job when the block is new or the request is forced.
    pub async fn process_refresh(
        &self,
        request: &RefreshRequest,
    ) -> Result<RefreshOutcome, RefreshError> {
        let started = Instant::now();
        if request.force {
            self.clock.stamp();
        }

        let template = fetcher::fetch(self.daemon.as_ref(), request).await?;
        let current = self.store.current_job();
        let is_new = job::is_new_block(current.as_deref(), &template);
        let height = template.height;

        if is_new {
            info!(height, prev_hash = %template.prev_blockhash, reason = %request.reason, "New block");
            let _ = self.notifications_tx.send(PoolNotification::NewChainHeight {
                pool_id: self.settings.pool_id.clone(),
                height,
                symbol: self.chain.symbol.clone(),
            });
        } else if !request.force {
            debug!(
                height,
                reason = %request.reason,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Template unchanged"
            );
            return Ok(RefreshOutcome::Unchanged);
        }

        let job = Arc::new(self.builder.build(self.ids.next(), Arc::new(template))?);
        let evicted = self.store.insert(job.clone(), is_new);
        let _ = self.jobs_tx.send(job.broadcast(is_new));

        debug!(
            job_id = %job.id,
            height,
            reason = %request.reason,
            clean_jobs = is_new,
            evicted = evicted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job broadcast"
        );

        Ok(if is_new {
            RefreshOutcome::NewBlock(job.id)
        } else {
            RefreshOutcome::Refreshed(job.id)
        })
    }

    /// Validate a miner's submission and, for block candidates, submit and
    /// confirm the block.
    pub async fn submit_share(
        &self,
        worker: &WorkerContext,
        submission: &Submission,
    ) -> Result<Share, ShareError> {
        let validated = self.validator.validate(worker, submission).inspect_err(|e| {
            debug!(
                worker = %worker.worker,
                job_id = %submission.job_id,
                error = %e,
                "Share rejected"
            );
        })?;

        let share = match validated.block {
            Some(block) => self.reconciler.reconcile(validated.share, &block).await,
            None => validated.share,
        };

        trace!(
            worker = %share.worker,
            job_id = %share.job_id,
            difficulty = %share.share_difficulty,
            block = share.is_block_candidate,
            "Share accepted"
        );
        Ok(share)
    }

    pub fn current_job(&self) -> Option<Arc<Job>> {
        self.store.current_job()
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn chain(&self) -> &ChainParams {
        &self.chain
    }

    pub fn settings(&self) -> &JobManagerSettings {
        &self.settings
    }

    /// Jobs as they are published.
    pub fn subscribe_jobs(&self) -> broadcast::Receiver<JobBroadcast> {
        self.jobs_tx.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<PoolNotification> {
        self.notifications_tx.subscribe()
    }

    /// Nonce prefix for a new miner connection.
    pub fn allocate_extranonce1(&self) -> Extranonce1 {
        self.extranonces.next()
    }

    pub fn extranonce2_size(&self) -> usize {
        self.extranonces.extranonce2_size()
    }

    /// Producer handle for components that trigger refreshes.
    pub fn refresh_sender(&self) -> RefreshSender {
        self.refresh_tx.clone()
    }
}

async fn rebroadcast_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeDaemon, FakeVerifier, job_builder, raw_template};
    use crate::types::Difficulty;
    use crate::verifier::EquihashParams;

    fn settings() -> JobManagerSettings {
        JobManagerSettings {
            pool_id: "zec1".into(),
            max_active_jobs: 4,
            job_rebroadcast_timeout: Duration::from_secs(55),
            extranonce1_size: 4,
        }
    }

    fn manager_with(
        settings: JobManagerSettings,
        daemon: Arc<FakeDaemon>,
        verifies: bool,
    ) -> (Arc<JobManager>, RefreshQueue) {
        JobManager::new(
            settings,
            ChainParams::lookup("ZEC").unwrap(),
            daemon,
            Arc::new(job_builder()),
            Arc::new(FakeVerifier(verifies)),
        )
        .unwrap()
    }

    fn request(force: bool) -> RefreshRequest {
        RefreshRequest::new(force, RefreshReason::Poll)
    }

    fn worker(manager: &JobManager, name: &str) -> WorkerContext {
        WorkerContext {
            worker: name.into(),
            extranonce1: manager.allocate_extranonce1(),
            difficulty: Difficulty::new(1e-9),
        }
    }

    fn submission(job: &Job) -> Submission {
        let params = EquihashParams::EH_200_9;
        let mut solution = params.preamble();
        solution.resize(params.encoded_solution_size(), 0x5a);
        Submission {
            job_id: job.id.to_string(),
            time: hex::encode(job.time.to_le_bytes()),
            extranonce2: "00".repeat(job.extranonce2_size),
            solution: hex::encode(solution),
        }
    }

    #[tokio::test]
    async fn height_scenario() {
        let daemon = Arc::new(FakeDaemon::new());
        let (manager, _queue) = manager_with(settings(), daemon.clone(), true);
        let mut jobs = manager.subscribe_jobs();
        let mut notifications = manager.subscribe_notifications();

        daemon.set_template(raw_template(100));
        let first = manager.process_refresh(&request(false)).await.unwrap();
        assert!(matches!(first, RefreshOutcome::NewBlock(_)));
        assert_eq!(manager.store().len(), 1);
        assert!(jobs.try_recv().unwrap().clean_jobs);
        assert!(matches!(
            notifications.try_recv().unwrap(),
            PoolNotification::NewChainHeight { height: 100, .. }
        ));

        // Same height, not forced: no job
        let unchanged = manager.process_refresh(&request(false)).await.unwrap();
        assert_eq!(unchanged, RefreshOutcome::Unchanged);
        assert_eq!(manager.store().len(), 1);
        assert!(jobs.try_recv().is_err());

        // Same height, forced: window grows
        let RefreshOutcome::Refreshed(second) = manager.process_refresh(&request(true)).await.unwrap()
        else {
            panic!("expected a refresh");
        };
        assert_eq!(manager.store().len(), 2);
        assert!(!jobs.try_recv().unwrap().clean_jobs);
        assert_eq!(manager.current_job().unwrap().id, second);

        // Next height clears the window
        daemon.set_template(raw_template(101));
        let RefreshOutcome::NewBlock(third) = manager.process_refresh(&request(false)).await.unwrap()
        else {
            panic!("expected a new block");
        };
        assert_eq!(manager.store().job_ids(), vec![third]);
        assert_eq!(manager.current_job().unwrap().height, 101);
        assert!(notifications.try_recv().is_ok());
    }

    #[tokio::test]
    async fn evicted_job_is_not_found() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_template(raw_template(100));
        let (manager, _queue) = manager_with(settings(), daemon, true);

        manager.process_refresh(&request(false)).await.unwrap();
        let oldest = manager.current_job().unwrap();
        for _ in 0..4 {
            manager.process_refresh(&request(true)).await.unwrap();
        }

        assert_eq!(manager.store().len(), 4);
        let ids = manager.store().job_ids();
        assert!(!ids.contains(&oldest.id));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let w = worker(&manager, "w1");
        assert_eq!(
            manager.submit_share(&w, &submission(&oldest)).await.unwrap_err(),
            ShareError::JobNotFound
        );
    }

    #[tokio::test]
    async fn stale_block_share_is_not_found() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_template(raw_template(100));
        let (manager, _queue) = manager_with(settings(), daemon.clone(), true);

        manager.process_refresh(&request(false)).await.unwrap();
        let old = manager.current_job().unwrap();

        daemon.set_template(raw_template(101));
        manager.process_refresh(&request(false)).await.unwrap();

        let w = worker(&manager, "w1");
        assert_eq!(
            manager.submit_share(&w, &submission(&old)).await.unwrap_err(),
            ShareError::JobNotFound
        );
    }

    #[tokio::test]
    async fn duplicate_submission() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_template(raw_template(100));
        let (manager, _queue) = manager_with(settings(), daemon, true);
        manager.process_refresh(&request(false)).await.unwrap();

        let job = manager.current_job().unwrap();
        let w = worker(&manager, "w1");
        let sub = submission(&job);

        let share = manager.submit_share(&w, &sub).await.unwrap();
        assert_eq!(share.job_id, job.id);
        assert_eq!(
            manager.submit_share(&w, &sub).await.unwrap_err(),
            ShareError::DuplicateShare
        );
    }

    #[tokio::test]
    async fn invalid_solution_is_never_submitted() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_template(raw_template(100));
        let (manager, _queue) = manager_with(settings(), daemon.clone(), false);
        manager.process_refresh(&request(false)).await.unwrap();

        let job = manager.current_job().unwrap();
        let w = worker(&manager, "w1");
        assert_eq!(
            manager.submit_share(&w, &submission(&job)).await.unwrap_err(),
            ShareError::InvalidSolution
        );
        assert!(daemon.submitted_blocks().is_empty());
    }

    #[tokio::test]
    async fn fetch_and_build_failures_are_reported() {
        let daemon = Arc::new(FakeDaemon::new());
        let (manager, _queue) = manager_with(settings(), daemon.clone(), true);

        assert!(matches!(
            manager.process_refresh(&request(false)).await,
            Err(RefreshError::Fetch(_))
        ));

        let mut raw = raw_template(100);
        raw.coinbase_value = None;
        daemon.set_template(raw);
        assert!(matches!(
            manager.process_refresh(&request(false)).await,
            Err(RefreshError::Build(BuildError::MissingCoinbaseValue))
        ));
        assert!(manager.current_job().is_none());
    }

    #[tokio::test]
    async fn forced_refresh_stamps_clock() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_template(raw_template(100));
        let (manager, _queue) = manager_with(settings(), daemon, true);

        manager.process_refresh(&request(false)).await.unwrap();
        assert!(manager.clock.elapsed().is_none());

        manager.process_refresh(&request(true)).await.unwrap();
        assert!(manager.clock.elapsed().is_some());
    }

    #[tokio::test]
    async fn extranonce_allocation() {
        let (manager, _queue) = manager_with(settings(), Arc::new(FakeDaemon::new()), true);
        let a = manager.allocate_extranonce1();
        let b = manager.allocate_extranonce1();
        assert_ne!(a, b);
        assert_eq!(a.size(), 4);
        assert_eq!(manager.extranonce2_size(), 28);
        assert_eq!(
            job_builder()
                .build(JobId::new(1), Arc::new(crate::test_support::template(100)))
                .unwrap()
                .extranonce2_size,
            manager.extranonce2_size()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_bootstraps_and_rebroadcasts() {
        let daemon = Arc::new(FakeDaemon::new());
        let (manager, queue) = manager_with(settings(), daemon.clone(), true);
        let mut jobs = manager.subscribe_jobs();
        let shutdown = CancellationToken::new();

        let mode = TemplateSourceMode::Poll {
            interval: Duration::from_secs(1),
        };
        let handle = tokio::spawn(manager.clone().run(queue, mode, shutdown.clone()));

        // Daemon not ready: bootstrap keeps retrying
        time::sleep(Duration::from_millis(2_500)).await;
        assert!(manager.current_job().is_none());

        daemon.set_template(raw_template(100));
        time::sleep(Duration::from_secs(1)).await;
        let first = manager.current_job().unwrap();
        assert!(jobs.try_recv().unwrap().clean_jobs);

        // Polls at the same height build nothing
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.current_job().unwrap().id, first.id);
        assert!(jobs.try_recv().is_err());

        // Rebroadcast after 55s without a broadcast
        time::sleep(Duration::from_secs(50)).await;
        let refreshed = manager.current_job().unwrap();
        assert!(refreshed.id > first.id);
        assert_eq!(refreshed.height, 100);
        let broadcast = jobs.try_recv().unwrap();
        assert!(!broadcast.clean_jobs);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stream_mode_has_no_rebroadcast() {
        let daemon = Arc::new(FakeDaemon::new());
        let (manager, queue) = manager_with(settings(), daemon.clone(), true);
        let shutdown = CancellationToken::new();

        let (feed, payloads) = mpsc::channel(4);
        let mode = TemplateSourceMode::Stream { payloads };
        let handle = tokio::spawn(manager.clone().run(queue, mode, shutdown.clone()));

        feed.send(serde_json::to_string(&raw_template(100)).unwrap())
            .await
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        let first = manager.current_job().unwrap();
        assert_eq!(first.height, 100);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.current_job().unwrap().id, first.id);

        // Past the forced-refresh interval, the next payload is forced
        feed.send(serde_json::to_string(&raw_template(100)).unwrap())
            .await
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(manager.current_job().unwrap().id > first.id);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_coalesce() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_template(raw_template(100));
        let mut settings = settings();
        settings.job_rebroadcast_timeout = Duration::ZERO;
        let (manager, queue) = manager_with(settings, daemon.clone(), true);

        let tx = manager.refresh_sender();
        for _ in 0..5 {
            tx.send(request(false)).await.unwrap();
        }

        let (_feed, payloads) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(manager.clone().run(
            queue,
            TemplateSourceMode::Stream { payloads },
            shutdown.clone(),
        ));
        time::sleep(Duration::from_millis(10)).await;

        // Five polls plus at most one bootstrap request
        assert!(manager.current_job().is_some());
        assert!(daemon.template_calls() <= 2);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
