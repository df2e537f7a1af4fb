use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use relay_channels::SendGateway;
use relay_core::config::{FailurePolicy, DEFAULT_LEASE_TIMEOUT_SECS};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    claim::{claim, ClaimedJob},
    error::{Result, SchedulerError},
    policy::{route_failure, Resolution},
    recipient::{outbound_for, PhoneRules},
    store::JobStore,
    types::{PastJob, ScheduledJob},
};

/// Counts for one tick that was allowed to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Jobs this tick claimed (each one is resolved before the tick ends).
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub requeued: usize,
    /// Stale leases resolved before claiming.
    pub recovered: usize,
}

impl TickReport {
    pub fn processed(&self) -> usize {
        self.claimed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another tick was still running.
    Busy,
    /// Nothing can be dispatched, so nothing is claimed.
    ChannelNotReady,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Busy => "busy",
            SkipReason::ChannelNotReady => "channel_not_ready",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(TickReport),
    Skipped(SkipReason),
}

impl TickOutcome {
    pub fn processed(&self) -> usize {
        match self {
            TickOutcome::Ran(report) => report.processed(),
            TickOutcome::Skipped(_) => 0,
        }
    }
}

/// Process-local re-entrancy guard for the tick body.
///
/// This is not a distributed lock. It only keeps ticks inside this process
/// from overlapping; across processes the conditional update in
/// [`claim`] is what stops a job from being dispatched twice.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives claim → dispatch → resolve for due jobs.
///
/// Built once at startup and shared as `Arc<SchedulerEngine>` by the
/// periodic loop and the manual trigger.
pub struct SchedulerEngine {
    store: Arc<dyn JobStore>,
    gateway: Arc<SendGateway>,
    phone: PhoneRules,
    policy: FailurePolicy,
    lease_timeout: chrono::Duration,
    running: AtomicBool,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn JobStore>, gateway: Arc<SendGateway>) -> Self {
        Self {
            store,
            gateway,
            phone: PhoneRules::default(),
            policy: FailurePolicy::default(),
            lease_timeout: chrono::Duration::seconds(DEFAULT_LEASE_TIMEOUT_SECS as i64),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_phone_rules(mut self, phone: PhoneRules) -> Self {
        self.phone = phone;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// In-progress jobs claimed longer ago than this are treated as abandoned.
    pub fn with_lease_timeout(mut self, lease: Duration) -> Self {
        self.lease_timeout =
            chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Whether a tick body is executing right now.
    pub fn is_ticking(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one tick.
    ///
    /// Returns `Err` only when the store fails outside a single job's
    /// processing; nothing is claimed after that point and the next tick
    /// starts from scratch. Per-job failures are resolved inside the tick.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            info!("previous tick still running, skipping");
            return Ok(TickOutcome::Skipped(SkipReason::Busy));
        };

        if !self.gateway.is_ready() {
            info!("channel not ready, skipping tick");
            return Ok(TickOutcome::Skipped(SkipReason::ChannelNotReady));
        }

        let mut report = TickReport {
            recovered: self.recover_locked(Utc::now()).await?,
            ..TickReport::default()
        };

        let due = self.store.find_due(Utc::now()).await?;
        if !due.is_empty() {
            debug!(count = due.len(), "due jobs found");
        }

        for job in due {
            // Readiness can drop mid-tick; leave the rest `to_do`.
            if !self.gateway.is_ready() {
                info!("channel lost readiness mid-tick, leaving remaining jobs queued");
                break;
            }

            let Some(claimed) = claim(self.store.as_ref(), &job.id, Utc::now()).await? else {
                continue;
            };
            report.claimed += 1;
            info!(job_id = %claimed.id, job_type = %claimed.job_type, client = %claimed.client_name, "job claimed");

            match self.process(claimed).await {
                Ok(Resolution::Delivered) => report.delivered += 1,
                Ok(Resolution::Failed { .. }) => report.failed += 1,
                Ok(Resolution::Retry { .. }) => report.requeued += 1,
                Err(e) => {
                    // Left in progress; lease recovery resolves it later.
                    error!(job_id = %job.id, error = %e, "could not record job resolution");
                }
            }
        }

        Ok(TickOutcome::Ran(report))
    }

    /// [`tick`](Self::tick) with the outcome logged instead of returned.
    pub async fn tick_logged(&self) {
        match self.tick().await {
            Ok(TickOutcome::Ran(r)) if r.claimed > 0 || r.recovered > 0 => info!(
                claimed = r.claimed,
                delivered = r.delivered,
                failed = r.failed,
                requeued = r.requeued,
                recovered = r.recovered,
                "tick finished"
            ),
            Ok(TickOutcome::Ran(_)) => debug!("tick finished, nothing due"),
            Ok(TickOutcome::Skipped(reason)) => debug!(%reason, "tick skipped"),
            Err(e) => error!(error = %e, "scheduler tick aborted"),
        }
    }

    /// Resolve in-progress jobs whose lease has expired.
    ///
    /// Returns how many were resolved, or 0 when a tick is running.
    pub async fn recover_stale(&self) -> Result<usize> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            return Ok(0);
        };
        self.recover_locked(Utc::now()).await
    }

    /// Periodic loop; returns once `shutdown` turns `true` or its sender drops.
    ///
    /// Every tick runs on its own task so a slow tick makes the next one hit
    /// the guard and get dropped rather than delaying the schedule. A tick
    /// still in flight at shutdown is awaited before returning.
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = every.as_secs(), "scheduler loop started");
        match self.recover_stale().await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "recovered stale jobs on startup"),
            Err(e) => error!(error = %e, "stale job recovery failed on startup"),
        }

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Overlapping ticks are dropped, never queued.
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        debug!("previous tick still running, skipping");
                        continue;
                    }
                    let engine = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move { engine.tick_logged().await }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler loop shutting down");
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!(error = %e, "in-flight tick did not finish cleanly");
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    async fn recover_locked(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = now.checked_sub_signed(self.lease_timeout) else {
            return Ok(0);
        };
        let stale = self.store.find_stale(cutoff).await?;
        let mut recovered = 0;
        for job in stale {
            warn!(job_id = %job.id, claimed_at = ?job.claimed_at, "lease expired, resolving job");
            let resolution = route_failure(&self.policy, &job, &SchedulerError::LeaseExpired, now);
            match self.apply(&job, resolution, now).await {
                Ok(_) => recovered += 1,
                Err(e) => error!(job_id = %job.id, error = %e, "stale job recovery failed"),
            }
        }
        Ok(recovered)
    }

    /// Dispatch one claimed job and record how it ended.
    ///
    /// A panic during dispatch counts as that job's failure only.
    async fn process(&self, claimed: ClaimedJob) -> Result<Resolution> {
        let job = claimed.into_inner();
        let outcome = match AssertUnwindSafe(self.dispatch(&job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(SchedulerError::Panicked(panic_message(panic.as_ref()))),
        };

        let now = Utc::now();
        let resolution = match outcome {
            Ok(()) => Resolution::Delivered,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job dispatch failed");
                route_failure(&self.policy, &job, &e, now)
            }
        };
        self.apply(&job, resolution, now).await
    }

    async fn dispatch(&self, job: &ScheduledJob) -> Result<()> {
        let msg = outbound_for(job, &self.phone)?;
        debug!(job_id = %job.id, recipient = %msg.recipient, "dispatching job");
        self.gateway.send(msg).await?;
        Ok(())
    }

    async fn apply(&self, job: &ScheduledJob, resolution: Resolution, now: DateTime<Utc>) -> Result<Resolution> {
        match &resolution {
            Resolution::Delivered => {
                self.store.archive(PastJob::delivered(job, now)).await?;
                info!(job_id = %job.id, "job delivered");
            }
            Resolution::Failed { error, attempts } => {
                self.store
                    .archive(PastJob::failed(job, error.clone(), *attempts, now))
                    .await?;
                warn!(job_id = %job.id, attempts, %error, "job failed");
            }
            Resolution::Retry { at, attempts, error } => {
                self.store.requeue(&job.id, *at, *attempts).await?;
                info!(job_id = %job.id, attempts, retry_at = %at, %error, "job requeued");
            }
        }
        Ok(resolution)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteJobStore;
    use crate::types::{JobStatus, JobType, NewJob, PastJobStatus};
    use async_trait::async_trait;
    use relay_channels::{Channel, ChannelError, ChannelEvent, ConnectionManager, OutboundMessage};
    use tokio::sync::mpsc;

    struct InstantChannel;

    #[async_trait]
    impl Channel for InstantChannel {
        fn name(&self) -> &str {
            "instant"
        }
        async fn connect(&self, events: mpsc::Sender<ChannelEvent>) -> std::result::Result<(), ChannelError> {
            events.send(ChannelEvent::Ready).await.ok();
            Ok(())
        }
        async fn send(&self, _msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
    }

    /// Store whose backend is unreachable.
    struct DownStore;

    #[async_trait]
    impl JobStore for DownStore {
        async fn find_due(&self, _now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
            Err(SchedulerError::Store("connection refused".into()))
        }
        async fn conditional_update(
            &self,
            _id: &str,
            _expected: JobStatus,
            _new: JobStatus,
            _at: DateTime<Utc>,
        ) -> Result<Option<ScheduledJob>> {
            Err(SchedulerError::Store("connection refused".into()))
        }
        async fn archive(&self, _past: PastJob) -> Result<()> {
            Err(SchedulerError::Store("connection refused".into()))
        }
        async fn requeue(&self, _id: &str, _next_at: DateTime<Utc>, _attempts: u32) -> Result<()> {
            Err(SchedulerError::Store("connection refused".into()))
        }
        async fn find_stale(&self, _before: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
            Ok(Vec::new())
        }
        async fn create(&self, _job: NewJob) -> Result<ScheduledJob> {
            Err(SchedulerError::Store("connection refused".into()))
        }
        async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>> {
            Ok(Vec::new())
        }
        async fn list_past(&self, _limit: usize) -> Result<Vec<PastJob>> {
            Ok(Vec::new())
        }
    }

    /// Ready at once; each send takes a while.
    struct SlowChannel(u64);

    #[async_trait]
    impl Channel for SlowChannel {
        fn name(&self) -> &str {
            "slow"
        }
        async fn connect(&self, events: mpsc::Sender<ChannelEvent>) -> std::result::Result<(), ChannelError> {
            events.send(ChannelEvent::Ready).await.ok();
            Ok(())
        }
        async fn send(&self, _msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
    }

    async fn ready_gateway() -> Arc<SendGateway> {
        gateway_over(|| -> Arc<dyn Channel> { Arc::new(InstantChannel) }).await
    }

    async fn gateway_over(connector: impl relay_channels::Connector + 'static) -> Arc<SendGateway> {
        let manager = ConnectionManager::new(connector);
        manager.request_connect();
        for _ in 0..100 {
            if manager.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.is_ready());
        SendGateway::spawn(manager, Duration::from_secs(5))
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = TickGuard::try_acquire(&flag).unwrap();
        assert!(TickGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(TickGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }

    #[tokio::test]
    async fn store_outage_aborts_tick_and_releases_guard() {
        let engine = SchedulerEngine::new(Arc::new(DownStore), ready_gateway().await);
        assert!(matches!(engine.tick().await, Err(SchedulerError::Store(_))));
        assert!(!engine.is_ticking());
        // next tick tries again from scratch
        assert!(engine.tick().await.is_err());
    }

    #[tokio::test]
    async fn expired_lease_is_archived_under_fail_fast() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = store
            .create(NewJob {
                client_name: "acme".into(),
                job_name: "orphan".into(),
                job_type: JobType::Whatsapp,
                payload: serde_json::json!({ "phone": "9876543210", "message": "hi" }),
                media_url: None,
                scheduled_at: Utc::now(),
            })
            .await
            .unwrap();
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        store
            .conditional_update(&job.id, JobStatus::ToDo, JobStatus::InProgress, long_ago)
            .await
            .unwrap();

        let engine = SchedulerEngine::new(store.clone(), ready_gateway().await)
            .with_lease_timeout(Duration::from_secs(60));
        assert_eq!(engine.recover_stale().await.unwrap(), 1);

        assert!(store.list_scheduled().await.unwrap().is_empty());
        let past = store.list_past(10).await.unwrap();
        assert_eq!(past[0].status, PastJobStatus::Failed);
        assert_eq!(past[0].error.as_deref(), Some("lease expired before resolution"));
    }

    #[tokio::test]
    async fn expired_lease_is_requeued_under_retry() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = store
            .create(NewJob {
                client_name: "acme".into(),
                job_name: "orphan".into(),
                job_type: JobType::Whatsapp,
                payload: serde_json::json!({ "phone": "9876543210", "message": "hi" }),
                media_url: None,
                scheduled_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .conditional_update(&job.id, JobStatus::ToDo, JobStatus::InProgress, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();

        let engine = SchedulerEngine::new(store.clone(), ready_gateway().await)
            .with_lease_timeout(Duration::from_secs(60))
            .with_policy(FailurePolicy::Retry {
                max_attempts: 3,
                backoff_secs: 0,
            });

        // recovery runs at the start of the tick, then the requeued job is due again
        let outcome = engine.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Ran(TickReport {
                claimed: 1,
                delivered: 1,
                recovered: 1,
                ..TickReport::default()
            })
        );
        let past = store.list_past(10).await.unwrap();
        assert_eq!(past[0].status, PastJobStatus::Delivered);
        assert_eq!(past[0].attempts, 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_running_tick() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        store
            .create(NewJob {
                client_name: "acme".into(),
                job_name: "reminder".into(),
                job_type: JobType::Whatsapp,
                payload: serde_json::json!({ "phone": "9876543210", "message": "hi" }),
                media_url: None,
                scheduled_at: Utc::now() - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();
        let gateway = gateway_over(|| -> Arc<dyn Channel> { Arc::new(SlowChannel(300)) }).await;
        let engine = Arc::new(SchedulerEngine::new(store.clone(), gateway));

        let (tx, rx) = watch::channel(false);
        let looping = tokio::spawn(Arc::clone(&engine).run(Duration::from_millis(10), rx));
        // wait until the tick has claimed the job and is mid-send
        let mut claimed = false;
        for _ in 0..100 {
            let pending = store.list_scheduled().await.unwrap();
            if pending.first().map(|j| j.status) == Some(JobStatus::InProgress) {
                claimed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(claimed);

        tx.send(true).unwrap();
        looping.await.unwrap();

        // the claimed job was resolved before the loop returned
        assert!(!engine.is_ticking());
        assert!(store.list_scheduled().await.unwrap().is_empty());
        assert_eq!(store.list_past(10).await.unwrap()[0].status, PastJobStatus::Delivered);
    }
}
