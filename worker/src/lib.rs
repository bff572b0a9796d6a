// Worker Runtime (spec.md §4.W). A generic at-least-once job loop reused
// by every background job type: poll -> claim -> fan out -> process ->
// retry or terminate, with audit logging of every status transition.

pub mod handler;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use handler::{JobError, JobHandler};
use money_common::model::{AuditLogEntry, ErrorClassification, WorkerJob, WorkerJobStatus};
use money_common::{Clock, Error, WorkerJobId};
use money_store::Storage;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub job_type: String,
    pub poll_interval: StdDuration,
    pub batch_size: u32,
    pub worker_pool_size: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_factor: f64,
}

/// §4.W "Observability contract": processed/succeeded/failed/retried
/// counters, a per-error-classification breakdown, and a rolling average
/// handler duration. Snapshotted out of `WorkerRuntime::metrics()`.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub errors_by_type: HashMap<String, u64>,
    pub avg_handler_duration: StdDuration,
}

#[derive(Debug, Default)]
struct MetricsInner {
    processed: u64,
    succeeded: u64,
    failed: u64,
    retried: u64,
    errors_by_type: HashMap<String, u64>,
    duration_samples: u64,
    duration_total: StdDuration,
}

impl MetricsInner {
    fn record_duration(&mut self, d: StdDuration) {
        self.duration_samples += 1;
        self.duration_total += d;
    }

    fn snapshot(&self) -> WorkerMetrics {
        let avg_handler_duration = if self.duration_samples == 0 {
            StdDuration::ZERO
        } else {
            self.duration_total / self.duration_samples as u32
        };
        WorkerMetrics {
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            retried: self.retried,
            errors_by_type: self.errors_by_type.clone(),
            avg_handler_duration,
        }
    }
}

/// Drives one job type's queue. Construct one per job type (wallet
/// provisioning, onboarding signal, deposit poll, bridge poll) and spawn
/// its `run` loop as its own task.
pub struct WorkerRuntime {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    handler: Arc<dyn JobHandler>,
    metrics: Mutex<MetricsInner>,
}

impl WorkerRuntime {
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self { store, clock, config, handler, metrics: Mutex::new(MetricsInner::default()) }
    }

    /// Current snapshot of this runtime's counters. Safe to call from
    /// another task while `run` is looping — `money_daemon` polls this to
    /// feed the process's Prometheus exporter.
    pub fn metrics(&self) -> WorkerMetrics {
        self.metrics.lock().unwrap().snapshot()
    }

    pub async fn enqueue(&self, subject: String, payload: serde_json::Value) -> Result<WorkerJob, Error> {
        let job = WorkerJob {
            id: WorkerJobId::new(),
            job_type: self.config.job_type.clone(),
            subject,
            status: WorkerJobStatus::Queued,
            attempt_count: 0,
            max_attempts: self.config.max_attempts,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            payload,
            created_at: self.clock.now(),
        };
        self.store.enqueue(job).await
    }

    /// Runs forever, ticking every `poll_interval`. Intended to be spawned
    /// as its own tokio task by `money_daemon`'s bootstrap; exits only if
    /// `cancel` resolves (§5 cancellation semantics).
    pub async fn run(&self, mut cancel: tokio::sync::watch::Receiver<bool>) -> WorkerMetrics {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return self.metrics();
                    }
                }
            }

            if let Err(e) = self.reclaim_stuck().await {
                log::warn!("{}: reclaim_stuck failed: {e}", self.config.job_type);
            }

            if let Err(e) = self.tick().await {
                log::error!("{}: tick failed: {e}", self.config.job_type);
            }
        }
    }

    async fn reclaim_stuck(&self) -> Result<u32, Error> {
        let claim_timeout = self.config.poll_interval_as_chrono() * money_common::config::DEFAULT_JOB_CLAIM_TIMEOUT_MULTIPLE as i32;
        self.store.reclaim_stuck(&self.config.job_type, claim_timeout, self.clock.now()).await
    }

    async fn tick(&self) -> Result<(), Error> {
        let claimed = self.store.claim_batch(&self.config.job_type, self.config.batch_size, self.clock.now()).await?;
        if claimed.is_empty() {
            return Ok(());
        }

        let mut in_flight = FuturesUnordered::new();
        let mut remaining = claimed.into_iter();
        for job in remaining.by_ref().take(self.config.worker_pool_size) {
            in_flight.push(self.process_one(job));
        }

        while in_flight.next().await.is_some() {
            if let Some(job) = remaining.next() {
                in_flight.push(self.process_one(job));
            }
        }
        Ok(())
    }

    async fn process_one(&self, job: WorkerJob) {
        let before = serde_json::to_value(&job.status.to_string()).unwrap_or_default();
        let started = Instant::now();
        let result = self.handler.handle(&job).await;
        let elapsed = started.elapsed();

        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.processed += 1;
            metrics.record_duration(elapsed);
        }

        match result {
            Ok(()) => {
                if let Err(e) = self.store.mark_completed(job.id, self.clock.now()).await {
                    log::error!("failed to mark job {} completed: {e}", job.id);
                }
                self.metrics.lock().unwrap().succeeded += 1;
                self.audit(&job, before, ErrorClassification::Retryable, true).await;
            }
            Err(job_err) => self.handle_failure(job, job_err, before).await,
        }
    }

    async fn handle_failure(&self, job: WorkerJob, job_err: JobError, before: serde_json::Value) {
        let classification = job_err.classification;
        let message = job_err.message;

        {
            let mut metrics = self.metrics.lock().unwrap();
            let key = match classification {
                ErrorClassification::Retryable => "retryable",
                ErrorClassification::Terminal => "terminal",
            };
            *metrics.errors_by_type.entry(key.to_string()).or_insert(0) += 1;
        }

        if classification == ErrorClassification::Retryable && job.attempt_count < job.max_attempts {
            self.metrics.lock().unwrap().retried += 1;
            let delay = self.backoff_delay(job.attempt_count);
            let next_retry_at = self.clock.now() + delay;
            if let Err(e) = self.store.mark_retry(job.id, next_retry_at, message.clone()).await {
                log::error!("failed to mark job {} retry: {e}", job.id);
            }
        } else {
            self.metrics.lock().unwrap().failed += 1;
            if let Err(e) = self.store.mark_failed(job.id, message.clone()).await {
                log::error!("failed to mark job {} failed: {e}", job.id);
            }
        }

        self.audit(&job, before, classification, false).await;
    }

    /// `delay = min(max_backoff, base_backoff * 2^(attempt-1)) +- jitter`,
    /// floored at `base_backoff` (§4.W).
    fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(20);
        let scaled = self.config.base_backoff.num_milliseconds().saturating_mul(1i64 << exponent);
        let capped = scaled.min(self.config.max_backoff.num_milliseconds());

        let jitter_span = (capped as f64 * self.config.jitter_factor) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };

        let floored = (capped + jitter).max(self.config.base_backoff.num_milliseconds());
        Duration::milliseconds(floored)
    }

    async fn audit(&self, job: &WorkerJob, before: serde_json::Value, classification: ErrorClassification, success: bool) {
        let after = serde_json::json!({
            "status": if success { "completed" } else { "retry_or_failed" },
            "attempt_count": job.attempt_count,
        });
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            resource_type: "worker_job".to_string(),
            resource_id: job.id.to_string(),
            before: Some(before),
            after,
            error_classification: if success { None } else { Some(classification) },
            created_at: self.clock.now(),
        };
        if let Err(e) = self.store.append(entry).await {
            log::error!("failed to append audit entry for job {}: {e}", job.id);
        }
    }
}

impl WorkerConfig {
    fn poll_interval_as_chrono(&self) -> Duration {
        Duration::from_std(self.poll_interval).unwrap_or(Duration::seconds(60))
    }
}

#[async_trait]
pub trait CancelToken: Send + Sync {
    async fn cancelled(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use handler::JobHandler;
    use money_common::FixedClock;
    use money_store::memory::MemoryStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        fail_until_attempt: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, job: &WorkerJob) -> Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if job.attempt_count < self.fail_until_attempt {
                return Err(JobError::retryable(format!("attempt {call} not ready")));
            }
            Ok(())
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            job_type: "test_job".to_string(),
            poll_interval: StdDuration::from_millis(10),
            batch_size: 10,
            worker_pool_size: 4,
            max_attempts: 5,
            base_backoff: Duration::milliseconds(10),
            max_backoff: Duration::seconds(5),
            jitter_factor: 0.1,
        }
    }

    #[tokio::test]
    async fn successful_job_completes_on_first_attempt() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let handler = Arc::new(CountingHandler { fail_until_attempt: 0, calls: AtomicU32::new(0) });
        let runtime = WorkerRuntime::new(store.clone(), clock.clone(), config(), handler);

        let job = runtime.enqueue("user-1".to_string(), serde_json::json!({})).await.unwrap();
        let claimed = store.claim_batch("test_job", 10, clock.now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);

        runtime.process_one(claimed.into_iter().next().unwrap()).await;
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerJobStatus::Completed);
    }

    #[tokio::test]
    async fn retryable_failure_schedules_retry_with_backoff() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let handler = Arc::new(CountingHandler { fail_until_attempt: 3, calls: AtomicU32::new(0) });
        let runtime = WorkerRuntime::new(store.clone(), clock.clone(), config(), handler);

        let job = runtime.enqueue("user-2".to_string(), serde_json::json!({})).await.unwrap();
        let claimed = store.claim_batch("test_job", 10, clock.now()).await.unwrap();
        runtime.process_one(claimed.into_iter().next().unwrap()).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerJobStatus::Retry);
        assert!(stored.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn terminal_failure_exhausts_attempts_without_retry() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));

        struct AlwaysTerminal;
        #[async_trait]
        impl JobHandler for AlwaysTerminal {
            async fn handle(&self, _job: &WorkerJob) -> Result<(), JobError> {
                Err(JobError::terminal("validation failed"))
            }
        }

        let runtime = WorkerRuntime::new(store.clone(), clock.clone(), config(), Arc::new(AlwaysTerminal));
        let job = runtime.enqueue("user-3".to_string(), serde_json::json!({})).await.unwrap();
        let claimed = store.claim_batch("test_job", 10, clock.now()).await.unwrap();
        runtime.process_one(claimed.into_iter().next().unwrap()).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerJobStatus::Failed);
        let metrics = runtime.metrics();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.errors_by_type.get("terminal"), Some(&1));
    }

    #[tokio::test]
    async fn metrics_track_processed_and_succeeded() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let handler = Arc::new(CountingHandler { fail_until_attempt: 0, calls: AtomicU32::new(0) });
        let runtime = WorkerRuntime::new(store.clone(), clock.clone(), config(), handler);

        runtime.enqueue("user-4".to_string(), serde_json::json!({})).await.unwrap();
        let claimed = store.claim_batch("test_job", 10, clock.now()).await.unwrap();
        runtime.process_one(claimed.into_iter().next().unwrap()).await;

        let metrics = runtime.metrics();
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.failed, 0);
    }
}
