use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::kv::{KvError, KvStore, NAMESPACE};

/// Name of the single global ingest queue.
pub const INGEST_QUEUE: &str = "ingest";

/// Queue name a delivery worker binds to. The shape is load-bearing: one
/// queue (and one worker) per destination channel.
pub fn delivery_queue_name(platform: crate::event::Platform, channel_id: &str) -> String {
    format!("deliver:{platform}:{channel_id}")
}

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(250);
const PROMOTE_BATCH: usize = 16;

#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub keep_completed: i64,
    pub keep_failed: i64,
}

impl QueuePolicy {
    pub fn ingest() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            keep_completed: 1_000,
            keep_failed: 5_000,
        }
    }

    pub fn delivery() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 5,
            backoff_base_ms: 2_000,
            keep_completed: 500,
            keep_failed: 2_000,
        }
    }

    fn backoff_ms(&self, attempts: u32) -> u64 {
        self.backoff_base_ms
            .saturating_mul(1u64 << attempts.saturating_sub(1).min(16))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope<T> {
    pub id: String,
    pub attempts: u32,
    pub enqueued_at_ms: i64,
    pub payload: T,
}

/// A job moved from the pending list to the active list; `raw` is the exact
/// stored form, needed to acknowledge it.
pub struct ClaimedJob<T> {
    pub envelope: JobEnvelope<T>,
    raw: String,
}

#[derive(Debug)]
pub enum JobOutcome {
    /// Work done (or intentionally skipped); the job completes.
    Done,
    /// Transient failure; the queue retries with backoff until the attempts
    /// are exhausted.
    Retry(String),
    /// Not a failure: re-queue after the given delay without spending an
    /// attempt (rate limiting).
    RescheduleMs(u64),
}

#[async_trait]
pub trait JobHandler<T>: Send + Sync {
    async fn handle(&self, job: &JobEnvelope<T>) -> JobOutcome;
}

/// Durable FIFO queue over the shared KV with at-least-once semantics.
///
/// Layout under `janus:queue:<name>`: the pending list, an `:active` list
/// holding claimed-but-unacknowledged jobs (recovered to pending on worker
/// start), a `:delayed` zset scored by ready-time, and bounded `:completed`
/// / `:failed` ledgers.
pub struct JobQueue<T> {
    name: String,
    kv: Arc<dyn KvStore>,
    policy: QueuePolicy,
    _payload: PhantomData<fn(T)>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kv: self.kv.clone(),
            policy: self.policy.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> JobQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, kv: Arc<dyn KvStore>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            kv,
            policy,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    fn pending_key(&self) -> String {
        format!("{NAMESPACE}:queue:{}", self.name)
    }

    fn active_key(&self) -> String {
        format!("{NAMESPACE}:queue:{}:active", self.name)
    }

    fn delayed_key(&self) -> String {
        format!("{NAMESPACE}:queue:{}:delayed", self.name)
    }

    fn completed_key(&self) -> String {
        format!("{NAMESPACE}:queue:{}:completed", self.name)
    }

    fn failed_key(&self) -> String {
        format!("{NAMESPACE}:queue:{}:failed", self.name)
    }

    pub async fn enqueue(&self, payload: T) -> Result<String, KvError> {
        let envelope = JobEnvelope {
            id: Uuid::new_v4().to_string(),
            attempts: 0,
            enqueued_at_ms: Utc::now().timestamp_millis(),
            payload,
        };
        let id = envelope.id.clone();
        self.kv
            .rpush(&self.pending_key(), &encode(&envelope)?)
            .await?;
        Ok(id)
    }

    /// Moves claimed-but-unacknowledged jobs back to pending. Called once on
    /// worker start so a crash between claim and ack loses nothing.
    pub async fn recover(&self) -> Result<u64, KvError> {
        let mut recovered = 0;
        while self
            .kv
            .lmove_head(&self.active_key(), &self.pending_key())
            .await?
            .is_some()
        {
            recovered += 1;
        }
        if recovered > 0 {
            warn!(queue = %self.name, recovered, "recovered in-flight jobs to pending");
        }
        Ok(recovered)
    }

    /// Moves delayed jobs whose ready-time has passed into the pending list.
    async fn promote_due(&self) -> Result<(), KvError> {
        let now = Utc::now().timestamp_millis() as f64;
        let due = self
            .kv
            .zpop_due(&self.delayed_key(), now, PROMOTE_BATCH)
            .await?;
        for raw in due {
            self.kv.rpush(&self.pending_key(), &raw).await?;
        }
        Ok(())
    }

    pub async fn claim(&self) -> Result<Option<ClaimedJob<T>>, KvError> {
        self.promote_due().await?;
        loop {
            let Some(raw) = self
                .kv
                .lmove_head(&self.pending_key(), &self.active_key())
                .await?
            else {
                return Ok(None);
            };
            match serde_json::from_str::<JobEnvelope<T>>(&raw) {
                Ok(envelope) => return Ok(Some(ClaimedJob { envelope, raw })),
                Err(e) => {
                    // An unparseable job can never succeed; drop it rather
                    // than poison the queue.
                    error!(queue = %self.name, error = %e, "discarding undecodable job");
                    self.kv.lrem(&self.active_key(), &raw).await?;
                }
            }
        }
    }

    pub async fn ack_done(&self, job: &ClaimedJob<T>) -> Result<(), KvError> {
        self.kv.lrem(&self.active_key(), &job.raw).await?;
        self.push_ledger(&self.completed_key(), &job.raw, self.policy.keep_completed)
            .await
    }

    /// Records a failed attempt: back to the delayed set with exponential
    /// backoff, or to the failed ledger once attempts are exhausted.
    pub async fn ack_failed(&self, job: &ClaimedJob<T>, reason: &str) -> Result<(), KvError> {
        self.kv.lrem(&self.active_key(), &job.raw).await?;

        let mut envelope =
            serde_json::from_str::<JobEnvelope<serde_json::Value>>(&job.raw).map_err(|e| {
                KvError::Command(format!("job envelope no longer decodes: {e}"))
            })?;
        envelope.attempts += 1;

        if envelope.attempts >= self.policy.max_attempts {
            warn!(
                queue = %self.name,
                job_id = %envelope.id,
                attempts = envelope.attempts,
                reason,
                "job failed permanently"
            );
            return self
                .push_ledger(&self.failed_key(), &encode(&envelope)?, self.policy.keep_failed)
                .await;
        }

        let delay_ms = self.policy.backoff_ms(envelope.attempts);
        debug!(
            queue = %self.name,
            job_id = %envelope.id,
            attempts = envelope.attempts,
            delay_ms,
            reason,
            "job retry scheduled"
        );
        let ready_at = Utc::now().timestamp_millis() as f64 + delay_ms as f64;
        self.kv
            .zadd(&self.delayed_key(), &encode(&envelope)?, ready_at)
            .await
    }

    /// Re-queues the job after `delay_ms` without consuming an attempt.
    pub async fn reschedule(&self, job: &ClaimedJob<T>, delay_ms: u64) -> Result<(), KvError> {
        self.kv.lrem(&self.active_key(), &job.raw).await?;
        let ready_at = Utc::now().timestamp_millis() as f64 + delay_ms as f64;
        self.kv.zadd(&self.delayed_key(), &job.raw, ready_at).await
    }

    pub async fn pending_len(&self) -> Result<u64, KvError> {
        self.kv.llen(&self.pending_key()).await
    }

    async fn push_ledger(&self, key: &str, raw: &str, keep: i64) -> Result<(), KvError> {
        self.kv.lpush(key, raw).await?;
        self.kv.ltrim(key, 0, keep - 1).await
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, KvError> {
    serde_json::to_string(value).map_err(|e| KvError::Command(format!("encode job: {e}")))
}

/// Semaphore-bounded consumer loop. Claiming stops when `shutdown` flips;
/// in-flight jobs are drained before the task exits.
pub fn spawn_worker<T, H>(
    queue: JobQueue<T>,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    H: JobHandler<T> + ?Sized + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = queue.recover().await {
            error!(queue = %queue.name(), error = %e, "queue recovery failed");
        }

        let concurrency = queue.policy().concurrency;
        let semaphore = Arc::new(Semaphore::new(concurrency));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            match queue.claim().await {
                Ok(Some(job)) => {
                    let queue = queue.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let outcome = handler.handle(&job.envelope).await;
                        let result = match outcome {
                            JobOutcome::Done => queue.ack_done(&job).await,
                            JobOutcome::Retry(reason) => queue.ack_failed(&job, &reason).await,
                            JobOutcome::RescheduleMs(delay) => {
                                queue.reschedule(&job, delay).await
                            }
                        };
                        if let Err(e) = result {
                            error!(
                                queue = %queue.name(),
                                job_id = %job.envelope.id,
                                error = %e,
                                "failed to acknowledge job"
                            );
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(CLAIM_POLL_INTERVAL) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(queue = %queue.name(), error = %e, "queue claim failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        // Wait for in-flight jobs before exiting.
        let _ = semaphore.acquire_many(concurrency as u32).await;
        debug!(queue = %queue.name(), "queue worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::kv::MemoryKv;

    fn queue(kv: Arc<dyn KvStore>) -> JobQueue<String> {
        JobQueue::new(
            "test",
            kv,
            QueuePolicy {
                concurrency: 1,
                max_attempts: 3,
                backoff_base_ms: 1_000,
                keep_completed: 10,
                keep_failed: 10,
            },
        )
    }

    #[tokio::test]
    async fn claims_in_fifo_order() {
        let queue = queue(Arc::new(MemoryKv::new()));
        queue.enqueue("first".to_string()).await.unwrap();
        queue.enqueue("second".to_string()).await.unwrap();
        queue.enqueue("third".to_string()).await.unwrap();

        for expected in ["first", "second", "third"] {
            let job = queue.claim().await.unwrap().expect("job available");
            assert_eq!(job.envelope.payload, expected);
            queue.ack_done(&job).await.unwrap();
        }
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_job_lands_in_delayed_with_incremented_attempts() {
        let queue = queue(Arc::new(MemoryKv::new()));
        queue.enqueue("flaky".to_string()).await.unwrap();

        let job = queue.claim().await.unwrap().expect("job");
        queue.ack_failed(&job, "platform 502").await.unwrap();

        // Not yet due: the backoff is a second out.
        assert!(queue.claim().await.unwrap().is_none());

        // Force-promote by reaching into the delayed set with a future time.
        let kv = queue.kv.clone();
        let due = kv
            .zpop_due(&queue.delayed_key(), f64::MAX, 16)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        let envelope: JobEnvelope<String> = serde_json::from_str(&due[0]).unwrap();
        assert_eq!(envelope.attempts, 1);
        assert_eq!(envelope.payload, "flaky");
    }

    #[tokio::test]
    async fn exhausted_job_moves_to_failed_ledger() {
        let queue = queue(Arc::new(MemoryKv::new()));
        queue.enqueue("doomed".to_string()).await.unwrap();

        for _ in 0..3 {
            // Re-promote whatever is delayed, then claim and fail it.
            let kv = queue.kv.clone();
            for raw in kv
                .zpop_due(&queue.delayed_key(), f64::MAX, 16)
                .await
                .unwrap()
            {
                kv.rpush(&queue.pending_key(), &raw).await.unwrap();
            }
            let job = queue.claim().await.unwrap().expect("job");
            queue.ack_failed(&job, "still broken").await.unwrap();
        }

        let failed = queue.kv.lrange(&queue.failed_key(), 0, -1).await.unwrap();
        assert_eq!(failed.len(), 1);
        let envelope: JobEnvelope<String> = serde_json::from_str(&failed[0]).unwrap();
        assert_eq!(envelope.attempts, 3);
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reschedule_keeps_attempts_untouched() {
        let queue = queue(Arc::new(MemoryKv::new()));
        queue.enqueue("limited".to_string()).await.unwrap();

        let job = queue.claim().await.unwrap().expect("job");
        queue.reschedule(&job, 0).await.unwrap();

        let job = queue.claim().await.unwrap().expect("promoted back");
        assert_eq!(job.envelope.attempts, 0);
        assert_eq!(job.envelope.payload, "limited");
    }

    #[tokio::test]
    async fn recover_returns_claimed_jobs_to_pending() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let queue = queue(kv.clone());
        queue.enqueue("orphan".to_string()).await.unwrap();

        // Claim without acknowledging, as a crashed worker would.
        let _ = queue.claim().await.unwrap().expect("job");
        assert_eq!(queue.pending_len().await.unwrap(), 0);

        let recovered = queue.recover().await.unwrap();
        assert_eq!(recovered, 1);
        let job = queue.claim().await.unwrap().expect("job back");
        assert_eq!(job.envelope.payload, "orphan");
    }

    #[tokio::test]
    async fn completed_ledger_is_bounded() {
        let queue = queue(Arc::new(MemoryKv::new()));
        for i in 0..15 {
            queue.enqueue(format!("job-{i}")).await.unwrap();
        }
        while let Some(job) = queue.claim().await.unwrap() {
            queue.ack_done(&job).await.unwrap();
        }

        let completed = queue
            .kv
            .lrange(&queue.completed_key(), 0, -1)
            .await
            .unwrap();
        assert_eq!(completed.len(), 10);
    }

    #[tokio::test]
    async fn worker_runs_jobs_and_stops_on_shutdown() {
        struct Recorder(std::sync::Mutex<Vec<String>>);

        #[async_trait]
        impl JobHandler<String> for Recorder {
            async fn handle(&self, job: &JobEnvelope<String>) -> JobOutcome {
                self.0.lock().unwrap().push(job.payload.clone());
                JobOutcome::Done
            }
        }

        let queue = queue(Arc::new(MemoryKv::new()));
        queue.enqueue("a".to_string()).await.unwrap();
        queue.enqueue("b".to_string()).await.unwrap();

        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_worker(queue.clone(), recorder.clone(), stop_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*recorder.0.lock().unwrap(), vec!["a", "b"]);
        assert!(queue.claim().await.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn fifo_order_is_preserved(payloads in proptest::collection::vec("[a-z]{1,8}", 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let queue = queue(Arc::new(MemoryKv::new()));
                for p in &payloads {
                    queue.enqueue(p.clone()).await.unwrap();
                }
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim().await.unwrap() {
                    claimed.push(job.envelope.payload.clone());
                    queue.ack_done(&job).await.unwrap();
                }
                prop_assert_eq!(claimed, payloads);
                Ok(())
            })?;
        }
    }
}
