//! Named durable queues.
//!
//! Each queue is a sorted set `<name>-<jobVersion>` scored by due time in
//! epoch milliseconds; a future score is a delayed job. Workers poll with
//! `ZPOPMIN`, push back jobs that are not due, and run handlers under a
//! hard timeout. Failed jobs retry up to `attempts`, then drop (or park in
//! `<queue>:dead` when retention is enabled).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use domain::{DomainError, Result};

use crate::backoff::Backoff;

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// At-most-N executions per job.
    pub attempts: u32,
    /// Hard cancel boundary per job.
    pub timeout: Duration,
    /// Parallel jobs for this queue within one worker process.
    pub concurrency: usize,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            attempts: 1,
            timeout: Duration::from_secs(3600),
            concurrency: 1,
            remove_on_complete: true,
            remove_on_fail: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: serde_json::Value,
    pub attempts_made: u32,
}

impl Job {
    pub fn new(payload: serde_json::Value) -> Self {
        Job {
            id: Uuid::new_v4().to_string(),
            payload,
            attempts_made: 0,
        }
    }

    pub fn data<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DomainError::Internal(format!("job payload decode: {e}")))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as f64
}

pub struct QueueManager {
    conn: ConnectionManager,
    job_version: String,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(conn: ConnectionManager, job_version: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        QueueManager {
            conn,
            job_version: job_version.to_string(),
            shutdown_tx,
            shutdown_rx,
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Versioned queue name; parallel deployments of the worker fleet never
    /// share queues.
    pub fn queue_name(&self, base: &str) -> String {
        format!("{base}-{}", self.job_version)
    }

    pub async fn enqueue(&self, base: &str, payload: serde_json::Value) -> Result<()> {
        self.enqueue_delayed(base, payload, Duration::ZERO).await
    }

    pub async fn enqueue_delayed(
        &self,
        base: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<()> {
        let job = Job::new(payload);
        self.enqueue_job(base, job, delay).await
    }

    async fn enqueue_job(&self, base: &str, job: Job, delay: Duration) -> Result<()> {
        let queue = self.queue_name(base);
        let body = serde_json::to_string(&job)
            .map_err(|e| DomainError::Internal(format!("job encode: {e}")))?;
        let score = now_ms() + delay.as_millis() as f64;
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(&queue)
            .arg(score)
            .arg(body)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| DomainError::Transient(format!("enqueue {queue}: {e}")))?;
        Ok(())
    }

    /// Register a processor: spawns `concurrency` pollers that run `handler`
    /// for each due job until `close()`.
    pub fn register<F, Fut>(self: &Arc<Self>, base: &str, options: QueueOptions, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let queue = self.queue_name(base);
        info!(queue = %queue, concurrency = options.concurrency, "registering queue processor");

        for worker_index in 0..options.concurrency.max(1) {
            let manager = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let queue = queue.clone();
            let base = base.to_string();
            let mut shutdown = self.shutdown_rx.clone();

            let handle = tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    match manager.pop_due(&queue).await {
                        Ok(Some(job)) => {
                            manager.run_job(&base, &queue, job, options, handler.as_ref()).await;
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                        Err(e) => {
                            warn!(queue = %queue, worker = worker_index, "poll error: {e}");
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                    }
                }
            });
            self.workers.lock().push(handle);
        }
    }

    /// Pop the earliest job if it is due; otherwise push it back untouched.
    async fn pop_due(&self, queue: &str) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(queue)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::Transient(format!("pop {queue}: {e}")))?;

        let Some((body, score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        if score > now_ms() {
            redis::cmd("ZADD")
                .arg(queue)
                .arg(score)
                .arg(&body)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| DomainError::Transient(format!("push back {queue}: {e}")))?;
            return Ok(None);
        }

        match serde_json::from_str(&body) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                error!(queue = %queue, "dropping undecodable job: {e}");
                Ok(None)
            }
        }
    }

    async fn run_job<F, Fut>(
        &self,
        base: &str,
        queue: &str,
        mut job: Job,
        options: QueueOptions,
        handler: &F,
    ) where
        F: Fn(Job) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        let job_id = job.id.clone();
        let outcome = tokio::time::timeout(options.timeout, handler(job.clone())).await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {:?}", options.timeout)),
        };

        let Some(reason) = failure else {
            return;
        };

        job.attempts_made += 1;
        if job.attempts_made < options.attempts {
            let delay = Backoff::default().delay(job.attempts_made - 1);
            warn!(queue = %queue, job = %job_id, attempt = job.attempts_made, "job failed, retrying in {delay:?}: {reason}");
            if let Err(e) = self.enqueue_job(base, job, delay).await {
                error!(queue = %queue, job = %job_id, "re-enqueue failed: {e}");
            }
            return;
        }

        error!(queue = %queue, job = %job_id, "job failed permanently: {reason}");
        if !options.remove_on_fail {
            let dead_queue = format!("{queue}:dead");
            let mut conn = self.conn.clone();
            if let Ok(body) = serde_json::to_string(&job) {
                let _: std::result::Result<(), _> = redis::cmd("ZADD")
                    .arg(&dead_queue)
                    .arg(now_ms())
                    .arg(body)
                    .query_async(&mut conn)
                    .await;
            }
        }
    }

    /// Stop polling and drain in-flight jobs up to the grace window.
    pub async fn close(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("queue drain exceeded grace window; aborting remaining jobs");
        }
    }
}

/// Queue name constants used by the pipeline.
pub mod names {
    pub const RESOLVE: &str = "resolveAndDeployBuildQueue";
    pub const BUILD_IMAGE: &str = "buildImage";
    pub const DEPLOY: &str = "deploy";
    pub const WEBHOOK: &str = "webhook_queue";
    pub const TEARDOWN: &str = "teardown";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_round_trips() {
        let job = Job::new(serde_json::json!({"build_id": "abc", "run_uuid": "r1"}));
        #[derive(Deserialize)]
        struct Payload {
            build_id: String,
        }
        let payload: Payload = job.data().unwrap();
        assert_eq!(payload.build_id, "abc");
        assert_eq!(job.attempts_made, 0);
    }

    #[test]
    fn default_options_match_queue_contract() {
        let options = QueueOptions::default();
        assert_eq!(options.attempts, 1);
        assert_eq!(options.timeout, Duration::from_secs(3600));
        assert!(options.remove_on_complete);
        assert!(options.remove_on_fail);
    }
}
