//! Worker pool: claims batches from a [`JobQueueStore`] and dispatches them
//! to a [`JobHandler`], with heartbeats and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::storage::JobQueueStore;
use super::types::{Job, JobId};
use crate::errors::RuntimeError;

/// Implement this trait to process one [`Job`] type.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job, ctx: &WorkerContext) -> Result<serde_json::Value, RuntimeError>;

    fn can_handle(&self, job_type: &crate::model::JobType) -> bool;

    fn name(&self) -> &str;
}

/// Context passed to a handler for the duration of one job.
pub struct WorkerContext {
    pub worker_id: String,
    store: Arc<dyn JobQueueStore>,
}

impl WorkerContext {
    /// Refresh the lease on the in-flight job; called periodically by
    /// long-running handlers between processing steps.
    pub async fn heartbeat(&self, job_id: JobId) {
        if let Err(e) = self.store.heartbeat(job_id, &self.worker_id).await {
            warn!(worker_id = %self.worker_id, job_id = %job_id, error = %e, "heartbeat failed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("invalid pool state: {0}")]
    InvalidState(String),
}

pub struct WorkerPool {
    store: Arc<dyn JobQueueStore>,
    worker_id: String,
    batch_size: i64,
    thread_pool_size: usize,
    poll_interval: Duration,
    job_timeout: Duration,
    retry_delay: Duration,
    handlers: Arc<Vec<Box<dyn JobHandler>>>,
    state: Arc<RwLock<PoolState>>,
    workers: Arc<RwLock<Vec<JoinHandle<()>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    /// `thread_pool_size` bounds how many claimed jobs this process runs
    /// concurrently; `batch_size` bounds how many rows one `claim_batch`
    /// call takes off the queue.
    pub fn new(
        store: Arc<dyn JobQueueStore>,
        worker_id: impl Into<String>,
        batch_size: i64,
        thread_pool_size: usize,
        poll_interval: Duration,
        job_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            worker_id: worker_id.into(),
            batch_size,
            thread_pool_size: thread_pool_size.max(1),
            poll_interval,
            job_timeout,
            retry_delay,
            handlers: Arc::new(Vec::new()),
            state: Arc::new(RwLock::new(PoolState::Created)),
            workers: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
        }
    }

    pub fn with_handler(mut self, handler: Box<dyn JobHandler>) -> Self {
        Arc::get_mut(&mut self.handlers)
            .expect("handlers not shared yet")
            .push(handler);
        self
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        let mut state = self.state.write().await;
        if *state != PoolState::Created {
            return Err(WorkerPoolError::InvalidState(
                "pool can only be started from Created".into(),
            ));
        }

        info!(worker_id = %self.worker_id, "starting job pickup loop");

        let store = self.store.clone();
        let worker_id = self.worker_id.clone();
        let batch_size = self.batch_size;
        let thread_pool_size = self.thread_pool_size;
        let poll_interval = self.poll_interval;
        let job_timeout = self.job_timeout;
        let retry_delay = self.retry_delay;
        let handlers = self.handlers.clone();
        let pool_state = self.state.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            pickup_loop(
                worker_id,
                store,
                batch_size,
                thread_pool_size,
                poll_interval,
                job_timeout,
                retry_delay,
                handlers,
                pool_state,
                shutdown_rx,
            )
            .await;
        });

        self.workers.write().await.push(handle);
        *state = PoolState::Running;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), WorkerPoolError> {
        {
            let mut state = self.state.write().await;
            if *state != PoolState::Running {
                return Err(WorkerPoolError::InvalidState(
                    "pool can only be shutdown from Running".into(),
                ));
            }
            *state = PoolState::ShuttingDown;
        }

        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(timeout.min(Duration::from_millis(200))).await;

        let mut state = self.state.write().await;
        *state = PoolState::Stopped;
        info!(worker_id = %self.worker_id, "worker pool stopped");
        Ok(())
    }

    pub async fn state(&self) -> PoolState {
        *self.state.read().await
    }
}

#[allow(clippy::too_many_arguments)]
async fn pickup_loop(
    worker_id: String,
    store: Arc<dyn JobQueueStore>,
    batch_size: i64,
    thread_pool_size: usize,
    poll_interval: Duration,
    job_timeout: Duration,
    retry_delay: Duration,
    handlers: Arc<Vec<Box<dyn JobHandler>>>,
    state: Arc<RwLock<PoolState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(worker_id = %worker_id, thread_pool_size, "pickup loop started");
    let semaphore = Arc::new(tokio::sync::Semaphore::new(thread_pool_size));

    loop {
        match shutdown_rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Closed) => break,
            Err(broadcast::error::TryRecvError::Empty) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
        }

        if matches!(*state.read().await, PoolState::ShuttingDown | PoolState::Stopped) {
            break;
        }

        match store.claim_batch(&worker_id, batch_size).await {
            Ok(jobs) if !jobs.is_empty() => {
                let ctx = Arc::new(WorkerContext {
                    worker_id: worker_id.clone(),
                    store: store.clone(),
                });
                let mut tasks = Vec::with_capacity(jobs.len());
                for job in jobs {
                    // Bounds how many jobs actually run at once to
                    // `thread_pool_size`, independent of `batch_size`.
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                    let worker_id = worker_id.clone();
                    let store = store.clone();
                    let handlers = handlers.clone();
                    let ctx = ctx.clone();
                    tasks.push(tokio::spawn(async move {
                        process_job(&worker_id, &job, &store, &handlers, &ctx, job_timeout, retry_delay).await;
                        drop(permit);
                    }));
                }
                for t in tasks {
                    let _ = t.await;
                }
            }
            Ok(_) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "claim_batch failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!(worker_id = %worker_id, "pickup loop stopped");
}

async fn process_job(
    worker_id: &str,
    job: &Job,
    store: &Arc<dyn JobQueueStore>,
    handlers: &Arc<Vec<Box<dyn JobHandler>>>,
    ctx: &WorkerContext,
    timeout: Duration,
    retry_delay: Duration,
) {
    debug!(worker_id = %worker_id, job_id = %job.id, job_type = ?job.job_type, "processing job");

    let handler = handlers.iter().find(|h| h.can_handle(&job.job_type));
    match handler {
        Some(handler) => {
            let result = tokio::time::timeout(timeout, handler.handle(job, ctx)).await;
            match result {
                Ok(Ok(_)) => {
                    if let Err(e) = store.complete(job.id).await {
                        error!(worker_id = %worker_id, job_id = %job.id, error = %e, "failed to mark job completed");
                    }
                }
                Ok(Err(e)) => {
                    warn!(worker_id = %worker_id, job_id = %job.id, error = %e, "job handler returned an error");
                    if let Err(e) = store.fail(job.id, &e.to_string(), retry_delay).await {
                        error!(worker_id = %worker_id, job_id = %job.id, error = %e, "failed to mark job failed");
                    }
                }
                Err(_) => {
                    warn!(worker_id = %worker_id, job_id = %job.id, "job timed out");
                    let msg = format!("job timed out after {} seconds", timeout.as_secs());
                    if let Err(e) = store.fail(job.id, &msg, retry_delay).await {
                        error!(worker_id = %worker_id, job_id = %job.id, error = %e, "failed to mark job timed out");
                    }
                }
            }
        }
        None => {
            warn!(worker_id = %worker_id, job_id = %job.id, job_type = ?job.job_type, "no handler registered for job type");
            if let Err(e) = store
                .fail(job.id, "no handler registered for job type", retry_delay)
                .await
            {
                error!(worker_id = %worker_id, job_id = %job.id, error = %e, "failed to mark job failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::sqlite::SqliteJobStorage;
    use crate::model::JobType;

    struct AlwaysOkHandler;

    #[async_trait::async_trait]
    impl JobHandler for AlwaysOkHandler {
        async fn handle(&self, _job: &Job, _ctx: &WorkerContext) -> Result<serde_json::Value, RuntimeError> {
            Ok(serde_json::json!({"status": "ok"}))
        }

        fn can_handle(&self, _job_type: &JobType) -> bool {
            true
        }

        fn name(&self) -> &str {
            "always-ok"
        }
    }

    #[tokio::test]
    async fn pool_state_transitions() {
        let storage = SqliteJobStorage::new("sqlite::memory:").await.unwrap();
        storage.setup().await.unwrap();
        let store: Arc<dyn JobQueueStore> = Arc::new(storage);

        let pool = WorkerPool::new(
            store,
            "test-worker",
            5,
            5,
            Duration::from_millis(10),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .with_handler(Box::new(AlwaysOkHandler));

        assert_eq!(pool.state().await, PoolState::Created);
        assert!(pool.shutdown(Duration::from_millis(50)).await.is_err());

        pool.start().await.unwrap();
        assert_eq!(pool.state().await, PoolState::Running);
        assert!(pool.start().await.is_err());

        pool.shutdown(Duration::from_millis(50)).await.unwrap();
        assert_eq!(pool.state().await, PoolState::Stopped);
    }

    #[tokio::test]
    async fn process_job_marks_completion() {
        let storage = SqliteJobStorage::new("sqlite::memory:").await.unwrap();
        storage.setup().await.unwrap();
        let store: Arc<dyn JobQueueStore> = Arc::new(storage);

        let job = Job::new(JobType::Cleanup, 0, 3);
        let job_id = job.id;
        store.enqueue(job).await.unwrap();

        let claimed = store.claim_batch("w1", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let ctx = WorkerContext {
            worker_id: "w1".into(),
            store: store.clone(),
        };
        let handlers: Arc<Vec<Box<dyn JobHandler>>> = Arc::new(vec![Box::new(AlwaysOkHandler)]);

        process_job(
            "w1",
            &claimed[0],
            &store,
            &handlers,
            &ctx,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await;

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, crate::model::JobStatus::Completed);
    }
}
