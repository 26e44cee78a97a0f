//! Job Queue Store (C5) and Scheduler (C6).

mod postgres;
mod scheduler;
mod sqlite;
mod storage;
mod types;
mod worker;

pub use postgres::PostgresJobStorage;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sqlite::SqliteJobStorage;
pub use storage::{create_storage, DeadLetterEntry, JobFilter, JobQueueStore, QueueMetrics, StorageBackend};
pub use types::{Job, JobId};
pub use worker::{JobHandler, WorkerContext, WorkerPool};
