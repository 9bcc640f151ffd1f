//! Durable work queues on a redis-compatible broker.
//!
//! Queues are sorted sets scored by due time; delayed jobs simply carry a
//! future score. Workers are idempotent, so there is no stall recovery and
//! completed/failed jobs are dropped rather than retained. Cross-process
//! mutual exclusion uses named locks, not in-process state.

pub mod backoff;
pub mod lock;
pub mod manager;

pub use backoff::Backoff;
pub use lock::{LockGuard, LockManager};
pub use manager::{Job, QueueManager, QueueOptions};
