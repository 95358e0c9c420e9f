//! Worker Pool Executor.

pub mod pool;

pub use pool::{default_worker_count, WorkerPool};
