//! Worker Pool Executor: a fixed-size pool of in-process tasks that
//! run worker-safe plugin computes off the scheduler's own task, dispatched
//! to whichever worker currently has the fewest pending jobs.
//!
//! Grounded on `runtime.rs`'s `StreamWriter` and `compiled/streaming.rs`'s
//! `StreamMultiplexer`, both of which marshal requests to a background task
//! over an `mpsc` channel and correlate responses by id; generalized here
//! to N workers instead of one, with least-loaded dispatch and
//! crash-recovery respawn.

use crate::error::{EngineError, Result};
use crate::node::NodeId;
use crate::registry::ComputeResult;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Exponential backoff with jitter for worker respawn, shaped after
/// `executor::retry::RetryConfig::backoff_delay` but sized for an
/// in-process restart rather than an outbound network call.
struct RespawnBackoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
}

impl Default for RespawnBackoff {
    fn default() -> Self {
        Self {
            initial_ms: 50,
            max_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RespawnBackoff {
    /// `attempt` is the number of consecutive respawns already performed
    /// for this worker slot since the pool was created.
    fn delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_ms);
        let jitter_ms = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
        Duration::from_millis(delay_ms + jitter_ms)
    }
}

/// Reads `DATAFLOW_MAX_WORKERS`, falling back to the host's available
/// parallelism (floored at 1), matching the override-then-detect idiom of
/// `warp_core::engine_impl::default_worker_count`.
pub fn default_worker_count() -> usize {
    if let Ok(raw) = std::env::var("DATAFLOW_MAX_WORKERS") {
        if let Ok(parsed) = raw.parse::<usize>() {
            return parsed.max(1);
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

struct Job {
    node_id: NodeId,
    task: Box<dyn FnOnce() -> ComputeResult + Send>,
    reply: oneshot::Sender<Result<serde_json::Value>>,
}

/// Handle to one worker task: a queue to send jobs on, and the count of
/// jobs currently in flight for least-loaded dispatch.
struct WorkerHandle {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    /// Consecutive respawns for this slot since its last successful job,
    /// used to scale the next respawn's backoff delay.
    attempts: Arc<AtomicU32>,
    join: JoinHandle<()>,
}

/// The worker pool. Each worker is a `tokio::task::spawn`-ed loop pulling
/// jobs off its own `mpsc` queue; a plugin's `ComputeResult::Lazy`/
/// `Cancelable` future is awaited on that worker's task, not blocked on, so
/// a pool of N workers can have far more than N computes in flight as long
/// as they're not CPU-bound.
pub struct WorkerPool {
    workers: Mutex<Vec<WorkerHandle>>,
    size: usize,
    backoff: RespawnBackoff,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            workers.push(spawn_worker(index));
        }
        Self {
            workers: Mutex::new(workers),
            size,
            backoff: RespawnBackoff::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Dispatches a compute to the least-loaded worker (lowest pending
    /// count; ties broken by lowest index), awaiting its result.
    pub async fn dispatch(
        &self,
        node_id: NodeId,
        task: impl FnOnce() -> ComputeResult + Send + 'static,
    ) -> Result<serde_json::Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            node_id: node_id.clone(),
            task: Box::new(task),
            reply: reply_tx,
        };

        let worker_index = {
            let workers = self.workers.lock().await;
            workers
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.pending.load(Ordering::Relaxed))
                .map(|(i, _)| i)
                .expect("pool always has at least one worker")
        };

        {
            let workers = self.workers.lock().await;
            let worker = &workers[worker_index];
            worker.pending.fetch_add(1, Ordering::Relaxed);
            if worker.sender.send(job).is_err() {
                worker.pending.fetch_sub(1, Ordering::Relaxed);
                return Err(EngineError::worker_crashed(worker_index, "worker task gone"));
            }
        }

        reply_rx
            .await
            .unwrap_or_else(|_| Err(EngineError::worker_crashed(worker_index, "dropped reply")))
    }

    /// Replaces a crashed worker in place, preserving pool size, after
    /// sleeping an exponentially growing, jittered delay that scales with
    /// how many times this slot has crashed in a row. The scheduler calls
    /// this after observing a `WorkerCrashed` error from `dispatch`.
    pub async fn respawn(&self, index: usize) {
        let attempts = {
            let workers = self.workers.lock().await;
            match workers.get(index) {
                Some(worker) => worker.attempts.fetch_add(1, Ordering::Relaxed),
                None => return,
            }
        };

        let delay = self.backoff.delay(attempts);
        tracing::warn!(worker_index = index, attempt = attempts, delay_ms = delay.as_millis(), "respawning crashed worker");
        tokio::time::sleep(delay).await;

        let mut workers = self.workers.lock().await;
        if index < workers.len() {
            let attempts = workers[index].attempts.clone();
            workers[index].join.abort();
            workers[index] = spawn_worker(index);
            workers[index].attempts = attempts;
        }
    }

    /// Aborts all worker tasks. Pending jobs are dropped; their
    /// `dispatch` callers observe a `WorkerCrashed`/channel-closed error.
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().await;
        for worker in workers.iter() {
            worker.join.abort();
        }
    }
}

fn spawn_worker(index: usize) -> WorkerHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
    let pending = Arc::new(AtomicUsize::new(0));
    let pending_for_task = pending.clone();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_task = attempts.clone();

    let join = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let Job {
                node_id,
                task,
                reply,
            } = job;
            let result = run_job(node_id, task).await;
            pending_for_task.fetch_sub(1, Ordering::Relaxed);
            if result.is_ok() {
                attempts_for_task.store(0, Ordering::Relaxed);
            }
            let _ = reply.send(result);
        }
        tracing::debug!(worker_index = index, "worker task exiting: queue closed");
    });

    WorkerHandle {
        sender,
        pending,
        attempts,
        join,
    }
}

async fn run_job(
    node_id: NodeId,
    task: Box<dyn FnOnce() -> ComputeResult + Send>,
) -> Result<serde_json::Value> {
    match task() {
        ComputeResult::Immediate(value) => Ok(value),
        ComputeResult::Lazy(future) => future
            .await
            .map_err(|cause| EngineError::plugin_compute(node_id, cause)),
        ComputeResult::Cancelable { future, .. } => future
            .await
            .map_err(|cause| EngineError::plugin_compute(node_id, cause)),
    }
}
