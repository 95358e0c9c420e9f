//! Engine configuration, mirroring `langgraph_core`'s
//! `CacheConfig`-style `Default`-backed config structs: every field has a
//! sensible default so `EngineOptions::default()` alone is always valid.

use crate::cache::CacheConfig;
use serde::{Deserialize, Serialize};

/// Whether data nodes (`Category::Data`) compute eagerly at startup or lazily
/// on first subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataNodeExecutionMode {
    Eager,
    Lazy,
}

impl Default for DataNodeExecutionMode {
    fn default() -> Self {
        Self::Eager
    }
}

/// Whether worker-safe plugin computes may be dispatched to the worker pool
/// at all. `Serial` forces every compute onto the scheduler's own task
/// regardless of `Plugin::worker_safe`, for hosts that want a fully
/// single-threaded, deterministic-ordering run (e.g. deterministic tests or
/// an embedding that can't spare a worker pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Serial,
    Parallel,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Parallel
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub data_nodes_execution_mode: DataNodeExecutionMode,

    /// Gates whether a worker-safe plugin is actually dispatched to the
    /// worker pool; `Serial` runs everything inline even if the plugin
    /// declares itself worker-safe.
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// When true, plugins may return `ComputeResult::Cancelable` and have
    /// the scheduler actually fire the cancel callback on supersession;
    /// when false, superseded computes are left to finish and their result
    /// is discarded.
    #[serde(default = "default_true")]
    pub enable_cancelable_compute: bool,

    #[serde(default)]
    pub throttle_time_ms: u64,

    #[serde(default)]
    pub debounce_time_ms: u64,

    #[serde(default)]
    pub distinct_values: bool,

    /// Runtime compute errors are always contained: the node emits `null`,
    /// `error_count` increments, and the engine keeps running regardless of
    /// this flag. `silent_errors = false` only adds an `ERROR`-level log
    /// line on top of the `NODE_COMPUTE_ERROR` event that always fires.
    #[serde(default = "default_true")]
    pub silent_errors: bool,

    #[serde(default)]
    pub sanitize_input: bool,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub parallel: ParallelOptions,

    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            data_nodes_execution_mode: DataNodeExecutionMode::default(),
            execution_mode: ExecutionMode::default(),
            enable_cancelable_compute: default_true(),
            throttle_time_ms: 0,
            debounce_time_ms: 0,
            distinct_values: false,
            silent_errors: default_true(),
            sanitize_input: false,
            max_depth: default_max_depth(),
            cache: CacheConfig::default(),
            parallel: ParallelOptions::default(),
            task_timeout_ms: default_task_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    32
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

/// Worker-pool sizing and timeout knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelOptions {
    /// Overrides `default_worker_count()` when set.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Carried for API-shape parity with systems that resolve worker
    /// computes from an external script; this engine's workers are
    /// in-process tasks, so this field is inert.
    #[serde(default)]
    pub worker_path: Option<String>,

    #[serde(default)]
    pub worker_timeout_ms: Option<u64>,

    #[serde(default)]
    pub disable_auto_cleanup: bool,
}
