//! Error taxonomy for the engine's public API.
//!
//! Mirrors the shape of a typical workspace error enum: one `thiserror`
//! variant per failure kind, struct-like variants carrying structured
//! context, and a handful of constructor helpers for the variants that take
//! more than a tuple of arguments.

use crate::node::NodeId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // --- Construction ---
    #[error("cycle detected in graph: {path:?}")]
    CycleError { path: Vec<NodeId> },

    #[error("node '{0}' references unknown input '{1}'")]
    UnknownInput(NodeId, NodeId),

    #[error("no plugin registered for type tag '{0}'")]
    UnknownPlugin(String),

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(NodeId),

    // --- Runtime ---
    #[error("plugin compute failed for node '{node_id}': {cause}")]
    PluginComputeError { node_id: NodeId, cause: String },

    #[error("task for node '{node_id}' timed out after {ms}ms")]
    TaskTimeout { node_id: NodeId, ms: u64 },

    #[error("worker {worker_index} crashed: {cause}")]
    WorkerCrashed { worker_index: usize, cause: String },

    #[error("worker pool executor terminated")]
    ExecutorTerminated,

    // --- Lifecycle ---
    #[error("engine has been destroyed")]
    EngineDestroyed,

    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    // --- Provider ---
    #[error("provider not registered: {kind}")]
    ProviderNotRegistered { kind: &'static str },

    // --- Input guard ---
    #[error("input guard rejected value in {context}: {value}")]
    InputGuardError { context: String, value: String },

    // --- Serialization / snapshot ---
    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn plugin_compute(node_id: impl Into<NodeId>, cause: impl std::fmt::Display) -> Self {
        Self::PluginComputeError {
            node_id: node_id.into(),
            cause: cause.to_string(),
        }
    }

    pub fn timeout(node_id: impl Into<NodeId>, ms: u64) -> Self {
        Self::TaskTimeout {
            node_id: node_id.into(),
            ms,
        }
    }

    pub fn worker_crashed(worker_index: usize, cause: impl std::fmt::Display) -> Self {
        Self::WorkerCrashed {
            worker_index,
            cause: cause.to_string(),
        }
    }

    pub fn provider_not_registered(kind: &'static str) -> Self {
        Self::ProviderNotRegistered { kind }
    }
}
