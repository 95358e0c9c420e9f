//! A reactive dataflow execution engine: nodes are described declaratively
//! as a DAG, wired to plugin compute functions by type tag, and scheduled
//! to recompute whenever their inputs change. Values flow out through a
//! per-node multicast stream with last-value replay, memoized behind a
//! fingerprint-keyed cache, and dispatched either inline or onto a
//! worker-task pool depending on the plugin's declared safety.
//!
//! The public entry point is [`builder::create_graph`], which threads a
//! list of composition operators (`with_nodes`, `with_options`, ...)
//! through a [`builder::GraphSpec`] and returns an
//! [`builder::ExecutableGraph`] — the handle a host application drives via
//! `execute`/`pause`/`resume`/`destroy`, `observe`, and the attached
//! provider surface.

pub mod builder;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod lifecycle;
pub mod node;
pub mod options;
pub mod providers;
pub mod registry;
pub mod sanitize;
pub mod scheduler;
pub mod snapshot;
pub mod stream;
pub mod workers;

pub use builder::{
    create_graph, with_cache_provider, with_event_context_provider, with_logger_provider,
    with_nodes, with_notifications, with_options, with_persistence, with_plugin_registry,
    ExecutableGraph, Operator,
};
pub use error::{EngineError, Result};
pub use lifecycle::{EngineEvent, EngineState};
pub use node::{Category, Config, Emission, NodeDefinition, NodeId};
pub use options::{DataNodeExecutionMode, EngineOptions, ExecutionMode, ParallelOptions};
pub use providers::{global_logger, set_global_logger, LogLevel, LoggerProvider};
pub use registry::{ComputeResult, Plugin, PluginRegistry};
pub use scheduler::EngineStats;
pub use snapshot::{EngineStateSnapshot, NodeSnapshot};
