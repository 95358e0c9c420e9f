//! Plugin Registry: maps a node's type tag to its compute
//! capability. Insertion-only during graph construction, logically
//! immutable for the lifetime of an engine instance — the same contract
//! `langgraph_core::graph`'s `NodeSpec`/`NodeExecutor` pairing gives a
//! compiled node, generalized here to a registry keyed by type tag instead
//! of one executor per node.

use crate::error::{EngineError, Result};
use crate::node::{Category, Config, NodeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The result of one plugin compute call.
pub enum ComputeResult {
    /// A value already available, no await needed.
    Immediate(serde_json::Value),
    /// A value that must be awaited.
    Lazy(BoxFuture<serde_json::Value>),
    /// A value paired with a cancel signal the scheduler can fire if the
    /// compute is superseded before it resolves.
    Cancelable {
        future: BoxFuture<serde_json::Value>,
        cancel: Arc<dyn Fn() + Send + Sync>,
    },
}

pub type BoxFuture<T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, String>> + Send>>;

/// A compute capability: `type_tag -> compute fn + category`.
#[derive(Clone)]
pub struct Plugin {
    pub type_tag: String,
    pub category: Category,
    compute_fn: Arc<
        dyn Fn(&Config, &[serde_json::Value], &serde_json::Value) -> ComputeResult + Send + Sync,
    >,
    /// Whether this plugin's compute function is safe to run inside a
    /// worker task (no access to non-`Send` engine-local state). Plugins
    /// that close over engine-local handles should set this to `false` so
    /// the scheduler always runs them inline regardless of `execution_mode`.
    pub worker_safe: bool,
}

impl Plugin {
    pub fn new<F>(type_tag: impl Into<String>, category: Category, compute_fn: F) -> Self
    where
        F: Fn(&Config, &[serde_json::Value]) -> ComputeResult + Send + Sync + 'static,
    {
        Self {
            type_tag: type_tag.into(),
            category,
            compute_fn: Arc::new(move |config, inputs, _context| compute_fn(config, inputs)),
            worker_safe: true,
        }
    }

    /// Registers a plugin whose compute function also receives the
    /// per-compute `RuntimeContext` value supplied by the engine's context
    /// provider (request-scoped values a host application injected; `null`
    /// if no provider is attached).
    pub fn with_context<F>(type_tag: impl Into<String>, category: Category, compute_fn: F) -> Self
    where
        F: Fn(&Config, &[serde_json::Value], &serde_json::Value) -> ComputeResult
            + Send
            + Sync
            + 'static,
    {
        Self {
            type_tag: type_tag.into(),
            category,
            compute_fn: Arc::new(compute_fn),
            worker_safe: true,
        }
    }

    pub fn not_worker_safe(mut self) -> Self {
        self.worker_safe = false;
        self
    }

    pub fn compute(
        &self,
        config: &Config,
        inputs: &[serde_json::Value],
        context: &serde_json::Value,
    ) -> ComputeResult {
        (self.compute_fn)(config, inputs, context)
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("type_tag", &self.type_tag)
            .field("category", &self.category)
            .field("worker_safe", &self.worker_safe)
            .finish()
    }
}

/// Maps `type_tag -> Plugin`. Insertion-only; resolution fails with
/// `UnknownPlugin` rather than panicking.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Plugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Plugin) {
        self.plugins.insert(plugin.type_tag.clone(), plugin);
    }

    pub fn resolve(&self, type_tag: &str) -> Result<&Plugin> {
        self.plugins
            .get(type_tag)
            .ok_or_else(|| EngineError::UnknownPlugin(type_tag.to_string()))
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.plugins.contains_key(type_tag)
    }

    /// Checks every node's `type_tag` resolves to a registered plugin.
    /// Called at instantiation time, before any node runs.
    pub fn validate_all<'a>(
        &self,
        nodes: impl Iterator<Item = (&'a NodeId, &'a str)>,
    ) -> Result<()> {
        for (_, type_tag) in nodes {
            if !self.contains(type_tag) {
                return Err(EngineError::UnknownPlugin(type_tag.to_string()));
            }
        }
        Ok(())
    }
}
