//! Execution Scheduler: drives dirty nodes to a fresh value in
//! topological order, aggregating each node's current inputs, dispatching
//! computes to the cache, worker pool, or inline, and propagating
//! dirtiness to dependents.
//!
//! Grounded on `pregel/executor.rs`'s `PregelLoop::execute_superstep` — one
//! pass computes every currently-ready node, emits to outgoing channels,
//! and marks newly-ready dependents for the next pass — generalized from a
//! fixed-size barrier-synchronized superstep to a continuously reactive
//! dirty-node loop. Unlike Pregel, there is no checkpoint between passes:
//! this engine has no replay requirement, so only the pass *shape* survives.

use crate::cache::CacheProvider;
use crate::error::{EngineError, Result};
use crate::fingerprint::Fingerprint;
use crate::graph::Graph;
use crate::lifecycle::EngineEvent;
use crate::node::{Category, Emission, NodeId};
use crate::options::{DataNodeExecutionMode, EngineOptions, ExecutionMode};
use crate::providers::ContextProvider;
use crate::registry::{ComputeResult, Plugin, PluginRegistry};
use crate::sanitize;
use crate::stream::{StreamHub, StreamOptions};
use crate::workers::WorkerPool;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};

/// A node's current scheduling state, tracked alongside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Clean,
    Dirty,
    Computing,
}

struct NodeRuntime {
    state: NodeState,
    error_count: u64,
    /// The input fingerprint the currently-cached value (if any) was
    /// computed from; used to decide whether a cache hit is still valid.
    cached_fingerprint: Option<Fingerprint>,
    cancel: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Bumped every time a new compute starts for this node. A deferred
    /// `Cancelable` compute captures the value at spawn time and checks it
    /// again on completion — a mismatch means a later trigger has already
    /// superseded it, so its result (success or error) is discarded.
    generation: u64,
}

impl Default for NodeRuntime {
    fn default() -> Self {
        Self {
            state: NodeState::Dirty,
            error_count: 0,
            cached_fingerprint: None,
            cancel: None,
            generation: 0,
        }
    }
}

/// Aggregate counters exposed via `ExecutableGraph::get_stats`, mirroring
/// the serialized `stats` block of `EngineStateSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub nodes_count: usize,
    pub compute_count: u64,
    pub error_count: u64,
    pub active_subscriptions: usize,
    pub cache_stats: Option<crate::cache::CacheStats>,
}

/// Owns the graph, plugin registry, providers, and per-node runtime state,
/// and drives computation. A single `Scheduler` is meant to be driven from
/// one task at a time (the lifecycle controller's command loop), so its
/// mutable state is behind `RwLock` only to let concurrent reads (e.g.
/// `observe`) proceed without blocking on a running pass.
pub struct Scheduler {
    graph: RwLock<Graph>,
    registry: PluginRegistry,
    cache: Arc<dyn CacheProvider>,
    workers: Arc<WorkerPool>,
    pub streams: Arc<StreamHub>,
    options: EngineOptions,
    runtime: RwLock<HashMap<NodeId, NodeRuntime>>,
    tick: AtomicU64,
    compute_count: AtomicU64,
    context: Arc<dyn ContextProvider>,
    engine_id: String,
    /// Set once by the lifecycle controller at construction time so
    /// per-node compute events reach the same bus engine-level events do.
    /// `None` (e.g. in scheduler-only tests) means events are dropped.
    events: OnceLock<broadcast::Sender<EngineEvent>>,
    /// A weak handle to this scheduler's own `Arc`, set once by
    /// `create_graph` right after construction. Lets a deferred `Cancelable`
    /// compute's background task call back into the scheduler once it
    /// resolves. `None` in tests that build a bare `Scheduler` directly —
    /// those fall back to awaiting `Cancelable` inline, same as before.
    self_handle: OnceLock<Weak<Scheduler>>,
}

/// Outcome of dispatching one compute: either a value is ready now, or a
/// `Cancelable` compute was spawned in the background and will report its
/// own result once it resolves (or be silently discarded if superseded).
enum Dispatch {
    Done(Result<serde_json::Value>),
    Deferred,
}

impl Scheduler {
    pub fn new(
        graph: Graph,
        registry: PluginRegistry,
        cache: Arc<dyn CacheProvider>,
        workers: Arc<WorkerPool>,
        streams: Arc<StreamHub>,
        options: EngineOptions,
        context: Arc<dyn ContextProvider>,
    ) -> Self {
        Self {
            graph: RwLock::new(graph),
            registry,
            cache,
            workers,
            streams,
            options,
            runtime: RwLock::new(HashMap::new()),
            tick: AtomicU64::new(0),
            compute_count: AtomicU64::new(0),
            context,
            engine_id: format!("{:032x}", rand::random::<u128>()),
            events: OnceLock::new(),
            self_handle: OnceLock::new(),
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Wires this scheduler's per-node compute events onto `sender`. Called
    /// once by `Lifecycle::new`; a second call is a no-op.
    pub fn set_event_sender(&self, sender: broadcast::Sender<EngineEvent>) {
        let _ = self.events.set(sender);
    }

    /// Wires a weak handle to this scheduler's own `Arc`, letting deferred
    /// `Cancelable` computes call back in once they resolve. Called once by
    /// `create_graph` right after the scheduler is wrapped in an `Arc`.
    pub fn set_self_handle(&self, handle: Weak<Scheduler>) {
        let _ = self.self_handle.set(handle);
    }

    fn publish_event(&self, event: EngineEvent) {
        if let Some(sender) = self.events.get() {
            let _ = sender.send(event);
        }
    }

    /// Registers stream state for every node currently in the graph,
    /// marking them all dirty. Called once at construction.
    pub async fn prime(&self) -> Result<()> {
        let graph = self.graph.read().await;
        let mut runtime = self.runtime.write().await;
        for id in graph.definitions().keys() {
            self.streams
                .register(id.clone(), self.stream_options_for(id, &graph))
                .await;
            runtime.entry(id.clone()).or_default();
            self.streams
                .publish(id, Emission::Init, Instant::now())
                .await;
        }
        Ok(())
    }

    fn stream_options_for(&self, _id: &NodeId, _graph: &Graph) -> StreamOptions {
        StreamOptions {
            distinct_values: self.options.distinct_values,
            throttle: non_zero_duration(self.options.throttle_time_ms),
            debounce: non_zero_duration(self.options.debounce_time_ms),
        }
    }

    /// Runs passes until no node is dirty (engine-start stabilization, or
    /// after an external input/update leaves a closed set of nodes dirty).
    pub async fn execute(&self) -> Result<()> {
        loop {
            let ran_any = self.run_pass().await?;
            let flushed = self
                .streams
                .drain_debounced(Instant::now())
                .await;
            if !ran_any && flushed.is_empty() {
                break;
            }
            for (id, _) in flushed {
                self.mark_dependents_dirty(&id).await;
            }
        }
        Ok(())
    }

    /// One superstep: every currently-dirty node with fully-aggregated
    /// inputs computes exactly once, in topological order; newly dirty
    /// dependents are picked up on the next call. Returns whether anything
    /// ran.
    async fn run_pass(&self) -> Result<bool> {
        self.tick.fetch_add(1, Ordering::Relaxed);

        let order = {
            let graph = self.graph.read().await;
            graph.topological_order()?
        };

        let dirty_now: Vec<NodeId> = {
            let runtime = self.runtime.read().await;
            order
                .into_iter()
                .filter(|id| {
                    matches!(runtime.get(id).map(|r| r.state), Some(NodeState::Dirty))
                })
                .collect()
        };

        if dirty_now.is_empty() {
            return Ok(false);
        }

        for id in &dirty_now {
            self.compute_node(id).await?;
        }

        Ok(true)
    }

    /// Aggregates a node's current inputs. Returns `None` if not every
    /// input has emitted at least once yet (the node stays dirty and is
    /// retried on a later pass, once its inputs catch up).
    async fn aggregate_inputs(&self, id: &NodeId) -> Option<Vec<Emission>> {
        let graph = self.graph.read().await;
        let def = graph.get(id)?;
        let mut values = Vec::with_capacity(def.inputs.len());
        for input in &def.inputs {
            match self.streams.last(input).await {
                Some(emission) => values.push(emission),
                None => return None,
            }
        }
        Some(values)
    }

    async fn compute_node(&self, id: &NodeId) -> Result<()> {
        let Some(emissions) = self.aggregate_inputs(id).await else {
            // Inputs not all available yet; stays dirty for a later pass.
            return Ok(());
        };

        if emissions.iter().any(|e| matches!(e, Emission::Skip)) {
            self.finish_node(id, Emission::Skip).await;
            return Ok(());
        }

        let def = {
            let graph = self.graph.read().await;
            graph.get(id).cloned()
        };
        let Some(def) = def else { return Ok(()) };

        let plugin = match self.registry.resolve(&def.type_tag) {
            Ok(p) => p.clone(),
            Err(err) => return Err(err),
        };

        let category = def.category_override.unwrap_or(plugin.category);
        if category == Category::Data
            && self.options.data_nodes_execution_mode == DataNodeExecutionMode::Lazy
            && !def.is_subscribed
        {
            // Lazy, unsubscribed data nodes never compute; they behave like
            // an upstream that always suppresses, so dependents short-circuit
            // via `Skip` rather than aggregating a stale `Init`.
            self.finish_node(id, Emission::Skip).await;
            return Ok(());
        }

        let input_values: Vec<serde_json::Value> = emissions
            .iter()
            .map(|e| e.as_user_value().cloned().unwrap_or(serde_json::Value::Null))
            .collect();

        let config = if self.options.sanitize_input {
            sanitize::sanitize(def.config.clone(), &self.options, id.as_str())?
        } else {
            def.config.clone()
        };

        let fingerprint = Fingerprint::compute(id, &input_values, &config);

        if let Some(cached) = self.cache.get(fingerprint).await {
            self.finish_node(id, Emission::User(cached)).await;
            return Ok(());
        }

        let context = self
            .context
            .context_for(id.as_str())
            .await
            .unwrap_or(serde_json::Value::Null);
        let worker_safe = plugin.worker_safe && self.options.execution_mode == ExecutionMode::Parallel;

        self.set_state(id, NodeState::Computing).await;
        self.cancel_in_flight(id).await;
        let generation = self.bump_generation(id).await;
        self.compute_count.fetch_add(1, Ordering::Relaxed);
        self.publish_event(EngineEvent::NodeComputeStart { node_id: id.clone() });

        let outcome = self
            .dispatch_compute(id, &plugin, config, input_values, context, worker_safe, fingerprint, generation)
            .await;

        match outcome {
            Dispatch::Deferred => Ok(()),
            Dispatch::Done(result) => {
                self.apply_outcome(id, fingerprint, result).await;
                Ok(())
            }
        }
    }

    /// Dispatches one compute to the cache/worker-pool/inline path
    /// appropriate for this plugin. `Immediate` and `Lazy` results are
    /// always awaited to completion here. A `Cancelable` result's cancel
    /// handle is stored immediately (before anything is awaited), and — when
    /// `enable_cancelable_compute` is on and a self-handle is wired — its
    /// future is spawned onto its own task so the scheduler's own pass can
    /// return promptly and a later trigger can genuinely supersede it while
    /// it's still in flight, rather than only after it has already resolved.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_compute(
        &self,
        id: &NodeId,
        plugin: &Plugin,
        config: serde_json::Value,
        inputs: Vec<serde_json::Value>,
        context: serde_json::Value,
        worker_safe: bool,
        fingerprint: Fingerprint,
        generation: u64,
    ) -> Dispatch {
        let timeout = Duration::from_millis(self.options.task_timeout_ms);
        let node_id = id.clone();

        if worker_safe {
            let plugin = plugin.clone();
            let fut = self
                .workers
                .dispatch(id.clone(), move || plugin.compute(&config, &inputs, &context));
            let dispatched = match tokio::time::timeout(timeout, fut).await {
                Ok(r) => r,
                Err(_) => Err(EngineError::timeout(node_id.clone(), self.options.task_timeout_ms)),
            };
            if let Err(EngineError::WorkerCrashed { worker_index, .. }) = &dispatched {
                self.workers.respawn(*worker_index).await;
            }
            return Dispatch::Done(dispatched);
        }

        match plugin.compute(&config, &inputs, &context) {
            ComputeResult::Immediate(value) => Dispatch::Done(Ok(value)),
            ComputeResult::Lazy(future) => {
                let result = match tokio::time::timeout(timeout, future).await {
                    Ok(r) => r.map_err(|cause| EngineError::plugin_compute(node_id.clone(), cause)),
                    Err(_) => Err(EngineError::timeout(node_id.clone(), self.options.task_timeout_ms)),
                };
                Dispatch::Done(result)
            }
            ComputeResult::Cancelable { future, cancel } => {
                self.set_cancel(id, cancel).await;

                if self.options.enable_cancelable_compute {
                    if let Some(scheduler) = self.self_handle.get().and_then(Weak::upgrade) {
                        tokio::spawn(async move {
                            let result = match tokio::time::timeout(timeout, future).await {
                                Ok(r) => r.map_err(|cause| {
                                    EngineError::plugin_compute(node_id.clone(), cause)
                                }),
                                Err(_) => Err(EngineError::timeout(
                                    node_id.clone(),
                                    scheduler.options.task_timeout_ms,
                                )),
                            };
                            scheduler
                                .finish_deferred(&node_id, fingerprint, generation, result)
                                .await;
                        });
                        return Dispatch::Deferred;
                    }
                }

                // No self-handle wired (a bare `Scheduler` built outside
                // `create_graph`) or cancellation disabled: fall back to an
                // inline await, same semantics as `Lazy`.
                let result = match tokio::time::timeout(timeout, future).await {
                    Ok(r) => r.map_err(|cause| EngineError::plugin_compute(node_id.clone(), cause)),
                    Err(_) => Err(EngineError::timeout(node_id.clone(), self.options.task_timeout_ms)),
                };
                Dispatch::Done(result)
            }
        }
    }

    /// Applies a deferred `Cancelable` compute's result once it resolves, or
    /// discards it silently if a later trigger has since superseded this
    /// node (cancellation produces no emission, per the `Skip`/error
    /// distinction the scheduler otherwise enforces).
    async fn finish_deferred(
        &self,
        id: &NodeId,
        fingerprint: Fingerprint,
        generation: u64,
        result: Result<serde_json::Value>,
    ) {
        if !self.generation_matches(id, generation).await {
            return;
        }
        self.apply_outcome(id, fingerprint, result).await;
    }

    /// Applies a resolved compute's outcome. Errors are always contained —
    /// the node emits `null`, `error_count` increments, and the pass
    /// continues regardless of `silent_errors`; that flag only gates
    /// whether the failure is also logged at `ERROR` level.
    async fn apply_outcome(&self, id: &NodeId, fingerprint: Fingerprint, result: Result<serde_json::Value>) {
        match result {
            Ok(value) => {
                self.cache.put(fingerprint, value.clone()).await;
                self.remember_fingerprint(id, fingerprint).await;
                self.publish_event(EngineEvent::NodeComputeOk {
                    node_id: id.clone(),
                    value: value.clone(),
                });
                self.finish_node(id, Emission::User(value)).await;
            }
            Err(err) => {
                self.record_error(id).await;
                self.publish_event(EngineEvent::NodeComputeError {
                    node_id: id.clone(),
                    message: err.to_string(),
                });
                if !self.options.silent_errors {
                    tracing::error!(node_id = %id, error = %err, "plugin compute failed, emitting null");
                }
                self.finish_node(id, Emission::null()).await;
            }
        }
    }

    async fn cancel_in_flight(&self, id: &NodeId) {
        if !self.options.enable_cancelable_compute {
            return;
        }
        let mut runtime = self.runtime.write().await;
        if let Some(entry) = runtime.get_mut(id) {
            if let Some(cancel) = entry.cancel.take() {
                cancel();
            }
        }
    }

    async fn set_cancel(&self, id: &NodeId, cancel: Arc<dyn Fn() + Send + Sync>) {
        let mut runtime = self.runtime.write().await;
        runtime.entry(id.clone()).or_default().cancel = Some(cancel);
    }

    async fn bump_generation(&self, id: &NodeId) -> u64 {
        let mut runtime = self.runtime.write().await;
        let entry = runtime.entry(id.clone()).or_default();
        entry.generation = entry.generation.wrapping_add(1);
        entry.generation
    }

    async fn generation_matches(&self, id: &NodeId, generation: u64) -> bool {
        self.runtime
            .read()
            .await
            .get(id)
            .map(|r| r.generation == generation)
            .unwrap_or(false)
    }

    async fn remember_fingerprint(&self, id: &NodeId, fingerprint: Fingerprint) {
        let mut runtime = self.runtime.write().await;
        runtime.entry(id.clone()).or_default().cached_fingerprint = Some(fingerprint);
    }

    async fn record_error(&self, id: &NodeId) {
        let mut runtime = self.runtime.write().await;
        runtime.entry(id.clone()).or_default().error_count += 1;
    }

    pub async fn error_count(&self, id: &NodeId) -> u64 {
        self.runtime
            .read()
            .await
            .get(id)
            .map(|r| r.error_count)
            .unwrap_or(0)
    }

    /// Snapshot of engine-wide counters for `ExecutableGraph::get_stats`.
    pub async fn stats(&self) -> EngineStats {
        let nodes_count = self.graph.read().await.definitions().len();
        let error_count = self.runtime.read().await.values().map(|r| r.error_count).sum();
        EngineStats {
            nodes_count,
            compute_count: self.compute_count.load(Ordering::Relaxed),
            error_count,
            active_subscriptions: self.streams.active_subscriptions().await,
            cache_stats: Some(self.cache.stats().await),
        }
    }

    async fn finish_node(&self, id: &NodeId, emission: Emission) {
        self.streams.publish(id, emission, Instant::now()).await;
        self.set_state(id, NodeState::Clean).await;
        self.mark_dependents_dirty(id).await;
    }

    async fn set_state(&self, id: &NodeId, state: NodeState) {
        self.runtime.write().await.entry(id.clone()).or_default().state = state;
    }

    pub async fn state_of(&self, id: &NodeId) -> Option<NodeState> {
        self.runtime.read().await.get(id).map(|r| r.state)
    }

    async fn mark_dependents_dirty(&self, id: &NodeId) {
        let dependents = {
            let graph = self.graph.read().await;
            graph.dependents_of(id)
        };
        let mut runtime = self.runtime.write().await;
        for dep in dependents {
            runtime.entry(dep).or_default().state = NodeState::Dirty;
        }
    }

    /// Marks a specific set of nodes dirty (used by `update_graph` and
    /// direct-input injection) and transitively propagates to their
    /// dependents so a subsequent `execute()` recomputes the whole
    /// affected closure, not just the seed nodes.
    pub async fn mark_dirty_closure(&self, seeds: impl IntoIterator<Item = NodeId>) {
        let mut queue: VecDeque<NodeId> = seeds.into_iter().collect();
        let mut seen: HashSet<NodeId> = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            self.set_state(&id, NodeState::Dirty).await;
            let dependents = {
                let graph = self.graph.read().await;
                graph.dependents_of(&id)
            };
            queue.extend(dependents);
        }
    }

    pub async fn graph(&self) -> tokio::sync::RwLockReadGuard<'_, Graph> {
        self.graph.read().await
    }

    pub async fn replace_graph(&self, new_graph: Graph) {
        let mut graph = self.graph.write().await;
        *graph = new_graph;
    }
}

fn non_zero_duration(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::graph::Graph;
    use crate::node::NodeDefinition;
    use crate::options::{DataNodeExecutionMode, ExecutionMode};
    use crate::providers::EmptyContext;
    use crate::registry::Plugin;
    use crate::stream::StreamHub;
    use crate::workers::WorkerPool;
    use serde_json::json;

    fn make_scheduler(graph: Graph, registry: PluginRegistry) -> Scheduler {
        make_scheduler_with_options(graph, registry, EngineOptions::default())
    }

    fn make_scheduler_with_options(graph: Graph, registry: PluginRegistry, options: EngineOptions) -> Scheduler {
        Scheduler::new(
            graph,
            registry,
            InMemoryCache::new(64),
            Arc::new(WorkerPool::new(2)),
            Arc::new(StreamHub::new()),
            options,
            Arc::new(EmptyContext),
        )
    }

    #[tokio::test]
    async fn a_chain_of_data_nodes_stabilizes() {
        let graph = Graph::from_definitions([
            NodeDefinition::new("a", "Static").with_config(json!(1)),
            NodeDefinition::new("b", "Double").with_inputs(["a"]),
        ])
        .unwrap();

        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));
        registry.register(Plugin::new("Double", Category::Operational, |_config, inputs| {
            let n = inputs[0].as_i64().unwrap_or(0);
            ComputeResult::Immediate(json!(n * 2))
        }));

        let scheduler = make_scheduler(graph, registry);
        scheduler.prime().await.unwrap();
        scheduler.execute().await.unwrap();

        let last = scheduler.streams.last(&NodeId::new("b")).await.unwrap();
        assert_eq!(last, Emission::User(json!(2)));
    }

    #[tokio::test]
    async fn skip_sentinel_short_circuits_downstream() {
        let graph = Graph::from_definitions([
            NodeDefinition::new("a", "Skipper"),
            NodeDefinition::new("b", "Double").with_inputs(["a"]),
        ])
        .unwrap();

        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Skipper", Category::Data, |_, _| {
            ComputeResult::Immediate(json!(null))
        }));
        registry.register(Plugin::new("Double", Category::Operational, |_, inputs| {
            ComputeResult::Immediate(json!(inputs[0]))
        }));

        let scheduler = make_scheduler(graph, registry);
        scheduler.prime().await.unwrap();
        // Manually publish a Skip to emulate an upstream producing it.
        scheduler
            .streams
            .publish(&NodeId::new("a"), Emission::Skip, Instant::now())
            .await;
        scheduler.mark_dirty_closure([NodeId::new("b")]).await;
        scheduler.execute().await.unwrap();

        let last = scheduler.streams.last(&NodeId::new("b")).await.unwrap();
        assert_eq!(last, Emission::Skip);
    }

    #[tokio::test]
    async fn lazy_unsubscribed_data_node_emits_skip_not_stale_init() {
        let graph = Graph::from_definitions([
            NodeDefinition::new("a", "Static").with_config(json!(1)),
            NodeDefinition::new("b", "Double").with_inputs(["a"]),
        ])
        .unwrap();

        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));
        registry.register(Plugin::new("Double", Category::Operational, |_, inputs| {
            ComputeResult::Immediate(json!(inputs[0]))
        }));

        let options = EngineOptions {
            data_nodes_execution_mode: DataNodeExecutionMode::Lazy,
            ..EngineOptions::default()
        };
        let scheduler = make_scheduler_with_options(graph, registry, options);
        scheduler.prime().await.unwrap();
        scheduler.execute().await.unwrap();

        assert_eq!(
            scheduler.streams.last(&NodeId::new("a")).await,
            Some(Emission::Skip)
        );
        assert_eq!(
            scheduler.streams.last(&NodeId::new("b")).await,
            Some(Emission::Skip)
        );
    }

    #[tokio::test]
    async fn plugin_error_emits_null_and_increments_error_count() {
        let graph = Graph::from_definitions([NodeDefinition::new("a", "Boom")]).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Boom", Category::Data, |_, _| {
            ComputeResult::Lazy(Box::pin(async { Err("kaboom".to_string()) }))
        }));

        let scheduler = make_scheduler(graph, registry);
        scheduler.prime().await.unwrap();
        scheduler.execute().await.unwrap();

        let last = scheduler.streams.last(&NodeId::new("a")).await.unwrap();
        assert_eq!(last, Emission::null());
        assert_eq!(scheduler.error_count(&NodeId::new("a")).await, 1);
    }

    #[tokio::test]
    async fn plugin_error_is_contained_even_with_silent_errors_off() {
        let graph = Graph::from_definitions([NodeDefinition::new("a", "Boom")]).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Boom", Category::Data, |_, _| {
            ComputeResult::Lazy(Box::pin(async { Err("kaboom".to_string()) }))
        }));

        let options = EngineOptions {
            silent_errors: false,
            ..EngineOptions::default()
        };
        let scheduler = make_scheduler_with_options(graph, registry, options);
        scheduler.prime().await.unwrap();
        // With the error-isolation invariant fixed, this must not abort.
        scheduler.execute().await.unwrap();

        assert_eq!(
            scheduler.streams.last(&NodeId::new("a")).await,
            Some(Emission::null())
        );
        assert_eq!(scheduler.error_count(&NodeId::new("a")).await, 1);
    }

    #[tokio::test]
    async fn worker_crash_triggers_respawn_and_pool_recovers() {
        let graph = Graph::from_definitions([NodeDefinition::new("a", "Static").with_config(json!(1))]).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));

        let workers = Arc::new(WorkerPool::new(1));
        workers.shutdown().await;

        let scheduler = Scheduler::new(
            graph,
            registry,
            InMemoryCache::new(64),
            workers.clone(),
            Arc::new(StreamHub::new()),
            EngineOptions::default(),
            Arc::new(EmptyContext),
        );
        scheduler.prime().await.unwrap();
        // The compute submitted to the already-shut-down worker fails, but
        // the scheduler should have respawned the slot in the process.
        scheduler.execute().await.unwrap();
        assert_eq!(scheduler.error_count(&NodeId::new("a")).await, 1);

        let recovered = workers
            .dispatch(NodeId::new("probe"), || ComputeResult::Immediate(json!("ok")))
            .await
            .unwrap();
        assert_eq!(recovered, json!("ok"));
    }

    #[tokio::test]
    async fn cache_hit_skips_recompute() {
        let graph = Graph::from_definitions([NodeDefinition::new("a", "Counter")]).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let counter_clone = counter.clone();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Counter", Category::Data, move |_, _| {
            counter_clone.fetch_add(1, Ordering::Relaxed);
            ComputeResult::Immediate(json!(1))
        }));

        let scheduler = make_scheduler(graph, registry);
        scheduler.prime().await.unwrap();
        scheduler.execute().await.unwrap();
        scheduler.mark_dirty_closure([NodeId::new("a")]).await;
        scheduler.execute().await.unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn serial_execution_mode_runs_worker_safe_plugins_inline() {
        let graph = Graph::from_definitions([NodeDefinition::new("a", "Static").with_config(json!(1))]).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));

        let workers = Arc::new(WorkerPool::new(1));
        // Shutting the pool down proves the compute never reaches it: if
        // `execution_mode = Serial` didn't force the inline path, this
        // compute would fail with `WorkerCrashed`.
        workers.shutdown().await;

        let scheduler = Scheduler::new(
            graph,
            registry,
            InMemoryCache::new(64),
            workers,
            Arc::new(StreamHub::new()),
            EngineOptions {
                execution_mode: ExecutionMode::Serial,
                ..EngineOptions::default()
            },
            Arc::new(EmptyContext),
        );
        scheduler.prime().await.unwrap();
        scheduler.execute().await.unwrap();

        assert_eq!(scheduler.error_count(&NodeId::new("a")).await, 0);
        assert_eq!(
            scheduler.streams.last(&NodeId::new("a")).await,
            Some(Emission::User(json!(1)))
        );
    }

    #[tokio::test]
    async fn stats_reports_node_and_compute_counts() {
        let graph = Graph::from_definitions([
            NodeDefinition::new("a", "Static").with_config(json!(1)),
            NodeDefinition::new("b", "Double").with_inputs(["a"]),
        ])
        .unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));
        registry.register(Plugin::new("Double", Category::Operational, |_, inputs| {
            ComputeResult::Immediate(json!(inputs[0]))
        }));

        let scheduler = make_scheduler(graph, registry);
        scheduler.prime().await.unwrap();
        scheduler.execute().await.unwrap();

        let stats = scheduler.stats().await;
        assert_eq!(stats.nodes_count, 2);
        assert_eq!(stats.compute_count, 2);
        assert_eq!(stats.error_count, 0);
        assert!(stats.cache_stats.is_some());
    }
}
