//! Public Composition API: small operator functions combined by
//! `create_graph` into one `ExecutableGraph`, mirroring the fluent
//! builder-closure style of `StateGraph`'s `.add_node()`/`.add_edge()`
//! chain, generalized here to a left-to-right composition of independent
//! operators instead of a stateful builder struct.

use crate::cache::{CacheProvider, InMemoryCache};
use crate::error::Result;
use crate::graph::Graph;
use crate::lifecycle::{EngineEvent, EngineState, Lifecycle};
use crate::node::{DefinitionSet, Emission, NodeDefinition, NodeId};
use crate::options::EngineOptions;
use crate::providers::{
    ContextProvider, EmptyContext, LoggerProvider, Notification, NotificationProvider,
    PersistenceProvider, ProviderSet, TracingLogger,
};
use crate::registry::PluginRegistry;
use crate::scheduler::Scheduler;
use crate::workers::{default_worker_count, WorkerPool};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::Stream;

/// Accumulated state an operator mutates before `create_graph` builds the
/// final engine. Not part of the public surface — operators are the API.
#[derive(Default)]
pub struct GraphSpec {
    definitions: DefinitionSet,
    registry: PluginRegistry,
    options: EngineOptions,
    providers: ProviderSet,
    cache_override: Option<Arc<dyn CacheProvider>>,
}

/// An operator transforms a `GraphSpec`. `create_graph` threads one through
/// all of them in the order given, then finalizes it into an
/// `ExecutableGraph`.
pub type Operator = Box<dyn FnOnce(GraphSpec) -> GraphSpec>;

pub fn with_nodes(defs: impl IntoIterator<Item = NodeDefinition> + 'static) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        for def in defs {
            spec.definitions.insert(def.id.clone(), def);
        }
        spec
    })
}

pub fn with_plugin_registry(registry: PluginRegistry) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.registry = registry;
        spec
    })
}

pub fn with_options(options: EngineOptions) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.options = options;
        spec
    })
}

pub fn with_cache_provider(cache: Arc<dyn CacheProvider>) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.cache_override = Some(cache);
        spec
    })
}

pub fn with_logger_provider(logger: Arc<dyn LoggerProvider>) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.providers.logger = Some(logger);
        spec
    })
}

pub fn with_persistence(persistence: Arc<dyn PersistenceProvider>) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.providers.persistence = Some(persistence);
        spec
    })
}

pub fn with_notifications(notifications: Arc<dyn NotificationProvider>) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.providers.notifications = Some(notifications);
        spec
    })
}

pub fn with_event_context_provider(context: Arc<dyn ContextProvider>) -> Operator {
    Box::new(move |mut spec: GraphSpec| {
        spec.providers.context = Some(context);
        spec
    })
}

/// Threads a `GraphSpec` through every operator in order, then builds the
/// scheduler, lifecycle controller, and provider set into one handle.
/// Fails if the resulting graph has a cycle, an unknown input, or a node
/// whose `type_tag` has no registered plugin.
pub async fn create_graph(operators: Vec<Operator>) -> Result<ExecutableGraph> {
    let mut spec = GraphSpec::default();
    if spec.providers.logger.is_none() {
        spec.providers.logger = Some(Arc::new(TracingLogger));
    }
    if spec.providers.context.is_none() {
        spec.providers.context = Some(Arc::new(EmptyContext));
    }
    for operator in operators {
        spec = operator(spec);
    }

    spec.registry
        .validate_all(spec.definitions.iter().map(|(id, def)| (id, def.type_tag.as_str())))?;

    let graph = Graph::from_definitions(spec.definitions.values().cloned())?;
    graph.topological_order()?;

    let cache = spec
        .cache_override
        .unwrap_or_else(|| InMemoryCache::new(spec.options.cache.capacity));

    let worker_count = spec
        .options
        .parallel
        .max_workers
        .unwrap_or_else(default_worker_count);
    let workers = Arc::new(WorkerPool::new(worker_count));

    let streams = Arc::new(crate::stream::StreamHub::new());
    let context = spec
        .providers
        .context
        .clone()
        .unwrap_or_else(|| Arc::new(EmptyContext));

    let scheduler = Arc::new(Scheduler::new(
        graph,
        spec.registry,
        cache,
        workers.clone(),
        streams,
        spec.options,
        context,
    ));
    scheduler.set_self_handle(Arc::downgrade(&scheduler));
    scheduler.prime().await?;

    let lifecycle = Arc::new(Lifecycle::new(scheduler.clone()));

    Ok(ExecutableGraph {
        scheduler,
        lifecycle,
        workers,
        providers: Arc::new(spec.providers),
    })
}

/// The handle returned by `create_graph`: the full runtime surface a host
/// application drives — execute/pause/resume/destroy, observation,
/// provider-backed persistence and notifications, graph updates, and
/// state export/import.
pub struct ExecutableGraph {
    scheduler: Arc<Scheduler>,
    lifecycle: Arc<Lifecycle>,
    workers: Arc<WorkerPool>,
    providers: Arc<ProviderSet>,
}

impl ExecutableGraph {
    pub async fn execute(&self) -> Result<()> {
        self.lifecycle.execute().await
    }

    /// Alias for `execute`: the state machine has no transition distinct
    /// from `execute` for "start running", so this just delegates.
    pub async fn run(&self) -> Result<()> {
        self.execute().await
    }

    pub async fn pause(&self) -> Result<()> {
        self.lifecycle.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.lifecycle.resume().await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.lifecycle.destroy().await?;
        self.workers.shutdown().await;
        Ok(())
    }

    /// Alias for `destroy`: the lifecycle's state-transition table pairs
    /// `destroy()`/`stop()` as equivalent triggers for any -> `Destroyed`.
    pub async fn stop(&self) -> Result<()> {
        self.destroy().await
    }

    pub async fn get_state(&self) -> EngineState {
        self.lifecycle.state().await
    }

    pub async fn get_stats(&self) -> crate::scheduler::EngineStats {
        self.scheduler.stats().await
    }

    pub async fn update_graph(&self, defs: impl IntoIterator<Item = NodeDefinition>) -> Result<()> {
        let mut set = DefinitionSet::new();
        for def in defs {
            set.insert(def.id.clone(), def);
        }
        self.lifecycle.update_graph(set).await
    }

    pub fn on(&self) -> broadcast::Receiver<EngineEvent> {
        self.lifecycle.subscribe()
    }

    pub async fn observe(&self, node_id: &NodeId) -> Option<impl Stream<Item = Emission> + Send + 'static> {
        self.scheduler.streams.observe(node_id).await
    }

    pub async fn error_count(&self, node_id: &NodeId) -> u64 {
        self.scheduler.error_count(node_id).await
    }

    pub async fn save_state(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.providers.persistence()?.save_state(key, value).await
    }

    pub async fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.providers.persistence()?.load_state(key).await
    }

    pub async fn delete_state(&self, key: &str) -> Result<()> {
        self.providers.persistence()?.delete_state(key).await
    }

    pub async fn notify(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.providers.notifications()?.notify(topic, payload).await
    }

    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<()> {
        self.providers.notifications()?.broadcast(payload).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<Notification>> {
        Ok(self.providers.notifications()?.subscribe(topic).await)
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.providers.notifications()?.unsubscribe(topic).await
    }

    pub async fn export_state(&self) -> Result<crate::snapshot::EngineStateSnapshot> {
        let state = self.lifecycle.state().await;
        crate::snapshot::export(&self.scheduler, state).await
    }

    pub async fn import_state(&self, snapshot: crate::snapshot::EngineStateSnapshot) -> Result<()> {
        crate::snapshot::import(&self.scheduler, snapshot).await
    }
}
