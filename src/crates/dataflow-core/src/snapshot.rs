//! `export_state`/`import_state`: a lossless-for-JSON-values snapshot of
//! the engine's identity, options, stats, and per-node current value, so a
//! host can persist and later restore an engine without recomputing from
//! scratch.
//!
//! Grounded on `langgraph_checkpoint`'s snapshot/restore contract
//! (`Channel::snapshot`/`Channel::restore`), lifted from one channel to
//! the whole engine; the snapshot shape itself flattens each node down to
//! its plain current value rather than the channel's own tagged snapshot
//! format, since the wire contract this exports to has no notion of a
//! replay buffer.

use crate::error::{EngineError, Result};
use crate::lifecycle::EngineState;
use crate::node::{DefinitionSet, Emission, NodeDefinition, NodeId};
use crate::options::EngineOptions;
use crate::scheduler::{EngineStats, Scheduler};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// One node's persisted shape: just enough to reconstruct its definition
/// and seed its last-emitted value on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub type_tag: String,
    pub config: serde_json::Value,
    pub inputs: Vec<NodeId>,
    pub current_value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStateSnapshot {
    pub engine_id: String,
    pub state: EngineState,
    pub options: EngineOptions,
    pub stats: EngineStats,
    pub nodes: HashMap<NodeId, NodeSnapshot>,
}

/// `state` comes from the caller (`ExecutableGraph::export_state`, which has
/// both the scheduler and the lifecycle controller in scope) since the
/// scheduler itself has no notion of the `Initialized/Running/Paused/
/// Destroyed` state machine.
pub async fn export(scheduler: &Scheduler, state: EngineState) -> Result<EngineStateSnapshot> {
    let definitions = scheduler.graph().await.definitions().clone();
    let mut nodes = HashMap::with_capacity(definitions.len());
    for (id, def) in definitions.iter() {
        let current_value = scheduler
            .streams
            .last(id)
            .await
            .and_then(|e| e.as_user_value().cloned())
            .unwrap_or(serde_json::Value::Null);
        nodes.insert(
            id.clone(),
            NodeSnapshot {
                type_tag: def.type_tag.clone(),
                config: def.config.clone(),
                inputs: def.inputs.clone(),
                current_value,
            },
        );
    }
    Ok(EngineStateSnapshot {
        engine_id: scheduler.engine_id().to_string(),
        state,
        options: scheduler.options().clone(),
        stats: scheduler.stats().await,
        nodes,
    })
}

/// Restores a snapshot onto `scheduler`. Validates the snapshot's node set
/// forms an acyclic graph with resolvable plugins before touching
/// anything, so a corrupt snapshot leaves the target engine unchanged.
/// `is_subscribed`/`category_override` are not part of the persisted shape
/// and reset to their defaults on import.
pub async fn import(scheduler: &Scheduler, snapshot: EngineStateSnapshot) -> Result<()> {
    let mut definitions = DefinitionSet::new();
    for (id, node) in &snapshot.nodes {
        definitions.insert(
            id.clone(),
            NodeDefinition {
                id: id.clone(),
                type_tag: node.type_tag.clone(),
                config: node.config.clone(),
                inputs: node.inputs.clone(),
                is_subscribed: false,
                category_override: None,
            },
        );
    }

    let candidate = crate::graph::Graph::from_definitions(definitions.values().cloned())
        .map_err(|e| EngineError::Snapshot(e.to_string()))?;
    candidate
        .topological_order()
        .map_err(|e| EngineError::Snapshot(e.to_string()))?;

    scheduler.replace_graph(candidate).await;
    scheduler.prime().await?;

    for (id, node) in &snapshot.nodes {
        scheduler
            .streams
            .publish(id, Emission::User(node.current_value.clone()), Instant::now())
            .await;
    }
    scheduler.mark_dirty_closure(definitions.into_keys()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::graph::Graph;
    use crate::node::{Category, NodeDefinition as Def};
    use crate::options::EngineOptions;
    use crate::providers::EmptyContext;
    use crate::registry::{ComputeResult, Plugin, PluginRegistry};
    use crate::stream::StreamHub;
    use crate::workers::WorkerPool;
    use serde_json::json;
    use std::sync::Arc;

    fn scheduler_with_one_node() -> Scheduler {
        let graph = Graph::from_definitions([Def::new("a", "Static").with_config(json!(5))]).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));
        Scheduler::new(
            graph,
            registry,
            InMemoryCache::new(16),
            Arc::new(WorkerPool::new(1)),
            Arc::new(StreamHub::new()),
            EngineOptions::default(),
            Arc::new(EmptyContext),
        )
    }

    #[tokio::test]
    async fn export_then_import_round_trips_definitions_and_values() {
        let source = scheduler_with_one_node();
        source.prime().await.unwrap();
        source.execute().await.unwrap();
        let snapshot = export(&source, EngineState::Running).await.unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.state, EngineState::Running);

        let target = scheduler_with_one_node();
        import(&target, snapshot).await.unwrap();

        let value = target.streams.last(&NodeId::new("a")).await.unwrap();
        assert_eq!(value, Emission::User(json!(5)));
    }

    #[tokio::test]
    async fn export_carries_engine_id_and_stats() {
        let source = scheduler_with_one_node();
        source.prime().await.unwrap();
        source.execute().await.unwrap();
        let snapshot = export(&source, EngineState::Running).await.unwrap();

        assert_eq!(snapshot.engine_id, source.engine_id());
        assert_eq!(snapshot.stats.nodes_count, 1);
    }

    #[tokio::test]
    async fn import_rejects_cyclic_snapshot_without_mutating_target() {
        let target = scheduler_with_one_node();
        let mut bad_nodes = HashMap::new();
        bad_nodes.insert(
            NodeId::new("x"),
            NodeSnapshot {
                type_tag: "Static".to_string(),
                config: json!(null),
                inputs: vec![NodeId::new("x")],
                current_value: json!(null),
            },
        );
        let bad_snapshot = EngineStateSnapshot {
            engine_id: "test".to_string(),
            state: EngineState::Initialized,
            options: EngineOptions::default(),
            stats: target.stats().await,
            nodes: bad_nodes,
        };

        let result = import(&target, bad_snapshot).await;
        assert!(result.is_err());
        assert!(target.graph().await.contains(&NodeId::new("a")));
    }
}
