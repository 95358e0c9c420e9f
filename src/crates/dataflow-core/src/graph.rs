//! Graph Model: holds node definitions, computes a deterministic
//! topological order via Kahn's algorithm, detects cycles, and diffs two
//! definition sets for `update_graph`.
//!
//! Grounded on `langgraph_core::graph::Graph`'s `validate()` (entry/edge
//! existence checks) generalized to referential-integrity and acyclicity
//! invariants, with Kahn's algorithm added for deterministic scheduling
//! order.

use crate::error::{EngineError, Result};
use crate::node::{DefinitionSet, NodeDefinition, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};

/// The graph model: node definitions keyed by id, insertion order preserved
/// for deterministic tie-breaking.
#[derive(Default, Clone)]
pub struct Graph {
    definitions: DefinitionSet,
    /// Insertion order, used to break topological-sort ties reproducibly.
    insertion_order: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(defs: impl IntoIterator<Item = NodeDefinition>) -> Result<Self> {
        let mut graph = Self::new();
        for def in defs {
            graph.add_node(def)?;
        }
        graph.topological_order()?;
        Ok(graph)
    }

    /// Add a node, checking for duplicate ids and unknown inputs. Does not
    /// check for cycles by itself — call [`Graph::topological_order`] (or
    /// rely on it being called by the lifecycle controller) before trusting
    /// acyclicity, since a cycle can only be detected once the whole input
    /// set is known.
    pub fn add_node(&mut self, def: NodeDefinition) -> Result<()> {
        if self.definitions.contains_key(&def.id) {
            return Err(EngineError::DuplicateNodeId(def.id));
        }
        for input in &def.inputs {
            if !self.definitions.contains_key(input) && input != &def.id {
                // Forward references are legal (a node may be added before
                // an input that's added later in the same batch); full
                // referential integrity is checked by `validate()` after
                // the whole definition set is known.
                continue;
            }
        }
        self.insertion_order.push(def.id.clone());
        self.definitions.insert(def.id.clone(), def);
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeDefinition> {
        self.definitions.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn definitions(&self) -> &DefinitionSet {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Dependents of `id`: nodes whose `inputs` include `id`, in insertion
    /// order (tie-break for "two dependents of the same changed node are
    /// recomputed in insertion order").
    pub fn dependents_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.insertion_order
            .iter()
            .filter(|candidate| {
                self.definitions
                    .get(*candidate)
                    .map(|def| def.inputs.contains(id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Checks referential integrity: every input names an existing node.
    pub fn validate_referential_integrity(&self) -> Result<()> {
        for def in self.definitions.values() {
            for input in &def.inputs {
                if !self.definitions.contains_key(input) {
                    return Err(EngineError::UnknownInput(def.id.clone(), input.clone()));
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm: produces a deterministic topological order, ties
    /// broken by insertion order. Fails with `CycleError{path}` if the
    /// dependency graph is not a DAG, and performs no mutation regardless
    /// of outcome (this method only reads `self`).
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        self.validate_referential_integrity()?;

        let mut in_degree: HashMap<&NodeId, usize> = HashMap::new();
        let mut dependents: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for def in self.definitions.values() {
            in_degree.entry(&def.id).or_insert(0);
            for input in &def.inputs {
                *in_degree.entry(&def.id).or_insert(0) += 1;
                dependents.entry(input).or_default().push(&def.id);
            }
        }

        // Insertion order gives the deterministic tie-break among nodes
        // that become ready simultaneously.
        let rank: HashMap<&NodeId, usize> = self
            .insertion_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut ready: VecDeque<&NodeId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        sort_by_rank(&mut ready, &rank);

        let mut order = Vec::with_capacity(self.definitions.len());
        let mut remaining = in_degree.clone();

        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            if let Some(next) = dependents.get(id) {
                let mut newly_ready = Vec::new();
                for dep in next {
                    let entry = remaining.get_mut(dep).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        newly_ready.push(*dep);
                    }
                }
                newly_ready.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
                for id in newly_ready {
                    ready.push_back(id);
                }
            }
        }

        if order.len() != self.definitions.len() {
            let path = self.find_cycle_path(&remaining);
            return Err(EngineError::CycleError { path });
        }

        Ok(order)
    }

    /// Best-effort extraction of a cycle path for diagnostics: any node
    /// still carrying positive in-degree after Kahn's algorithm stalls is
    /// necessarily part of (or reachable only from) a cycle.
    fn find_cycle_path(&self, remaining: &HashMap<&NodeId, usize>) -> Vec<NodeId> {
        let stuck: HashSet<&NodeId> = remaining
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(id, _)| *id)
            .collect();

        let Some(&start) = stuck.iter().min_by_key(|id| id.as_str()) else {
            return Vec::new();
        };

        let mut path = vec![start.clone()];
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut current = start;
        loop {
            let def = match self.definitions.get(current) {
                Some(def) => def,
                None => break,
            };
            let Some(next) = def.inputs.iter().find(|i| stuck.contains(i)) else {
                break;
            };
            if visited.contains(next) {
                path.push(next.clone());
                break;
            }
            visited.insert(next);
            path.push(next.clone());
            current = next;
        }
        path
    }

    /// Diffs this graph's definitions against a new set, producing the
    /// structural changes `update_graph` applies atomically before marking
    /// the affected subtree dirty.
    pub fn diff(&self, new_defs: &DefinitionSet) -> GraphDiff {
        let mut diff = GraphDiff::default();
        for (id, new_def) in new_defs {
            match self.definitions.get(id) {
                None => diff.added.push(id.clone()),
                Some(old_def) => {
                    if old_def.type_tag != new_def.type_tag || old_def.inputs != new_def.inputs {
                        diff.replaced.push(id.clone());
                    } else if old_def.config != new_def.config {
                        diff.config_changed.push(id.clone());
                    }
                }
            }
        }
        for id in self.definitions.keys() {
            if !new_defs.contains_key(id) {
                diff.removed.push(id.clone());
            }
        }
        diff
    }

    /// Applies a new definition set in place. Callers are expected to have
    /// already validated the new set (no cycles, no unknown inputs) before
    /// calling this, so the swap is atomic from the caller's perspective:
    /// either `update_graph` validates-then-swaps, or it doesn't swap.
    pub fn replace_definitions(&mut self, new_defs: DefinitionSet) {
        let mut insertion_order = Vec::with_capacity(new_defs.len());
        for id in &self.insertion_order {
            if new_defs.contains_key(id) {
                insertion_order.push(id.clone());
            }
        }
        for id in new_defs.keys() {
            if !insertion_order.contains(id) {
                insertion_order.push(id.clone());
            }
        }
        self.insertion_order = insertion_order;
        self.definitions = new_defs;
    }
}

fn sort_by_rank<'a>(queue: &mut VecDeque<&'a NodeId>, rank: &HashMap<&'a NodeId, usize>) {
    let mut items: Vec<_> = queue.drain(..).collect();
    items.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
    queue.extend(items);
}

/// The result of diffing two definition sets.
#[derive(Debug, Default, Clone)]
pub struct GraphDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub replaced: Vec<NodeId>,
    pub config_changed: Vec<NodeId>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.replaced.is_empty()
            && self.config_changed.is_empty()
    }

    /// Every id touched by this diff, used to seed the dirty closure.
    pub fn touched(&self) -> impl Iterator<Item = &NodeId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.replaced.iter())
            .chain(self.config_changed.iter())
    }
}
