//! Deterministic fingerprinting of `(node_id, inputs, config)`, used by the
//! cache layer to key memoized compute results.
//!
//! Grounded on `langgraph_checkpoint`'s fingerprint-by-serialization idiom
//! (checkpoints are keyed by a serialized, hashed representation rather than
//! structural equality) generalized to hash a node's full compute identity.

use crate::node::{Config, NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A cache key: the hash of a node's id, current input values, and config.
/// Two computes with an identical fingerprint are guaranteed to produce the
/// same output, given a pure plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn compute(node_id: &NodeId, inputs: &[serde_json::Value], config: &Config) -> Self {
        let mut hasher = DefaultHasher::new();
        node_id.as_str().hash(&mut hasher);
        for input in inputs {
            canonical_json(input).hash(&mut hasher);
        }
        canonical_json(config).hash(&mut hasher);
        Fingerprint(hasher.finish())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Canonical string form of a JSON value: `serde_json::Value`'s `Map` is
/// already a `BTreeMap`, so `to_string()` is already key-order independent.
fn canonical_json(value: &serde_json::Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_inputs_produce_identical_fingerprints() {
        let a = Fingerprint::compute(&NodeId::new("n"), &[json!(1), json!("x")], &json!({}));
        let b = Fingerprint::compute(&NodeId::new("n"), &[json!(1), json!("x")], &json!({}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_node_id_changes_fingerprint() {
        let a = Fingerprint::compute(&NodeId::new("n1"), &[], &json!({}));
        let b = Fingerprint::compute(&NodeId::new("n2"), &[], &json!({}));
        assert_ne!(a, b);
    }

    #[test]
    fn different_input_order_changes_fingerprint() {
        let a = Fingerprint::compute(&NodeId::new("n"), &[json!(1), json!(2)], &json!({}));
        let b = Fingerprint::compute(&NodeId::new("n"), &[json!(2), json!(1)], &json!({}));
        assert_ne!(a, b);
    }

    #[test]
    fn object_key_order_does_not_change_fingerprint() {
        let a = Fingerprint::compute(&NodeId::new("n"), &[], &json!({"a": 1, "b": 2}));
        let b = Fingerprint::compute(&NodeId::new("n"), &[], &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }
}
