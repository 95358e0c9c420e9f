//! Core data model: node ids, node definitions, the value domain, and
//! plugin categories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A node's unique identifier within a graph.
///
/// Kept as a distinct newtype over `String` (rather than a plain alias, as
/// `langgraph_core::graph`'s `type NodeId = String` does) because node ids
/// form a closed domain with referential-integrity and uniqueness
/// invariants the compiler can help enforce at call sites that accept both
/// an id and an arbitrary string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A plugin's scheduling category.
///
/// `Data` nodes are eligible for eager, engine-start computation (or lazy,
/// demand-driven computation under `async_exec_mode`); `Operational` nodes
/// always compute on demand, driven purely by their inputs changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Data,
    Operational,
}

/// Opaque JSON-like configuration attached to a node.
pub type Config = serde_json::Value;

/// Immutable description of a node, as produced by the composition API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub type_tag: String,
    #[serde(default = "default_config")]
    pub config: Config,
    #[serde(default)]
    pub inputs: Vec<NodeId>,
    #[serde(default)]
    pub is_subscribed: bool,
    /// Overrides the plugin's declared category for this node, if set.
    #[serde(default)]
    pub category_override: Option<Category>,
}

fn default_config() -> Config {
    serde_json::Value::Object(Default::default())
}

impl NodeDefinition {
    pub fn new(id: impl Into<NodeId>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            config: default_config(),
            inputs: Vec::new(),
            is_subscribed: false,
            category_override: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<NodeId>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn subscribed(mut self) -> Self {
        self.is_subscribed = true;
        self
    }
}

/// The value domain every node's channel carries: a user value, or one of
/// the two protocol sentinels.
///
/// Kept as an explicit enum (rather than encoding sentinels as
/// `serde_json::Value` strings, as a less careful port might) so sentinels
/// can never be confused with user data that happens to look the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Emission {
    /// A real value produced by a plugin compute, or `null` on error/cancel
    /// surfacing policy.
    User(serde_json::Value),
    /// Emitted once at node registration, before any compute has run.
    Init,
    /// An upstream suppressed this tick; downstream should not compute.
    Skip,
}

impl Emission {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Emission::Init | Emission::Skip)
    }

    pub fn as_user_value(&self) -> Option<&serde_json::Value> {
        match self {
            Emission::User(v) => Some(v),
            _ => None,
        }
    }

    pub fn null() -> Self {
        Emission::User(serde_json::Value::Null)
    }
}

impl fmt::Display for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emission::User(v) => write!(f, "{v}"),
            Emission::Init => write!(f, "<INIT_NODE_EXEC>"),
            Emission::Skip => write!(f, "<SKIP_NODE_EXEC>"),
        }
    }
}

/// A set of node definitions keyed by id, in insertion order — the unit the
/// graph model's diffing operates over.
pub type DefinitionSet = BTreeMap<NodeId, NodeDefinition>;
