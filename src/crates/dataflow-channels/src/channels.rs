//! Channel abstractions for per-node state.
//!
//! A channel is a typed container that accumulates values written to it
//! during a single propagation wave and exposes a single combined value to
//! readers. Different channel types give different combination semantics —
//! "last write wins", "append everything", or "reduce with a custom binary
//! operator" — the same three shapes the value stream substrate builds its
//! multicast behavior on top of.

use crate::error::{ChannelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Base trait implemented by every channel kind.
pub trait Channel: Send + Sync + Debug {
    /// Get the channel's current combined value.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Empty`] if the channel has never been written to.
    fn get(&self) -> Result<serde_json::Value>;

    /// Apply a batch of writes collected during one propagation wave.
    ///
    /// Returns `true` if the channel's value changed as a result.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Invalid`] if the batch violates the channel's
    /// arity contract (e.g. more than one value to a last-value channel).
    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool>;

    /// Take a serializable snapshot of the channel's current state.
    fn snapshot(&self) -> Result<serde_json::Value>;

    /// Restore the channel's state from a snapshot produced by [`Channel::snapshot`].
    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()>;

    /// Whether the channel currently holds a value.
    fn is_available(&self) -> bool {
        self.get().is_ok()
    }

    /// Clone the channel into a boxed trait object.
    fn clone_box(&self) -> Box<dyn Channel>;
}

/// Stores only the most recently written value.
///
/// Rejects batches with more than one value — a last-value channel can
/// receive at most one write per propagation wave, matching the scheduler's
/// at-most-one-in-flight invariant for the node that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastValueChannel {
    value: Option<serde_json::Value>,
}

impl LastValueChannel {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn with_value(value: serde_json::Value) -> Self {
        Self { value: Some(value) }
    }
}

impl Default for LastValueChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for LastValueChannel {
    fn get(&self) -> Result<serde_json::Value> {
        self.value.clone().ok_or(ChannelError::Empty)
    }

    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        if values.len() > 1 {
            return Err(ChannelError::Invalid(
                "last-value channel can receive only one value per wave".to_string(),
            ));
        }
        self.value = Some(values.into_iter().last().unwrap());
        Ok(true)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        self.value.clone().ok_or(ChannelError::Empty)
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Append-only log of every value written to the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicChannel {
    values: Vec<serde_json::Value>,
}

impl TopicChannel {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn get_all(&self) -> &[serde_json::Value] {
        &self.values
    }
}

impl Default for TopicChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for TopicChannel {
    fn get(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Array(self.values.clone()))
    }

    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        self.values.extend(values);
        Ok(true)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Array(self.values.clone()))
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()> {
        match snapshot {
            serde_json::Value::Array(arr) => {
                self.values = arr;
                Ok(())
            }
            _ => Err(ChannelError::InvalidSnapshot(
                "topic channel snapshot must be an array".to_string(),
            )),
        }
    }

    fn is_available(&self) -> bool {
        !self.values.is_empty()
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Reducer function combining two values into one.
pub type ReducerFn =
    Box<dyn Fn(serde_json::Value, serde_json::Value) -> serde_json::Value + Send + Sync>;

/// Folds every written value into a single accumulator via a custom binary
/// operator, carrying the accumulator forward across updates.
pub struct BinaryOperatorChannel {
    value: Option<serde_json::Value>,
    reducer: ReducerFn,
}

impl BinaryOperatorChannel {
    pub fn new<F>(reducer: F) -> Self
    where
        F: Fn(serde_json::Value, serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        Self {
            value: None,
            reducer: Box::new(reducer),
        }
    }

    /// A reducer that sums numeric values.
    pub fn sum() -> Self {
        Self::new(|a, b| {
            let a_num = a.as_f64().unwrap_or(0.0);
            let b_num = b.as_f64().unwrap_or(0.0);
            serde_json::json!(a_num + b_num)
        })
    }

    /// A reducer that concatenates arrays (non-array values are treated as
    /// singleton arrays).
    pub fn append() -> Self {
        Self::new(|a, b| {
            let mut result = if let serde_json::Value::Array(arr) = a {
                arr
            } else {
                vec![a]
            };
            if let serde_json::Value::Array(arr) = b {
                result.extend(arr);
            } else {
                result.push(b);
            }
            serde_json::Value::Array(result)
        })
    }
}

impl Debug for BinaryOperatorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryOperatorChannel")
            .field("value", &self.value)
            .field("reducer", &"<function>")
            .finish()
    }
}

impl Channel for BinaryOperatorChannel {
    fn get(&self) -> Result<serde_json::Value> {
        self.value.clone().ok_or(ChannelError::Empty)
    }

    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let reduced = values
            .into_iter()
            .reduce(|acc, val| (self.reducer)(acc, val));
        if let Some(new_value) = reduced {
            self.value = if let Some(current) = &self.value {
                Some((self.reducer)(current.clone(), new_value))
            } else {
                Some(new_value)
            };
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        self.value.clone().ok_or(ChannelError::Empty)
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        // The reducer closure isn't Clone; a fresh accumulator with no
        // reducer of its own would silently change behavior, so this is
        // intentionally unsupported rather than producing a wrong channel.
        panic!("BinaryOperatorChannel cannot be cloned")
    }
}
