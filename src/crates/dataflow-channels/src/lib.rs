//! # dataflow-channels — per-node state containers
//!
//! A small, dependency-light crate of typed state containers ("channels")
//! used by [`dataflow-core`](https://docs.rs/dataflow-core)'s value stream
//! substrate to combine the values written to a node during one propagation
//! wave into the single value its subscribers observe.
//!
//! ## Channel types
//!
//! - [`LastValueChannel`] — overwrite semantics, at most one write per wave.
//! - [`TopicChannel`] — append-only log of every value written.
//! - [`BinaryOperatorChannel`] — folds writes through a custom reducer
//!   (`sum`, `append`, or any user-supplied binary operator), carrying the
//!   accumulator forward across waves.
//!
//! All three implement the shared [`Channel`] trait, so callers needing a
//! differently-shaped state container can implement it directly rather than
//! picking the nearest of these three.
//!
//! ## Quick start
//!
//! ```rust
//! use dataflow_channels::{Channel, LastValueChannel};
//! use serde_json::json;
//!
//! let mut status = LastValueChannel::new();
//! status.update(vec![json!({"ready": true})]).unwrap();
//! assert_eq!(status.get().unwrap(), json!({"ready": true}));
//! ```

pub mod channels;
pub mod error;

pub use channels::{BinaryOperatorChannel, Channel, LastValueChannel, ReducerFn, TopicChannel};
pub use error::{ChannelError, Result};
