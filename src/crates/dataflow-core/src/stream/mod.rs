//! Value Stream Substrate: a multicast, last-value-replaying channel
//! per node, with the `distinct -> throttle -> debounce` operator chain
//! applied before values are broadcast to subscribers.
//!
//! Grounded on `compiled/streaming.rs`'s `StreamMultiplexer` (fan-out of one
//! producer to many mode-filtered consumers) generalized from Pregel's
//! per-superstep broadcast to a per-node, replay-on-subscribe broadcast. The
//! replay slot itself is a `dataflow_channels::LastValueChannel`, so the
//! same overwrite-semantics container backs both live replay and snapshot
//! export/import.

pub mod operators;

use crate::node::{Emission, NodeId};
use dataflow_channels::{Channel, LastValueChannel};
use operators::{Debounce, Distinct, Throttle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Per-node operator settings, taken from `EngineOptions` at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    pub distinct_values: bool,
    pub throttle: Option<Duration>,
    pub debounce: Option<Duration>,
}

struct NodeStream {
    sender: broadcast::Sender<Emission>,
    last: RwLock<LastValueChannel>,
    distinct: RwLock<Distinct>,
    throttle: RwLock<Option<Throttle>>,
    debounce: RwLock<Option<Debounce>>,
}

impl NodeStream {
    fn new(options: StreamOptions) -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            sender,
            last: RwLock::new(LastValueChannel::new()),
            distinct: RwLock::new(Distinct::new()),
            throttle: RwLock::new(options.throttle.map(Throttle::new)),
            debounce: RwLock::new(options.debounce.map(Debounce::new)),
        }
    }
}

/// Converts an `Emission` to and from the JSON value a `LastValueChannel`
/// stores. An emission always round-trips through its own `Serialize`/
/// `Deserialize` impl, so these never fail in practice.
fn emission_to_channel_value(emission: &Emission) -> serde_json::Value {
    serde_json::to_value(emission).unwrap_or(serde_json::Value::Null)
}

fn channel_value_to_emission(value: serde_json::Value) -> Option<Emission> {
    serde_json::from_value(value).ok()
}

/// Owns one [`NodeStream`] per registered node and exposes the
/// subscribe/publish surface the scheduler and public API use.
#[derive(Default)]
pub struct StreamHub {
    streams: RwLock<HashMap<NodeId, Arc<NodeStream>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: NodeId, options: StreamOptions) {
        self.streams
            .write()
            .await
            .insert(id, Arc::new(NodeStream::new(options)));
    }

    pub async fn unregister(&self, id: &NodeId) {
        self.streams.write().await.remove(id);
    }

    /// Runs a freshly computed value through this node's operator chain and
    /// broadcasts the admitted emission (if any) to current subscribers,
    /// updating the replay slot. Returns `true` if anything was emitted.
    pub async fn publish(&self, id: &NodeId, emission: Emission, now: Instant) -> bool {
        let stream = match self.streams.read().await.get(id).cloned() {
            Some(s) => s,
            None => return false,
        };

        if stream.distinct.write().await.admit(&emission) {
            let throttled = {
                let mut throttle = stream.throttle.write().await;
                match throttle.as_mut() {
                    Some(t) => t.admit_at(&emission, now),
                    None => true,
                }
            };
            if !throttled {
                return false;
            }

            let mut debounce = stream.debounce.write().await;
            if let Some(d) = debounce.as_mut() {
                let (immediate, drained) = d.feed(emission, now);
                drop(debounce);
                let mut emitted = false;
                if let Some(drained) = drained {
                    emitted |= self.emit(&stream, drained).await;
                }
                if let Some(immediate) = immediate {
                    emitted |= self.emit(&stream, immediate).await;
                }
                emitted
            } else {
                self.emit(&stream, emission).await
            }
        } else {
            false
        }
    }

    /// Drains any node whose debounce window has elapsed. Called once per
    /// scheduler tick, since this engine has no per-node timer task.
    pub async fn drain_debounced(&self, now: Instant) -> Vec<(NodeId, Emission)> {
        let mut flushed = Vec::new();
        let streams = self.streams.read().await;
        for (id, stream) in streams.iter() {
            let value = {
                let mut debounce = stream.debounce.write().await;
                debounce.as_mut().and_then(|d| d.poll(now))
            };
            if let Some(value) = value {
                if self.emit(stream, value.clone()).await {
                    flushed.push((id.clone(), value));
                }
            }
        }
        flushed
    }

    async fn emit(&self, stream: &NodeStream, emission: Emission) -> bool {
        let _ = stream
            .last
            .write()
            .await
            .update(vec![emission_to_channel_value(&emission)]);
        // A send error only means there are currently no subscribers; the
        // replay slot above still holds the value for the next one.
        stream.sender.send(emission).is_ok()
    }

    /// Subscribes to a node's stream. If a value has already been emitted,
    /// the returned stream's first item replays it immediately.
    pub async fn observe(
        &self,
        id: &NodeId,
    ) -> Option<impl Stream<Item = Emission> + Send + 'static> {
        let stream = self.streams.read().await.get(id).cloned()?;
        let last = stream
            .last
            .read()
            .await
            .get()
            .ok()
            .and_then(channel_value_to_emission);
        let receiver = stream.sender.subscribe();
        let tail = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Some(async_stream::stream! {
            if let Some(last) = last {
                yield last;
            }
            tokio::pin!(tail);
            while let Some(item) = tail.next().await {
                yield item;
            }
        })
    }

    pub async fn last(&self, id: &NodeId) -> Option<Emission> {
        let stream = self.streams.read().await.get(id).cloned()?;
        stream.last.read().await.get().ok().and_then(channel_value_to_emission)
    }

    /// Total live subscriber count across every node's broadcast channel,
    /// part of `EngineStats::active_subscriptions`.
    pub async fn active_subscriptions(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .map(|s| s.sender.receiver_count())
            .sum()
    }
}
