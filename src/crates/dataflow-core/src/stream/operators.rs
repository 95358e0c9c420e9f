//! The `distinct -> throttle -> debounce` operator chain applied to a
//! node's emitted values before they reach subscribers.
//!
//! Sentinels (`Emission::Init` / `Emission::Skip`) always pass through
//! unfiltered — none of these operators apply to them, since they carry no
//! comparable "value" and must never be coalesced away.

use crate::node::Emission;
use std::time::{Duration, Instant};

/// Drops consecutive duplicate user values (deep structural equality via
/// `serde_json::Value`'s derived `PartialEq`). Sentinels always pass.
#[derive(Default)]
pub struct Distinct {
    last: Option<serde_json::Value>,
}

impl Distinct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `emission` should be forwarded.
    pub fn admit(&mut self, emission: &Emission) -> bool {
        match emission {
            Emission::User(value) => {
                if self.last.as_ref() == Some(value) {
                    false
                } else {
                    self.last = Some(value.clone());
                    true
                }
            }
            Emission::Init | Emission::Skip => true,
        }
    }
}

/// Admits at most one user value per `interval`, dropping the rest.
/// Sentinels always pass and do not reset the window.
pub struct Throttle {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    pub fn admit_at(&mut self, emission: &Emission, now: Instant) -> bool {
        if emission.is_sentinel() || self.interval.is_zero() {
            return true;
        }
        match self.last_admitted {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }
}

/// Coalesces bursts of user values into the last value observed once
/// `interval` has elapsed without a further emission. Because this engine
/// has no internal timer wheel, `Debounce` is realized as a pending-value
/// holder the scheduler drains on its own tick loop via
/// [`Debounce::poll`], rather than spawning a dedicated timer task per
/// node.
pub struct Debounce {
    interval: Duration,
    pending: Option<(serde_json::Value, Instant)>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
        }
    }

    /// Feeds a new emission in. Sentinels flush any pending value
    /// immediately (sentinels themselves bypass debouncing) and are
    /// returned as `(Some(sentinel), drained_pending)`.
    pub fn feed(&mut self, emission: Emission, now: Instant) -> (Option<Emission>, Option<Emission>) {
        if self.interval.is_zero() {
            return (Some(emission), None);
        }
        match emission {
            Emission::User(value) => {
                let drained = self.pending.take().map(|(v, _)| Emission::User(v));
                self.pending = Some((value, now));
                (None, drained)
            }
            sentinel => {
                let drained = self.pending.take().map(|(v, _)| Emission::User(v));
                (Some(sentinel), drained)
            }
        }
    }

    /// Called on the scheduler's tick to check whether the pending value's
    /// debounce window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Emission> {
        match &self.pending {
            Some((_, since)) if now.duration_since(*since) >= self.interval => {
                self.pending.take().map(|(v, _)| Emission::User(v))
            }
            _ => None,
        }
    }
}
