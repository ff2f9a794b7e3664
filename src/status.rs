//! Status events for the display layer.
//!
//! The rangefinder session, the stream supervisor and the console context
//! never talk to the HUD directly. They publish [`StatusEvent`]s on a
//! [`StatusBus`], and whoever renders the screen subscribes to it. Publishing
//! never blocks and works without an async runtime.

use crate::rangefinder::{Measurement, SessionState};
use serde::Serialize;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped.
const STATUS_CAPACITY: usize = 64;

/// Something the operator may want to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// The rangefinder session changed state
    RangefinderState { state: SessionState },
    /// A distance reading arrived
    Measurement { reading: Measurement },
    /// A measurement attempt produced no reading
    NoReading { reason: String },
    /// UI-driven continuous measuring switched itself off
    ContinuousAutoOff { after_minutes: f64 },
    /// The active stream stopped delivering frames
    StreamUnavailable { name: String },
    /// The supervisor moved to another stream
    StreamSwitched { from: String, to: String },
    /// Every configured stream failed in one reconnect episode
    AllStreamsFailed { attempted: usize },
}

/// Broadcast channel for [`StatusEvent`]s.
#[derive(Debug, Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(STATUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Events published with no subscribers are dropped.
    pub fn publish(&self, event: StatusEvent) {
        tracing::trace!(?event, "status");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
