//! Backpressure and flow control for outbound delivery
//!
//! Every connection owns a bounded outbound queue drained by its writer task.
//! Producers (event fan-out and operation replies) never wait on a queue:
//! they offer a frame and act on the outcome according to the configured
//! overflow policy.
//!
//! Without a bound, one slow client would buffer the whole market feed in
//! memory during volatile periods.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A serialized server message, shared between every recipient of an event.
pub type Frame = Arc<str>;

/// What to do when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Disconnect the lagging client immediately.
    Disconnect,
    /// Discard the frame that did not fit and keep the client.
    DropMessage,
}

/// Outcome of offering a frame to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued for the writer task.
    Queued,
    /// Queue full; frame discarded under `DropMessage`.
    Dropped,
    /// Queue full under `Disconnect`, or the writer is gone.
    Disconnect,
}

/// Offer a frame to an outbound queue without waiting.
pub fn offer(sender: &mpsc::Sender<Frame>, frame: Frame, policy: OverflowPolicy) -> Delivery {
    match sender.try_send(frame) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => match policy {
            OverflowPolicy::Disconnect => Delivery::Disconnect,
            OverflowPolicy::DropMessage => Delivery::Dropped,
        },
        Err(TrySendError::Closed(_)) => Delivery::Disconnect,
    }
}
