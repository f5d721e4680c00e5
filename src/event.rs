//! Event handling for connection status updates.
//!
//! Events are fire-and-forget notifications; operation results are
//! delivered separately through [`crate::delivery::Completion`].

use std::sync::Arc;

use crate::peer::PeerId;

/// Events that can be emitted by the connection service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
   Connected,
   Disconnected,
   /// The remote end closed the stream or a read failed. The registry
   /// entry stays until the next operation on the peer cleans it up.
   ConnectionLost,
   DataReceived(Vec<u8>),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, peer: &PeerId, event: SerialEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

