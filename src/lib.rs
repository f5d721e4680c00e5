//! Serialized RFCOMM connection management for paired Bluetooth devices.
//!
//! [`ConnectionManager`] keeps a registry of open streams to paired peers
//! and runs every socket operation on a single-worker queue, so connects,
//! writes and disconnects never race. Results are delivered through
//! [`Completion`], which can be awaited or given callbacks.

pub mod config;
pub mod dbus;
pub mod delivery;
pub mod error;
pub mod event;
pub mod manager;
pub mod peer;
pub mod queue;
pub mod registry;
pub mod transport;

pub use delivery::Completion;
pub use error::{Result, SerialError};
pub use manager::ConnectionManager;
pub use peer::{PeerId, PeerRecord};
