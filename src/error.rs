//! Error types for the serial connection service.
//!
//! Every manager operation resolves to [`Result`]; transport failures carry
//! the peer they occurred on and the underlying I/O cause.

use std::io;

use smol_str::SmolStr;
use thiserror::Error;

use crate::peer::PeerId;

/// Main error type for the serial connection service.
#[derive(Error, Debug)]
pub enum SerialError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] io::Error),

   #[error("Peer not found: {0}")]
   PeerNotFound(PeerId),

   #[error("Peer not connected: {0}")]
   NotConnected(PeerId),

   #[error("Failed to open connection to {peer}: {source}")]
   TransportOpenFailed { peer: PeerId, source: io::Error },

   #[error("Failed to write to {peer}: {source}")]
   TransportWriteFailed { peer: PeerId, source: io::Error },

   #[error("Failed to close connection to {peer}: {source}")]
   TransportCloseFailed { peer: PeerId, source: io::Error },

   #[error("Invalid peer address: {0}")]
   InvalidAddress(SmolStr),

   #[error("Task queue is full")]
   QueueFull,

   #[error("Queued task aborted before completing")]
   TaskAborted,

   #[error("Manager has been shut down")]
   ManagerShutdown,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `SerialError`.
pub type Result<T> = std::result::Result<T, SerialError>;
