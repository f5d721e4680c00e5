//! Transport collaborators consumed by the connection manager.
//!
//! The manager never touches sockets or the device database directly; it
//! goes through [`DeviceDirectory`] to find peers and [`SocketCapability`]
//! to open streams to them. [`rfcomm`] provides the BlueZ implementation of
//! both.

use std::{future::Future, io};

use crate::{
   error::Result,
   peer::{PeerId, PeerRecord},
};

#[cfg(test)]
pub mod memory;
pub mod rfcomm;

/// Source of paired peers.
pub trait DeviceDirectory: Send + Sync + 'static {
   /// Lists every peer the local adapter is bonded with.
   fn bonded_devices(&self) -> impl Future<Output = Result<Vec<PeerRecord>>> + Send;

   /// Looks up a bonded peer by identifier.
   fn resolve(&self, peer: &PeerId) -> impl Future<Output = Option<PeerRecord>> + Send;
}

/// Opens byte streams to peers.
pub trait SocketCapability: Send + Sync + 'static {
   type Handle: SerialHandle;

   /// Whether the underlying adapter is powered and usable.
   fn is_available(&self) -> impl Future<Output = bool> + Send;

   fn open(&self, peer: &PeerRecord) -> impl Future<Output = io::Result<Self::Handle>> + Send;
}

/// An open stream bound to a single peer.
pub trait SerialHandle: Send + Sync + 'static {
   /// Whether the stream still looks usable. Must not block.
   fn is_live(&self) -> bool;

   /// Writes the whole buffer and flushes it.
   fn write_all(&self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

   /// Closes the stream. Closing an already closed handle succeeds.
   fn close(&self) -> impl Future<Output = io::Result<()>> + Send;
}
