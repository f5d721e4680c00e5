//! Registry of established connections.
//!
//! The registry is the single source of truth for "is peer X connected".
//! It holds at most one handle per [`PeerId`], in insertion order, behind a
//! single mutex. The lock is only held for the duration of each lookup or
//! mutation and never across an `.await`.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::peer::{PeerId, PeerRecord};

/// A registered peer together with its open handle.
pub struct Connection<H> {
   record: PeerRecord,
   handle: Arc<H>,
}

impl<H> Clone for Connection<H> {
   fn clone(&self) -> Self {
      Self {
         record: self.record.clone(),
         handle: self.handle.clone(),
      }
   }
}

impl<H> Connection<H> {
   pub fn peer(&self) -> &PeerId {
      self.record.id()
   }

   pub fn record(&self) -> &PeerRecord {
      &self.record
   }

   pub fn handle(&self) -> &Arc<H> {
      &self.handle
   }

   pub fn into_record(self) -> PeerRecord {
      self.record
   }
}

struct RegistryState<H> {
   entries: Vec<Connection<H>>,
   // Peers with a connect queued but not yet finished, with a count so that
   // overlapping connects to the same peer are tracked correctly.
   connecting: HashMap<PeerId, usize>,
}

impl<H> RegistryState<H> {
   fn position(&self, peer: &PeerId) -> Option<usize> {
      self.entries.iter().position(|c| c.peer() == peer)
   }
}

pub struct ConnectionRegistry<H> {
   state: Mutex<RegistryState<H>>,
}

impl<H> Default for ConnectionRegistry<H> {
   fn default() -> Self {
      Self::new()
   }
}

impl<H> ConnectionRegistry<H> {
   pub fn new() -> Self {
      Self {
         state: Mutex::new(RegistryState {
            entries: Vec::new(),
            connecting: HashMap::new(),
         }),
      }
   }

   pub fn get(&self, peer: &PeerId) -> Option<Connection<H>> {
      let state = self.state.lock();
      state.position(peer).map(|idx| state.entries[idx].clone())
   }

   pub fn contains(&self, peer: &PeerId) -> bool {
      self.state.lock().position(peer).is_some()
   }

   /// Registers `handle` for the record's peer.
   ///
   /// If the peer already had a handle it is replaced in place and the
   /// displaced connection is returned so the caller can close it.
   pub fn insert(&self, record: PeerRecord, handle: Arc<H>) -> Option<Connection<H>> {
      let mut state = self.state.lock();
      let conn = Connection { record, handle };
      match state.position(conn.peer()) {
         Some(idx) => Some(std::mem::replace(&mut state.entries[idx], conn)),
         None => {
            state.entries.push(conn);
            None
         },
      }
   }

   pub fn remove(&self, peer: &PeerId) -> Option<Connection<H>> {
      let mut state = self.state.lock();
      let idx = state.position(peer)?;
      Some(state.entries.remove(idx))
   }

   /// Removes the peer's entry only if it still holds exactly `handle`.
   ///
   /// Lets a caller that observed a stale handle clean it up without racing
   /// a concurrent replacement of that handle.
   pub fn remove_handle(&self, peer: &PeerId, handle: &Arc<H>) -> Option<Connection<H>> {
      let mut state = self.state.lock();
      let idx = state.position(peer)?;
      if Arc::ptr_eq(&state.entries[idx].handle, handle) {
         Some(state.entries.remove(idx))
      } else {
         None
      }
   }

   pub fn drain(&self) -> Vec<Connection<H>> {
      std::mem::take(&mut self.state.lock().entries)
   }

   /// Snapshot of the registered peer records.
   pub fn records(&self) -> Vec<PeerRecord> {
      self
         .state
         .lock()
         .entries
         .iter()
         .map(|c| c.record.clone())
         .collect()
   }

   pub fn len(&self) -> usize {
      self.state.lock().entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.state.lock().entries.is_empty()
   }

   pub fn is_connecting(&self, peer: &PeerId) -> bool {
      self.state.lock().connecting.contains_key(peer)
   }

   /// Marks a connect to `peer` as in flight until the returned guard drops.
   pub fn begin_connect(self: &Arc<Self>, peer: &PeerId) -> PendingConnect<H> {
      *self
         .state
         .lock()
         .connecting
         .entry(peer.clone())
         .or_default() += 1;
      PendingConnect {
         registry: self.clone(),
         peer: peer.clone(),
      }
   }
}

/// Guard returned by [`ConnectionRegistry::begin_connect`].
pub struct PendingConnect<H> {
   registry: Arc<ConnectionRegistry<H>>,
   peer: PeerId,
}

impl<H> Drop for PendingConnect<H> {
   fn drop(&mut self) {
      let mut state = self.registry.state.lock();
      if let Some(count) = state.connecting.get_mut(&self.peer) {
         *count -= 1;
         if *count == 0 {
            state.connecting.remove(&self.peer);
         }
      }
   }
}
