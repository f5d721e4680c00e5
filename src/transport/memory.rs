//! In-memory transport used by the manager tests.
//!
//! Every opened handle is backed by a shared [`Link`] that tests keep a
//! reference to, so they can inspect written bytes and inject failures.

use std::{
   collections::HashMap,
   io,
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicUsize, Ordering},
   },
   time::Duration,
};

use parking_lot::Mutex;
use tokio::time;

use super::{DeviceDirectory, SerialHandle, SocketCapability};
use crate::{
   error::Result,
   peer::{PeerId, PeerRecord},
};

#[derive(Debug, Default)]
pub struct Link {
   live: AtomicBool,
   fail_writes: AtomicBool,
   closes: AtomicUsize,
   written: Mutex<Vec<Vec<u8>>>,
}

impl Link {
   /// Simulates the remote end going away.
   pub fn drop_remote(&self) {
      self.live.store(false, Ordering::SeqCst);
   }

   pub fn fail_writes(&self) {
      self.fail_writes.store(true, Ordering::SeqCst);
   }

   pub fn written(&self) -> Vec<Vec<u8>> {
      self.written.lock().clone()
   }

   pub fn close_count(&self) -> usize {
      self.closes.load(Ordering::SeqCst)
   }
}

pub struct MemoryHandle {
   link: Arc<Link>,
}

impl SerialHandle for MemoryHandle {
   fn is_live(&self) -> bool {
      self.link.live.load(Ordering::SeqCst)
   }

   async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
      if !self.is_live() {
         return Err(io::ErrorKind::NotConnected.into());
      }
      if self.link.fail_writes.load(Ordering::SeqCst) {
         self.link.live.store(false, Ordering::SeqCst);
         return Err(io::ErrorKind::BrokenPipe.into());
      }
      self.link.written.lock().push(bytes.to_vec());
      Ok(())
   }

   async fn close(&self) -> io::Result<()> {
      self.link.live.store(false, Ordering::SeqCst);
      self.link.closes.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }
}

#[derive(Default)]
pub struct MemoryTransport {
   devices: Mutex<Vec<PeerRecord>>,
   unreachable: Mutex<Vec<PeerId>>,
   links: Mutex<HashMap<PeerId, Vec<Arc<Link>>>>,
   powered_off: AtomicBool,
   ignore_id_case: AtomicBool,
   open_delay: Mutex<Duration>,
}

impl MemoryTransport {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   /// Adds a bonded peer to the directory.
   pub fn pair(&self, id: &str, name: &str) -> PeerId {
      let record = PeerRecord::new(id, name);
      let peer = record.id().clone();
      self.devices.lock().push(record);
      peer
   }

   /// Makes every subsequent open to `peer` fail.
   pub fn make_unreachable(&self, peer: &PeerId) {
      self.unreachable.lock().push(peer.clone());
   }

   /// Resolves ids case-insensitively and reports the paired spelling.
   pub fn match_ids_ignoring_case(&self) {
      self.ignore_id_case.store(true, Ordering::SeqCst);
   }

   pub fn set_powered(&self, powered: bool) {
      self.powered_off.store(!powered, Ordering::SeqCst);
   }

   pub fn set_open_delay(&self, delay: Duration) {
      *self.open_delay.lock() = delay;
   }

   /// Most recently opened link to `peer`.
   pub fn link(&self, peer: &PeerId) -> Option<Arc<Link>> {
      self.links.lock().get(peer)?.last().cloned()
   }

   pub fn open_count(&self, peer: &PeerId) -> usize {
      self.links.lock().get(peer).map_or(0, Vec::len)
   }
}

impl DeviceDirectory for MemoryTransport {
   async fn bonded_devices(&self) -> Result<Vec<PeerRecord>> {
      Ok(self.devices.lock().clone())
   }

   async fn resolve(&self, peer: &PeerId) -> Option<PeerRecord> {
      let ignore_case = self.ignore_id_case.load(Ordering::SeqCst);
      self
         .devices
         .lock()
         .iter()
         .find(|r| {
            if ignore_case {
               r.id().as_str().eq_ignore_ascii_case(peer.as_str())
            } else {
               r.id() == peer
            }
         })
         .cloned()
   }
}

impl SocketCapability for MemoryTransport {
   type Handle = MemoryHandle;

   async fn is_available(&self) -> bool {
      !self.powered_off.load(Ordering::SeqCst)
   }

   async fn open(&self, peer: &PeerRecord) -> io::Result<MemoryHandle> {
      let delay = *self.open_delay.lock();
      if !delay.is_zero() {
         time::sleep(delay).await;
      }
      if self.unreachable.lock().contains(peer.id()) {
         return Err(io::ErrorKind::HostUnreachable.into());
      }

      let link = Arc::new(Link {
         live: AtomicBool::new(true),
         ..Default::default()
      });
      self
         .links
         .lock()
         .entry(peer.id().clone())
         .or_default()
         .push(link.clone());
      Ok(MemoryHandle { link })
   }
}
