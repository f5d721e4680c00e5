//! Connection lifecycle manager.
//!
//! [`ConnectionManager`] owns the connection registry and the serial task
//! queue. Lookups against the registry happen on the caller's thread; every
//! operation that touches a socket (open, write, close) runs on the queue,
//! so operations on the link are totally ordered and never interleave.
//!
//! Failures are handled at the task boundary: the affected peer's entry is
//! removed and its handle closed before the error is delivered, so a
//! half-open handle is never left registered.

use std::{
   future::Future,
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
};

use log::{debug, info, warn};
use tokio::sync::OnceCell;

use crate::{
   config::Config,
   delivery::Completion,
   error::{Result, SerialError},
   event::{EventSender, SerialEvent},
   peer::{PeerId, PeerRecord},
   queue::SerialQueue,
   registry::{Connection, ConnectionRegistry},
   transport::{DeviceDirectory, SerialHandle, SocketCapability},
};

/// Manages serial connections to paired peers.
///
/// This type is cheaply cloneable; clones share the same registry and queue.
/// Operations return a [`Completion`] immediately and never block the
/// caller.
pub struct ConnectionManager<D, S: SocketCapability> {
   inner: Arc<Inner<D, S>>,
}

impl<D, S: SocketCapability> Clone for ConnectionManager<D, S> {
   fn clone(&self) -> Self {
      Self {
         inner: self.inner.clone(),
      }
   }
}

struct Inner<D, S: SocketCapability> {
   directory: Arc<D>,
   sockets: Arc<S>,
   registry: Arc<ConnectionRegistry<S::Handle>>,
   queue: SerialQueue,
   event_tx: EventSender,
   disposed: AtomicBool,
   teardown: OnceCell<()>,
}

impl<D, S> ConnectionManager<D, S>
where
   D: DeviceDirectory,
   S: SocketCapability,
{
   /// Creates a manager and starts its task queue.
   ///
   /// Must be called from within a Tokio runtime.
   pub fn new(directory: Arc<D>, sockets: Arc<S>, config: &Config, event_tx: EventSender) -> Self {
      Self {
         inner: Arc::new(Inner {
            directory,
            sockets,
            registry: Arc::new(ConnectionRegistry::new()),
            queue: SerialQueue::new("connection", config.queue_capacity),
            event_tx,
            disposed: AtomicBool::new(false),
            teardown: OnceCell::new(),
         }),
      }
   }

   /// Whether the transport adapter is powered and usable.
   pub async fn is_available(&self) -> bool {
      self.inner.sockets.is_available().await
   }

   /// Whether `peer` is registered and its handle currently reports live.
   ///
   /// Purely observational: a stale entry is left in place for the next
   /// connect or send to clean up.
   pub fn is_connected(&self, peer: &PeerId) -> bool {
      self
         .inner
         .registry
         .get(peer)
         .is_some_and(|conn| conn.handle().is_live())
   }

   /// Snapshot of the registered peers.
   pub fn list_connected(&self) -> Vec<PeerRecord> {
      self.inner.registry.records()
   }

   /// Every peer the adapter is bonded with, connected or not.
   pub async fn paired_devices(&self) -> Result<Vec<PeerRecord>> {
      self.inner.directory.bonded_devices().await
   }

   /// Connects to `peer`.
   ///
   /// A registered handle that is still live short-circuits here, on the
   /// caller's thread, without touching the queue. A registered handle that
   /// is no longer live is unregistered here and closed by the queued
   /// connect before it opens a fresh stream, or right away if the connect
   /// cannot be queued. Send only checks liveness once it reaches the queue.
   pub fn connect(&self, peer: &PeerId) -> Completion<PeerRecord> {
      if let Err(e) = self.inner.ensure_active() {
         return Completion::failed(e);
      }

      // Marked before any stale entry goes away, so a concurrent send never
      // sees the peer as neither registered nor connecting.
      let pending = self.inner.registry.begin_connect(peer);

      let mut stale = None;
      if let Some(conn) = self.inner.registry.get(peer) {
         if conn.handle().is_live() {
            debug!("Already connected to {peer}");
            return Completion::ready(Ok(conn.into_record()));
         }
         info!("Connection to {peer} is stale, reconnecting");
         stale = self.inner.registry.remove_handle(peer, conn.handle());
      }

      let inner = self.inner.clone();
      let task_peer = peer.clone();
      let task_stale = stale.clone();
      match self.inner.queue.submit(async move {
         let _pending = pending;
         inner.run_connect(task_peer, task_stale).await
      }) {
         Ok(ticket) => Completion::queued(ticket),
         Err(e) => {
            // Already unregistered, and its queued connect will never run.
            if let Some(stale) = stale {
               let inner = self.inner.clone();
               tokio::spawn(async move { inner.close_connection(stale).await });
            }
            Completion::failed(e)
         },
      }
   }

   /// Writes `bytes` to `peer` unmodified.
   ///
   /// Fails immediately with `NotConnected` when the peer is neither
   /// registered nor has a connect queued.
   pub fn send(&self, peer: &PeerId, bytes: impl Into<Vec<u8>>) -> Completion<()> {
      if let Err(e) = self.inner.ensure_active() {
         return Completion::failed(e);
      }
      if !self.inner.registry.contains(peer) && !self.inner.registry.is_connecting(peer) {
         return Completion::failed(SerialError::NotConnected(peer.clone()));
      }

      let bytes = bytes.into();
      let inner = self.inner.clone();
      let peer = peer.clone();
      self
         .inner
         .submit(async move { inner.run_send(peer, bytes).await })
   }

   /// Closes and unregisters `peer`. Disconnecting an unknown peer is a no-op.
   pub fn disconnect_device(&self, peer: &PeerId) -> Completion<()> {
      let inner = self.inner.clone();
      let peer = peer.clone();
      self.inner.submit_teardown(async move {
         inner.disconnect_peer(&peer).await;
         Ok(())
      })
   }

   /// Closes and unregisters every peer.
   pub fn disconnect_all(&self) -> Completion<()> {
      let inner = self.inner.clone();
      self.inner.submit_teardown(async move {
         inner.close_all().await;
         Ok(())
      })
   }

   /// Tears the manager down.
   ///
   /// New operations are rejected from this point on. The operation that is
   /// currently running completes normally; queued connects and sends fail
   /// with `ManagerShutdown` when reached. Once the queue has drained, every
   /// remaining connection is closed.
   ///
   /// Every call, concurrent or not, returns only after that teardown is done.
   pub async fn dispose(&self) {
      self.inner.disposed.store(true, Ordering::SeqCst);
      self
         .inner
         .teardown
         .get_or_init(|| async {
            info!("Disposing connection manager");
            self.inner.queue.shutdown().await;

            // The worker has exited, so closing here cannot interleave with
            // queued I/O.
            self.inner.close_all().await;
         })
         .await;
   }
}

impl<D, S> Inner<D, S>
where
   D: DeviceDirectory,
   S: SocketCapability,
{
   fn ensure_active(&self) -> Result<()> {
      if self.disposed.load(Ordering::SeqCst) {
         Err(SerialError::ManagerShutdown)
      } else {
         Ok(())
      }
   }

   fn submit<T, F>(&self, task: F) -> Completion<T>
   where
      T: Send + 'static,
      F: Future<Output = Result<T>> + Send + 'static,
   {
      match self.queue.submit(task) {
         Ok(ticket) => Completion::queued(ticket),
         Err(e) => Completion::failed(e),
      }
   }

   // Teardown after shutdown has nothing left to do: dispose already
   // emptied the registry.
   fn submit_teardown<F>(&self, task: F) -> Completion<()>
   where
      F: Future<Output = Result<()>> + Send + 'static,
   {
      match self.queue.submit(task) {
         Ok(ticket) => Completion::queued(ticket),
         Err(SerialError::ManagerShutdown) => Completion::ready(Ok(())),
         Err(e) => Completion::failed(e),
      }
   }

   async fn run_connect(
      &self,
      peer: PeerId,
      stale: Option<Connection<S::Handle>>,
   ) -> Result<PeerRecord> {
      if let Some(stale) = stale {
         self.close_connection(stale).await;
      }
      self.ensure_active()?;

      // A connect queued ahead of this one may already have done the work.
      if let Some(conn) = self.registry.get(&peer) {
         if conn.handle().is_live() {
            debug!("Already connected to {peer}");
            return Ok(conn.into_record());
         }
         self.release(&conn).await;
      }

      let record = self
         .directory
         .resolve(&peer)
         .await
         .ok_or_else(|| SerialError::PeerNotFound(peer.clone()))?;
      // Registered under the id callers look it up by, whatever spelling the
      // directory reports.
      let record = if record.id() == &peer {
         record
      } else {
         debug!("Directory resolved {peer} as {}", record.id());
         record.with_id(peer.clone())
      };

      info!("Connecting to {} ({peer})", record.name());
      match self.sockets.open(&record).await {
         Ok(handle) => {
            if let Some(displaced) = self.registry.insert(record.clone(), Arc::new(handle)) {
               warn!("Replacing existing connection to {peer}");
               self.close_connection(displaced).await;
            }
            info!("Connected to {peer}");
            self.event_tx.emit(&peer, SerialEvent::Connected);
            Ok(record)
         },
         Err(e) => {
            warn!("Failed to connect to {peer}: {e}");
            self.disconnect_peer(&peer).await;
            Err(SerialError::TransportOpenFailed { peer, source: e })
         },
      }
   }

   async fn run_send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<()> {
      self.ensure_active()?;

      let Some(conn) = self.registry.get(&peer) else {
         return Err(SerialError::NotConnected(peer));
      };
      if !conn.handle().is_live() {
         warn!("Connection to {peer} is no longer live");
         self.release(&conn).await;
         return Err(SerialError::NotConnected(peer));
      }

      debug!("→ {peer}: {} bytes", bytes.len());
      if let Err(e) = conn.handle().write_all(&bytes).await {
         warn!("Failed to write to {peer}: {e}");
         self.release(&conn).await;
         return Err(SerialError::TransportWriteFailed { peer, source: e });
      }
      Ok(())
   }

   async fn disconnect_peer(&self, peer: &PeerId) {
      match self.registry.remove(peer) {
         Some(conn) => self.close_connection(conn).await,
         None => debug!("{peer} is not connected"),
      }
   }

   /// Unregisters and closes `conn`, unless its entry has already been
   /// replaced or removed by someone else.
   async fn release(&self, conn: &Connection<S::Handle>) {
      if let Some(conn) = self.registry.remove_handle(conn.peer(), conn.handle()) {
         self.close_connection(conn).await;
      }
   }

   async fn close_all(&self) {
      for conn in self.registry.drain() {
         self.close_connection(conn).await;
      }
   }

   async fn close_connection(&self, conn: Connection<S::Handle>) {
      let peer = conn.peer().clone();
      if let Err(source) = conn.handle().close().await {
         // Best effort; the entry is gone either way.
         let err = SerialError::TransportCloseFailed {
            peer: peer.clone(),
            source,
         };
         warn!("{err}");
      }
      info!("Disconnected from {peer}");
      self.event_tx.emit(&peer, SerialEvent::Disconnected);
   }
}
