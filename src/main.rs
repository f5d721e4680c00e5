//! Bluetooth serial D-Bus service
//!
//! This service exposes RFCOMM connection management for paired devices on
//! the session bus: connect, send, disconnect and status queries, plus
//! signals for connection changes and inbound data.

use std::sync::Arc;

use btserial::{
   ConnectionManager, PeerId,
   config::Config,
   dbus::{self, SerialService},
   error::Result,
   event::{EventBus, SerialEvent},
   transport::rfcomm::RfcommTransport,
};
use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify};
use zbus::{Connection, connection};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting btserial D-Bus service...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Loaded configuration (RFCOMM channel {}, queue capacity {})",
      config.rfcomm_channel, config.queue_capacity
   );

   // Create event channel
   let event_bus = EventProcessor::new();

   // Create transport and connection manager
   let session = bluer::Session::new().await?;
   let transport = Arc::new(RfcommTransport::new(&session, &config, event_bus.clone()).await?);
   let manager = ConnectionManager::new(transport.clone(), transport, &config, event_bus.clone());

   // Create D-Bus service
   let service = SerialService::new(manager.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.btserial")?
      .serve_at("/org/btserial/manager", service)?
      .build()
      .await?;

   info!("btserial D-Bus service started at org.btserial");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down btserial service...");
   manager.dispose().await;

   Ok(())
}

/// Lock-free hand-off from manager callbacks to the D-Bus dispatcher task.
struct EventProcessor {
   queue: SegQueue<(PeerId, SerialEvent)>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   async fn next(&self) -> (PeerId, SerialEvent) {
      loop {
         let notified = self.notifier.notified();
         tokio::pin!(notified);
         // Registered before the pop so a push in between still wakes us.
         notified.as_mut().enable();
         if let Some(event) = self.queue.pop() {
            return event;
         }
         notified.await;
      }
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, SerialService>("/org/btserial/manager")
         .await?;
      tokio::spawn(async move {
         loop {
            let (peer, event) = self.next().await;
            if let Err(e) = dbus::emit_event(&iface, &peer, event).await {
               warn!("Failed to signal event for {peer}: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, peer: &PeerId, event: SerialEvent) {
      self.queue.push((peer.clone(), event));
      self.notifier.notify_waiters();
   }
}
