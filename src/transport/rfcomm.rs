//! RFCOMM transport on top of BlueZ.
//!
//! The adapter's bonded devices serve as the device directory, and
//! [`RfcommHandle`] wraps a connected RFCOMM stream. Each handle runs a
//! reader task that forwards inbound bytes as [`SerialEvent::DataReceived`]
//! and marks the handle dead once the remote side goes away.

use std::{
   io,
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
   time::Duration,
};

use bluer::{
   Adapter, Address, Device, Session,
   rfcomm::{SocketAddr, Stream},
};
use log::{debug, info, warn};
use smol_str::ToSmolStr;
use tokio::{
   io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
   sync::Mutex,
   task::JoinHandle,
   time,
};
use uuid::Uuid;

use super::{DeviceDirectory, SerialHandle, SocketCapability};
use crate::{
   config::Config,
   error::Result,
   event::{EventSender, SerialEvent},
   peer::{PeerId, PeerRecord},
};

/// Serial Port Profile service class
const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// BlueZ-backed device directory and RFCOMM socket factory.
pub struct RfcommTransport {
   adapter: Adapter,
   channel: u8,
   connect_timeout: Duration,
   write_timeout: Duration,
   read_buffer_size: usize,
   event_tx: EventSender,
}

impl RfcommTransport {
   pub async fn new(session: &Session, config: &Config, event_tx: EventSender) -> Result<Self> {
      let adapter = match &config.adapter {
         Some(name) => session.adapter(name)?,
         None => session.default_adapter().await?,
      };
      info!("Using adapter {}", adapter.name());

      // Ensure adapter is powered on
      if let Ok(false) = adapter.is_powered().await {
         match adapter.set_powered(true).await {
            Ok(()) => info!("Powered on adapter: {}", adapter.name()),
            Err(e) => warn!("Failed to power on adapter {}: {e}", adapter.name()),
         }
      }

      Ok(Self {
         adapter,
         channel: config.rfcomm_channel,
         connect_timeout: config.connect_timeout(),
         write_timeout: config.write_timeout(),
         read_buffer_size: config.read_buffer_size,
         event_tx,
      })
   }

   async fn bonded_device(&self, address: Address) -> Option<Device> {
      let device = self.adapter.device(address).ok()?;
      device.is_paired().await.unwrap_or(false).then_some(device)
   }

   async fn record_for(&self, device: &Device) -> PeerRecord {
      let address = device.address();
      let name = device
         .name()
         .await
         .ok()
         .flatten()
         .unwrap_or_else(|| address.to_string());

      let mut record = PeerRecord::new(address, name);
      if let Ok(alias) = device.alias().await {
         record = record.with_attribute("alias", alias);
      }
      if let Ok(Some(class)) = device.class().await {
         record = record.with_attribute("class", format!("{class:#08x}"));
      }
      if let Ok(trusted) = device.is_trusted().await {
         record = record.with_attribute("trusted", trusted.to_smolstr());
      }
      if let Ok(Some(uuids)) = device.uuids().await {
         record = record.with_attribute("serial_port", uuids.contains(&SPP_UUID).to_smolstr());
      }
      record
   }
}

impl DeviceDirectory for RfcommTransport {
   async fn bonded_devices(&self) -> Result<Vec<PeerRecord>> {
      let mut records = Vec::new();
      for address in self.adapter.device_addresses().await? {
         if let Some(device) = self.bonded_device(address).await {
            records.push(self.record_for(&device).await);
         }
      }
      Ok(records)
   }

   async fn resolve(&self, peer: &PeerId) -> Option<PeerRecord> {
      let address = match peer.to_address() {
         Ok(address) => address,
         Err(e) => {
            debug!("Cannot resolve {peer}: {e}");
            return None;
         },
      };
      let device = self.bonded_device(address).await?;
      Some(self.record_for(&device).await)
   }
}

impl SocketCapability for RfcommTransport {
   type Handle = RfcommHandle;

   async fn is_available(&self) -> bool {
      self.adapter.is_powered().await.unwrap_or(false)
   }

   async fn open(&self, peer: &PeerRecord) -> io::Result<RfcommHandle> {
      let address = peer
         .id()
         .to_address()
         .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
      let addr = SocketAddr::new(address, self.channel);
      debug!("Connecting to {address} on channel {}", self.channel);

      let stream = time::timeout(self.connect_timeout, Stream::connect(addr))
         .await
         .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

      let (rx, tx) = tokio::io::split(stream);
      let live = Arc::new(AtomicBool::new(true));
      let reader = tokio::spawn(recv_thread(
         peer.id().clone(),
         rx,
         live.clone(),
         self.event_tx.clone(),
         self.read_buffer_size,
      ));

      Ok(RfcommHandle {
         address,
         writer: Mutex::new(Some(tx)),
         live,
         reader: parking_lot::Mutex::new(Some(reader)),
         write_timeout: self.write_timeout,
      })
   }
}

/// A connected RFCOMM stream.
///
/// Dropping the handle without closing it aborts the reader and releases
/// the socket.
pub struct RfcommHandle {
   address: Address,
   writer: Mutex<Option<WriteHalf<Stream>>>,
   live: Arc<AtomicBool>,
   reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
   write_timeout: Duration,
}

impl SerialHandle for RfcommHandle {
   fn is_live(&self) -> bool {
      self.live.load(Ordering::Acquire)
   }

   async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
      let mut writer = self.writer.lock().await;
      let Some(stream) = writer.as_mut() else {
         return Err(io::ErrorKind::NotConnected.into());
      };

      debug!("→ {}: {}", self.address, hex::encode(bytes));
      let res = time::timeout(self.write_timeout, async {
         stream.write_all(bytes).await?;
         stream.flush().await
      })
      .await
      .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")));

      if res.is_err() {
         self.live.store(false, Ordering::Release);
      }
      res
   }

   async fn close(&self) -> io::Result<()> {
      self.live.store(false, Ordering::Release);
      if let Some(reader) = self.reader.lock().take() {
         reader.abort();
      }
      match self.writer.lock().await.take() {
         Some(mut stream) => stream.shutdown().await,
         None => Ok(()),
      }
   }
}

impl Drop for RfcommHandle {
   fn drop(&mut self) {
      if let Some(reader) = self.reader.get_mut().take() {
         reader.abort();
      }
   }
}

async fn recv_thread(
   peer: PeerId,
   mut rx: ReadHalf<Stream>,
   live: Arc<AtomicBool>,
   event_tx: EventSender,
   buffer_size: usize,
) {
   let mut buf = vec![0u8; buffer_size.max(1)];
   loop {
      match rx.read(&mut buf).await {
         Ok(0) => {
            warn!("Connection to {peer} lost");
            break;
         },
         Ok(n) => {
            let received = &buf[..n];
            debug!("← {peer}: {}", hex::encode(received));
            event_tx.emit(&peer, SerialEvent::DataReceived(received.to_vec()));
         },
         Err(e) => {
            warn!("Failed to read from {peer}: {e}");
            break;
         },
      }
   }
   live.store(false, Ordering::Release);
   event_tx.emit(&peer, SerialEvent::ConnectionLost);
}
