use std::str::FromStr;

use bluer::Address;
use log::info;
use zbus::{
   interface,
   object_server::{InterfaceRef, SignalEmitter},
};

use crate::{
   error::SerialError,
   event::SerialEvent,
   manager::ConnectionManager,
   peer::{PeerId, PeerRecord},
   transport::rfcomm::RfcommTransport,
};

pub type RfcommManager = ConnectionManager<RfcommTransport, RfcommTransport>;

pub struct SerialService {
   manager: RfcommManager,
}

impl SerialService {
   pub const fn new(manager: RfcommManager) -> Self {
      Self { manager }
   }
}

fn parse_peer(address: &str) -> zbus::fdo::Result<PeerId> {
   Address::from_str(address)
      .map(PeerId::from)
      .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn to_fdo(err: SerialError) -> zbus::fdo::Error {
   match err {
      SerialError::InvalidAddress(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
      _ => zbus::fdo::Error::Failed(err.to_string()),
   }
}

fn records_json(records: &[PeerRecord]) -> zbus::fdo::Result<String> {
   serde_json::to_string(records).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Forwards a manager event to the matching signal on `iface`.
///
/// Connection changes also announce the new `ConnectedCount`.
pub async fn emit_event(
   iface: &InterfaceRef<SerialService>,
   peer: &PeerId,
   event: SerialEvent,
) -> zbus::Result<()> {
   let emitter = iface.signal_emitter();
   let address = peer.as_str();
   match event {
      SerialEvent::Connected => {
         SerialService::device_connected(emitter, address).await?;
      },
      SerialEvent::Disconnected => {
         SerialService::device_disconnected(emitter, address).await?;
      },
      SerialEvent::ConnectionLost => {
         return SerialService::connection_lost(emitter, address).await;
      },
      SerialEvent::DataReceived(data) => {
         return SerialService::data_received(emitter, address, &hex::encode(data)).await;
      },
   }
   iface.get().await.connected_count_changed(emitter).await
}

#[interface(name = "org.btserial.Manager")]
impl SerialService {
   async fn is_available(&self) -> bool {
      self.manager.is_available().await
   }

   async fn get_paired_devices(&self) -> zbus::fdo::Result<String> {
      let records = self.manager.paired_devices().await.map_err(to_fdo)?;
      records_json(&records)
   }

   async fn get_connected_devices(&self) -> zbus::fdo::Result<String> {
      records_json(&self.manager.list_connected())
   }

   async fn is_connected(&self, address: String) -> zbus::fdo::Result<bool> {
      Ok(self.manager.is_connected(&parse_peer(&address)?))
   }

   async fn connect(&self, address: String) -> zbus::fdo::Result<String> {
      let peer = parse_peer(&address)?;
      let record = self.manager.connect(&peer).await.map_err(to_fdo)?;
      info!("Connected {peer} on behalf of D-Bus client");
      Ok(record.to_json().to_string())
   }

   async fn send(&self, address: String, payload: String) -> zbus::fdo::Result<bool> {
      let peer = parse_peer(&address)?;
      let bytes = hex::decode(payload).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;

      self.manager.send(&peer, bytes).await.map_err(to_fdo)?;
      Ok(true)
   }

   async fn disconnect(&self, address: String) -> zbus::fdo::Result<bool> {
      let peer = parse_peer(&address)?;
      self.manager.disconnect_device(&peer).await.map_err(to_fdo)?;
      Ok(true)
   }

   async fn disconnect_all(&self) -> zbus::fdo::Result<bool> {
      self.manager.disconnect_all().await.map_err(to_fdo)?;
      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn device_connected(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_disconnected(emitter: &SignalEmitter<'_>, address: &str)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connection_lost(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn data_received(
      emitter: &SignalEmitter<'_>,
      address: &str,
      data: &str,
   ) -> zbus::Result<()>;

   #[zbus(property)]
   async fn connected_count(&self) -> u32 {
      self.manager.list_connected().len() as u32
   }
}
