//! Peer identity and descriptive records.

use std::{collections::BTreeMap, fmt};

use bluer::Address;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr};

use crate::error::{Result, SerialError};

/// Stable identifier of a remote device, usually its transport address.
///
/// Identifiers that parse as a Bluetooth address are stored in the
/// canonical upper-case form, so `aa:bb:cc:dd:ee:ff` and
/// `AA:BB:CC:DD:EE:FF` name the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "SmolStr", into = "SmolStr")]
pub struct PeerId(SmolStr);

impl PeerId {
   pub fn new(id: impl Into<SmolStr>) -> Self {
      let id = id.into();
      match id.parse::<Address>() {
         Ok(address) => Self::from(address),
         Err(_) => Self(id),
      }
   }

   pub fn as_str(&self) -> &str {
      self.0.as_str()
   }

   /// Parses the identifier as a Bluetooth device address.
   pub fn to_address(&self) -> Result<Address> {
      self
         .0
         .parse()
         .map_err(|_| SerialError::InvalidAddress(self.0.clone()))
   }
}

impl fmt::Display for PeerId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.0)
   }
}

impl From<&str> for PeerId {
   fn from(id: &str) -> Self {
      Self::new(id)
   }
}

impl From<String> for PeerId {
   fn from(id: String) -> Self {
      Self::new(id)
   }
}

impl From<SmolStr> for PeerId {
   fn from(id: SmolStr) -> Self {
      Self::new(id)
   }
}

impl From<PeerId> for SmolStr {
   fn from(id: PeerId) -> Self {
      id.0
   }
}

impl From<Address> for PeerId {
   fn from(address: Address) -> Self {
      Self(address.to_smolstr())
   }
}

/// Descriptive metadata for a peer as reported by the device directory.
///
/// Records are immutable once built; the directory produces a fresh record
/// every time a peer is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
   id: PeerId,
   name: SmolStr,
   #[serde(skip_serializing_if = "BTreeMap::is_empty")]
   attributes: BTreeMap<SmolStr, SmolStr>,
}

impl PeerRecord {
   pub fn new(id: impl Into<PeerId>, name: impl Into<SmolStr>) -> Self {
      Self {
         id: id.into(),
         name: name.into(),
         attributes: BTreeMap::new(),
      }
   }

   /// Attaches a transport-reported attribute while building the record.
   pub fn with_attribute(mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
      self.attributes.insert(key.into(), value.into());
      self
   }

   pub(crate) fn with_id(mut self, id: PeerId) -> Self {
      self.id = id;
      self
   }

   pub fn id(&self) -> &PeerId {
      &self.id
   }

   pub fn name(&self) -> &str {
      self.name.as_str()
   }

   pub fn attribute(&self, key: &str) -> Option<&str> {
      self.attributes.get(key).map(SmolStr::as_str)
   }

   pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
      self
         .attributes
         .iter()
         .map(|(k, v)| (k.as_str(), v.as_str()))
   }

   pub fn to_json(&self) -> serde_json::Value {
      serde_json::to_value(self).unwrap_or_default()
   }
}
