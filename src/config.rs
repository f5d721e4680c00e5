//! Configuration management for the serial connection service.
//!
//! This module handles loading and saving configuration from disk,
//! including adapter selection, RFCOMM channel and timeouts.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SerialError};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   /// Adapter to use, e.g. `hci0`. The system default adapter when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   #[serde(default = "default_rfcomm_channel")]
   pub rfcomm_channel: u8,

   #[serde(default = "default_connect_timeout")]
   pub connect_timeout_sec: u64,

   #[serde(default = "default_write_timeout")]
   pub write_timeout_sec: u64,

   #[serde(default = "default_queue_capacity")]
   pub queue_capacity: usize,

   #[serde(default = "default_read_buffer_size")]
   pub read_buffer_size: usize,
}

const fn default_rfcomm_channel() -> u8 {
   1
}

const fn default_connect_timeout() -> u64 {
   10
}

const fn default_write_timeout() -> u64 {
   25
}

const fn default_queue_capacity() -> usize {
   128
}

const fn default_read_buffer_size() -> usize {
   1024
}

impl Default for Config {
   fn default() -> Self {
      Self {
         adapter: None,
         rfcomm_channel: default_rfcomm_channel(),
         connect_timeout_sec: default_connect_timeout(),
         write_timeout_sec: default_write_timeout(),
         queue_capacity: default_queue_capacity(),
         read_buffer_size: default_read_buffer_size(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("BTSERIAL_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else {
         dirs::config_dir().ok_or(SerialError::ConfigDirNotFound)?
      };

      Ok(config_dir.join("btserial").join("config.toml"))
   }

   pub const fn connect_timeout(&self) -> Duration {
      Duration::from_secs(self.connect_timeout_sec)
   }

   pub const fn write_timeout(&self) -> Duration {
      Duration::from_secs(self.write_timeout_sec)
   }
}
