//! Manager configuration
//!
//! Every field has a default, so a configuration file only needs to name what
//! it changes:
//!
//! ```toml
//! event_queue_len = 16
//! dispatch = "queued"
//! command_timeout_ms = 2000
//! io_capability = "display_yes_no"
//! ```

use crate::gap::constants::*;
use crate::gap::types::{IoCapability, OwnAddressType, Role};
use crate::waitqueue::FlushPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How commands reach the manager core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Handled in the calling thread under the manager lock
    #[default]
    Direct,
    /// Posted to the manager thread
    Queued,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Soft capacity of the application event queue
    pub event_queue_len: usize,
    /// Maximum number of requests waiting for a controller response
    pub waitqueue_capacity: usize,
    /// Maximum number of bonded peers
    pub max_bonded: usize,
    pub dispatch: DispatchPolicy,
    /// Give up waiting for a command response after this long; wait forever when unset
    pub command_timeout_ms: Option<u64>,
    /// Waitqueue entries cancelled when a link drops
    pub flush_policy: FlushPolicy,
    pub role: Role,
    pub io_capability: IoCapability,
    pub own_address_type: OwnAddressType,
    pub scan_interval: u16,
    pub scan_window: u16,
    pub ce_len_min: u16,
    pub ce_len_max: u16,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_queue_len: 8,
            waitqueue_capacity: 5,
            max_bonded: 8,
            dispatch: DispatchPolicy::Direct,
            command_timeout_ms: None,
            flush_policy: FlushPolicy::AllowList,
            role: Role::CentralPeripheral,
            io_capability: IoCapability::NoInputNoOutput,
            own_address_type: OwnAddressType::PublicStatic,
            scan_interval: LE_SCAN_INTERVAL,
            scan_window: LE_SCAN_WINDOW,
            ce_len_min: LE_MIN_CE_LENGTH,
            ce_len_max: LE_MAX_CE_LENGTH,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}
