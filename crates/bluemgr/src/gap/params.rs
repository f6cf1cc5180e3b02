//! Local device parameters
//!
//! Settings and bookkeeping of the local device that outlive a single
//! connection. A stack reset restores them from the configuration.

use crate::config::ManagerConfig;
use crate::gap::types::{IoCapability, OwnAddress, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevParams {
    pub role: Role,
    pub own_addr: OwnAddress,
    pub io_capabilities: IoCapability,
    pub scan_interval: u16,
    pub scan_window: u16,
    /// A `connect` is waiting for its completion
    pub connecting: bool,
    /// Application initiated address resolutions not yet completed
    pub addr_resolv_req_pending: u8,
    pub pairing_successes: u32,
    pub pairing_failures: u32,
}

impl DevParams {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            role: config.role,
            own_addr: OwnAddress {
                addr_type: config.own_address_type,
                bytes: [0; 6],
            },
            io_capabilities: config.io_capability,
            scan_interval: config.scan_interval,
            scan_window: config.scan_window,
            connecting: false,
            addr_resolv_req_pending: 0,
            pairing_successes: 0,
            pairing_failures: 0,
        }
    }
}

impl Default for DevParams {
    fn default() -> Self {
        Self::from_config(&ManagerConfig::default())
    }
}
