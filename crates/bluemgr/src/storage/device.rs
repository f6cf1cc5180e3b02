//! Peer device record

use crate::gap::types::{BdAddr, SecurityLevel};
use crate::storage::keys::{IdentityResolvingKey, LongTermKey, SignatureKey};
use crate::wire::constants::ATT_DEFAULT_MTU;

/// Key of an application value attached to a device
pub type StorageKey = u32;

/// Service Changed characteristic CCC value of a peer
pub const STORAGE_KEY_SVC_CHANGED_CCC: StorageKey = 0xF000_0000;

/// Stable identity of a device record for the lifetime of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub(crate) u32);

/// Application defined value kept with a device record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppValue {
    pub key: StorageKey,
    /// Survives disconnection and is saved with bonding data
    pub persistent: bool,
    pub data: Vec<u8>,
}

/// Everything the manager knows about one peer
#[derive(Debug, Clone)]
pub struct Device {
    pub(crate) id: DeviceId,
    pub addr: BdAddr,
    /// Active connection index, if any
    pub conn_idx: Option<u16>,

    pub connecting: bool,
    pub connected: bool,
    /// Local side is the link master (initiated the connection)
    pub master: bool,
    pub paired: bool,
    pub bonded: bool,
    pub encrypted: bool,
    pub mitm: bool,
    /// Connection confirmation is waiting for address resolution
    pub resolving: bool,
    /// Paired using LE Secure Connections
    pub secure: bool,

    pub mtu: u16,
    pub sec_level: SecurityLevel,
    pub ce_len_min: u16,
    pub ce_len_max: u16,

    pub ltk: Option<LongTermKey>,
    pub remote_ltk: Option<LongTermKey>,
    pub irk: Option<IdentityResolvingKey>,
    pub csrk: Option<SignatureKey>,
    pub remote_csrk: Option<SignatureKey>,

    pub(crate) app_values: Vec<AppValue>,
}

impl Device {
    pub(crate) fn new(id: DeviceId, addr: BdAddr) -> Self {
        Self {
            id,
            addr,
            conn_idx: None,
            connecting: false,
            connected: false,
            master: false,
            paired: false,
            bonded: false,
            encrypted: false,
            mitm: false,
            resolving: false,
            secure: false,
            mtu: ATT_DEFAULT_MTU,
            sec_level: SecurityLevel::Level1,
            ce_len_min: 0,
            ce_len_max: 0,
            ltk: None,
            remote_ltk: None,
            irk: None,
            csrk: None,
            remote_csrk: None,
            app_values: Vec::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Connection index when the device is currently connected
    pub fn active_conn(&self) -> Option<u16> {
        if self.connected {
            self.conn_idx
        } else {
            None
        }
    }

    pub fn app_values(&self) -> &[AppValue] {
        &self.app_values
    }

    pub fn app_value(&self, key: StorageKey) -> Option<&AppValue> {
        self.app_values.iter().find(|v| v.key == key)
    }

    /// Drop every key and pairing flag
    pub(crate) fn clear_pairing(&mut self) {
        self.bonded = false;
        self.paired = false;
        self.mitm = false;
        self.secure = false;
        self.ltk = None;
        self.remote_ltk = None;
        self.irk = None;
        self.csrk = None;
        self.remote_csrk = None;
    }
}
