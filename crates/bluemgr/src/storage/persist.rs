//! Persistence collaborator for bonding data
//!
//! The store hands the persistence layer a snapshot of every bonded device
//! whenever a commit is due, and asks it for the saved snapshot on start-up
//! and after a stack reset.

use crate::error::BleResult;
use crate::gap::types::BdAddr;
use crate::storage::device::AppValue;
use crate::storage::keys::{IdentityResolvingKey, LongTermKey, SignatureKey};
use std::sync::{Arc, Mutex, PoisonError};

/// Persistent part of a bonded device record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDevice {
    pub addr: BdAddr,
    pub mitm: bool,
    pub secure: bool,
    pub ltk: Option<LongTermKey>,
    pub remote_ltk: Option<LongTermKey>,
    pub irk: Option<IdentityResolvingKey>,
    pub csrk: Option<SignatureKey>,
    pub remote_csrk: Option<SignatureKey>,
    /// Only values flagged persistent
    pub app_values: Vec<AppValue>,
}

/// Backing store for bonding data
pub trait Persistence: Send {
    /// Load every saved bonded device, most recently bonded first
    fn load(&mut self) -> BleResult<Vec<StoredDevice>>;

    /// Replace the saved contents with `devices`
    fn save(&mut self, devices: &[StoredDevice]) -> BleResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    devices: Vec<StoredDevice>,
    commits: usize,
}

/// In-memory implementation of Persistence
///
/// Clones share the same contents, so a caller can keep a handle to inspect
/// what the store committed.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated with saved devices
    pub fn with_devices(devices: Vec<StoredDevice>) -> Self {
        let persistence = Self::default();
        persistence.lock().devices = devices;
        persistence
    }

    /// Number of commits performed so far
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    /// Contents of the last commit
    pub fn stored(&self) -> Vec<StoredDevice> {
        self.lock().devices.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persistence for MemoryPersistence {
    fn load(&mut self) -> BleResult<Vec<StoredDevice>> {
        Ok(self.lock().devices.clone())
    }

    fn save(&mut self, devices: &[StoredDevice]) -> BleResult<()> {
        let mut state = self.lock();
        state.devices = devices.to_vec();
        state.commits += 1;
        Ok(())
    }
}
