//! Device and bonding store
//!
//! All device records live behind one store-wide lock. [`DeviceStore::acquire`]
//! hands out a [`StoreGuard`]; every record lookup and mutation happens through
//! the guard, and dropping the guard releases the store. Releasing is also the
//! point where pending bonding data gets committed to the persistence layer.
//!
//! The lock is not re-entrant: code holding a guard must not call back into
//! [`DeviceStore`] methods that acquire it again.

use crate::error::{BleError, BleResult};
use crate::gap::types::BdAddr;
use crate::storage::device::{AppValue, Device, DeviceId, StorageKey};
use crate::storage::persist::{Persistence, StoredDevice};
use log::{debug, error, trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Commit state of the store contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Clean,
    /// Modified; commit whenever convenient
    Dirty,
    /// Modified; commit on release
    NeedsFlush,
}

/// Hook used to ask the manager thread to commit on behalf of another thread
pub type CommitNotify = Box<dyn Fn() + Send>;

struct StoreInner {
    devices: Vec<Device>,
    next_id: u32,
    state: StorageState,
    persistence: Box<dyn Persistence>,
    manager_thread: Option<ThreadId>,
    commit_notify: Option<CommitNotify>,
}

impl StoreInner {
    fn mark_dirty(&mut self, flush_now: bool) {
        self.state = match (self.state, flush_now) {
            (_, true) | (StorageState::NeedsFlush, false) => StorageState::NeedsFlush,
            _ => StorageState::Dirty,
        };
    }

    fn snapshot(&self) -> Vec<StoredDevice> {
        self.devices
            .iter()
            .filter(|dev| dev.bonded)
            .map(|dev| StoredDevice {
                addr: dev.addr,
                mitm: dev.mitm,
                secure: dev.secure,
                ltk: dev.ltk.clone(),
                remote_ltk: dev.remote_ltk.clone(),
                irk: dev.irk.clone(),
                csrk: dev.csrk.clone(),
                remote_csrk: dev.remote_csrk.clone(),
                app_values: dev
                    .app_values
                    .iter()
                    .filter(|v| v.persistent)
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    fn commit(&mut self) {
        let snapshot = self.snapshot();
        match self.persistence.save(&snapshot) {
            Ok(()) => {
                debug!("Committed {} bonded device(s)", snapshot.len());
                self.state = StorageState::Clean;
            }
            Err(e) => {
                // Keep the data dirty so the next commit retries it
                error!("Failed to commit bonding data: {}", e);
                self.state = StorageState::Dirty;
            }
        }
    }

    fn load(&mut self) {
        let stored = match self.persistence.load() {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to load bonding data: {}", e);
                return;
            }
        };

        for s in stored {
            let id = self.alloc_id();
            let mut dev = Device::new(id, s.addr);
            dev.paired = true;
            dev.bonded = true;
            dev.mitm = s.mitm;
            dev.secure = s.secure;
            dev.ltk = s.ltk;
            dev.remote_ltk = s.remote_ltk;
            dev.irk = s.irk;
            dev.csrk = s.csrk;
            dev.remote_csrk = s.remote_csrk;
            dev.app_values = s.app_values;
            self.devices.push(dev);
        }

        debug!("Loaded {} bonded device(s)", self.devices.len());
    }

    fn alloc_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn on_manager_thread(&self) -> bool {
        match self.manager_thread {
            Some(owner) => owner == thread::current().id(),
            None => true,
        }
    }
}

/// Shared handle to the device store
#[derive(Clone)]
pub struct DeviceStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl DeviceStore {
    /// Create a store and load saved bonding data from `persistence`
    pub fn new(persistence: Box<dyn Persistence>) -> Self {
        let mut inner = StoreInner {
            devices: Vec::new(),
            next_id: 1,
            state: StorageState::Clean,
            persistence,
            manager_thread: None,
            commit_notify: None,
        };
        inner.load();

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Enter the store's exclusive scope
    pub fn acquire(&self) -> StoreGuard<'_> {
        StoreGuard {
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Register the thread that owns commits and how other threads reach it
    pub(crate) fn attach_manager(&self, thread: ThreadId, notify: CommitNotify) {
        let mut guard = self.acquire();
        guard.inner.manager_thread = Some(thread);
        guard.inner.commit_notify = Some(notify);
    }

    /// Commit pending changes if any are outstanding
    pub fn commit(&self) {
        let mut guard = self.acquire();
        if guard.inner.state != StorageState::Clean {
            guard.inner.commit();
        }
    }

    /// Store `data` under `key` for the device connected as `conn_idx`
    pub fn put_app_value(
        &self,
        conn_idx: u16,
        key: StorageKey,
        data: Vec<u8>,
        persistent: bool,
    ) -> BleResult<()> {
        let mut store = self.acquire();
        let id = store.connected_id(conn_idx)?;
        store.app_value_put(id, key, data, persistent);
        Ok(())
    }

    /// Copy of the value stored under `key` for the device connected as `conn_idx`
    pub fn get_app_value(&self, conn_idx: u16, key: StorageKey) -> BleResult<Vec<u8>> {
        let mut store = self.acquire();
        let id = store.connected_id(conn_idx)?;
        let value = store
            .app_value_get(id, key)
            .map(|data| data.to_vec())
            .ok_or(BleError::NotFound);
        value
    }

    pub fn remove_app_value(&self, conn_idx: u16, key: StorageKey) -> BleResult<()> {
        let mut store = self.acquire();
        let id = store.connected_id(conn_idx)?;
        store.app_value_remove(id, key);
        store.mark_dirty(true);
        Ok(())
    }

    /// Remove `key` from every device
    pub fn remove_app_value_all(&self, key: StorageKey) {
        let mut store = self.acquire();
        let ids: Vec<DeviceId> = store.iter().map(|d| d.id).collect();
        for id in ids {
            store.app_value_remove(id, key);
        }
        store.mark_dirty(true);
    }

    pub fn put_u16(&self, conn_idx: u16, key: StorageKey, value: u16, persistent: bool) -> BleResult<()> {
        self.put_app_value(conn_idx, key, value.to_le_bytes().to_vec(), persistent)
    }

    pub fn get_u16(&self, conn_idx: u16, key: StorageKey) -> BleResult<u16> {
        let data = self.get_app_value(conn_idx, key)?;
        let bytes: [u8; 2] = data
            .get(..2)
            .and_then(|b| b.try_into().ok())
            .ok_or(BleError::InvalidParam)?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn put_u32(&self, conn_idx: u16, key: StorageKey, value: u32, persistent: bool) -> BleResult<()> {
        self.put_app_value(conn_idx, key, value.to_le_bytes().to_vec(), persistent)
    }

    pub fn get_u32(&self, conn_idx: u16, key: StorageKey) -> BleResult<u32> {
        let data = self.get_app_value(conn_idx, key)?;
        let bytes: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(BleError::InvalidParam)?;
        Ok(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for DeviceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.acquire();
        f.debug_struct("DeviceStore")
            .field("devices", &guard.inner.devices.len())
            .field("state", &guard.inner.state)
            .finish()
    }
}

/// Exclusive scope over the device store
pub struct StoreGuard<'a> {
    inner: MutexGuard<'a, StoreInner>,
}

impl StoreGuard<'_> {
    /// Record the store as modified; `flush_now` forces a commit on release
    pub fn mark_dirty(&mut self, flush_now: bool) {
        self.inner.mark_dirty(flush_now);
    }

    pub fn state(&self) -> StorageState {
        self.inner.state
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.inner.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.devices.is_empty()
    }

    pub fn for_each<F: FnMut(&Device)>(&self, f: F) {
        self.inner.devices.iter().for_each(f);
    }

    /// Find a device by address, optionally creating a fresh record at the back
    pub fn find_by_addr(&mut self, addr: &BdAddr, create: bool) -> Option<&mut Device> {
        let pos = self.inner.devices.iter().position(|d| d.addr == *addr);
        let pos = match pos {
            Some(pos) => pos,
            None if create => {
                let id = self.inner.alloc_id();
                trace!("Creating device record for {}", addr);
                self.inner.devices.push(Device::new(id, *addr));
                self.inner.devices.len() - 1
            }
            None => return None,
        };
        self.inner.devices.get_mut(pos)
    }

    /// Find the device connected with the given connection index
    pub fn find_by_conn_idx(&mut self, conn_idx: u16) -> Option<&mut Device> {
        self.inner
            .devices
            .iter_mut()
            .find(|d| d.connected && d.conn_idx == Some(conn_idx))
    }

    /// First device matching `predicate`
    pub fn find<P: Fn(&Device) -> bool>(&mut self, predicate: P) -> Option<&mut Device> {
        self.inner.devices.iter_mut().find(|d| predicate(d))
    }

    /// Identity of the first device matching `predicate`
    pub fn find_id<P: Fn(&Device) -> bool>(&self, predicate: P) -> Option<DeviceId> {
        self.inner.devices.iter().find(|d| predicate(d)).map(|d| d.id)
    }

    pub fn get(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.inner.devices.iter_mut().find(|d| d.id == id)
    }

    /// Identity of the device connected as `conn_idx`
    pub fn connected_id(&mut self, conn_idx: u16) -> BleResult<DeviceId> {
        self.find_by_conn_idx(conn_idx)
            .map(|d| d.id)
            .ok_or(BleError::NotConnected)
    }

    /// Delete a record with all its keys and values
    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        let pos = self.inner.devices.iter().position(|d| d.id == id)?;
        let dev = self.inner.devices.remove(pos);
        debug!("Removed device record for {}", dev.addr);
        self.inner.mark_dirty(true);
        Some(dev)
    }

    /// Forget pairing flags and key material of a record
    pub fn remove_pairing(&mut self, id: DeviceId) {
        if let Some(dev) = self.get(id) {
            dev.clear_pairing();
            self.inner.mark_dirty(true);
        }
    }

    /// Move a record to the front so address scans find it first
    pub fn move_to_front(&mut self, id: DeviceId) {
        if let Some(pos) = self.inner.devices.iter().position(|d| d.id == id) {
            let dev = self.inner.devices.remove(pos);
            self.inner.devices.insert(0, dev);
        }
    }

    pub fn count_bonded(&self) -> usize {
        self.inner.devices.iter().filter(|d| d.bonded).count()
    }

    /// Identity resolving keys of all devices that have one, in store order
    pub fn irks(&self) -> Vec<[u8; 16]> {
        self.inner
            .devices
            .iter()
            .filter_map(|d| d.irk.as_ref().map(|irk| irk.key))
            .collect()
    }

    /// Replace any value under `key`
    ///
    /// A commit is requested only when saved data changes: the new value is
    /// persistent or it replaces one that was.
    pub fn app_value_put(&mut self, id: DeviceId, key: StorageKey, data: Vec<u8>, persistent: bool) {
        let Some(dev) = self.get(id) else {
            warn!("app_value_put on unknown device");
            return;
        };
        let replaced_persistent = dev.app_values.iter().any(|v| v.key == key && v.persistent);
        dev.app_values.retain(|v| v.key != key);
        dev.app_values.push(AppValue {
            key,
            persistent,
            data,
        });

        if persistent || replaced_persistent {
            self.inner.mark_dirty(true);
        }
    }

    pub fn app_value_get(&mut self, id: DeviceId, key: StorageKey) -> Option<&[u8]> {
        self.get(id)?
            .app_values
            .iter()
            .find(|v| v.key == key)
            .map(|v| v.data.as_slice())
    }

    pub fn app_value_remove(&mut self, id: DeviceId, key: StorageKey) {
        if let Some(dev) = self.get(id) {
            dev.app_values.retain(|v| v.key != key);
        }
    }

    /// Drop every value not flagged persistent
    pub fn app_value_remove_np(&mut self, id: DeviceId) {
        if let Some(dev) = self.get(id) {
            dev.app_values.retain(|v| v.persistent);
        }
    }

    /// Throw away every record and reload the saved bonding data
    pub fn reload(&mut self) {
        if self.inner.state != StorageState::Clean {
            self.inner.commit();
        }
        self.inner.devices.clear();
        self.inner.load();
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if self.inner.state != StorageState::NeedsFlush {
            return;
        }

        if self.inner.on_manager_thread() {
            self.inner.commit();
        } else if let Some(notify) = &self.inner.commit_notify {
            notify();
        } else {
            self.inner.commit();
        }
    }
}
