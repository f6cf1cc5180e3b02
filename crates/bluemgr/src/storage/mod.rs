//! Device and bonding store
//!
//! This module keeps one record per known peer:
//! - Connection state and link role
//! - Pairing flags and key material (LTK, IRK, CSRK)
//! - Application values attached to the peer
//!
//! Bonded records survive disconnection and are committed to a
//! [`Persistence`] backend; other records live only while connected.

pub mod device;
pub mod keys;
pub mod persist;
pub mod store;

pub use self::device::{AppValue, Device, DeviceId, StorageKey, STORAGE_KEY_SVC_CHANGED_CCC};
pub use self::keys::{IdentityResolvingKey, LongTermKey, SignatureKey};
pub use self::persist::{MemoryPersistence, Persistence, StoredDevice};
pub use self::store::{DeviceStore, StorageState, StoreGuard};
