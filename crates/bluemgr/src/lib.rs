//! BlueMgr - BLE host manager for a message-based controller stack
//!
//! This library sits between an application and a BLE controller that speaks a
//! task/message protocol. It turns application calls into controller commands,
//! correlates the controller's answers with the requests waiting for them and
//! reports everything else as application events. Around that core it keeps
//! the device and bonding records, runs the connection and security state
//! machine and manages LE credit based L2CAP channels.
//!
//! [`BleManager`] is the entry point: it owns the manager thread and exposes
//! the synchronous API.

pub mod config;
pub mod error;
pub mod events;
pub mod gap;
pub mod gateway;
pub mod l2cap;
pub mod manager;
pub mod storage;
pub mod transport;
pub mod waitqueue;
pub mod wire;

// Re-export common types for convenience
pub use config::{ConfigError, DispatchPolicy, ManagerConfig};
pub use error::{BleError, BleResult, WireError};
pub use events::{BleEvent, EventQueue};
pub use gap::{AddressType, AuthReq, BdAddr, ConnParams, IoCapability, SecurityLevel};
pub use gateway::BleManager;
pub use l2cap::L2capConnStatus;
pub use manager::{CallId, Command, Opcode, Response, ResponseData, RouterStats, TaggedResponse};
pub use storage::{DeviceStore, MemoryPersistence, Persistence, StorageKey, StoredDevice};
pub use transport::{RecordingTransport, Transport};
pub use waitqueue::FlushPolicy;
pub use wire::message::{Envelope, WireMessage};
