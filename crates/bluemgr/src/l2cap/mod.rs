//! L2CAP LE credit based channels
//!
//! This module manages the LE credit based connection-oriented channels on top
//! of the controller's L2CAP implementation:
//! - Allocation of source CIDs from the dynamic range
//! - Listening on a PSM, with or without application confirmation
//! - Outgoing connections and disconnections
//! - Credit accounting for received data and sending data to the peer

pub mod channel;
pub mod manager;
pub mod pool;
#[cfg(test)]
mod tests;

pub use self::channel::{Channel, ChannelTable, L2capConnStatus};
pub use self::pool::{ScidPool, SCID_FIRST, SCID_LAST};
