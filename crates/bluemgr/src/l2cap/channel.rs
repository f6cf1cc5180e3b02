//! LE credit based channel table
//!
//! Every channel is keyed by its owning connection plus one of: the PSM, the
//! local CID (`scid`) or the peer's CID (`dcid`). The table also owns the
//! [`ScidPool`], so a CID leaves the pool exactly when its channel enters the
//! table and returns when the channel is removed.

use crate::error::{BleError, BleResult};
use crate::l2cap::pool::ScidPool;
use crate::wire::constants::*;
use log::trace;

/// One LE credit based channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub conn_idx: u16,
    pub psm: u16,
    pub scid: u16,
    /// Peer CID, 0 until the channel is connected or requested
    pub dcid: u16,
    /// Credits the peer may still use to send to us
    pub local_credits: u16,
    /// Largest SDU the peer accepts, 0 until it is known
    pub mtu: u16,
    /// Outgoing connection waiting for the peer's answer
    pub connecting: bool,
    /// Incoming connections are confirmed by the application
    pub defer_setup: bool,
}

/// Answer to a deferred incoming connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2capConnStatus {
    Accepted,
    NoResources,
    InsufficientAuthentication,
    InsufficientAuthorization,
    InsufficientEncKeySize,
    InsufficientEncryption,
}

impl L2capConnStatus {
    /// Response code sent to the peer
    pub fn to_wire(self) -> u16 {
        match self {
            L2capConnStatus::Accepted => L2C_CB_CON_SUCCESS,
            L2capConnStatus::NoResources => L2C_CB_CON_NO_RES_AVAIL,
            L2capConnStatus::InsufficientAuthentication => L2C_CB_CON_INS_AUTH,
            L2capConnStatus::InsufficientAuthorization => L2C_CB_CON_INS_AUTHOR,
            L2capConnStatus::InsufficientEncKeySize => L2C_CB_CON_INS_EKS,
            L2capConnStatus::InsufficientEncryption => L2C_CB_CON_INS_ENCRYPTION,
        }
    }
}

impl TryFrom<u8> for L2capConnStatus {
    type Error = BleError;

    fn try_from(value: u8) -> BleResult<Self> {
        match value {
            0 => Ok(L2capConnStatus::Accepted),
            1 => Ok(L2capConnStatus::NoResources),
            2 => Ok(L2capConnStatus::InsufficientAuthentication),
            3 => Ok(L2capConnStatus::InsufficientAuthorization),
            4 => Ok(L2capConnStatus::InsufficientEncKeySize),
            5 => Ok(L2capConnStatus::InsufficientEncryption),
            _ => Err(BleError::InvalidParam),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: Vec<Channel>,
    pool: ScidPool,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel with a freshly allocated source CID
    pub fn create(&mut self, conn_idx: u16, psm: u16, local_credits: u16) -> BleResult<&mut Channel> {
        let scid = self.pool.alloc().ok_or(BleError::InsufficientResources)?;
        trace!("Allocated scid {:#06x} for psm {:#06x} on connection {}", scid, psm, conn_idx);

        self.channels.push(Channel {
            conn_idx,
            psm,
            scid,
            dcid: 0,
            local_credits,
            mtu: 0,
            connecting: false,
            defer_setup: false,
        });
        let last = self.channels.len() - 1;
        Ok(&mut self.channels[last])
    }

    pub fn by_psm(&mut self, conn_idx: u16, psm: u16) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|c| c.conn_idx == conn_idx && c.psm == psm)
    }

    pub fn by_scid(&mut self, conn_idx: u16, scid: u16) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|c| c.conn_idx == conn_idx && c.scid == scid)
    }

    pub fn by_dcid(&mut self, conn_idx: u16, dcid: u16) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|c| c.conn_idx == conn_idx && c.dcid == dcid)
    }

    /// The outgoing connection in progress on `conn_idx`, if any
    pub fn by_connecting(&mut self, conn_idx: u16) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|c| c.conn_idx == conn_idx && c.connecting)
    }

    pub fn contains_psm(&self, conn_idx: u16, psm: u16) -> bool {
        self.channels
            .iter()
            .any(|c| c.conn_idx == conn_idx && c.psm == psm)
    }

    pub fn has_connecting(&self, conn_idx: u16) -> bool {
        self.channels
            .iter()
            .any(|c| c.conn_idx == conn_idx && c.connecting)
    }

    /// Remove a channel and release its source CID
    pub fn remove(&mut self, scid: u16) -> Option<Channel> {
        let pos = self.channels.iter().position(|c| c.scid == scid)?;
        let chan = self.channels.remove(pos);
        self.pool.free(chan.scid);
        Some(chan)
    }

    /// Remove every channel of a connection
    pub fn teardown_conn(&mut self, conn_idx: u16) -> Vec<Channel> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .channels
            .drain(..)
            .partition(|c| c.conn_idx == conn_idx);
        self.channels = kept;

        for chan in &removed {
            self.pool.free(chan.scid);
        }
        removed
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.channels.clear();
        self.pool.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn pool(&self) -> &ScidPool {
        &self.pool
    }
}
