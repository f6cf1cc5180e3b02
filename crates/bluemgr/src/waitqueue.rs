//! Correlation of controller responses with pending requests
//!
//! A handler that fires a command at the controller and needs the reply parks
//! a continuation here, keyed by the message it is waiting for. Every incoming
//! stack message is offered to the queue before any handler sees it; the first
//! matching entry is removed and handed back for invocation, so one message
//! resolves at most one waiter.
//!
//! On disconnection the entries tied to the dropped connection are flushed and
//! their continuations run with no message at all.

use crate::error::{BleError, BleResult};
use crate::wire::constants::*;
use crate::wire::message::{conn_of, WireMessage};
use log::{debug, trace};
use serde::Deserialize;

/// Connection an entry is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnFilter {
    /// Matches a message from any connection
    Any,
    Conn(u16),
}

impl ConnFilter {
    fn accepts(&self, conn_idx: u16) -> bool {
        match *self {
            ConnFilter::Any => true,
            ConnFilter::Conn(idx) => idx == conn_idx,
        }
    }
}

/// Which entries a disconnection flush cancels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Only responses that will never arrive on a dead link
    #[default]
    AllowList,
    /// Everything bound to the connection
    All,
}

/// A parked request waiting for its response
#[derive(Debug)]
pub struct WaitEntry<C> {
    pub conn: ConnFilter,
    pub msg_id: u16,
    /// Operation expected in a completion event; ignored for other messages
    pub ext_id: u8,
    pub continuation: C,
}

impl<C> WaitEntry<C> {
    fn matches(&self, msg: &WireMessage) -> bool {
        if self.msg_id != msg.msg_id || !self.conn.accepts(conn_of(msg.src_id)) {
            return false;
        }

        match msg.operation() {
            Some(op) => op == self.ext_id,
            None => true,
        }
    }

    fn flushable(&self, policy: FlushPolicy) -> bool {
        match policy {
            FlushPolicy::All => true,
            FlushPolicy::AllowList => matches!(
                (self.msg_id, self.ext_id),
                (GAPC_CMP_EVT, GAPC_ENCRYPT) | (GAPC_CON_RSSI_IND, _)
            ),
        }
    }
}

/// Bounded table of pending requests
#[derive(Debug)]
pub struct WaitQueue<C> {
    entries: Vec<WaitEntry<C>>,
    capacity: usize,
}

impl<C> WaitQueue<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Park a continuation until `msg_id` (with operation `ext_id` for
    /// completion events) arrives from a matching connection
    pub fn add(&mut self, conn: ConnFilter, msg_id: u16, ext_id: u8, continuation: C) -> BleResult<()> {
        if self.entries.len() >= self.capacity {
            debug!(
                "Waitqueue full ({} entries), rejecting wait for {:#06x}",
                self.capacity, msg_id
            );
            return Err(BleError::InsufficientResources);
        }

        trace!("Waiting for {:#06x}/{:#04x} on {:?}", msg_id, ext_id, conn);
        self.entries.push(WaitEntry {
            conn,
            msg_id,
            ext_id,
            continuation,
        });
        Ok(())
    }

    /// Remove and return the first entry waiting for `msg`
    pub fn match_msg(&mut self, msg: &WireMessage) -> Option<WaitEntry<C>> {
        let pos = self.entries.iter().position(|e| e.matches(msg))?;
        Some(self.entries.remove(pos))
    }

    /// Remove the entries of `conn_idx` selected by `policy`, oldest first
    pub fn flush(&mut self, conn_idx: u16, policy: FlushPolicy) -> Vec<WaitEntry<C>> {
        let (flushed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.conn == ConnFilter::Conn(conn_idx) && e.flushable(policy));
        self.entries = kept;

        if !flushed.is_empty() {
            debug!("Flushed {} waitqueue entries of connection {}", flushed.len(), conn_idx);
        }
        flushed
    }

    /// Remove every entry
    pub fn drain_all(&mut self) -> Vec<WaitEntry<C>> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
