//! Application events and the queue delivering them
//!
//! The manager thread pushes [`BleEvent`]s; the application pulls them with the
//! blocking or non-blocking getters on [`EventQueue`]. Pushing never blocks.
//! The queue has a soft capacity: once it is reached the router stops reading
//! from the controller until the application consumes an event.

use crate::error::{BleError, BleResult};
use crate::gap::types::{BdAddr, ConnParams, OwnAddress, SecurityLevel};
use log::trace;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Event reported to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    // GAP
    Connected {
        conn_idx: u16,
        own_addr: OwnAddress,
        peer_addr: BdAddr,
        conn_params: ConnParams,
    },
    /// Outcome of a `connect` call
    ConnectionCompleted {
        status: BleResult<()>,
    },
    Disconnected {
        conn_idx: u16,
        reason: u8,
        address: BdAddr,
    },
    DisconnectFailed {
        conn_idx: u16,
        status: BleError,
    },
    AddressResolved {
        conn_idx: u16,
        resolved_address: BdAddr,
        address: BdAddr,
    },
    AddressResolutionFailed {
        status: BleError,
    },
    PairRequest {
        conn_idx: u16,
        bond: bool,
    },
    PasskeyNotify {
        conn_idx: u16,
        passkey: u32,
    },
    PasskeyRequest {
        conn_idx: u16,
    },
    NumericRequest {
        conn_idx: u16,
        num_key: u32,
    },
    PairCompleted {
        conn_idx: u16,
        status: BleResult<()>,
        bond: bool,
        mitm: bool,
    },
    SecurityRequest {
        conn_idx: u16,
        bond: bool,
        mitm: bool,
    },
    SecLevelChanged {
        conn_idx: u16,
        level: SecurityLevel,
    },
    SetSecLevelFailed {
        conn_idx: u16,
        status: BleError,
    },
    /// Peer asked for encryption with a key we do not have
    LtkMissing {
        conn_idx: u16,
    },

    // L2CAP
    L2capConnected {
        conn_idx: u16,
        psm: u16,
        scid: u16,
        dcid: u16,
        local_credits: u16,
        remote_credits: u16,
        mtu: u16,
    },
    L2capDisconnected {
        conn_idx: u16,
        scid: u16,
    },
    /// Incoming connection on a deferred-setup listener, answer with `l2cap_connection_cfm`
    L2capConnectionRequest {
        conn_idx: u16,
        psm: u16,
        scid: u16,
        dcid: u16,
        remote_credits: u16,
        mtu: u16,
    },
    L2capConnectionFailed {
        conn_idx: u16,
        scid: u16,
        status: BleError,
    },
    L2capRemoteCredits {
        conn_idx: u16,
        scid: u16,
        remote_credits: u16,
    },
    L2capSent {
        conn_idx: u16,
        scid: u16,
        remote_credits: u16,
        status: BleResult<()>,
    },
    L2capDataInd {
        conn_idx: u16,
        scid: u16,
        local_credits_consumed: u16,
        data: Vec<u8>,
    },
}

/// Hook run when a pop frees the queue from its full state
pub type ConsumeNotify = Box<dyn Fn() + Send + Sync>;

/// Application event queue
pub struct EventQueue {
    events: Mutex<VecDeque<BleEvent>>,
    available: Condvar,
    capacity: usize,
    on_consumed: Mutex<Option<ConsumeNotify>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            on_consumed: Mutex::new(None),
        }
    }

    pub(crate) fn set_consume_notify(&self, notify: ConsumeNotify) {
        *self.on_consumed.lock().unwrap_or_else(PoisonError::into_inner) = Some(notify);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BleEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event; never blocks, even past the soft capacity
    pub fn push(&self, event: BleEvent) {
        trace!("Queueing event {:?}", event);
        self.lock().push_back(event);
        self.available.notify_one();
    }

    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn has_event(&self) -> bool {
        !self.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the oldest event without removing it
    pub fn peek(&self) -> Option<BleEvent> {
        self.lock().front().cloned()
    }

    /// Remove the oldest event if there is one
    pub fn poll(&self) -> Option<BleEvent> {
        self.pop_locked(self.lock())
    }

    /// Wait for the next event
    pub fn get(&self) -> BleEvent {
        let mut events = self.lock();
        loop {
            let before = events.len();
            if let Some(event) = events.pop_front() {
                drop(events);
                self.popped(before);
                return event;
            }
            events = self
                .available
                .wait(events)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn get_timeout(&self, timeout: Duration) -> Option<BleEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.lock();
        while events.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            events = guard;
        }
        self.pop_locked(events)
    }

    fn pop_locked(&self, mut events: MutexGuard<'_, VecDeque<BleEvent>>) -> Option<BleEvent> {
        let before = events.len();
        let event = events.pop_front();
        drop(events);

        if event.is_some() {
            self.popped(before);
        }
        event
    }

    fn popped(&self, len_before: usize) {
        if len_before >= self.capacity {
            self.notify_consumed();
        }
    }

    /// Discard every queued event
    pub fn clear(&self) {
        let mut events = self.lock();
        let was_full = events.len() >= self.capacity;
        events.clear();
        drop(events);

        if was_full {
            self.notify_consumed();
        }
    }

    fn notify_consumed(&self) {
        if let Some(notify) = self
            .on_consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            notify();
        }
    }
}
