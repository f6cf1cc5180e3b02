//! Link to the controller
//!
//! The manager only needs two things from the transport: a way to hand a
//! message to the controller and a way to stop (and restart) the flow of
//! messages coming back while the application event queue is full. Incoming
//! envelopes are delivered to the manager through [`crate::BleManager`].

use crate::error::{BleError, BleResult};
use crate::wire::message::{Envelope, WireMessage};
use log::{trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outgoing side of the controller link
pub trait Transport: Send {
    /// Send one envelope to the controller
    fn send(&mut self, envelope: Envelope) -> BleResult<()>;

    /// Pause or resume delivery of controller messages
    fn set_paused(&mut self, paused: bool);
}

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<Envelope>,
    paused: bool,
    pause_changes: usize,
    fail_sends: bool,
}

/// Transport that records what the manager sends
///
/// Clones share the same record. Used by simulators and tests that play the
/// controller side by hand.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every envelope sent so far
    pub fn sent(&self) -> Vec<Envelope> {
        self.lock().sent.clone()
    }

    /// Stack messages sent since the last call, oldest first
    pub fn take_messages(&self) -> Vec<WireMessage> {
        self.lock()
            .sent
            .drain(..)
            .filter_map(|env| match env {
                Envelope::Stack(msg) => Some(msg),
                Envelope::Adapter(_) => None,
            })
            .collect()
    }

    /// Most recent stack message with `msg_id`
    pub fn last_message(&self, msg_id: u16) -> Option<WireMessage> {
        self.lock().sent.iter().rev().find_map(|env| match env {
            Envelope::Stack(msg) if msg.msg_id == msg_id => Some(msg.clone()),
            _ => None,
        })
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Number of pause/resume transitions requested by the manager
    pub fn pause_changes(&self) -> usize {
        self.lock().pause_changes
    }

    /// Make every following send fail
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, envelope: Envelope) -> BleResult<()> {
        let mut state = self.lock();
        if state.fail_sends {
            warn!("Transport refused {:?}", envelope);
            return Err(BleError::Failed);
        }
        trace!("Sending {:?}", envelope);
        state.sent.push(envelope);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        let mut state = self.lock();
        if state.paused != paused {
            state.paused = paused;
            state.pause_changes += 1;
        }
    }
}
