//! Manager core
//!
//! [`Manager`] is the single context object behind every BLE operation. It owns
//! the controller transport, the correlation waitqueue, the local device
//! parameters and the L2CAP channel table, and shares the device store and the
//! application event queue with the outside world.
//!
//! The GAP and L2CAP state machines are implemented as `impl Manager` blocks in
//! their own modules; this module only holds the shared plumbing:
//! - [`command`]: commands, opcodes and responses
//! - [`router`]: the input loop and dispatch of controller messages
//!
//! Whoever holds the manager lock is the only one touching this state.

pub mod command;
pub mod router;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

use crate::config::ManagerConfig;
use crate::error::{BleError, BleResult};
use crate::events::{BleEvent, EventQueue};
use crate::gap::params::DevParams;
use crate::l2cap::ChannelTable;
use crate::storage::DeviceStore;
use crate::transport::Transport;
use crate::waitqueue::{ConnFilter, WaitQueue};
use crate::wire::command::StackCommand;
use crate::wire::message::{Envelope, MAX_PARAM_LEN};
use log::{trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;

pub use self::command::{CallId, Command, Opcode, OpcodeCategory, Response, ResponseData, TaggedResponse};
pub use self::router::{ManagerInput, RouterStats};

/// Work to resume when a parked request gets its answer
///
/// Run with the matching controller event, or with nothing when the entry is
/// flushed because its connection went away.
#[derive(Debug)]
pub enum Continuation {
    /// Connected event held back until the peer address is resolved
    ResolveOnConnect { event: BleEvent, conn_idx: u16 },
    RssiGet,
    /// Encryption started by `set_sec_level`
    EncryptForSecLevel { conn_idx: u16 },
    /// Encryption started in answer to a peer security request
    EncryptForSecurityReq { conn_idx: u16, bond: bool, mitm: bool },
    L2capListen { conn_idx: u16, scid: u16 },
    L2capStopListen { conn_idx: u16, scid: u16 },
    L2capDisconnect { conn_idx: u16, scid: u16 },
    L2capAddCredits { conn_idx: u16, scid: u16, credits: u16 },
    ResetComplete,
}

/// A parked continuation and the call it will answer
#[derive(Debug)]
pub(crate) struct Parked {
    pub call: CallId,
    pub continuation: Continuation,
}

/// How a command handler answers
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Answer right away
    Now(ResponseData),
    /// A continuation answers once the controller responds
    Deferred,
}

pub struct Manager {
    pub(crate) config: ManagerConfig,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) store: DeviceStore,
    pub(crate) events: Arc<EventQueue>,
    pub(crate) waitqueue: WaitQueue<Parked>,
    pub(crate) params: DevParams,
    pub(crate) l2cap: ChannelTable,
    pub(crate) stats: RouterStats,
    pub(crate) reset_in_progress: bool,
    pub(crate) blocked: bool,
    pub(crate) backlog: VecDeque<Envelope>,
    pub(crate) rng: StdRng,
    /// Call whose command or continuation is running
    pub(crate) call: CallId,
    responses: Sender<TaggedResponse>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        transport: Box<dyn Transport>,
        store: DeviceStore,
        events: Arc<EventQueue>,
        responses: Sender<TaggedResponse>,
    ) -> Self {
        Self {
            waitqueue: WaitQueue::new(config.waitqueue_capacity),
            params: DevParams::from_config(&config),
            config,
            transport,
            store,
            events,
            l2cap: ChannelTable::new(),
            stats: RouterStats::default(),
            reset_in_progress: false,
            blocked: false,
            backlog: VecDeque::new(),
            rng: StdRng::from_entropy(),
            call: 0,
            responses,
        }
    }

    pub fn params(&self) -> &DevParams {
        &self.params
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.l2cap
    }

    /// `NotConnected` unless a device is connected as `conn_idx`
    pub(crate) fn require_connected(&self, conn_idx: u16) -> BleResult<()> {
        self.store.acquire().connected_id(conn_idx).map(|_| ())
    }

    /// Hand a command to the controller
    pub(crate) fn send(&mut self, cmd: StackCommand) -> BleResult<()> {
        let msg = cmd.to_message();
        if msg.param.len() > MAX_PARAM_LEN {
            warn!("Refusing {:#06x} with {} parameter bytes", msg.msg_id, msg.param.len());
            return Err(BleError::InvalidParam);
        }
        trace!("-> {:?}", msg);
        self.transport.send(Envelope::Stack(msg))
    }

    /// Send a command whose answer resumes `continuation`
    ///
    /// Room in the waitqueue is checked first so a command is never sent
    /// without somebody waiting for its answer.
    pub(crate) fn send_and_wait(
        &mut self,
        cmd: StackCommand,
        conn: ConnFilter,
        msg_id: u16,
        ext_id: u8,
        continuation: Continuation,
    ) -> BleResult<()> {
        if self.waitqueue.len() >= self.config.waitqueue_capacity {
            warn!("No room to wait for {:#06x}, not sending {:?}", msg_id, cmd);
            return Err(BleError::InsufficientResources);
        }
        self.send(cmd)?;
        let parked = Parked {
            call: self.call,
            continuation,
        };
        self.waitqueue.add(conn, msg_id, ext_id, parked)
    }

    /// Send a command from an event handler where nobody can take the error
    pub(crate) fn send_logged(&mut self, cmd: StackCommand) {
        let msg_id = cmd.msg_id();
        if let Err(e) = self.send(cmd) {
            warn!("Failed to send {:#06x}: {}", msg_id, e);
        }
    }

    pub(crate) fn emit(&self, event: BleEvent) {
        self.events.push(event);
    }

    /// Deliver the response of the command in flight
    pub(crate) fn respond(&self, opcode: Opcode, result: BleResult<ResponseData>) {
        let tagged = TaggedResponse {
            call: self.call,
            response: Response { opcode, result },
        };
        if self.responses.send(tagged).is_err() {
            warn!("No one is waiting for the {:?} response", opcode);
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("params", &self.params)
            .field("waitqueue", &self.waitqueue.len())
            .field("channels", &self.l2cap.len())
            .field("stats", &self.stats)
            .field("reset_in_progress", &self.reset_in_progress)
            .field("blocked", &self.blocked)
            .finish()
    }
}
