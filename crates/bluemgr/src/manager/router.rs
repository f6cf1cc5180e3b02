//! Manager input loop and message dispatch
//!
//! Everything the manager reacts to arrives as a [`ManagerInput`] on one
//! channel, read by the manager thread. A message from the controller goes
//! through three stages:
//!
//! 1. While a stack reset is in progress, only the reset completion passes.
//! 2. The waitqueue gets the first look; a match resumes the parked request.
//! 3. Otherwise the message is dispatched on its type to a GAP or L2CAP handler.
//!
//! Messages nobody wants are counted in [`RouterStats`].
//!
//! When the application event queue is full the router stops taking controller
//! messages: they are parked in a backlog and the transport is paused until an
//! event is consumed.

use crate::error::{BleError, BleResult};
use crate::gap::params::DevParams;
use crate::manager::{CallId, Continuation, Manager, Opcode, Parked, Reply, ResponseData};
use crate::waitqueue::ConnFilter;
use crate::wire::command::StackCommand;
use crate::wire::constants::*;
use crate::wire::event::ControllerEvent;
use crate::wire::message::{Envelope, WireMessage};
use log::{debug, error, info, warn};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

/// Input of the manager thread
#[derive(Debug)]
pub enum ManagerInput {
    /// Envelope received from the controller
    Controller(Envelope),
    /// Command posted by the gateway for one of its calls
    Command(CallId, crate::manager::Command),
    /// The application took an event off a full queue
    EventConsumed,
    /// Bonding data was changed by another thread and must be committed
    CommitStorage,
    Shutdown,
}

/// Dispatch counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Messages neither awaited nor handled
    pub not_handled: u32,
    pub last_not_handled: Option<u16>,
    /// Malformed or inconsistent messages that were dropped
    pub anomalies: u32,
}

/// Status byte of a completion event, `None` when the waiter was flushed
pub(crate) fn cmp_status(event: Option<&ControllerEvent>) -> Option<u8> {
    match event {
        Some(ControllerEvent::GapmCmp { status, .. }) | Some(ControllerEvent::GapcCmp { status, .. }) => {
            Some(*status)
        }
        _ => None,
    }
}

/// Body of the manager thread
pub(crate) fn run(core: Arc<Mutex<Manager>>, inputs: Receiver<ManagerInput>) {
    info!("Manager thread started");
    while let Ok(input) = inputs.recv() {
        let mut manager = core.lock().unwrap_or_else(PoisonError::into_inner);
        if !manager.handle_input(input) {
            break;
        }
    }
    info!("Manager thread stopped");
}

impl Manager {
    /// Process one input; returns `false` once the manager should stop
    pub fn handle_input(&mut self, input: ManagerInput) -> bool {
        match input {
            ManagerInput::Controller(envelope) => self.on_controller(envelope),
            ManagerInput::Command(call, cmd) => self.handle_command(call, cmd),
            ManagerInput::EventConsumed => self.on_event_consumed(),
            ManagerInput::CommitStorage => self.store.commit(),
            ManagerInput::Shutdown => return false,
        }
        true
    }

    fn on_controller(&mut self, envelope: Envelope) {
        if self.blocked {
            self.backlog.push_back(envelope);
            return;
        }

        if self.events.is_full() {
            self.block();
            self.backlog.push_back(envelope);
            return;
        }

        self.process_envelope(envelope);
    }

    fn block(&mut self) {
        debug!("Event queue full, pausing controller input");
        self.blocked = true;
        self.transport.set_paused(true);
    }

    fn on_event_consumed(&mut self) {
        if !self.blocked || self.events.is_full() {
            return;
        }

        debug!("Event queue has room, resuming controller input");
        self.blocked = false;
        self.transport.set_paused(false);

        while let Some(envelope) = self.backlog.pop_front() {
            if self.events.is_full() {
                self.backlog.push_front(envelope);
                self.block();
                break;
            }
            self.process_envelope(envelope);
        }
    }

    fn process_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Stack(msg) => self.dispatch_message(msg),
            Envelope::Adapter(msg) => debug!("Ignoring adapter message {:?}", msg),
        }
    }

    fn dispatch_message(&mut self, msg: WireMessage) {
        if self.reset_in_progress
            && !(msg.msg_id == GAPM_CMP_EVT && msg.operation() == Some(GAPM_RESET))
        {
            debug!("Reset in progress, dropping {:#06x}", msg.msg_id);
            return;
        }

        let event = match ControllerEvent::parse(&msg) {
            Ok(event) => event,
            Err(e) => {
                self.anomaly(format_args!("undecodable message {:?}: {}", msg, e));
                return;
            }
        };

        if let Some(entry) = self.waitqueue.match_msg(&msg) {
            self.resume(entry.continuation, Some(&event));
            return;
        }

        if !self.handle_event(event) {
            debug!("Unhandled message {:#06x} from {:#06x}", msg.msg_id, msg.src_id);
            self.stats.not_handled += 1;
            self.stats.last_not_handled = Some(msg.msg_id);
        }
    }

    /// Record a protocol anomaly; the offending message is dropped
    pub(crate) fn anomaly(&mut self, what: std::fmt::Arguments<'_>) {
        error!("Protocol anomaly: {}", what);
        self.stats.anomalies += 1;
    }

    /// Dispatch a message nobody was waiting for; `false` if nobody handles it
    fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::GapmCmp { operation, status } => match operation {
                GAPM_CONNECTION_DIRECT => self.gap_connect_cmp(status),
                GAPM_RESOLV_ADDR => self.gap_address_resolve_cmp(status),
                GAPM_CANCEL => debug!("Cancel completed with status {:#04x}", status),
                _ => return false,
            },
            ControllerEvent::GapcCmp {
                conn_idx,
                operation,
                status,
            } => match operation {
                GAPC_DISCONNECT => self.gap_disconnect_cmp(conn_idx, status),
                GAPC_BOND => self.gap_bond_cmp(conn_idx, status),
                GAPC_LE_CB_CONNECTION => self.l2cap_connect_cmp(conn_idx, status),
                GAPC_SECURITY_REQ | GAPC_ENCRYPT => {
                    debug!("Operation {:#04x} on {} completed with {:#04x}", operation, conn_idx, status)
                }
                _ => return false,
            },
            ControllerEvent::AddrSolved { addr, irk } => self.gap_addr_solved_ind(addr, irk),
            ControllerEvent::ConnectionReq {
                conn_idx,
                con_interval,
                con_latency,
                sup_to,
                peer_addr,
                ..
            } => self.gap_connected_evt(conn_idx, con_interval, con_latency, sup_to, peer_addr),
            ControllerEvent::Disconnected { conn_idx, reason, .. } => {
                self.gap_disconnected_evt(conn_idx, reason)
            }
            ControllerEvent::BondReq { conn_idx, request } => self.gap_bond_req_ind(conn_idx, request),
            ControllerEvent::Bond { conn_idx, info } => self.gap_bond_ind(conn_idx, info),
            ControllerEvent::EncryptReq { conn_idx, ediv, rand } => {
                self.gap_encrypt_req_ind(conn_idx, ediv, rand)
            }
            ControllerEvent::Encrypted { conn_idx, auth } => self.gap_encrypt_ind(conn_idx, auth),
            ControllerEvent::SecurityReq { conn_idx, auth } => self.gap_security_ind(conn_idx, auth),
            ControllerEvent::SignCounter {
                conn_idx,
                local_sign_counter,
                peer_sign_counter,
            } => self.gap_sign_counter_ind(conn_idx, local_sign_counter, peer_sign_counter),
            ControllerEvent::LecbConnectReq {
                conn_idx,
                le_psm,
                dest_cid,
                max_sdu,
                dest_credit,
            } => self.l2cap_connect_req_ind(conn_idx, le_psm, dest_cid, max_sdu, dest_credit),
            ControllerEvent::LecbConnected {
                conn_idx,
                le_psm,
                dest_cid,
                dest_credit,
                max_sdu,
            } => self.l2cap_connect_ind(conn_idx, le_psm, dest_cid, dest_credit, max_sdu),
            ControllerEvent::LecbAdd {
                conn_idx,
                le_psm,
                dest_credit,
            } => self.l2cap_add_ind(conn_idx, le_psm, dest_credit),
            ControllerEvent::LecbDisconnected { conn_idx, le_psm, .. } => {
                self.l2cap_disconnect_ind(conn_idx, le_psm)
            }
            ControllerEvent::PduSent {
                conn_idx,
                status,
                dest_cid,
                dest_credit,
            } => self.l2cap_pdu_send_rsp(conn_idx, status, dest_cid, dest_credit),
            ControllerEvent::DataReceived {
                conn_idx,
                src_cid,
                src_credit,
                data,
            } => self.l2cap_data_recv_ind(conn_idx, src_cid, src_credit, data),
            ControllerEvent::ConRssi { .. } | ControllerEvent::Unknown { .. } => return false,
        }
        true
    }

    /// Resume a parked request on behalf of the call that parked it
    fn resume(&mut self, parked: Parked, event: Option<&ControllerEvent>) {
        self.call = parked.call;
        self.run_continuation(parked.continuation, event);
    }

    /// Run a continuation; `event` is `None` when it was flushed
    fn run_continuation(&mut self, continuation: Continuation, event: Option<&ControllerEvent>) {
        let status = cmp_status(event);

        match continuation {
            Continuation::ResolveOnConnect { event: evt, conn_idx } => {
                self.gap_resolve_on_connect_done(conn_idx, evt, status)
            }
            Continuation::RssiGet => {
                let result = match event {
                    Some(ControllerEvent::ConRssi { rssi, .. }) => Ok(ResponseData::Rssi(*rssi)),
                    _ => Err(BleError::NotConnected),
                };
                self.respond(Opcode::GAP_CONN_RSSI, result);
            }
            Continuation::EncryptForSecLevel { conn_idx } => {
                self.gap_encrypt_for_sec_level_done(conn_idx, status)
            }
            Continuation::EncryptForSecurityReq { conn_idx, bond, mitm } => {
                self.gap_encrypt_for_security_req_done(conn_idx, bond, mitm, status)
            }
            Continuation::L2capListen { conn_idx, scid } => self.l2cap_listen_done(conn_idx, scid, status),
            Continuation::L2capStopListen { conn_idx, scid } => {
                self.l2cap_stop_listen_done(conn_idx, scid, status)
            }
            Continuation::L2capDisconnect { conn_idx, scid } => {
                self.l2cap_disconnect_done(conn_idx, scid, status)
            }
            Continuation::L2capAddCredits {
                conn_idx,
                scid,
                credits,
            } => self.l2cap_add_credits_done(conn_idx, scid, credits, status),
            Continuation::ResetComplete => self.reset_done(status),
        }
    }

    /// Flush the waiters of a dropped connection
    pub(crate) fn flush_waiters(&mut self, conn_idx: u16) {
        for entry in self.waitqueue.flush(conn_idx, self.config.flush_policy) {
            self.resume(entry.continuation, None);
        }
    }

    pub(crate) fn reset_cmd(&mut self) -> BleResult<Reply> {
        info!("Resetting stack");
        self.events.clear();

        let dropped = self.waitqueue.drain_all();
        if !dropped.is_empty() {
            warn!("Reset drops {} pending request(s)", dropped.len());
        }

        self.reset_in_progress = true;
        if let Err(e) = self.send_and_wait(
            StackCommand::Reset,
            ConnFilter::Any,
            GAPM_CMP_EVT,
            GAPM_RESET,
            Continuation::ResetComplete,
        ) {
            self.reset_in_progress = false;
            return Err(e);
        }
        Ok(Reply::Deferred)
    }

    fn reset_done(&mut self, status: Option<u8>) {
        self.reset_in_progress = false;

        if status != Some(GAP_ERR_NO_ERROR) {
            error!("Stack reset failed with status {:?}", status);
            self.respond(Opcode::RESET, Err(BleError::Failed));
            return;
        }

        self.l2cap.clear();
        self.params = DevParams::from_config(&self.config);
        self.store.acquire().reload();

        info!("Stack reset complete");
        self.respond(Opcode::RESET, Ok(ResponseData::None));
    }
}
