//! L2CAP command and event handlers
//!
//! Credit accounting works from the local side: `local_credits` on a channel is
//! what the peer may still send. The controller reports the remaining count
//! with every received SDU, and the difference is what the application is told
//! it consumed. Returning credits is explicit (`l2cap_add_credits`).

use crate::error::{BleError, BleResult};
use crate::events::BleEvent;
use crate::gap::types::SecurityLevel;
use crate::l2cap::channel::L2capConnStatus;
use crate::manager::{Continuation, Manager, Opcode, Reply, ResponseData};
use crate::waitqueue::ConnFilter;
use crate::wire::command::StackCommand;
use crate::wire::constants::*;
use log::{debug, info, warn};

/// Security level byte of an LE credit based listener
fn listen_sec_lvl(level: SecurityLevel) -> u8 {
    match level {
        SecurityLevel::Level1 => 1,
        SecurityLevel::Level2 => 2,
        SecurityLevel::Level3 => 3,
        SecurityLevel::Level4 => 0,
    }
}

impl Manager {
    pub(crate) fn l2cap_listen(
        &mut self,
        conn_idx: u16,
        psm: u16,
        sec_level: SecurityLevel,
        initial_credits: u16,
        defer_setup: bool,
    ) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        if self.l2cap.contains_psm(conn_idx, psm) {
            return Err(BleError::AlreadyDone);
        }

        let chan = self.l2cap.create(conn_idx, psm, initial_credits)?;
        chan.defer_setup = defer_setup;
        let scid = chan.scid;

        let cmd = StackCommand::LecbCreate {
            conn_idx,
            sec_lvl: listen_sec_lvl(sec_level),
            le_psm: psm,
            cid: scid,
            credit: initial_credits,
        };
        if let Err(e) = self.send_and_wait(
            cmd,
            ConnFilter::Conn(conn_idx),
            GAPC_CMP_EVT,
            GAPC_LE_CB_CREATE,
            Continuation::L2capListen { conn_idx, scid },
        ) {
            self.l2cap.remove(scid);
            return Err(e);
        }

        Ok(Reply::Deferred)
    }

    pub(crate) fn l2cap_listen_done(&mut self, conn_idx: u16, scid: u16, status: Option<u8>) {
        let result = match status {
            Some(GAP_ERR_NO_ERROR) => Ok(()),
            Some(L2C_ERR_NO_RES_AVAIL) => Err(BleError::InsufficientResources),
            Some(GAP_ERR_INVALID_PARAM) => Err(BleError::InvalidParam),
            Some(GAP_ERR_COMMAND_DISALLOWED) => Err(BleError::NotAllowed),
            _ => Err(BleError::Failed),
        };

        match result {
            Ok(()) => info!("Listening on scid {:#06x}, connection {}", scid, conn_idx),
            Err(_) => {
                self.l2cap.remove(scid);
            }
        }
        self.respond(Opcode::L2CAP_LISTEN, result.map(|_| ResponseData::Scid(scid)));
    }

    pub(crate) fn l2cap_stop_listen(&mut self, conn_idx: u16, scid: u16) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        let psm = self.l2cap.by_scid(conn_idx, scid).ok_or(BleError::NotFound)?.psm;
        self.send_and_wait(
            StackCommand::LecbDestroy { conn_idx, le_psm: psm },
            ConnFilter::Conn(conn_idx),
            GAPC_CMP_EVT,
            GAPC_LE_CB_DESTROY,
            Continuation::L2capStopListen { conn_idx, scid },
        )?;

        Ok(Reply::Deferred)
    }

    pub(crate) fn l2cap_stop_listen_done(&mut self, conn_idx: u16, scid: u16, status: Option<u8>) {
        let result = match status {
            Some(GAP_ERR_NO_ERROR) => Ok(ResponseData::None),
            Some(GAP_ERR_COMMAND_DISALLOWED) => Err(BleError::NotAllowed),
            Some(GAP_ERR_NOT_FOUND) => Err(BleError::NotFound),
            _ => Err(BleError::Failed),
        };

        // A refused destroy leaves the listener in place
        if result != Err(BleError::NotAllowed) {
            debug!("Removing listener scid {:#06x} on connection {}", scid, conn_idx);
            self.l2cap.remove(scid);
        }
        self.respond(Opcode::L2CAP_STOP_LISTEN, result);
    }

    pub(crate) fn l2cap_connection_cfm(
        &mut self,
        conn_idx: u16,
        scid: u16,
        status: L2capConnStatus,
    ) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        let chan = self.l2cap.by_scid(conn_idx, scid).ok_or(BleError::NotFound)?;
        if !chan.defer_setup {
            return Err(BleError::NotAllowed);
        }
        let psm = chan.psm;

        self.send(StackCommand::LecbConnectCfm {
            conn_idx,
            le_psm: psm,
            status: status.to_wire(),
        })?;

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn l2cap_connect(&mut self, conn_idx: u16, psm: u16, initial_credits: u16) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        if self.l2cap.has_connecting(conn_idx) {
            return Err(BleError::InProgress);
        }
        if self.l2cap.contains_psm(conn_idx, psm) {
            return Err(BleError::AlreadyDone);
        }

        let chan = self.l2cap.create(conn_idx, psm, initial_credits)?;
        chan.connecting = true;
        let scid = chan.scid;

        let cmd = StackCommand::LecbConnect {
            conn_idx,
            le_psm: psm,
            cid: scid,
            credit: initial_credits,
        };
        if let Err(e) = self.send(cmd) {
            self.l2cap.remove(scid);
            return Err(e);
        }

        Ok(Reply::Now(ResponseData::Scid(scid)))
    }

    pub(crate) fn l2cap_disconnect(&mut self, conn_idx: u16, scid: u16) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        let psm = self.l2cap.by_scid(conn_idx, scid).ok_or(BleError::NotFound)?.psm;
        self.send_and_wait(
            StackCommand::LecbDisconnect { conn_idx, le_psm: psm },
            ConnFilter::Conn(conn_idx),
            GAPC_CMP_EVT,
            GAPC_LE_CB_DISCONNECTION,
            Continuation::L2capDisconnect { conn_idx, scid },
        )?;

        Ok(Reply::Deferred)
    }

    pub(crate) fn l2cap_disconnect_done(&mut self, conn_idx: u16, scid: u16, status: Option<u8>) {
        let result = match status {
            Some(GAP_ERR_NO_ERROR) => Ok(ResponseData::None),
            Some(L2C_ERR_INVALID_CID) | Some(GAP_ERR_INVALID_PARAM) => Err(BleError::InvalidParam),
            Some(GAP_ERR_NOT_FOUND) => Err(BleError::NotFound),
            _ => Err(BleError::Failed),
        };
        debug!(
            "Disconnect of scid {:#06x} on connection {}: {:?}",
            scid, conn_idx, result
        );
        self.respond(Opcode::L2CAP_DISCONNECT, result);
    }

    pub(crate) fn l2cap_add_credits(&mut self, conn_idx: u16, scid: u16, credits: u16) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        let psm = self.l2cap.by_scid(conn_idx, scid).ok_or(BleError::NotFound)?.psm;
        self.send_and_wait(
            StackCommand::LecbAdd {
                conn_idx,
                le_psm: psm,
                credit: credits,
            },
            ConnFilter::Conn(conn_idx),
            GAPC_CMP_EVT,
            GAPC_LE_CB_ADDITION,
            Continuation::L2capAddCredits {
                conn_idx,
                scid,
                credits,
            },
        )?;

        Ok(Reply::Deferred)
    }

    pub(crate) fn l2cap_add_credits_done(&mut self, conn_idx: u16, scid: u16, credits: u16, status: Option<u8>) {
        let status = match self.l2cap.by_scid(conn_idx, scid) {
            Some(chan) => {
                if status == Some(GAP_ERR_NO_ERROR) {
                    chan.local_credits = chan.local_credits.saturating_add(credits);
                    debug!(
                        "Channel {:#06x} on connection {} now grants {} credits",
                        scid, conn_idx, chan.local_credits
                    );
                }
                status
            }
            // The channel went away while the request was pending
            None => Some(GAP_ERR_NOT_FOUND),
        };

        let result = match status {
            Some(GAP_ERR_NO_ERROR) => Ok(ResponseData::None),
            Some(GAP_ERR_INVALID_PARAM) => Err(BleError::InvalidParam),
            Some(GAP_ERR_NOT_FOUND) => Err(BleError::NotFound),
            _ => Err(BleError::Failed),
        };
        self.respond(Opcode::L2CAP_ADD_CREDITS, result);
    }

    pub(crate) fn l2cap_send(&mut self, conn_idx: u16, scid: u16, data: Vec<u8>) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;

        let chan = self.l2cap.by_scid(conn_idx, scid).ok_or(BleError::NotFound)?;
        if chan.mtu != 0 && data.len() > usize::from(chan.mtu) {
            return Err(BleError::L2capMtuExceeded);
        }
        let dcid = chan.dcid;

        self.send(StackCommand::PduSend {
            conn_idx,
            dest_cid: dcid,
            data,
        })?;

        Ok(Reply::Now(ResponseData::None))
    }

    /// Drop every channel of a connection that went away
    pub(crate) fn l2cap_teardown(&mut self, conn_idx: u16) {
        let removed = self.l2cap.teardown_conn(conn_idx);
        if !removed.is_empty() {
            debug!("Released {} channel(s) of connection {}", removed.len(), conn_idx);
        }
    }

    pub(crate) fn l2cap_connect_ind(&mut self, conn_idx: u16, psm: u16, dcid: u16, dest_credit: u16, max_sdu: u16) {
        let Some(chan) = self.l2cap.by_psm(conn_idx, psm) else {
            debug!("Connect indication for unknown psm {:#06x}", psm);
            return;
        };
        chan.dcid = dcid;
        chan.mtu = max_sdu;
        chan.connecting = false;

        let event = BleEvent::L2capConnected {
            conn_idx,
            psm,
            scid: chan.scid,
            dcid,
            local_credits: chan.local_credits,
            remote_credits: dest_credit,
            mtu: max_sdu,
        };
        info!("L2CAP channel {:#06x} <-> {:#06x} connected", chan.scid, dcid);
        self.emit(event);
    }

    pub(crate) fn l2cap_disconnect_ind(&mut self, conn_idx: u16, psm: u16) {
        let Some(scid) = self.l2cap.by_psm(conn_idx, psm).map(|c| c.scid) else {
            debug!("Disconnect indication for unknown psm {:#06x}", psm);
            return;
        };

        self.emit(BleEvent::L2capDisconnected { conn_idx, scid });
        self.l2cap.remove(scid);
    }

    pub(crate) fn l2cap_connect_req_ind(
        &mut self,
        conn_idx: u16,
        psm: u16,
        dcid: u16,
        max_sdu: u16,
        dest_credit: u16,
    ) {
        let Some(chan) = self.l2cap.by_psm(conn_idx, psm) else {
            debug!("Refusing connection to psm {:#06x}, nobody listens", psm);
            self.send_logged(StackCommand::LecbConnectCfm {
                conn_idx,
                le_psm: psm,
                status: L2C_CB_CON_LEPSM_NOT_SUPP,
            });
            return;
        };
        chan.dcid = dcid;
        chan.mtu = max_sdu;

        if chan.defer_setup {
            let event = BleEvent::L2capConnectionRequest {
                conn_idx,
                psm,
                scid: chan.scid,
                dcid,
                remote_credits: dest_credit,
                mtu: max_sdu,
            };
            self.emit(event);
        } else {
            self.send_logged(StackCommand::LecbConnectCfm {
                conn_idx,
                le_psm: psm,
                status: L2C_CB_CON_SUCCESS,
            });
        }
    }

    pub(crate) fn l2cap_add_ind(&mut self, conn_idx: u16, psm: u16, dest_credit: u16) {
        let Some(scid) = self.l2cap.by_psm(conn_idx, psm).map(|c| c.scid) else {
            debug!("Credit indication for unknown psm {:#06x}", psm);
            return;
        };

        self.emit(BleEvent::L2capRemoteCredits {
            conn_idx,
            scid,
            remote_credits: dest_credit,
        });
    }

    pub(crate) fn l2cap_pdu_send_rsp(&mut self, conn_idx: u16, status: u8, dcid: u16, dest_credit: u16) {
        let Some(scid) = self.l2cap.by_dcid(conn_idx, dcid).map(|c| c.scid) else {
            debug!("Send response for unknown dcid {:#06x}", dcid);
            return;
        };

        let status = match status {
            GAP_ERR_NO_ERROR => Ok(()),
            L2C_ERR_INSUFF_CREDIT => Err(BleError::L2capNoCredits),
            L2C_ERR_INVALID_MTU_EXCEED => Err(BleError::L2capMtuExceeded),
            _ => Err(BleError::Failed),
        };
        self.emit(BleEvent::L2capSent {
            conn_idx,
            scid,
            remote_credits: dest_credit,
            status,
        });
    }

    pub(crate) fn l2cap_data_recv_ind(&mut self, conn_idx: u16, scid: u16, src_credit: u16, data: Vec<u8>) {
        let Some(chan) = self.l2cap.by_scid(conn_idx, scid) else {
            self.anomaly(format_args!("data for unknown scid {:#06x} on {}", scid, conn_idx));
            return;
        };

        if src_credit > chan.local_credits {
            let held = chan.local_credits;
            self.anomaly(format_args!(
                "peer reports {} credits on {:#06x}, only {} granted",
                src_credit, scid, held
            ));
            return;
        }

        let consumed = chan.local_credits - src_credit;
        chan.local_credits = src_credit;
        if src_credit == 0 {
            warn!("Channel {:#06x} on connection {} ran out of credits", scid, conn_idx);
        }

        self.emit(BleEvent::L2capDataInd {
            conn_idx,
            scid,
            local_credits_consumed: consumed,
            data,
        });
    }

    /// Failure of an outgoing connection; success is reported by the connect indication
    pub(crate) fn l2cap_connect_cmp(&mut self, conn_idx: u16, status: u8) {
        if status == GAP_ERR_NO_ERROR {
            return;
        }

        let Some(scid) = self.l2cap.by_connecting(conn_idx).map(|c| c.scid) else {
            self.anomaly(format_args!(
                "connection failure {:#04x} on {} without a pending channel",
                status, conn_idx
            ));
            return;
        };

        let status = match status {
            GAP_ERR_INVALID_PARAM => BleError::InvalidParam,
            GAP_ERR_COMMAND_DISALLOWED => BleError::NotAllowed,
            L2C_ERR_LEPSM_NOT_SUPP => BleError::NotSupported,
            _ => BleError::Failed,
        };
        self.emit(BleEvent::L2capConnectionFailed { conn_idx, scid, status });
        self.l2cap.remove(scid);
    }
}
