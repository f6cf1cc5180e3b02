//! Commands, opcodes and responses
//!
//! Every application call becomes a [`Command`]. The manager answers each one
//! with exactly one [`Response`] tagged with the command's [`Opcode`], either
//! straight from the handler or later from a continuation.

use crate::error::BleResult;
use crate::gap::types::{BdAddr, ConnParams, SecurityLevel};
use crate::l2cap::L2capConnStatus;
use crate::manager::{Manager, Reply};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeCategory {
    Common,
    Gap,
    L2cap,
}

/// Identifies the command a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode {
    pub category: OpcodeCategory,
    pub index: u8,
}

impl Opcode {
    pub const fn new(category: OpcodeCategory, index: u8) -> Self {
        Self { category, index }
    }

    pub const RESET: Opcode = Opcode::new(OpcodeCategory::Common, 0x00);

    pub const GAP_CONNECT: Opcode = Opcode::new(OpcodeCategory::Gap, 0x01);
    pub const GAP_CONNECT_CANCEL: Opcode = Opcode::new(OpcodeCategory::Gap, 0x02);
    pub const GAP_DISCONNECT: Opcode = Opcode::new(OpcodeCategory::Gap, 0x03);
    pub const GAP_CONN_RSSI: Opcode = Opcode::new(OpcodeCategory::Gap, 0x04);
    pub const GAP_PAIR: Opcode = Opcode::new(OpcodeCategory::Gap, 0x05);
    pub const GAP_PAIR_REPLY: Opcode = Opcode::new(OpcodeCategory::Gap, 0x06);
    pub const GAP_PASSKEY_REPLY: Opcode = Opcode::new(OpcodeCategory::Gap, 0x07);
    pub const GAP_NUMERIC_REPLY: Opcode = Opcode::new(OpcodeCategory::Gap, 0x08);
    pub const GAP_UNPAIR: Opcode = Opcode::new(OpcodeCategory::Gap, 0x09);
    pub const GAP_SET_SEC_LEVEL: Opcode = Opcode::new(OpcodeCategory::Gap, 0x0A);
    pub const GAP_ADDRESS_RESOLVE: Opcode = Opcode::new(OpcodeCategory::Gap, 0x0B);

    pub const L2CAP_LISTEN: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x01);
    pub const L2CAP_STOP_LISTEN: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x02);
    pub const L2CAP_CONNECTION_CFM: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x03);
    pub const L2CAP_CONNECT: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x04);
    pub const L2CAP_DISCONNECT: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x05);
    pub const L2CAP_ADD_CREDITS: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x06);
    pub const L2CAP_SEND: Opcode = Opcode::new(OpcodeCategory::L2cap, 0x07);
}

/// Sequence number of an application call
pub type CallId = u64;

/// Response together with the call it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResponse {
    pub call: CallId,
    pub response: Response,
}

/// Payload of a successful response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseData {
    None,
    /// Source CID of the channel the command created or used
    Scid(u16),
    Rssi(i8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: Opcode,
    pub result: BleResult<ResponseData>,
}

/// Application request to the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reset,

    // GAP
    Connect {
        peer: BdAddr,
        conn_params: ConnParams,
        /// 0 selects the configured default
        ce_len_min: u16,
        ce_len_max: u16,
    },
    ConnectCancel,
    Disconnect {
        conn_idx: u16,
        reason: u8,
    },
    ConnRssi {
        conn_idx: u16,
    },
    Pair {
        conn_idx: u16,
        bond: bool,
    },
    PairReply {
        conn_idx: u16,
        accept: bool,
        bond: bool,
    },
    PasskeyReply {
        conn_idx: u16,
        accept: bool,
        passkey: u32,
    },
    NumericReply {
        conn_idx: u16,
        accept: bool,
    },
    Unpair {
        addr: BdAddr,
    },
    SetSecLevel {
        conn_idx: u16,
        level: SecurityLevel,
    },
    AddressResolve {
        addr: BdAddr,
    },

    // L2CAP
    L2capListen {
        conn_idx: u16,
        psm: u16,
        sec_level: SecurityLevel,
        initial_credits: u16,
        defer_setup: bool,
    },
    L2capStopListen {
        conn_idx: u16,
        scid: u16,
    },
    L2capConnectionCfm {
        conn_idx: u16,
        scid: u16,
        status: L2capConnStatus,
    },
    L2capConnect {
        conn_idx: u16,
        psm: u16,
        initial_credits: u16,
    },
    L2capDisconnect {
        conn_idx: u16,
        scid: u16,
    },
    L2capAddCredits {
        conn_idx: u16,
        scid: u16,
        credits: u16,
    },
    L2capSend {
        conn_idx: u16,
        scid: u16,
        data: Vec<u8>,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Reset => Opcode::RESET,
            Command::Connect { .. } => Opcode::GAP_CONNECT,
            Command::ConnectCancel => Opcode::GAP_CONNECT_CANCEL,
            Command::Disconnect { .. } => Opcode::GAP_DISCONNECT,
            Command::ConnRssi { .. } => Opcode::GAP_CONN_RSSI,
            Command::Pair { .. } => Opcode::GAP_PAIR,
            Command::PairReply { .. } => Opcode::GAP_PAIR_REPLY,
            Command::PasskeyReply { .. } => Opcode::GAP_PASSKEY_REPLY,
            Command::NumericReply { .. } => Opcode::GAP_NUMERIC_REPLY,
            Command::Unpair { .. } => Opcode::GAP_UNPAIR,
            Command::SetSecLevel { .. } => Opcode::GAP_SET_SEC_LEVEL,
            Command::AddressResolve { .. } => Opcode::GAP_ADDRESS_RESOLVE,
            Command::L2capListen { .. } => Opcode::L2CAP_LISTEN,
            Command::L2capStopListen { .. } => Opcode::L2CAP_STOP_LISTEN,
            Command::L2capConnectionCfm { .. } => Opcode::L2CAP_CONNECTION_CFM,
            Command::L2capConnect { .. } => Opcode::L2CAP_CONNECT,
            Command::L2capDisconnect { .. } => Opcode::L2CAP_DISCONNECT,
            Command::L2capAddCredits { .. } => Opcode::L2CAP_ADD_CREDITS,
            Command::L2capSend { .. } => Opcode::L2CAP_SEND,
        }
    }
}

impl Manager {
    /// Run a command for `call`; its response goes out now or when the controller answers
    pub fn handle_command(&mut self, call: CallId, cmd: Command) {
        self.call = call;
        let opcode = cmd.opcode();
        debug!("Handling {:?}", cmd);

        let result = match cmd {
            Command::Reset => self.reset_cmd(),

            Command::Connect {
                peer,
                conn_params,
                ce_len_min,
                ce_len_max,
            } => self.gap_connect(peer, conn_params, ce_len_min, ce_len_max),
            Command::ConnectCancel => self.gap_connect_cancel(),
            Command::Disconnect { conn_idx, reason } => self.gap_disconnect(conn_idx, reason),
            Command::ConnRssi { conn_idx } => self.gap_conn_rssi(conn_idx),
            Command::Pair { conn_idx, bond } => self.gap_pair(conn_idx, bond),
            Command::PairReply {
                conn_idx,
                accept,
                bond,
            } => self.gap_pair_reply(conn_idx, accept, bond),
            Command::PasskeyReply {
                conn_idx,
                accept,
                passkey,
            } => self.gap_passkey_reply(conn_idx, accept, passkey),
            Command::NumericReply { conn_idx, accept } => self.gap_numeric_reply(conn_idx, accept),
            Command::Unpair { addr } => self.gap_unpair(addr),
            Command::SetSecLevel { conn_idx, level } => self.gap_set_sec_level(conn_idx, level),
            Command::AddressResolve { addr } => self.gap_address_resolve(addr),

            Command::L2capListen {
                conn_idx,
                psm,
                sec_level,
                initial_credits,
                defer_setup,
            } => self.l2cap_listen(conn_idx, psm, sec_level, initial_credits, defer_setup),
            Command::L2capStopListen { conn_idx, scid } => self.l2cap_stop_listen(conn_idx, scid),
            Command::L2capConnectionCfm {
                conn_idx,
                scid,
                status,
            } => self.l2cap_connection_cfm(conn_idx, scid, status),
            Command::L2capConnect {
                conn_idx,
                psm,
                initial_credits,
            } => self.l2cap_connect(conn_idx, psm, initial_credits),
            Command::L2capDisconnect { conn_idx, scid } => self.l2cap_disconnect(conn_idx, scid),
            Command::L2capAddCredits {
                conn_idx,
                scid,
                credits,
            } => self.l2cap_add_credits(conn_idx, scid, credits),
            Command::L2capSend {
                conn_idx,
                scid,
                data,
            } => self.l2cap_send(conn_idx, scid, data),
        };

        match result {
            Ok(Reply::Now(data)) => self.respond(opcode, Ok(data)),
            Ok(Reply::Deferred) => {}
            Err(e) => {
                debug!("{:?} failed: {}", opcode, e);
                self.respond(opcode, Err(e));
            }
        }
    }
}
