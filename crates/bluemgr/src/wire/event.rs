//! Typed controller events
//!
//! [`ControllerEvent::parse`] turns a [`WireMessage`] coming from the
//! controller into a typed event the router can match on. Messages with an
//! identifier the manager does not know decode to [`ControllerEvent::Unknown`];
//! a known identifier with a short payload is a [`WireError`].
//!
//! Payloads are packed little-endian. [`ControllerEvent::to_message`] produces
//! the same layout and is what a controller simulator uses to talk to the
//! manager.

use crate::error::WireError;
use crate::gap::types::{AddressType, AuthReq, BdAddr};
use crate::wire::constants::*;
use crate::wire::message::WireMessage;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Kind-specific content of a bond request indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondRequest {
    /// Peer asks to pair
    PairingReq { auth: AuthReq },
    /// Temporary key is needed; `tk` carries the value to compare for numeric comparison
    TkExchange { tk_type: u8, tk: [u8; 16] },
    /// Local LTK must be generated and distributed
    LtkExchange { key_size: u8 },
    /// Local CSRK must be generated and distributed
    CsrkExchange,
    Other(u8),
}

/// Kind-specific content of a bond indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondInfo {
    PairingSucceed { auth: AuthReq },
    PairingFailed { reason: u8 },
    /// Peer distributed its LTK
    LtkExchange {
        key: [u8; 16],
        ediv: u16,
        rand: u64,
        key_size: u8,
    },
    /// Peer distributed its CSRK
    CsrkExchange { key: [u8; 16] },
    /// Peer distributed its IRK together with its identity address
    IrkExchange { irk: [u8; 16], addr: BdAddr },
    Other(u8),
}

/// Decoded message from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Completion of a GAPM (device level) operation
    GapmCmp { operation: u8, status: u8 },
    /// Completion of a GAPC (connection level) operation
    GapcCmp {
        conn_idx: u16,
        operation: u8,
        status: u8,
    },
    /// A private address was resolved with one of the provided IRKs
    AddrSolved { addr: [u8; 6], irk: [u8; 16] },
    ConnectionReq {
        conn_idx: u16,
        conhdl: u16,
        con_interval: u16,
        con_latency: u16,
        sup_to: u16,
        clk_accuracy: u8,
        peer_addr: BdAddr,
    },
    Disconnected {
        conn_idx: u16,
        conhdl: u16,
        reason: u8,
    },
    ConRssi { conn_idx: u16, rssi: i8 },
    BondReq { conn_idx: u16, request: BondRequest },
    Bond { conn_idx: u16, info: BondInfo },
    EncryptReq { conn_idx: u16, ediv: u16, rand: u64 },
    Encrypted { conn_idx: u16, auth: AuthReq },
    SecurityReq { conn_idx: u16, auth: AuthReq },
    SignCounter {
        conn_idx: u16,
        local_sign_counter: u32,
        peer_sign_counter: u32,
    },
    LecbConnectReq {
        conn_idx: u16,
        le_psm: u16,
        dest_cid: u16,
        max_sdu: u16,
        dest_credit: u16,
    },
    LecbConnected {
        conn_idx: u16,
        le_psm: u16,
        dest_cid: u16,
        dest_credit: u16,
        max_sdu: u16,
    },
    LecbAdd {
        conn_idx: u16,
        le_psm: u16,
        dest_credit: u16,
    },
    LecbDisconnected {
        conn_idx: u16,
        le_psm: u16,
        reason: u16,
    },
    PduSent {
        conn_idx: u16,
        status: u8,
        dest_cid: u16,
        dest_credit: u16,
    },
    /// LE credit based data received on a local channel
    DataReceived {
        conn_idx: u16,
        src_cid: u16,
        src_credit: u16,
        data: Vec<u8>,
    },
    /// Any message the manager has no use for
    Unknown { msg_id: u16, conn_idx: u16 },
}

struct Reader<'a> {
    msg_id: u16,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(msg: &'a WireMessage) -> Self {
        Self {
            msg_id: msg.msg_id,
            cursor: Cursor::new(msg.param.as_slice()),
        }
    }

    // `start` is the offset the failed read began at
    fn short(&self, start: u64, needed: usize) -> WireError {
        WireError::InvalidParamLength {
            msg_id: self.msg_id,
            needed: start as usize + needed,
            actual: self.cursor.get_ref().len(),
        }
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        let start = self.cursor.position();
        self.cursor.read_u8().map_err(|_| self.short(start, 1))
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let start = self.cursor.position();
        self.cursor.read_u16::<LittleEndian>().map_err(|_| self.short(start, 2))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let start = self.cursor.position();
        self.cursor.read_u32::<LittleEndian>().map_err(|_| self.short(start, 4))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let start = self.cursor.position();
        self.cursor.read_u64::<LittleEndian>().map_err(|_| self.short(start, 8))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let start = self.cursor.position();
        let mut out = [0u8; N];
        self.cursor.read_exact(&mut out).map_err(|_| self.short(start, N))?;
        Ok(out)
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        let start = self.cursor.position();
        let mut out = vec![0u8; len];
        self.cursor.read_exact(&mut out).map_err(|_| self.short(start, len))?;
        Ok(out)
    }

    fn auth(&mut self) -> Result<AuthReq, WireError> {
        Ok(AuthReq::from_bits_truncate(self.u8()?))
    }
}

fn u16le(p: &mut Vec<u8>, v: u16) {
    // Writes into a Vec cannot fail
    let _ = p.write_u16::<LittleEndian>(v);
}

impl ControllerEvent {
    /// Decode a message received from the controller
    pub fn parse(msg: &WireMessage) -> Result<Self, WireError> {
        let conn_idx = msg.conn_idx();
        let mut r = Reader::new(msg);

        let event = match msg.msg_id {
            GAPM_CMP_EVT => ControllerEvent::GapmCmp {
                operation: r.u8()?,
                status: r.u8()?,
            },
            GAPC_CMP_EVT => ControllerEvent::GapcCmp {
                conn_idx,
                operation: r.u8()?,
                status: r.u8()?,
            },
            GAPM_ADDR_SOLVED_IND => ControllerEvent::AddrSolved {
                addr: r.array()?,
                irk: r.array()?,
            },
            GAPC_CONNECTION_REQ_IND => {
                let conhdl = r.u16()?;
                let con_interval = r.u16()?;
                let con_latency = r.u16()?;
                let sup_to = r.u16()?;
                let clk_accuracy = r.u8()?;
                let addr_type = AddressType::from(r.u8()?);
                let bytes = r.array()?;
                ControllerEvent::ConnectionReq {
                    conn_idx,
                    conhdl,
                    con_interval,
                    con_latency,
                    sup_to,
                    clk_accuracy,
                    peer_addr: BdAddr::new(addr_type, bytes),
                }
            }
            GAPC_DISCONNECT_IND => ControllerEvent::Disconnected {
                conn_idx,
                conhdl: r.u16()?,
                reason: r.u8()?,
            },
            GAPC_CON_RSSI_IND => ControllerEvent::ConRssi {
                conn_idx,
                rssi: r.u8()? as i8,
            },
            GAPC_BOND_REQ_IND => {
                let request = match r.u8()? {
                    GAPC_PAIRING_REQ => BondRequest::PairingReq { auth: r.auth()? },
                    GAPC_TK_EXCH => BondRequest::TkExchange {
                        tk_type: r.u8()?,
                        tk: r.array()?,
                    },
                    GAPC_LTK_EXCH => BondRequest::LtkExchange { key_size: r.u8()? },
                    GAPC_CSRK_EXCH => BondRequest::CsrkExchange,
                    other => BondRequest::Other(other),
                };
                ControllerEvent::BondReq { conn_idx, request }
            }
            GAPC_BOND_IND => {
                let info = match r.u8()? {
                    GAPC_PAIRING_SUCCEED => BondInfo::PairingSucceed { auth: r.auth()? },
                    GAPC_PAIRING_FAILED => BondInfo::PairingFailed { reason: r.u8()? },
                    GAPC_LTK_EXCH => BondInfo::LtkExchange {
                        key: r.array()?,
                        ediv: r.u16()?,
                        rand: r.u64()?,
                        key_size: r.u8()?,
                    },
                    GAPC_CSRK_EXCH => BondInfo::CsrkExchange { key: r.array()? },
                    GAPC_IRK_EXCH => {
                        let irk = r.array()?;
                        let addr_type = AddressType::from(r.u8()?);
                        let bytes = r.array()?;
                        BondInfo::IrkExchange {
                            irk,
                            addr: BdAddr::new(addr_type, bytes),
                        }
                    }
                    other => BondInfo::Other(other),
                };
                ControllerEvent::Bond { conn_idx, info }
            }
            GAPC_ENCRYPT_REQ_IND => ControllerEvent::EncryptReq {
                conn_idx,
                ediv: r.u16()?,
                rand: r.u64()?,
            },
            GAPC_ENCRYPT_IND => ControllerEvent::Encrypted {
                conn_idx,
                auth: r.auth()?,
            },
            GAPC_SECURITY_IND => ControllerEvent::SecurityReq {
                conn_idx,
                auth: r.auth()?,
            },
            GAPC_SIGN_COUNTER_IND => ControllerEvent::SignCounter {
                conn_idx,
                local_sign_counter: r.u32()?,
                peer_sign_counter: r.u32()?,
            },
            GAPC_LECB_CONNECT_REQ_IND => ControllerEvent::LecbConnectReq {
                conn_idx,
                le_psm: r.u16()?,
                dest_cid: r.u16()?,
                max_sdu: r.u16()?,
                dest_credit: r.u16()?,
            },
            GAPC_LECB_CONNECT_IND => ControllerEvent::LecbConnected {
                conn_idx,
                le_psm: r.u16()?,
                dest_cid: r.u16()?,
                dest_credit: r.u16()?,
                max_sdu: r.u16()?,
            },
            GAPC_LECB_ADD_IND => ControllerEvent::LecbAdd {
                conn_idx,
                le_psm: r.u16()?,
                dest_credit: r.u16()?,
            },
            GAPC_LECB_DISCONNECT_IND => ControllerEvent::LecbDisconnected {
                conn_idx,
                le_psm: r.u16()?,
                reason: r.u16()?,
            },
            L2CC_PDU_SEND_RSP => ControllerEvent::PduSent {
                conn_idx,
                status: r.u8()?,
                dest_cid: r.u16()?,
                dest_credit: r.u16()?,
            },
            L2CC_LECNX_DATA_RECV_IND => {
                let src_cid = r.u16()?;
                let src_credit = r.u16()?;
                let len = r.u16()? as usize;
                ControllerEvent::DataReceived {
                    conn_idx,
                    src_cid,
                    src_credit,
                    data: r.bytes(len)?,
                }
            }
            msg_id => ControllerEvent::Unknown { msg_id, conn_idx },
        };

        Ok(event)
    }

    /// Message identifier this event travels under
    pub fn msg_id(&self) -> u16 {
        match self {
            Self::GapmCmp { .. } => GAPM_CMP_EVT,
            Self::GapcCmp { .. } => GAPC_CMP_EVT,
            Self::AddrSolved { .. } => GAPM_ADDR_SOLVED_IND,
            Self::ConnectionReq { .. } => GAPC_CONNECTION_REQ_IND,
            Self::Disconnected { .. } => GAPC_DISCONNECT_IND,
            Self::ConRssi { .. } => GAPC_CON_RSSI_IND,
            Self::BondReq { .. } => GAPC_BOND_REQ_IND,
            Self::Bond { .. } => GAPC_BOND_IND,
            Self::EncryptReq { .. } => GAPC_ENCRYPT_REQ_IND,
            Self::Encrypted { .. } => GAPC_ENCRYPT_IND,
            Self::SecurityReq { .. } => GAPC_SECURITY_IND,
            Self::SignCounter { .. } => GAPC_SIGN_COUNTER_IND,
            Self::LecbConnectReq { .. } => GAPC_LECB_CONNECT_REQ_IND,
            Self::LecbConnected { .. } => GAPC_LECB_CONNECT_IND,
            Self::LecbAdd { .. } => GAPC_LECB_ADD_IND,
            Self::LecbDisconnected { .. } => GAPC_LECB_DISCONNECT_IND,
            Self::PduSent { .. } => L2CC_PDU_SEND_RSP,
            Self::DataReceived { .. } => L2CC_LECNX_DATA_RECV_IND,
            Self::Unknown { msg_id, .. } => *msg_id,
        }
    }

    /// Connection the event refers to, if it is connection scoped
    pub fn conn_idx(&self) -> Option<u16> {
        match *self {
            Self::GapmCmp { .. } | Self::AddrSolved { .. } => None,
            Self::GapcCmp { conn_idx, .. }
            | Self::ConnectionReq { conn_idx, .. }
            | Self::Disconnected { conn_idx, .. }
            | Self::ConRssi { conn_idx, .. }
            | Self::BondReq { conn_idx, .. }
            | Self::Bond { conn_idx, .. }
            | Self::EncryptReq { conn_idx, .. }
            | Self::Encrypted { conn_idx, .. }
            | Self::SecurityReq { conn_idx, .. }
            | Self::SignCounter { conn_idx, .. }
            | Self::LecbConnectReq { conn_idx, .. }
            | Self::LecbConnected { conn_idx, .. }
            | Self::LecbAdd { conn_idx, .. }
            | Self::LecbDisconnected { conn_idx, .. }
            | Self::PduSent { conn_idx, .. }
            | Self::DataReceived { conn_idx, .. }
            | Self::Unknown { conn_idx, .. } => Some(conn_idx),
        }
    }

    fn source_task(&self) -> u16 {
        match self {
            Self::GapmCmp { .. } | Self::AddrSolved { .. } => TASK_ID_GAPM,
            Self::PduSent { .. } | Self::DataReceived { .. } => TASK_ID_L2CC,
            _ => TASK_ID_GAPC,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut p = Vec::new();

        match self {
            Self::GapmCmp { operation, status } | Self::GapcCmp { operation, status, .. } => {
                p.push(*operation);
                p.push(*status);
            }
            Self::AddrSolved { addr, irk } => {
                p.extend_from_slice(addr);
                p.extend_from_slice(irk);
            }
            Self::ConnectionReq {
                conhdl,
                con_interval,
                con_latency,
                sup_to,
                clk_accuracy,
                peer_addr,
                ..
            } => {
                u16le(&mut p, *conhdl);
                u16le(&mut p, *con_interval);
                u16le(&mut p, *con_latency);
                u16le(&mut p, *sup_to);
                p.push(*clk_accuracy);
                p.push(peer_addr.addr_type.into());
                p.extend_from_slice(&peer_addr.bytes);
            }
            Self::Disconnected { conhdl, reason, .. } => {
                u16le(&mut p, *conhdl);
                p.push(*reason);
            }
            Self::ConRssi { rssi, .. } => p.push(*rssi as u8),
            Self::BondReq { request, .. } => match request {
                BondRequest::PairingReq { auth } => {
                    p.push(GAPC_PAIRING_REQ);
                    p.push(auth.bits());
                }
                BondRequest::TkExchange { tk_type, tk } => {
                    p.push(GAPC_TK_EXCH);
                    p.push(*tk_type);
                    p.extend_from_slice(tk);
                }
                BondRequest::LtkExchange { key_size } => {
                    p.push(GAPC_LTK_EXCH);
                    p.push(*key_size);
                }
                BondRequest::CsrkExchange => p.push(GAPC_CSRK_EXCH),
                BondRequest::Other(kind) => p.push(*kind),
            },
            Self::Bond { info, .. } => match info {
                BondInfo::PairingSucceed { auth } => {
                    p.push(GAPC_PAIRING_SUCCEED);
                    p.push(auth.bits());
                }
                BondInfo::PairingFailed { reason } => {
                    p.push(GAPC_PAIRING_FAILED);
                    p.push(*reason);
                }
                BondInfo::LtkExchange {
                    key,
                    ediv,
                    rand,
                    key_size,
                } => {
                    p.push(GAPC_LTK_EXCH);
                    p.extend_from_slice(key);
                    u16le(&mut p, *ediv);
                    p.extend_from_slice(&rand.to_le_bytes());
                    p.push(*key_size);
                }
                BondInfo::CsrkExchange { key } => {
                    p.push(GAPC_CSRK_EXCH);
                    p.extend_from_slice(key);
                }
                BondInfo::IrkExchange { irk, addr } => {
                    p.push(GAPC_IRK_EXCH);
                    p.extend_from_slice(irk);
                    p.push(addr.addr_type.into());
                    p.extend_from_slice(&addr.bytes);
                }
                BondInfo::Other(kind) => p.push(*kind),
            },
            Self::EncryptReq { ediv, rand, .. } => {
                u16le(&mut p, *ediv);
                p.extend_from_slice(&rand.to_le_bytes());
            }
            Self::Encrypted { auth, .. } | Self::SecurityReq { auth, .. } => p.push(auth.bits()),
            Self::SignCounter {
                local_sign_counter,
                peer_sign_counter,
                ..
            } => {
                p.extend_from_slice(&local_sign_counter.to_le_bytes());
                p.extend_from_slice(&peer_sign_counter.to_le_bytes());
            }
            Self::LecbConnectReq {
                le_psm,
                dest_cid,
                max_sdu,
                dest_credit,
                ..
            } => {
                u16le(&mut p, *le_psm);
                u16le(&mut p, *dest_cid);
                u16le(&mut p, *max_sdu);
                u16le(&mut p, *dest_credit);
            }
            Self::LecbConnected {
                le_psm,
                dest_cid,
                dest_credit,
                max_sdu,
                ..
            } => {
                u16le(&mut p, *le_psm);
                u16le(&mut p, *dest_cid);
                u16le(&mut p, *dest_credit);
                u16le(&mut p, *max_sdu);
            }
            Self::LecbAdd {
                le_psm,
                dest_credit,
                ..
            } => {
                u16le(&mut p, *le_psm);
                u16le(&mut p, *dest_credit);
            }
            Self::LecbDisconnected { le_psm, reason, .. } => {
                u16le(&mut p, *le_psm);
                u16le(&mut p, *reason);
            }
            Self::PduSent {
                status,
                dest_cid,
                dest_credit,
                ..
            } => {
                p.push(*status);
                u16le(&mut p, *dest_cid);
                u16le(&mut p, *dest_credit);
            }
            Self::DataReceived {
                src_cid,
                src_credit,
                data,
                ..
            } => {
                u16le(&mut p, *src_cid);
                u16le(&mut p, *src_credit);
                u16le(&mut p, u16::try_from(data.len()).unwrap_or(u16::MAX));
                p.extend_from_slice(data);
            }
            Self::Unknown { .. } => {}
        }

        p
    }

    /// Encode the event the way the controller emits it
    pub fn to_message(&self) -> WireMessage {
        let conn_idx = self.conn_idx().unwrap_or(0);
        WireMessage::from_task(self.msg_id(), self.source_task(), conn_idx, self.payload())
    }
}
