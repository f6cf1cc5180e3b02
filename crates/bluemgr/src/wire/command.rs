//! Commands sent to the controller
//!
//! Each [`StackCommand`] knows its message identifier, the task instance it
//! is addressed to and how to lay out its parameters.

use crate::gap::types::{AuthReq, BdAddr, ConnParams};
use crate::storage::keys::LongTermKey;
use crate::wire::constants::*;
use crate::wire::message::WireMessage;

/// Payload of a bond confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondCfmData {
    None,
    /// Local pairing features answering a pairing request
    Features {
        io_cap: u8,
        auth: AuthReq,
        key_size: u8,
        ikey_dist: u8,
        rkey_dist: u8,
    },
    /// Temporary key, little-endian passkey in the low bytes
    Tk([u8; 16]),
    Ltk(LongTermKey),
    Csrk([u8; 16]),
}

/// Command from the host manager to a controller task
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StackCommand {
    // GAPM
    Reset,
    Cancel,
    ResolveAddr {
        addr: [u8; 6],
        irks: Vec<[u8; 16]>,
    },
    StartConnection {
        addr_src: u8,
        scan_interval: u16,
        scan_window: u16,
        conn_params: ConnParams,
        ce_len_min: u16,
        ce_len_max: u16,
        peer: BdAddr,
    },

    // GAPC
    ConnectionCfm {
        conn_idx: u16,
        lcsrk: [u8; 16],
        lsign_counter: u32,
        rcsrk: [u8; 16],
        rsign_counter: u32,
        auth: u8,
        svc_changed_ind_enable: bool,
    },
    Disconnect {
        conn_idx: u16,
        reason: u8,
    },
    GetConRssi {
        conn_idx: u16,
    },
    Bond {
        conn_idx: u16,
        io_cap: u8,
        auth: AuthReq,
        key_size: u8,
        ikey_dist: u8,
        rkey_dist: u8,
    },
    Security {
        conn_idx: u16,
        auth: AuthReq,
    },
    BondCfm {
        conn_idx: u16,
        request: u8,
        accept: bool,
        data: BondCfmData,
    },
    Encrypt {
        conn_idx: u16,
        ltk: LongTermKey,
    },
    EncryptCfm {
        conn_idx: u16,
        found: bool,
        key: [u8; 16],
        key_size: u8,
    },
    LecbCreate {
        conn_idx: u16,
        sec_lvl: u8,
        le_psm: u16,
        cid: u16,
        credit: u16,
    },
    LecbDestroy {
        conn_idx: u16,
        le_psm: u16,
    },
    LecbConnect {
        conn_idx: u16,
        le_psm: u16,
        cid: u16,
        credit: u16,
    },
    LecbConnectCfm {
        conn_idx: u16,
        le_psm: u16,
        status: u16,
    },
    LecbAdd {
        conn_idx: u16,
        le_psm: u16,
        credit: u16,
    },
    LecbDisconnect {
        conn_idx: u16,
        le_psm: u16,
    },

    // L2CC
    PduSend {
        conn_idx: u16,
        dest_cid: u16,
        data: Vec<u8>,
    },
}

impl StackCommand {
    /// Message identifier of this command
    pub fn msg_id(&self) -> u16 {
        match self {
            Self::Reset => GAPM_RESET_CMD,
            Self::Cancel => GAPM_CANCEL_CMD,
            Self::ResolveAddr { .. } => GAPM_RESOLV_ADDR_CMD,
            Self::StartConnection { .. } => GAPM_START_CONNECTION_CMD,
            Self::ConnectionCfm { .. } => GAPC_CONNECTION_CFM,
            Self::Disconnect { .. } => GAPC_DISCONNECT_CMD,
            Self::GetConRssi { .. } => GAPC_GET_INFO_CMD,
            Self::Bond { .. } => GAPC_BOND_CMD,
            Self::Security { .. } => GAPC_SECURITY_CMD,
            Self::BondCfm { .. } => GAPC_BOND_CFM,
            Self::Encrypt { .. } => GAPC_ENCRYPT_CMD,
            Self::EncryptCfm { .. } => GAPC_ENCRYPT_CFM,
            Self::LecbCreate { .. } => GAPC_LECB_CREATE_CMD,
            Self::LecbDestroy { .. } => GAPC_LECB_DESTROY_CMD,
            Self::LecbConnect { .. } => GAPC_LECB_CONNECT_CMD,
            Self::LecbConnectCfm { .. } => GAPC_LECB_CONNECT_CFM,
            Self::LecbAdd { .. } => GAPC_LECB_ADD_CMD,
            Self::LecbDisconnect { .. } => GAPC_LECB_DISCONNECT_CMD,
            Self::PduSend { .. } => L2CC_PDU_SEND_REQ,
        }
    }

    /// Task instance the command is addressed to: `(base task, connection index)`
    fn destination(&self) -> (u16, u16) {
        match *self {
            Self::Reset | Self::Cancel | Self::ResolveAddr { .. } | Self::StartConnection { .. } => {
                (TASK_ID_GAPM, 0)
            }
            Self::PduSend { conn_idx, .. } => (TASK_ID_L2CC, conn_idx),
            Self::ConnectionCfm { conn_idx, .. }
            | Self::Disconnect { conn_idx, .. }
            | Self::GetConRssi { conn_idx }
            | Self::Bond { conn_idx, .. }
            | Self::Security { conn_idx, .. }
            | Self::BondCfm { conn_idx, .. }
            | Self::Encrypt { conn_idx, .. }
            | Self::EncryptCfm { conn_idx, .. }
            | Self::LecbCreate { conn_idx, .. }
            | Self::LecbDestroy { conn_idx, .. }
            | Self::LecbConnect { conn_idx, .. }
            | Self::LecbConnectCfm { conn_idx, .. }
            | Self::LecbAdd { conn_idx, .. }
            | Self::LecbDisconnect { conn_idx, .. } => (TASK_ID_GAPC, conn_idx),
        }
    }

    /// Convert the command to its raw parameter bytes
    fn parameters(&self) -> Vec<u8> {
        match self {
            Self::Reset => vec![GAPM_RESET],
            Self::Cancel => vec![GAPM_CANCEL],

            Self::ResolveAddr { addr, irks } => {
                let mut params = Vec::with_capacity(8 + irks.len() * 16);
                params.push(GAPM_RESOLV_ADDR);
                params.extend_from_slice(addr);
                params.push(irks.len() as u8);
                for irk in irks {
                    params.extend_from_slice(irk);
                }
                params
            }

            Self::StartConnection {
                addr_src,
                scan_interval,
                scan_window,
                conn_params,
                ce_len_min,
                ce_len_max,
                peer,
            } => {
                let mut params = Vec::with_capacity(26);
                params.push(GAPM_CONNECTION_DIRECT);
                params.push(*addr_src);
                params.extend_from_slice(&scan_interval.to_le_bytes());
                params.extend_from_slice(&scan_window.to_le_bytes());
                params.extend_from_slice(&conn_params.interval_min.to_le_bytes());
                params.extend_from_slice(&conn_params.interval_max.to_le_bytes());
                params.extend_from_slice(&conn_params.slave_latency.to_le_bytes());
                params.extend_from_slice(&conn_params.sup_timeout.to_le_bytes());
                params.extend_from_slice(&ce_len_min.to_le_bytes());
                params.extend_from_slice(&ce_len_max.to_le_bytes());
                params.push(1);
                params.push(peer.addr_type.into());
                params.extend_from_slice(&peer.bytes);
                params
            }

            Self::ConnectionCfm {
                lcsrk,
                lsign_counter,
                rcsrk,
                rsign_counter,
                auth,
                svc_changed_ind_enable,
                ..
            } => {
                let mut params = Vec::with_capacity(42);
                params.extend_from_slice(lcsrk);
                params.extend_from_slice(&lsign_counter.to_le_bytes());
                params.extend_from_slice(rcsrk);
                params.extend_from_slice(&rsign_counter.to_le_bytes());
                params.push(*auth);
                params.push(*svc_changed_ind_enable as u8);
                params
            }

            Self::Disconnect { reason, .. } => vec![GAPC_DISCONNECT, *reason],
            Self::GetConRssi { .. } => vec![GAPC_GET_CON_RSSI],

            Self::Bond {
                io_cap,
                auth,
                key_size,
                ikey_dist,
                rkey_dist,
                ..
            } => vec![
                GAPC_BOND,
                *io_cap,
                0, // no OOB data
                auth.bits(),
                *key_size,
                *ikey_dist,
                *rkey_dist,
                0, // no security requirement
            ],

            Self::Security { auth, .. } => vec![GAPC_SECURITY_REQ, auth.bits()],

            Self::BondCfm {
                request,
                accept,
                data,
                ..
            } => {
                let mut params = vec![*request, *accept as u8];
                match data {
                    BondCfmData::None => {}
                    BondCfmData::Features {
                        io_cap,
                        auth,
                        key_size,
                        ikey_dist,
                        rkey_dist,
                    } => {
                        params.push(*io_cap);
                        params.push(0);
                        params.push(auth.bits());
                        params.push(*key_size);
                        params.push(*ikey_dist);
                        params.push(*rkey_dist);
                    }
                    BondCfmData::Tk(tk) | BondCfmData::Csrk(tk) => params.extend_from_slice(tk),
                    BondCfmData::Ltk(ltk) => encode_ltk(&mut params, ltk),
                }
                params
            }

            Self::Encrypt { ltk, .. } => {
                let mut params = vec![GAPC_ENCRYPT];
                encode_ltk(&mut params, ltk);
                params
            }

            Self::EncryptCfm {
                found,
                key,
                key_size,
                ..
            } => {
                let mut params = Vec::with_capacity(18);
                params.push(*found as u8);
                params.extend_from_slice(key);
                params.push(*key_size);
                params
            }

            Self::LecbCreate {
                sec_lvl,
                le_psm,
                cid,
                credit,
                ..
            } => {
                let mut params = vec![GAPC_LE_CB_CREATE, *sec_lvl];
                params.extend_from_slice(&le_psm.to_le_bytes());
                params.extend_from_slice(&cid.to_le_bytes());
                params.extend_from_slice(&credit.to_le_bytes());
                params
            }

            Self::LecbDestroy { le_psm, .. } => {
                let mut params = vec![GAPC_LE_CB_DESTROY];
                params.extend_from_slice(&le_psm.to_le_bytes());
                params
            }

            Self::LecbConnect {
                le_psm, cid, credit, ..
            } => {
                let mut params = vec![GAPC_LE_CB_CONNECTION];
                params.extend_from_slice(&le_psm.to_le_bytes());
                params.extend_from_slice(&cid.to_le_bytes());
                params.extend_from_slice(&credit.to_le_bytes());
                params
            }

            Self::LecbConnectCfm { le_psm, status, .. } => {
                let mut params = Vec::with_capacity(4);
                params.extend_from_slice(&le_psm.to_le_bytes());
                params.extend_from_slice(&status.to_le_bytes());
                params
            }

            Self::LecbAdd { le_psm, credit, .. } => {
                let mut params = vec![GAPC_LE_CB_ADDITION];
                params.extend_from_slice(&le_psm.to_le_bytes());
                params.extend_from_slice(&credit.to_le_bytes());
                params
            }

            Self::LecbDisconnect { le_psm, .. } => {
                let mut params = vec![GAPC_LE_CB_DISCONNECTION];
                params.extend_from_slice(&le_psm.to_le_bytes());
                params
            }

            Self::PduSend { dest_cid, data, .. } => {
                let mut params = Vec::with_capacity(4 + data.len());
                params.extend_from_slice(&dest_cid.to_le_bytes());
                // Oversized SDUs are refused before sending
                let len = u16::try_from(data.len()).unwrap_or(u16::MAX);
                params.extend_from_slice(&len.to_le_bytes());
                params.extend_from_slice(data);
                params
            }
        }
    }

    /// Build the wire message for this command
    pub fn to_message(&self) -> WireMessage {
        let (task, conn_idx) = self.destination();
        WireMessage::with_conn(self.msg_id(), task, conn_idx, self.parameters())
    }
}

fn encode_ltk(params: &mut Vec<u8>, ltk: &LongTermKey) {
    params.extend_from_slice(&ltk.key);
    params.extend_from_slice(&ltk.ediv.to_le_bytes());
    params.extend_from_slice(&ltk.rand.to_le_bytes());
    params.push(ltk.key_size);
}
