//! Pairing, bonding and link encryption
//!
//! The controller runs the SMP exchanges; the manager answers its bond
//! requests, keeps the exchanged keys on the device record and reports the
//! outcome. Keys received during an exchange are stored right away but only
//! committed once pairing completes.

use crate::error::{BleError, BleResult};
use crate::events::BleEvent;
use crate::gap::constants::*;
use crate::gap::types::{encrypted_sec_level, AuthReq, BdAddr, SecurityLevel};
use crate::manager::{Continuation, Manager, Reply, ResponseData};
use crate::storage::{IdentityResolvingKey, LongTermKey, SignatureKey};
use crate::waitqueue::ConnFilter;
use crate::wire::command::{BondCfmData, StackCommand};
use crate::wire::constants::*;
use crate::wire::event::{BondInfo, BondRequest};
use log::{debug, info, warn};
use rand::Rng;

/// Keys distributed by both sides
const PAIR_KEY_DIST: u8 = GAP_KDIST_ENCKEY | GAP_KDIST_IDKEY | GAP_KDIST_SIGNKEY;

fn pair_status(status: u8) -> BleError {
    match status {
        SMP_ERROR_REM_PAIRING_NOT_SUPPORTED => BleError::NotSupportedByPeer,
        GAP_ERR_TIMEOUT => BleError::Timeout,
        GAP_ERR_COMMAND_DISALLOWED => BleError::NotAllowed,
        GAP_ERR_INVALID_PARAM => BleError::InvalidParam,
        _ => BleError::Failed,
    }
}

/// Temporary key carrying a passkey in its low bytes
fn passkey_tk(passkey: u32) -> [u8; 16] {
    let mut tk = [0u8; 16];
    tk[..4].copy_from_slice(&passkey.to_le_bytes());
    tk
}

impl Manager {
    fn send_bond_cmd(&mut self, conn_idx: u16, bond: bool, mitm: bool, secure: bool) -> BleResult<()> {
        self.send(StackCommand::Bond {
            conn_idx,
            io_cap: self.params.io_capabilities.to_u8(),
            auth: AuthReq::from_flags(bond, mitm, secure),
            key_size: ENC_KEY_SIZE,
            ikey_dist: PAIR_KEY_DIST,
            rkey_dist: PAIR_KEY_DIST,
        })
    }

    fn send_security_req(&mut self, conn_idx: u16, bond: bool, mitm: bool, secure: bool) -> BleResult<()> {
        self.send(StackCommand::Security {
            conn_idx,
            auth: AuthReq::from_flags(bond, mitm, secure),
        })
    }

    /// `InsufficientResources` once the bonded device table is full
    fn check_bond_room(&self) -> BleResult<()> {
        if self.store.acquire().count_bonded() >= self.config.max_bonded {
            warn!("Already bonded with {} devices", self.config.max_bonded);
            return Err(BleError::InsufficientResources);
        }
        Ok(())
    }

    /// Start encryption with the peer's LTK; `false` when no usable key is known
    fn encrypt_conn_using_ltk(&mut self, conn_idx: u16, auth: AuthReq, continuation: Continuation) -> bool {
        let ltk = {
            let mut guard = self.store.acquire();
            let Some(dev) = guard.find_by_conn_idx(conn_idx) else {
                return false;
            };
            match &dev.remote_ltk {
                Some(ltk) if dev.mitm || !auth.contains(AuthReq::MITM) => ltk.clone(),
                _ => return false,
            }
        };

        match self.send_and_wait(
            StackCommand::Encrypt { conn_idx, ltk },
            ConnFilter::Conn(conn_idx),
            GAPC_CMP_EVT,
            GAPC_ENCRYPT,
            continuation,
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot start encryption on {}: {}", conn_idx, e);
                false
            }
        }
    }

    pub(crate) fn gap_pair(&mut self, conn_idx: u16, bond: bool) -> BleResult<Reply> {
        let (master, bonded, paired) = {
            let mut guard = self.store.acquire();
            let dev = guard.find_by_conn_idx(conn_idx).ok_or(BleError::NotConnected)?;
            (dev.master, dev.bonded, dev.paired)
        };

        // Bonding again replaces the old keys
        if !bond && (paired || bonded) {
            return Err(BleError::AlreadyDone);
        }
        if bond && !bonded {
            self.check_bond_room()?;
        }

        let mitm = self.params.io_capabilities.supports_mitm();
        if master {
            self.send_bond_cmd(conn_idx, bond, mitm, true)?;
        } else {
            self.send_security_req(conn_idx, bond, mitm, true)?;
        }

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_pair_reply(&mut self, conn_idx: u16, accept: bool, bond: bool) -> BleResult<Reply> {
        let bonded = {
            let mut guard = self.store.acquire();
            guard.find_by_conn_idx(conn_idx).ok_or(BleError::NotConnected)?.bonded
        };

        if accept && bond && !bonded {
            self.check_bond_room()?;
        }

        let data = if accept {
            let io_cap = self.params.io_capabilities;
            BondCfmData::Features {
                io_cap: io_cap.to_u8(),
                auth: AuthReq::from_flags(bond, io_cap.supports_mitm(), true),
                key_size: ENC_KEY_SIZE,
                ikey_dist: PAIR_KEY_DIST,
                rkey_dist: PAIR_KEY_DIST,
            }
        } else {
            BondCfmData::None
        };

        self.send(StackCommand::BondCfm {
            conn_idx,
            request: GAPC_PAIRING_RSP,
            accept,
            data,
        })?;

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_passkey_reply(&mut self, conn_idx: u16, accept: bool, passkey: u32) -> BleResult<Reply> {
        if accept && passkey > PASSKEY_MAX {
            return Err(BleError::InvalidParam);
        }
        self.require_connected(conn_idx)?;

        let data = if accept {
            BondCfmData::Tk(passkey_tk(passkey))
        } else {
            BondCfmData::None
        };
        self.send(StackCommand::BondCfm {
            conn_idx,
            request: GAPC_TK_EXCH,
            accept,
            data,
        })?;

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_numeric_reply(&mut self, conn_idx: u16, accept: bool) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;
        self.send(StackCommand::BondCfm {
            conn_idx,
            request: GAPC_TK_EXCH,
            accept,
            data: BondCfmData::None,
        })?;
        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_unpair(&mut self, addr: BdAddr) -> BleResult<Reply> {
        let store = self.store.clone();
        let mut guard = store.acquire();

        let id = guard.find_id(|d| d.addr == addr).ok_or(BleError::NotFound)?;
        guard.remove_pairing(id);
        info!("Unpaired {}", addr);

        let active = guard.get(id).and_then(|d| d.active_conn());
        match active {
            Some(conn_idx) => {
                drop(guard);
                self.disconnect_unpaired(conn_idx);
            }
            None => {
                guard.remove(id);
            }
        }

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_set_sec_level(&mut self, conn_idx: u16, level: SecurityLevel) -> BleResult<Reply> {
        let mitm = level.requires_mitm();
        let secure = level.requires_secure_connections();

        let (master, bonded) = {
            let mut guard = self.store.acquire();
            let dev = guard.find_by_conn_idx(conn_idx).ok_or(BleError::NotConnected)?;
            (dev.master, dev.bonded)
        };

        if master {
            let auth = AuthReq::from_flags(false, mitm, false);
            if !self.encrypt_conn_using_ltk(conn_idx, auth, Continuation::EncryptForSecLevel { conn_idx }) {
                self.send_bond_cmd(conn_idx, bonded, mitm, secure)?;
            }
        } else {
            self.send_security_req(conn_idx, bonded, mitm, secure)?;
        }

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_encrypt_for_sec_level_done(&mut self, conn_idx: u16, status: Option<u8>) {
        let status = match status {
            // The encryption indication reports the new level
            Some(GAP_ERR_NO_ERROR) => return,
            Some(SMP_ERROR_ENC_KEY_MISSING) => BleError::EncKeyMissing,
            Some(_) => BleError::Failed,
            None => BleError::NotConnected,
        };
        self.emit(BleEvent::SetSecLevelFailed { conn_idx, status });
    }

    pub(crate) fn gap_encrypt_for_security_req_done(
        &mut self,
        conn_idx: u16,
        bond: bool,
        mitm: bool,
        status: Option<u8>,
    ) {
        match status {
            None | Some(GAP_ERR_NO_ERROR) => {}
            Some(status) => {
                debug!("Encryption on {} failed ({:#04x}), passing security request on", conn_idx, status);
                self.emit(BleEvent::SecurityRequest { conn_idx, bond, mitm });
            }
        }
    }

    pub(crate) fn gap_security_ind(&mut self, conn_idx: u16, auth: AuthReq) {
        let bond = auth.contains(AuthReq::BOND);
        let mitm = auth.contains(AuthReq::MITM);

        let cont = Continuation::EncryptForSecurityReq { conn_idx, bond, mitm };
        if !self.encrypt_conn_using_ltk(conn_idx, auth, cont) {
            self.emit(BleEvent::SecurityRequest { conn_idx, bond, mitm });
        }
    }

    pub(crate) fn gap_bond_cmp(&mut self, conn_idx: u16, status: u8) {
        if status == GAP_ERR_NO_ERROR {
            return;
        }
        warn!("Bonding on {} failed with {:#04x}", conn_idx, status);
        self.emit(BleEvent::PairCompleted {
            conn_idx,
            status: Err(pair_status(status)),
            bond: false,
            mitm: false,
        });
    }

    pub(crate) fn gap_bond_req_ind(&mut self, conn_idx: u16, request: BondRequest) {
        match request {
            BondRequest::PairingReq { auth } => {
                if auth.contains(AuthReq::SECURE) {
                    if let Some(dev) = self.store.acquire().find_by_conn_idx(conn_idx) {
                        dev.secure = true;
                    }
                }
                self.emit(BleEvent::PairRequest {
                    conn_idx,
                    bond: auth.contains(AuthReq::BOND),
                });
            }
            BondRequest::LtkExchange { key_size } => {
                let mut ltk = LongTermKey::generate(&mut self.rng);
                ltk.key_size = key_size;
                for b in ltk.key.iter_mut().skip(usize::from(key_size)) {
                    *b = 0;
                }

                {
                    let mut guard = self.store.acquire();
                    if let Some(dev) = guard.find_by_conn_idx(conn_idx) {
                        dev.ltk = Some(ltk.clone());
                        guard.mark_dirty(false);
                    }
                }

                self.send_logged(StackCommand::BondCfm {
                    conn_idx,
                    request: GAPC_LTK_EXCH,
                    accept: true,
                    data: BondCfmData::Ltk(ltk),
                });
            }
            BondRequest::CsrkExchange => {
                let csrk = SignatureKey::generate(&mut self.rng);
                let key = csrk.key;

                {
                    let mut guard = self.store.acquire();
                    if let Some(dev) = guard.find_by_conn_idx(conn_idx) {
                        dev.csrk = Some(csrk);
                        guard.mark_dirty(false);
                    }
                }

                self.send_logged(StackCommand::BondCfm {
                    conn_idx,
                    request: GAPC_CSRK_EXCH,
                    accept: true,
                    data: BondCfmData::Csrk(key),
                });
            }
            BondRequest::TkExchange { tk_type, tk } => match tk_type {
                GAP_TK_DISPLAY => {
                    let passkey = self.rng.gen_range(0..=PASSKEY_MAX);
                    self.send_logged(StackCommand::BondCfm {
                        conn_idx,
                        request: GAPC_TK_EXCH,
                        accept: true,
                        data: BondCfmData::Tk(passkey_tk(passkey)),
                    });
                    self.emit(BleEvent::PasskeyNotify { conn_idx, passkey });
                }
                GAP_TK_KEY_ENTRY => self.emit(BleEvent::PasskeyRequest { conn_idx }),
                GAP_TK_KEY_CONFIRM => {
                    let value = u32::from_le_bytes([tk[0], tk[1], tk[2], tk[3]]);
                    self.emit(BleEvent::NumericRequest {
                        conn_idx,
                        num_key: value % (PASSKEY_MAX + 1),
                    });
                }
                _ => {
                    warn!("OOB pairing is not supported, rejecting TK request on {}", conn_idx);
                    self.send_logged(StackCommand::BondCfm {
                        conn_idx,
                        request: GAPC_TK_EXCH,
                        accept: false,
                        data: BondCfmData::None,
                    });
                }
            },
            BondRequest::Other(kind) => debug!("Ignoring bond request {:#04x} on {}", kind, conn_idx),
        }
    }

    pub(crate) fn gap_bond_ind(&mut self, conn_idx: u16, info: BondInfo) {
        let store = self.store.clone();
        let mut guard = store.acquire();

        match info {
            BondInfo::PairingSucceed { auth } => {
                self.params.pairing_successes = self.params.pairing_successes.saturating_add(1);

                let bond = auth.contains(AuthReq::BOND);
                let mitm = auth.contains(AuthReq::MITM);
                let level = encrypted_sec_level(auth);
                let mut level_changed = false;

                if let Some(dev) = guard.find_by_conn_idx(conn_idx) {
                    dev.paired = true;
                    dev.bonded = bond;
                    dev.encrypted = true;
                    dev.mitm = mitm;
                    dev.secure = auth.contains(AuthReq::SECURE);
                    if dev.sec_level != level {
                        dev.sec_level = level;
                        level_changed = true;
                    }
                    if dev.bonded {
                        let id = dev.id();
                        guard.move_to_front(id);
                    }
                }
                guard.mark_dirty(true);
                drop(guard);

                info!("Pairing on {} succeeded (bond: {}, mitm: {})", conn_idx, bond, mitm);
                if level_changed {
                    self.emit(BleEvent::SecLevelChanged { conn_idx, level });
                }
                self.emit(BleEvent::PairCompleted {
                    conn_idx,
                    status: Ok(()),
                    bond,
                    mitm,
                });
            }
            BondInfo::PairingFailed { reason } => {
                self.params.pairing_failures = self.params.pairing_failures.saturating_add(1);

                if let Some(dev) = guard.find_by_conn_idx(conn_idx) {
                    dev.secure = false;
                }
                guard.mark_dirty(true);
                drop(guard);

                let status = match reason {
                    SMP_ERROR_REM_PAIRING_NOT_SUPPORTED => BleError::NotSupportedByPeer,
                    _ => BleError::Failed,
                };
                info!("Pairing on {} failed, reason {:#04x}", conn_idx, reason);
                self.emit(BleEvent::PairCompleted {
                    conn_idx,
                    status: Err(status),
                    bond: false,
                    mitm: false,
                });
            }
            BondInfo::LtkExchange {
                key,
                ediv,
                rand,
                key_size,
            } => {
                if let Some(dev) = guard.find_by_conn_idx(conn_idx) {
                    dev.remote_ltk = Some(LongTermKey::new(rand, ediv, key, key_size));
                    guard.mark_dirty(false);
                }
            }
            BondInfo::CsrkExchange { key } => {
                if let Some(dev) = guard.find_by_conn_idx(conn_idx) {
                    dev.remote_csrk = Some(SignatureKey::new(key));
                    guard.mark_dirty(false);
                }
            }
            BondInfo::IrkExchange { irk, addr } => {
                let Ok(id) = guard.connected_id(conn_idx) else {
                    return;
                };

                // Older records of the same identity are stale
                while let Some(old) = guard.find_id(|d| d.addr == addr && d.id() != id) {
                    guard.remove(old);
                }

                let Some(dev) = guard.get(id) else {
                    return;
                };
                let address = dev.addr;
                dev.irk = Some(IdentityResolvingKey::new(irk));
                dev.addr = addr;
                guard.mark_dirty(false);
                drop(guard);

                debug!("{} has identity {}", address, addr);
                self.emit(BleEvent::AddressResolved {
                    conn_idx,
                    resolved_address: addr,
                    address,
                });
            }
            BondInfo::Other(kind) => debug!("Ignoring bond indication {:#04x} on {}", kind, conn_idx),
        }
    }

    pub(crate) fn gap_encrypt_req_ind(&mut self, conn_idx: u16, ediv: u16, rand: u64) {
        let (known, found) = {
            let mut guard = self.store.acquire();
            match guard.find_by_conn_idx(conn_idx) {
                Some(dev) => {
                    // Secure Connections keys have no EDIV and are kept as the peer's LTK
                    let ltk = if !dev.bonded || ediv == 0 {
                        dev.remote_ltk.as_ref()
                    } else {
                        dev.ltk.as_ref().filter(|k| k.matches(ediv, rand))
                    };
                    (true, ltk.map(|k| (k.key, k.key_size)))
                }
                None => (false, None),
            }
        };

        if known && found.is_none() {
            warn!("No LTK for {} (ediv {:#06x})", conn_idx, ediv);
            self.emit(BleEvent::LtkMissing { conn_idx });
        }

        let (key, key_size) = found.unwrap_or(([0; 16], 0));
        self.send_logged(StackCommand::EncryptCfm {
            conn_idx,
            found: found.is_some(),
            key,
            key_size,
        });
    }

    pub(crate) fn gap_encrypt_ind(&mut self, conn_idx: u16, auth: AuthReq) {
        let level = encrypted_sec_level(auth);
        let mut changed = false;

        if let Some(dev) = self.store.acquire().find_by_conn_idx(conn_idx) {
            dev.encrypted = true;
            // An empty mask is followed by the pairing completion
            if dev.paired && !auth.is_empty() && dev.sec_level != level {
                dev.sec_level = level;
                changed = true;
            }
        }

        debug!("Link {} encrypted", conn_idx);
        if changed {
            self.emit(BleEvent::SecLevelChanged { conn_idx, level });
        }
    }

    pub(crate) fn gap_sign_counter_ind(&mut self, conn_idx: u16, local: u32, peer: u32) {
        let mut guard = self.store.acquire();
        let Some(dev) = guard.find_by_conn_idx(conn_idx) else {
            return;
        };

        let updated = match (dev.csrk.as_mut(), dev.remote_csrk.as_mut()) {
            (Some(csrk), Some(remote)) => {
                csrk.sign_cnt = local;
                remote.sign_cnt = peer;
                true
            }
            _ => false,
        };

        if updated {
            guard.mark_dirty(false);
        } else {
            warn!("Sign counters for {} without both CSRKs", conn_idx);
        }
    }
}
