//! Connection establishment and teardown
//!
//! A connection indication from the controller must be confirmed before the
//! link is usable. When the peer shows up with a resolvable private address
//! and identity keys are known, the address is resolved first and both the
//! confirmation and the `Connected` event wait for the answer.

use crate::error::{BleError, BleResult};
use crate::events::BleEvent;
use crate::gap::constants::REMOTE_USER_TERMINATED_CON;
use crate::gap::types::{AuthReq, BdAddr, ConnParams, OwnAddressType, SecurityLevel};
use crate::manager::{Continuation, Manager, Reply, ResponseData};
use crate::storage::{Device, STORAGE_KEY_SVC_CHANGED_CCC};
use crate::waitqueue::ConnFilter;
use crate::wire::command::StackCommand;
use crate::wire::constants::*;
use log::{debug, info, warn};

/// Address source used by the controller when initiating a connection
fn own_addr_src(addr_type: OwnAddressType) -> u8 {
    match addr_type {
        OwnAddressType::PublicStatic | OwnAddressType::PrivateStatic => GAPM_STATIC_ADDR,
        OwnAddressType::PrivateRandomResolvable => GAPM_GEN_RSLV_ADDR,
        OwnAddressType::PrivateRandomNonResolvable => GAPM_GEN_NON_RSLV_ADDR,
    }
}

fn connect_status(status: u8) -> BleResult<()> {
    match status {
        GAP_ERR_NO_ERROR => Ok(()),
        GAP_ERR_CANCELED => Err(BleError::Canceled),
        GAP_ERR_COMMAND_DISALLOWED => Err(BleError::NotAllowed),
        GAP_ERR_INVALID_PARAM => Err(BleError::InvalidParam),
        GAP_ERR_NOT_SUPPORTED | GAP_ERR_PRIVACY_CFG_PB => Err(BleError::NotSupported),
        LL_ERR_UNSPECIFIED_ERROR => Err(BleError::InsufficientBandwidth),
        _ => Err(BleError::Failed),
    }
}

fn disconnect_status(status: u8) -> BleError {
    match status {
        GAP_ERR_INVALID_PARAM | LL_ERR_INVALID_HCI_PARAM => BleError::InvalidParam,
        LL_ERR_COMMAND_DISALLOWED => BleError::NotAllowed,
        _ => BleError::Failed,
    }
}

fn resolution_status(status: u8) -> BleError {
    match status {
        GAP_ERR_COMMAND_DISALLOWED => BleError::NotAllowed,
        GAP_ERR_INVALID_PARAM => BleError::InvalidParam,
        GAP_ERR_NOT_FOUND => BleError::NotFound,
        _ => BleError::Failed,
    }
}

/// Confirmation handing the controller what it needs to know about a peer
fn connection_cfm(conn_idx: u16, dev: &Device) -> StackCommand {
    let mut auth = AuthReq::from_flags(dev.bonded, dev.mitm, dev.secure).bits();
    if dev.remote_ltk.is_some() {
        auth |= GAPC_LTK_MASK;
    }

    let (lcsrk, lsign_counter) = dev.csrk.as_ref().map_or(([0; 16], 0), |k| (k.key, k.sign_cnt));
    let (rcsrk, rsign_counter) = dev
        .remote_csrk
        .as_ref()
        .map_or(([0; 16], 0), |k| (k.key, k.sign_cnt));

    let svc_changed_ccc = dev
        .app_value(STORAGE_KEY_SVC_CHANGED_CCC)
        .and_then(|v| v.data.get(..2))
        .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]));

    StackCommand::ConnectionCfm {
        conn_idx,
        lcsrk,
        lsign_counter,
        rcsrk,
        rsign_counter,
        auth,
        svc_changed_ind_enable: svc_changed_ccc & GATT_CCC_INDICATIONS != 0,
    }
}

impl Manager {
    pub(crate) fn gap_connect(
        &mut self,
        peer: BdAddr,
        conn_params: ConnParams,
        ce_len_min: u16,
        ce_len_max: u16,
    ) -> BleResult<Reply> {
        if !self.params.role.is_central() {
            return Err(BleError::NotAllowed);
        }

        let store = self.store.clone();
        let mut guard = store.acquire();

        if self.params.connecting || guard.find_id(|d| d.connecting).is_some() {
            return Err(BleError::Busy);
        }
        if guard.find_id(|d| d.addr == peer && d.connected).is_some() {
            return Err(BleError::AlreadyDone);
        }

        let ce_len_min = if ce_len_min != 0 { ce_len_min } else { self.config.ce_len_min };
        let ce_len_max = if ce_len_max != 0 { ce_len_max } else { self.config.ce_len_max };

        self.send(StackCommand::StartConnection {
            addr_src: own_addr_src(self.params.own_addr.addr_type),
            scan_interval: self.params.scan_interval,
            scan_window: self.params.scan_window,
            conn_params,
            ce_len_min,
            ce_len_max,
            peer,
        })?;

        if let Some(dev) = guard.find_by_addr(&peer, true) {
            dev.connecting = true;
            dev.ce_len_min = ce_len_min;
            dev.ce_len_max = ce_len_max;
        }
        self.params.connecting = true;
        info!("Connecting to {}", peer);

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_connect_cmp(&mut self, status: u8) {
        self.params.connecting = false;

        if status != GAP_ERR_NO_ERROR {
            let store = self.store.clone();
            let mut guard = store.acquire();
            if let Some(id) = guard.find_id(|d| d.connecting) {
                if let Some(dev) = guard.get(id) {
                    dev.connecting = false;
                    if !dev.bonded {
                        guard.remove(id);
                    }
                }
            }
        }

        let result = connect_status(status);
        debug!("Connection attempt completed: {:?}", result);
        self.emit(BleEvent::ConnectionCompleted { status: result });
    }

    pub(crate) fn gap_connect_cancel(&mut self) -> BleResult<Reply> {
        if !self.params.connecting {
            return Err(BleError::NotAllowed);
        }
        self.send(StackCommand::Cancel)?;
        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_disconnect(&mut self, conn_idx: u16, reason: u8) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;
        self.send(StackCommand::Disconnect { conn_idx, reason })?;
        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_disconnect_cmp(&mut self, conn_idx: u16, status: u8) {
        if status == GAP_ERR_NO_ERROR {
            return;
        }
        warn!("Disconnect of {} failed with {:#04x}", conn_idx, status);
        self.emit(BleEvent::DisconnectFailed {
            conn_idx,
            status: disconnect_status(status),
        });
    }

    pub(crate) fn gap_conn_rssi(&mut self, conn_idx: u16) -> BleResult<Reply> {
        self.require_connected(conn_idx)?;
        self.send_and_wait(
            StackCommand::GetConRssi { conn_idx },
            ConnFilter::Conn(conn_idx),
            GAPC_CON_RSSI_IND,
            0,
            Continuation::RssiGet,
        )?;
        Ok(Reply::Deferred)
    }

    pub(crate) fn gap_connected_evt(
        &mut self,
        conn_idx: u16,
        con_interval: u16,
        con_latency: u16,
        sup_to: u16,
        peer_addr: BdAddr,
    ) {
        let event = BleEvent::Connected {
            conn_idx,
            own_addr: self.params.own_addr,
            peer_addr,
            conn_params: ConnParams {
                interval_min: con_interval,
                interval_max: con_interval,
                slave_latency: con_latency,
                sup_timeout: sup_to,
            },
        };

        let store = self.store.clone();
        let mut guard = store.acquire();

        let Some(dev) = guard.find_by_addr(&peer_addr, true) else {
            return;
        };
        dev.conn_idx = Some(conn_idx);
        dev.connected = true;
        dev.mtu = ATT_DEFAULT_MTU;
        dev.master = dev.connecting;
        dev.connecting = false;
        let id = dev.id();
        info!(
            "Connected to {} as {} ({})",
            peer_addr,
            conn_idx,
            if dev.master { "master" } else { "slave" }
        );

        if peer_addr.is_resolvable_private() {
            let irks = guard.irks();
            if !irks.is_empty() {
                let resolve = StackCommand::ResolveAddr {
                    addr: peer_addr.bytes,
                    irks,
                };
                let cont = Continuation::ResolveOnConnect {
                    event: event.clone(),
                    conn_idx,
                };
                match self.send_and_wait(resolve, ConnFilter::Any, GAPM_CMP_EVT, GAPM_RESOLV_ADDR, cont) {
                    Ok(()) => {
                        if let Some(dev) = guard.get(id) {
                            dev.resolving = true;
                        }
                        return;
                    }
                    Err(e) => warn!("Cannot resolve {} ({}), confirming as is", peer_addr, e),
                }
            }
        }

        let cfm = guard.get(id).map(|dev| connection_cfm(conn_idx, dev));
        drop(guard);

        self.emit(event);
        if let Some(cfm) = cfm {
            self.send_logged(cfm);
        }
    }

    /// Finish a connection held back for address resolution
    pub(crate) fn gap_resolve_on_connect_done(&mut self, conn_idx: u16, mut event: BleEvent, status: Option<u8>) {
        let store = self.store.clone();
        let mut guard = store.acquire();

        let Some(dev) = guard.find_by_conn_idx(conn_idx) else {
            debug!("Connection {} gone before its address was resolved", conn_idx);
            return;
        };

        if status == Some(GAP_ERR_NO_ERROR) {
            if let BleEvent::Connected { peer_addr, .. } = &mut event {
                if dev.addr != *peer_addr {
                    debug!("{} resolved to {}", peer_addr, dev.addr);
                    *peer_addr = dev.addr;
                }
            }
        }
        dev.resolving = false;
        let cfm = connection_cfm(conn_idx, dev);
        drop(guard);

        self.emit(event);
        self.send_logged(cfm);
    }

    pub(crate) fn gap_addr_solved_ind(&mut self, addr: [u8; 6], irk: [u8; 16]) {
        let address = BdAddr::random(addr);
        let store = self.store.clone();
        let mut guard = store.acquire();

        let Some(irk_id) = guard.find_id(|d| d.irk.as_ref().map_or(false, |k| k.key == irk)) else {
            debug!("No device owns the IRK that resolved {}", address);
            return;
        };

        if self.params.addr_resolv_req_pending > 0 {
            let Some(dev) = guard.get(irk_id) else {
                return;
            };
            let event = BleEvent::AddressResolved {
                conn_idx: dev.active_conn().unwrap_or(CONN_IDX_INVALID),
                resolved_address: dev.addr,
                address,
            };
            drop(guard);
            self.emit(event);
            return;
        }

        // Resolution on connect: the link belongs to the identity record
        let Some(temp) = guard.find_by_addr(&address, false) else {
            return;
        };
        if !temp.connected || temp.id() == irk_id {
            return;
        }
        let (temp_id, conn_idx, master) = (temp.id(), temp.conn_idx, temp.master);

        if let Some(dev) = guard.get(irk_id) {
            dev.conn_idx = conn_idx;
            dev.master = master;
            dev.connected = true;
            dev.mtu = ATT_DEFAULT_MTU;
            debug!("{} is {}", address, dev.addr);
        }
        guard.remove(temp_id);
    }

    pub(crate) fn gap_address_resolve(&mut self, addr: BdAddr) -> BleResult<Reply> {
        if !addr.is_resolvable_private() {
            return Err(BleError::InvalidParam);
        }

        let irks = self.store.acquire().irks();
        if irks.is_empty() {
            return Err(BleError::NotFound);
        }

        self.send(StackCommand::ResolveAddr {
            addr: addr.bytes,
            irks,
        })?;
        self.params.addr_resolv_req_pending = self.params.addr_resolv_req_pending.saturating_add(1);

        Ok(Reply::Now(ResponseData::None))
    }

    pub(crate) fn gap_address_resolve_cmp(&mut self, status: u8) {
        self.params.addr_resolv_req_pending = self.params.addr_resolv_req_pending.saturating_sub(1);

        if status != GAP_ERR_NO_ERROR {
            self.emit(BleEvent::AddressResolutionFailed {
                status: resolution_status(status),
            });
        }
    }

    pub(crate) fn gap_disconnected_evt(&mut self, conn_idx: u16, reason: u8) {
        self.l2cap_teardown(conn_idx);

        let store = self.store.clone();
        let mut guard = store.acquire();

        let Ok(id) = guard.connected_id(conn_idx) else {
            debug!("Disconnection of unknown connection {}", conn_idx);
            return;
        };
        let Some(dev) = guard.get(id) else {
            return;
        };
        let address = dev.addr;

        if dev.bonded {
            dev.connected = false;
            dev.encrypted = false;
            dev.resolving = false;
            dev.sec_level = SecurityLevel::Level1;
            dev.conn_idx = None;
            guard.app_value_remove_np(id);
        } else {
            guard.remove(id);
        }
        drop(guard);

        self.flush_waiters(conn_idx);

        info!("Disconnected from {} ({}), reason {:#04x}", address, conn_idx, reason);
        self.emit(BleEvent::Disconnected {
            conn_idx,
            reason,
            address,
        });
    }

    /// Drop the link to an unpaired peer
    pub(crate) fn disconnect_unpaired(&mut self, conn_idx: u16) {
        self.send_logged(StackCommand::Disconnect {
            conn_idx,
            reason: REMOTE_USER_TERMINATED_CON,
        });
    }
}
