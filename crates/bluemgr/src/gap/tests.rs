//! Tests for connection management and security

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::ManagerConfig;
    use crate::error::BleError;
    use crate::events::BleEvent;
    use crate::manager::testing::{connection_req, peer, Harness};
    use crate::manager::{Command, Opcode, Response, ResponseData};
    use crate::storage::{
        AppValue, IdentityResolvingKey, LongTermKey, MemoryPersistence, StorageState, StoredDevice,
        STORAGE_KEY_SVC_CHANGED_CCC,
    };
    use crate::wire::constants::*;
    use crate::wire::event::{BondInfo, BondRequest, ControllerEvent};

    const IRK: [u8; 16] = [0x11; 16];

    fn stored(addr: BdAddr) -> StoredDevice {
        StoredDevice {
            addr,
            mitm: false,
            secure: false,
            ltk: None,
            remote_ltk: None,
            irk: None,
            csrk: None,
            remote_csrk: None,
            app_values: Vec::new(),
        }
    }

    fn with_stored(devices: Vec<StoredDevice>) -> Harness {
        Harness::with_persistence(ManagerConfig::default(), MemoryPersistence::with_devices(devices))
    }

    fn connect_cmd(addr: BdAddr) -> Command {
        Command::Connect {
            peer: addr,
            conn_params: ConnParams::default(),
            ce_len_min: 0,
            ce_len_max: 0,
        }
    }

    fn ok(opcode: Opcode) -> Option<Response> {
        Some(Response {
            opcode,
            result: Ok(ResponseData::None),
        })
    }

    /// Connect to `addr` as master and forget the resulting traffic
    fn connect_as_master(h: &mut Harness, conn_idx: u16, addr: BdAddr) {
        assert_eq!(h.command(connect_cmd(addr)), ok(Opcode::GAP_CONNECT));
        h.connect_peer(conn_idx, addr);
        h.gapm_cmp(GAPM_CONNECTION_DIRECT, GAP_ERR_NO_ERROR);
        h.take_events();
    }

    fn bond(h: &mut Harness, conn_idx: u16, info: BondInfo) {
        h.inject(ControllerEvent::Bond { conn_idx, info });
    }

    fn bond_req(h: &mut Harness, conn_idx: u16, request: BondRequest) {
        h.inject(ControllerEvent::BondReq { conn_idx, request });
    }

    /// Resolvable private address
    fn rpa() -> BdAddr {
        BdAddr::random([0x01, 0x02, 0x03, 0x04, 0x05, 0x45])
    }

    #[test]
    fn test_security_level_mapping() {
        assert_eq!(sec_level(false, false), SecurityLevel::Level1);
        assert_eq!(sec_level(true, false), SecurityLevel::Level3);
        assert_eq!(sec_level(false, true), SecurityLevel::Level2);
        assert_eq!(sec_level(true, true), SecurityLevel::Level4);

        assert_eq!(sec_level_from_auth(AuthReq::BOND), SecurityLevel::Level2);
        assert_eq!(sec_level_from_auth(AuthReq::empty()), SecurityLevel::Level1);
        assert_eq!(
            sec_level_from_auth(AuthReq::BOND | AuthReq::MITM | AuthReq::SECURE),
            SecurityLevel::Level4
        );

        // An encrypted link is never below level 2
        assert_eq!(encrypted_sec_level(AuthReq::empty()), SecurityLevel::Level2);
        assert_eq!(encrypted_sec_level(AuthReq::MITM), SecurityLevel::Level3);
        assert_eq!(
            encrypted_sec_level(AuthReq::MITM | AuthReq::SECURE),
            SecurityLevel::Level4
        );
    }

    #[test]
    fn test_address_display() {
        assert_eq!(peer(0xAB).to_string(), "AB:50:40:30:20:10");
        assert_eq!(rpa().to_string(), "45:05:04:03:02:01/r");
    }

    #[test]
    fn test_connect_as_master() {
        let mut h = Harness::new();
        let addr = peer(1);

        assert_eq!(h.command(connect_cmd(addr)), ok(Opcode::GAP_CONNECT));
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_id, GAPM_START_CONNECTION_CMD);
        assert_eq!(sent[0].param[1], GAPM_STATIC_ADDR);
        // Connection event length falls back to the configured bounds
        assert_eq!(&sent[0].param[14..18], &[0x00, 0x00, 0x08, 0x00]);
        assert!(h.manager.params().connecting);

        let resp = h.command(connect_cmd(peer(2))).unwrap();
        assert_eq!(resp.result, Err(BleError::Busy));

        h.inject(connection_req(0, addr));
        match h.take_events().as_slice() {
            [BleEvent::Connected {
                conn_idx: 0,
                peer_addr,
                conn_params,
                ..
            }] => {
                assert_eq!(*peer_addr, addr);
                assert_eq!(conn_params.interval_min, 0x18);
                assert_eq!(conn_params.sup_timeout, 0x48);
            }
            other => panic!("unexpected events {:?}", other),
        }
        let cfm = h.transport.last_message(GAPC_CONNECTION_CFM).unwrap();
        assert_eq!(cfm.param[40], 0); // nothing known about the peer

        h.gapm_cmp(GAPM_CONNECTION_DIRECT, GAP_ERR_NO_ERROR);
        assert_eq!(h.take_events(), vec![BleEvent::ConnectionCompleted { status: Ok(()) }]);
        assert!(!h.manager.params().connecting);

        let mut guard = h.store.acquire();
        let dev = guard.find_by_conn_idx(0).unwrap();
        assert!(dev.master);
        assert!(!dev.connecting);
    }

    #[test]
    fn test_connect_errors() {
        let mut h = Harness::new();
        let resp = h.command(Command::ConnectCancel).unwrap();
        assert_eq!(resp.result, Err(BleError::NotAllowed));

        h.connect_peer(0, peer(1));
        let resp = h.command(connect_cmd(peer(1))).unwrap();
        assert_eq!(resp.result, Err(BleError::AlreadyDone));
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_peripheral_only_device_cannot_connect() {
        let mut config = ManagerConfig::default();
        config.role = Role::Peripheral;
        let mut h = Harness::with_config(config);

        let resp = h.command(connect_cmd(peer(1))).unwrap();
        assert_eq!(resp.result, Err(BleError::NotAllowed));
        assert!(h.sent().is_empty());
        assert!(h.store.acquire().is_empty());
    }

    #[test]
    fn test_cancelled_connect_drops_record() {
        let mut h = Harness::new();
        h.command(connect_cmd(peer(1)));
        assert_eq!(h.command(Command::ConnectCancel), ok(Opcode::GAP_CONNECT_CANCEL));
        assert!(h.transport.last_message(GAPM_CANCEL_CMD).is_some());

        h.gapm_cmp(GAPM_CONNECTION_DIRECT, GAP_ERR_CANCELED);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::ConnectionCompleted {
                status: Err(BleError::Canceled)
            }]
        );
        assert!(h.store.acquire().find_by_addr(&peer(1), false).is_none());
        assert!(!h.manager.params().connecting);
    }

    #[test]
    fn test_disconnect() {
        let mut h = Harness::new();
        let resp = h.command(Command::Disconnect {
            conn_idx: 0,
            reason: REMOTE_USER_TERMINATED_CON,
        });
        assert_eq!(resp.unwrap().result, Err(BleError::NotConnected));

        h.connect_peer(0, peer(1));
        let resp = h.command(Command::Disconnect {
            conn_idx: 0,
            reason: REMOTE_USER_TERMINATED_CON,
        });
        assert_eq!(resp, ok(Opcode::GAP_DISCONNECT));
        let sent = h.sent();
        assert_eq!(sent[0].msg_id, GAPC_DISCONNECT_CMD);
        assert_eq!(sent[0].param, vec![GAPC_DISCONNECT, REMOTE_USER_TERMINATED_CON]);

        h.cmp(0, GAPC_DISCONNECT, LL_ERR_COMMAND_DISALLOWED);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::DisconnectFailed {
                conn_idx: 0,
                status: BleError::NotAllowed
            }]
        );
    }

    #[test]
    fn test_rssi_read_and_flush() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        assert!(h.command(Command::ConnRssi { conn_idx: 0 }).is_none());
        h.inject(ControllerEvent::ConRssi { conn_idx: 0, rssi: -60 });
        assert_eq!(
            h.response(),
            Some(Response {
                opcode: Opcode::GAP_CONN_RSSI,
                result: Ok(ResponseData::Rssi(-60)),
            })
        );

        // Link lost before the controller answered
        assert!(h.command(Command::ConnRssi { conn_idx: 0 }).is_none());
        h.inject(ControllerEvent::Disconnected {
            conn_idx: 0,
            conhdl: 0,
            reason: 0x08,
        });
        assert_eq!(h.response().unwrap().result, Err(BleError::NotConnected));
    }

    #[test]
    fn test_bonded_device_survives_disconnect() {
        let mut h = Harness::new();
        let addr = peer(1);
        h.connect_peer(0, addr);

        assert_eq!(h.command(Command::Pair { conn_idx: 0, bond: true }), ok(Opcode::GAP_PAIR));
        // Slave side asks the master to start pairing
        let sent = h.sent();
        assert_eq!(sent[0].msg_id, GAPC_SECURITY_CMD);
        assert_eq!(sent[0].param[1], (AuthReq::BOND | AuthReq::SECURE).bits());

        bond(
            &mut h,
            0,
            BondInfo::LtkExchange {
                key: [0x33; 16],
                ediv: 0x1234,
                rand: 7,
                key_size: 16,
            },
        );
        assert_eq!(h.store.acquire().state(), StorageState::Dirty);

        bond(&mut h, 0, BondInfo::PairingSucceed { auth: AuthReq::BOND });
        assert_eq!(
            h.take_events(),
            vec![
                BleEvent::SecLevelChanged {
                    conn_idx: 0,
                    level: SecurityLevel::Level2
                },
                BleEvent::PairCompleted {
                    conn_idx: 0,
                    status: Ok(()),
                    bond: true,
                    mitm: false
                },
            ]
        );
        assert_eq!(h.store.acquire().state(), StorageState::Clean);
        assert_eq!(h.persistence.stored().len(), 1);
        assert_eq!(h.manager.params().pairing_successes, 1);

        h.inject(ControllerEvent::Disconnected {
            conn_idx: 0,
            conhdl: 0,
            reason: 0x13,
        });
        assert_eq!(
            h.take_events(),
            vec![BleEvent::Disconnected {
                conn_idx: 0,
                reason: 0x13,
                address: addr
            }]
        );

        let mut guard = h.store.acquire();
        let dev = guard.find_by_addr(&addr, false).unwrap();
        assert!(dev.bonded);
        assert!(!dev.connected);
        assert!(!dev.encrypted);
        assert_eq!(dev.sec_level, SecurityLevel::Level1);
        assert_eq!(dev.remote_ltk.as_ref().map(|k| k.ediv), Some(0x1234));
    }

    #[test]
    fn test_just_works_pairing_encrypts_at_level2() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        bond(&mut h, 0, BondInfo::PairingSucceed { auth: AuthReq::empty() });
        assert_eq!(
            h.take_events(),
            vec![
                BleEvent::SecLevelChanged {
                    conn_idx: 0,
                    level: SecurityLevel::Level2
                },
                BleEvent::PairCompleted {
                    conn_idx: 0,
                    status: Ok(()),
                    bond: false,
                    mitm: false
                },
            ]
        );

        let mut guard = h.store.acquire();
        let dev = guard.find_by_conn_idx(0).unwrap();
        assert!(dev.paired && dev.encrypted && !dev.bonded);
        assert_eq!(dev.sec_level, SecurityLevel::Level2);
    }

    #[test]
    fn test_unbonded_device_removed_on_disconnect() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));
        h.inject(ControllerEvent::Disconnected {
            conn_idx: 0,
            conhdl: 0,
            reason: 0x08,
        });
        assert_eq!(h.take_events().len(), 1);
        assert!(h.store.acquire().find_by_addr(&peer(1), false).is_none());
    }

    #[test]
    fn test_pair_errors() {
        let mut config = ManagerConfig::default();
        config.max_bonded = 0;
        let mut h = Harness::with_config(config);

        let resp = h.command(Command::Pair { conn_idx: 0, bond: true }).unwrap();
        assert_eq!(resp.result, Err(BleError::NotConnected));

        h.connect_peer(0, peer(1));
        let resp = h.command(Command::Pair { conn_idx: 0, bond: true }).unwrap();
        assert_eq!(resp.result, Err(BleError::InsufficientResources));

        bond(&mut h, 0, BondInfo::PairingSucceed { auth: AuthReq::empty() });
        h.take_events();
        let resp = h.command(Command::Pair { conn_idx: 0, bond: false }).unwrap();
        assert_eq!(resp.result, Err(BleError::AlreadyDone));
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_pair_as_master_sends_bond_command() {
        let mut config = ManagerConfig::default();
        config.io_capability = IoCapability::DisplayYesNo;
        let mut h = Harness::with_config(config);
        connect_as_master(&mut h, 0, peer(1));

        h.command(Command::Pair { conn_idx: 0, bond: true });
        let cmd = h.transport.last_message(GAPC_BOND_CMD).unwrap();
        assert_eq!(cmd.param[0], GAPC_BOND);
        assert_eq!(cmd.param[1], IoCapability::DisplayYesNo.to_u8());
        assert_eq!(cmd.param[3], (AuthReq::BOND | AuthReq::MITM | AuthReq::SECURE).bits());
        assert_eq!(cmd.param[4], ENC_KEY_SIZE);
    }

    #[test]
    fn test_pairing_request_and_reply() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        bond_req(
            &mut h,
            0,
            BondRequest::PairingReq {
                auth: AuthReq::BOND | AuthReq::SECURE,
            },
        );
        assert_eq!(h.take_events(), vec![BleEvent::PairRequest { conn_idx: 0, bond: true }]);
        assert!(h.store.acquire().find_by_conn_idx(0).unwrap().secure);

        assert_eq!(
            h.command(Command::PairReply {
                conn_idx: 0,
                accept: true,
                bond: true
            }),
            ok(Opcode::GAP_PAIR_REPLY)
        );
        let cfm = h.transport.last_message(GAPC_BOND_CFM).unwrap();
        assert_eq!(cfm.param[0], GAPC_PAIRING_RSP);
        assert_eq!(cfm.param[1], 1);
        assert_eq!(cfm.param[2], IoCapability::NoInputNoOutput.to_u8());
        assert_eq!(cfm.param[4], (AuthReq::BOND | AuthReq::SECURE).bits());
    }

    #[test]
    fn test_passkey_display() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        bond_req(
            &mut h,
            0,
            BondRequest::TkExchange {
                tk_type: GAP_TK_DISPLAY,
                tk: [0; 16],
            },
        );
        let cfm = h.transport.last_message(GAPC_BOND_CFM).unwrap();
        assert_eq!(cfm.param[0], GAPC_TK_EXCH);
        let shown = u32::from_le_bytes([cfm.param[2], cfm.param[3], cfm.param[4], cfm.param[5]]);
        assert!(shown <= PASSKEY_MAX);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::PasskeyNotify {
                conn_idx: 0,
                passkey: shown
            }]
        );
    }

    #[test]
    fn test_passkey_entry_and_numeric_comparison() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        bond_req(
            &mut h,
            0,
            BondRequest::TkExchange {
                tk_type: GAP_TK_KEY_ENTRY,
                tk: [0; 16],
            },
        );
        assert_eq!(h.take_events(), vec![BleEvent::PasskeyRequest { conn_idx: 0 }]);

        let resp = h.command(Command::PasskeyReply {
            conn_idx: 0,
            accept: true,
            passkey: 1_000_000,
        });
        assert_eq!(resp.unwrap().result, Err(BleError::InvalidParam));

        h.command(Command::PasskeyReply {
            conn_idx: 0,
            accept: true,
            passkey: 123_456,
        });
        let cfm = h.transport.last_message(GAPC_BOND_CFM).unwrap();
        assert_eq!(&cfm.param[..6], &[GAPC_TK_EXCH, 1, 0x40, 0xE2, 0x01, 0x00]);

        let mut tk = [0u8; 16];
        tk[..4].copy_from_slice(&1_234_567u32.to_le_bytes());
        bond_req(
            &mut h,
            0,
            BondRequest::TkExchange {
                tk_type: GAP_TK_KEY_CONFIRM,
                tk,
            },
        );
        assert_eq!(
            h.take_events(),
            vec![BleEvent::NumericRequest {
                conn_idx: 0,
                num_key: 234_567
            }]
        );

        assert_eq!(
            h.command(Command::NumericReply { conn_idx: 0, accept: false }),
            ok(Opcode::GAP_NUMERIC_REPLY)
        );
        let cfm = h.transport.last_message(GAPC_BOND_CFM).unwrap();
        assert_eq!(cfm.param, vec![GAPC_TK_EXCH, 0]);
    }

    #[test]
    fn test_local_keys_are_generated_and_kept() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        bond_req(&mut h, 0, BondRequest::LtkExchange { key_size: 16 });
        let cfm = h.transport.last_message(GAPC_BOND_CFM).unwrap();
        assert_eq!(&cfm.param[..2], &[GAPC_LTK_EXCH, 1]);

        bond_req(&mut h, 0, BondRequest::CsrkExchange);
        let cfm = h.transport.last_message(GAPC_BOND_CFM).unwrap();
        assert_eq!(&cfm.param[..2], &[GAPC_CSRK_EXCH, 1]);

        let mut guard = h.store.acquire();
        assert_eq!(guard.state(), StorageState::Dirty);
        let dev = guard.find_by_conn_idx(0).unwrap();
        assert_eq!(dev.ltk.as_ref().map(|k| k.key_size), Some(16));
        assert_eq!(dev.csrk.as_ref().map(|k| k.key.to_vec()), Some(cfm.param[2..18].to_vec()));
    }

    #[test]
    fn test_pairing_failures() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        bond(
            &mut h,
            0,
            BondInfo::PairingFailed {
                reason: SMP_ERROR_REM_PAIRING_NOT_SUPPORTED,
            },
        );
        h.cmp(0, GAPC_BOND, GAP_ERR_TIMEOUT);
        assert_eq!(
            h.take_events(),
            vec![
                BleEvent::PairCompleted {
                    conn_idx: 0,
                    status: Err(BleError::NotSupportedByPeer),
                    bond: false,
                    mitm: false
                },
                BleEvent::PairCompleted {
                    conn_idx: 0,
                    status: Err(BleError::Timeout),
                    bond: false,
                    mitm: false
                },
            ]
        );
        assert_eq!(h.manager.params().pairing_failures, 1);
    }

    #[test]
    fn test_encrypt_request_lookup() {
        let mut dev = stored(peer(1));
        dev.ltk = Some(LongTermKey::new(7, 0x1234, [0x44; 16], 16));
        let mut h = with_stored(vec![dev]);
        h.connect_peer(0, peer(1));

        h.inject(ControllerEvent::EncryptReq {
            conn_idx: 0,
            ediv: 0x1234,
            rand: 7,
        });
        let cfm = h.transport.last_message(GAPC_ENCRYPT_CFM).unwrap();
        assert_eq!(cfm.param[0], 1);
        assert_eq!(&cfm.param[1..17], &[0x44; 16]);
        assert_eq!(cfm.param[17], 16);
        assert!(h.take_events().is_empty());

        h.inject(ControllerEvent::EncryptReq {
            conn_idx: 0,
            ediv: 0x1234,
            rand: 8,
        });
        let cfm = h.transport.last_message(GAPC_ENCRYPT_CFM).unwrap();
        assert_eq!(cfm.param[0], 0);
        assert_eq!(h.take_events(), vec![BleEvent::LtkMissing { conn_idx: 0 }]);
    }

    #[test]
    fn test_set_sec_level_with_known_key() {
        let mut dev = stored(peer(1));
        dev.remote_ltk = Some(LongTermKey::new(1, 0x0101, [0x55; 16], 16));
        let mut h = with_stored(vec![dev]);
        connect_as_master(&mut h, 0, peer(1));

        assert_eq!(
            h.command(Command::SetSecLevel {
                conn_idx: 0,
                level: SecurityLevel::Level2
            }),
            ok(Opcode::GAP_SET_SEC_LEVEL)
        );
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_id, GAPC_ENCRYPT_CMD);

        h.cmp(0, GAPC_ENCRYPT, SMP_ERROR_ENC_KEY_MISSING);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::SetSecLevelFailed {
                conn_idx: 0,
                status: BleError::EncKeyMissing
            }]
        );

        // The stored key has no MITM protection, level 3 needs fresh pairing
        h.command(Command::SetSecLevel {
            conn_idx: 0,
            level: SecurityLevel::Level3,
        });
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_id, GAPC_BOND_CMD);
        assert_eq!(sent[0].param[3], (AuthReq::BOND | AuthReq::MITM).bits());
    }

    #[test]
    fn test_pending_encryption_fails_on_link_loss() {
        let mut dev = stored(peer(1));
        dev.remote_ltk = Some(LongTermKey::new(1, 0x0101, [0x55; 16], 16));
        let mut h = with_stored(vec![dev]);
        connect_as_master(&mut h, 0, peer(1));

        h.command(Command::SetSecLevel {
            conn_idx: 0,
            level: SecurityLevel::Level2,
        });
        h.inject(ControllerEvent::Disconnected {
            conn_idx: 0,
            conhdl: 0,
            reason: 0x08,
        });
        assert_eq!(
            h.take_events(),
            vec![
                BleEvent::SetSecLevelFailed {
                    conn_idx: 0,
                    status: BleError::NotConnected
                },
                BleEvent::Disconnected {
                    conn_idx: 0,
                    reason: 0x08,
                    address: peer(1)
                },
            ]
        );
    }

    #[test]
    fn test_security_request() {
        let mut dev = stored(peer(2));
        dev.remote_ltk = Some(LongTermKey::new(1, 0x0101, [0x55; 16], 16));
        let mut h = with_stored(vec![dev]);
        h.connect_peer(0, peer(1));
        h.connect_peer(1, peer(2));

        // No key for the first peer: the application decides
        h.inject(ControllerEvent::SecurityReq {
            conn_idx: 0,
            auth: AuthReq::BOND,
        });
        assert_eq!(
            h.take_events(),
            vec![BleEvent::SecurityRequest {
                conn_idx: 0,
                bond: true,
                mitm: false
            }]
        );

        // Known peer: encryption is started without asking
        h.inject(ControllerEvent::SecurityReq {
            conn_idx: 1,
            auth: AuthReq::BOND,
        });
        assert!(h.take_events().is_empty());
        assert!(h.transport.last_message(GAPC_ENCRYPT_CMD).is_some());
        h.cmp(1, GAPC_ENCRYPT, GAP_ERR_NO_ERROR);
        assert!(h.take_events().is_empty());

        h.inject(ControllerEvent::Encrypted {
            conn_idx: 1,
            auth: AuthReq::BOND,
        });
        assert_eq!(
            h.take_events(),
            vec![BleEvent::SecLevelChanged {
                conn_idx: 1,
                level: SecurityLevel::Level2
            }]
        );
        assert!(h.store.acquire().find_by_conn_idx(1).unwrap().encrypted);
    }

    #[test]
    fn test_private_address_resolved_before_connected() {
        let identity = peer(9);
        let mut dev = stored(identity);
        dev.irk = Some(IdentityResolvingKey::new(IRK));
        dev.app_values.push(AppValue {
            key: STORAGE_KEY_SVC_CHANGED_CCC,
            persistent: true,
            data: vec![GATT_CCC_INDICATIONS as u8, 0x00],
        });
        let mut h = with_stored(vec![dev]);

        h.inject(connection_req(0, rpa()));
        assert!(h.take_events().is_empty());
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_id, GAPM_RESOLV_ADDR_CMD);
        assert_eq!(sent[0].param[7], 1); // one IRK

        h.inject(ControllerEvent::AddrSolved {
            addr: rpa().bytes,
            irk: IRK,
        });
        assert!(h.store.acquire().find_by_addr(&rpa(), false).is_none());

        h.gapm_cmp(GAPM_RESOLV_ADDR, GAP_ERR_NO_ERROR);
        match h.take_events().as_slice() {
            [BleEvent::Connected { peer_addr, .. }] => assert_eq!(*peer_addr, identity),
            other => panic!("unexpected events {:?}", other),
        }
        let cfm = h.transport.last_message(GAPC_CONNECTION_CFM).unwrap();
        assert_eq!(cfm.param[40], AuthReq::BOND.bits());
        assert_eq!(cfm.param[41], 1);

        let mut guard = h.store.acquire();
        let dev = guard.find_by_conn_idx(0).unwrap();
        assert_eq!(dev.addr, identity);
        assert!(!dev.resolving);
    }

    #[test]
    fn test_private_address_without_keys_connects_directly() {
        let mut h = Harness::new();
        h.inject(connection_req(0, rpa()));
        assert_eq!(h.take_events().len(), 1);
        assert!(h.transport.last_message(GAPC_CONNECTION_CFM).is_some());
    }

    #[test]
    fn test_address_resolve_command() {
        let mut h = Harness::new();
        let resp = h.command(Command::AddressResolve { addr: peer(1) }).unwrap();
        assert_eq!(resp.result, Err(BleError::InvalidParam));
        let resp = h.command(Command::AddressResolve { addr: rpa() }).unwrap();
        assert_eq!(resp.result, Err(BleError::NotFound));

        let identity = peer(9);
        let mut dev = stored(identity);
        dev.irk = Some(IdentityResolvingKey::new(IRK));
        let mut h = with_stored(vec![dev]);

        assert_eq!(
            h.command(Command::AddressResolve { addr: rpa() }),
            ok(Opcode::GAP_ADDRESS_RESOLVE)
        );
        assert_eq!(h.manager.params().addr_resolv_req_pending, 1);

        h.inject(ControllerEvent::AddrSolved {
            addr: rpa().bytes,
            irk: IRK,
        });
        h.gapm_cmp(GAPM_RESOLV_ADDR, GAP_ERR_NO_ERROR);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::AddressResolved {
                conn_idx: CONN_IDX_INVALID,
                resolved_address: identity,
                address: rpa()
            }]
        );
        assert_eq!(h.manager.params().addr_resolv_req_pending, 0);

        h.command(Command::AddressResolve { addr: rpa() });
        h.gapm_cmp(GAPM_RESOLV_ADDR, GAP_ERR_NOT_FOUND);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::AddressResolutionFailed {
                status: BleError::NotFound
            }]
        );
    }

    #[test]
    fn test_irk_exchange_rekeys_record() {
        let identity = peer(9);
        let mut h = with_stored(vec![stored(identity)]);
        h.connect_peer(0, rpa());

        bond(
            &mut h,
            0,
            BondInfo::IrkExchange {
                irk: IRK,
                addr: identity,
            },
        );
        assert_eq!(
            h.take_events(),
            vec![BleEvent::AddressResolved {
                conn_idx: 0,
                resolved_address: identity,
                address: rpa()
            }]
        );

        let guard = h.store.acquire();
        assert_eq!(guard.len(), 1);
        let dev = guard.iter().next().unwrap();
        assert_eq!(dev.addr, identity);
        assert!(dev.connected);
        assert_eq!(dev.irk.as_ref().map(|k| k.key), Some(IRK));
    }

    #[test]
    fn test_unpair() {
        let mut h = with_stored(vec![stored(peer(1)), stored(peer(2))]);
        let resp = h.command(Command::Unpair { addr: peer(3) }).unwrap();
        assert_eq!(resp.result, Err(BleError::NotFound));

        // Not connected: the record goes away
        assert_eq!(h.command(Command::Unpair { addr: peer(1) }), ok(Opcode::GAP_UNPAIR));
        assert!(h.store.acquire().find_by_addr(&peer(1), false).is_none());
        assert!(h.sent().is_empty());

        // Connected: keys are dropped and the link is closed
        h.connect_peer(0, peer(2));
        assert_eq!(h.command(Command::Unpair { addr: peer(2) }), ok(Opcode::GAP_UNPAIR));
        let sent = h.sent();
        assert_eq!(sent[0].msg_id, GAPC_DISCONNECT_CMD);
        assert_eq!(sent[0].param[1], REMOTE_USER_TERMINATED_CON);
        assert!(!h.store.acquire().find_by_conn_idx(0).unwrap().bonded);
        assert!(h.persistence.stored().is_empty());
    }
}
