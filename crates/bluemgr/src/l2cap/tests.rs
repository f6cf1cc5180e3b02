//! Tests for the L2CAP channel and credit manager

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::error::BleError;
    use crate::events::BleEvent;
    use crate::gap::types::SecurityLevel;
    use crate::manager::testing::{peer, Harness};
    use crate::manager::{Command, Opcode, Response, ResponseData};
    use crate::wire::constants::*;
    use crate::wire::event::ControllerEvent;

    const PSM: u16 = 0x0080;

    fn listen_cmd(conn_idx: u16, psm: u16, credits: u16, defer_setup: bool) -> Command {
        Command::L2capListen {
            conn_idx,
            psm,
            sec_level: SecurityLevel::Level1,
            initial_credits: credits,
            defer_setup,
        }
    }

    /// Connected harness with an accepted listener on `PSM`, returns its scid
    fn listening(h: &mut Harness, credits: u16, defer_setup: bool) -> u16 {
        assert!(h.command(listen_cmd(0, PSM, credits, defer_setup)).is_none());
        h.cmp(0, GAPC_LE_CB_CREATE, GAP_ERR_NO_ERROR);
        match h.response() {
            Some(Response {
                result: Ok(ResponseData::Scid(scid)),
                ..
            }) => scid,
            other => panic!("unexpected response {:?}", other),
        }
    }

    /// Peer connects to the listener and the link comes up
    fn peer_connects(h: &mut Harness, dcid: u16, remote_credits: u16) {
        h.inject(ControllerEvent::LecbConnectReq {
            conn_idx: 0,
            le_psm: PSM,
            dest_cid: dcid,
            max_sdu: 247,
            dest_credit: remote_credits,
        });
        h.inject(ControllerEvent::LecbConnected {
            conn_idx: 0,
            le_psm: PSM,
            dest_cid: dcid,
            dest_credit: remote_credits,
            max_sdu: 247,
        });
    }

    fn data(h: &mut Harness, scid: u16, src_credit: u16) {
        h.inject(ControllerEvent::DataReceived {
            conn_idx: 0,
            src_cid: scid,
            src_credit,
            data: vec![0x5A],
        });
    }

    fn connected() -> Harness {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));
        h
    }

    #[test]
    fn test_listen_sends_create_and_answers_with_scid() {
        let mut h = connected();
        assert!(h.command(listen_cmd(0, PSM, 10, false)).is_none());

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_id, GAPC_LECB_CREATE_CMD);
        assert_eq!(sent[0].param[0], GAPC_LE_CB_CREATE);
        assert_eq!(sent[0].param[1], 1); // security level 1
        assert_eq!(u16::from_le_bytes([sent[0].param[4], sent[0].param[5]]), SCID_FIRST);

        h.cmp(0, GAPC_LE_CB_CREATE, GAP_ERR_NO_ERROR);
        assert_eq!(
            h.response(),
            Some(Response {
                opcode: Opcode::L2CAP_LISTEN,
                result: Ok(ResponseData::Scid(SCID_FIRST)),
            })
        );
        assert_eq!(h.manager.channels().len(), 1);
    }

    #[test]
    fn test_listen_errors() {
        let mut h = Harness::new();
        let resp = h.command(listen_cmd(0, PSM, 10, false)).unwrap();
        assert_eq!(resp.result, Err(BleError::NotConnected));

        h.connect_peer(0, peer(1));
        listening(&mut h, 10, false);
        let resp = h.command(listen_cmd(0, PSM, 10, false)).unwrap();
        assert_eq!(resp.result, Err(BleError::AlreadyDone));

        // Controller refuses the listener: channel and scid are released
        h.command(listen_cmd(0, 0x0081, 10, false));
        h.cmp(0, GAPC_LE_CB_CREATE, L2C_ERR_NO_RES_AVAIL);
        assert_eq!(h.response().unwrap().result, Err(BleError::InsufficientResources));
        assert_eq!(h.manager.channels().len(), 1);
        assert!(!h.manager.channels().pool().is_allocated(SCID_FIRST + 1));
    }

    #[test]
    fn test_scids_are_unique_across_connections() {
        let mut h = connected();
        h.connect_peer(1, peer(2));

        assert!(h.command(listen_cmd(0, PSM, 5, false)).is_none());
        h.cmp(0, GAPC_LE_CB_CREATE, GAP_ERR_NO_ERROR);
        assert!(h.command(listen_cmd(1, PSM, 5, false)).is_none());
        h.cmp(1, GAPC_LE_CB_CREATE, GAP_ERR_NO_ERROR);

        assert_eq!(h.response().unwrap().result, Ok(ResponseData::Scid(0x40)));
        assert_eq!(h.response().unwrap().result, Ok(ResponseData::Scid(0x41)));
    }

    #[test]
    fn test_channel_of_another_connection_is_not_found() {
        let mut h = connected();
        h.connect_peer(1, peer(2));
        let scid = listening(&mut h, 10, false);
        peer_connects(&mut h, 0x0050, 3);
        h.take_events();
        h.sent();

        let resp = h
            .command(Command::L2capSend {
                conn_idx: 1,
                scid,
                data: vec![1],
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::NotFound));
        let resp = h.command(Command::L2capDisconnect { conn_idx: 1, scid }).unwrap();
        assert_eq!(resp.result, Err(BleError::NotFound));
        let resp = h
            .command(Command::L2capAddCredits {
                conn_idx: 1,
                scid,
                credits: 1,
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::NotFound));
        assert!(h.sent().is_empty());

        // Data on the wrong link is dropped and counted
        h.inject(ControllerEvent::DataReceived {
            conn_idx: 1,
            src_cid: scid,
            src_credit: 4,
            data: vec![0x5A],
        });
        assert!(h.take_events().is_empty());
        assert_eq!(h.manager.stats().anomalies, 1);

        let chan = h.manager.channels().iter().find(|c| c.scid == scid).unwrap();
        assert_eq!((chan.conn_idx, chan.local_credits), (0, 10));
    }

    #[test]
    fn test_credit_accounting() {
        let mut h = connected();
        let scid = listening(&mut h, 10, false);
        peer_connects(&mut h, 0x0050, 3);

        // Not deferred: the manager accepts on its own
        let cfm = h.transport.last_message(GAPC_LECB_CONNECT_CFM).unwrap();
        assert_eq!(&cfm.param[2..4], &L2C_CB_CON_SUCCESS.to_le_bytes());

        let events = h.take_events();
        assert_eq!(
            events,
            vec![BleEvent::L2capConnected {
                conn_idx: 0,
                psm: PSM,
                scid,
                dcid: 0x0050,
                local_credits: 10,
                remote_credits: 3,
                mtu: 247,
            }]
        );

        for (remaining, consumed) in [(9, 1), (7, 2), (5, 2)] {
            data(&mut h, scid, remaining);
            assert_eq!(
                h.take_events(),
                vec![BleEvent::L2capDataInd {
                    conn_idx: 0,
                    scid,
                    local_credits_consumed: consumed,
                    data: vec![0x5A],
                }]
            );
        }

        // More credits than granted is dropped and counted
        data(&mut h, scid, 6);
        assert!(h.take_events().is_empty());
        assert_eq!(h.manager.stats().anomalies, 1);

        let chan = h.manager.channels().iter().find(|c| c.scid == scid).unwrap();
        assert_eq!(chan.local_credits, 5);
    }

    #[test]
    fn test_add_credits() {
        let mut h = connected();
        let scid = listening(&mut h, 2, false);

        assert!(h
            .command(Command::L2capAddCredits {
                conn_idx: 0,
                scid,
                credits: 8,
            })
            .is_none());
        let add = h.transport.last_message(GAPC_LECB_ADD_CMD).unwrap();
        assert_eq!(u16::from_le_bytes([add.param[3], add.param[4]]), 8);

        h.cmp(0, GAPC_LE_CB_ADDITION, GAP_ERR_NO_ERROR);
        assert_eq!(h.response().unwrap().result, Ok(ResponseData::None));
        assert_eq!(h.manager.channels().iter().next().unwrap().local_credits, 10);

        let resp = h
            .command(Command::L2capAddCredits {
                conn_idx: 0,
                scid: 0x7F,
                credits: 1,
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::NotFound));
    }

    #[test]
    fn test_connect_in_progress_and_already_done() {
        let mut h = connected();

        let resp = h
            .command(Command::L2capConnect {
                conn_idx: 0,
                psm: 0x0081,
                initial_credits: 4,
            })
            .unwrap();
        assert_eq!(resp.result, Ok(ResponseData::Scid(SCID_FIRST)));
        assert_eq!(h.sent()[0].msg_id, GAPC_LECB_CONNECT_CMD);

        let resp = h
            .command(Command::L2capConnect {
                conn_idx: 0,
                psm: 0x0083,
                initial_credits: 4,
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::InProgress));

        h.inject(ControllerEvent::LecbConnected {
            conn_idx: 0,
            le_psm: 0x0081,
            dest_cid: 0x0060,
            dest_credit: 1,
            max_sdu: 100,
        });
        assert!(matches!(
            h.take_events().as_slice(),
            [BleEvent::L2capConnected { scid: SCID_FIRST, .. }]
        ));

        let resp = h
            .command(Command::L2capConnect {
                conn_idx: 0,
                psm: 0x0081,
                initial_credits: 4,
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::AlreadyDone));
    }

    #[test]
    fn test_connect_failure_releases_channel() {
        let mut h = connected();
        h.command(Command::L2capConnect {
            conn_idx: 0,
            psm: 0x0081,
            initial_credits: 4,
        });

        // Success completions carry no news
        h.cmp(0, GAPC_LE_CB_CONNECTION, GAP_ERR_NO_ERROR);
        assert!(h.take_events().is_empty());

        h.cmp(0, GAPC_LE_CB_CONNECTION, L2C_ERR_LEPSM_NOT_SUPP);
        assert_eq!(
            h.take_events(),
            vec![BleEvent::L2capConnectionFailed {
                conn_idx: 0,
                scid: SCID_FIRST,
                status: BleError::NotSupported,
            }]
        );
        assert!(h.manager.channels().is_empty());

        // A second failure has no channel to blame
        h.cmp(0, GAPC_LE_CB_CONNECTION, GAP_ERR_INVALID_PARAM);
        assert_eq!(h.manager.stats().anomalies, 1);
    }

    #[test]
    fn test_deferred_setup() {
        let mut h = connected();
        let scid = listening(&mut h, 10, true);

        h.inject(ControllerEvent::LecbConnectReq {
            conn_idx: 0,
            le_psm: PSM,
            dest_cid: 0x0044,
            max_sdu: 64,
            dest_credit: 2,
        });
        assert_eq!(
            h.take_events(),
            vec![BleEvent::L2capConnectionRequest {
                conn_idx: 0,
                psm: PSM,
                scid,
                dcid: 0x0044,
                remote_credits: 2,
                mtu: 64,
            }]
        );
        assert!(h.transport.last_message(GAPC_LECB_CONNECT_CFM).is_none());

        let resp = h
            .command(Command::L2capConnectionCfm {
                conn_idx: 0,
                scid,
                status: L2capConnStatus::InsufficientAuthentication,
            })
            .unwrap();
        assert_eq!(resp.result, Ok(ResponseData::None));
        let cfm = h.transport.last_message(GAPC_LECB_CONNECT_CFM).unwrap();
        assert_eq!(&cfm.param[2..4], &L2C_CB_CON_INS_AUTH.to_le_bytes());
    }

    #[test]
    fn test_connection_cfm_requires_deferred_listener() {
        let mut h = connected();
        let scid = listening(&mut h, 10, false);

        let resp = h
            .command(Command::L2capConnectionCfm {
                conn_idx: 0,
                scid,
                status: L2capConnStatus::Accepted,
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::NotAllowed));

        assert_eq!(L2capConnStatus::try_from(9), Err(BleError::InvalidParam));
    }

    #[test]
    fn test_connect_request_without_listener_is_refused() {
        let mut h = connected();
        h.inject(ControllerEvent::LecbConnectReq {
            conn_idx: 0,
            le_psm: 0x0099,
            dest_cid: 0x0044,
            max_sdu: 64,
            dest_credit: 2,
        });

        let cfm = h.transport.last_message(GAPC_LECB_CONNECT_CFM).unwrap();
        assert_eq!(&cfm.param[0..2], &0x0099u16.to_le_bytes());
        assert_eq!(&cfm.param[2..4], &L2C_CB_CON_LEPSM_NOT_SUPP.to_le_bytes());
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn test_send_and_send_response() {
        let mut h = connected();
        let scid = listening(&mut h, 10, false);
        peer_connects(&mut h, 0x0050, 1);
        h.take_events();
        h.sent();

        let resp = h
            .command(Command::L2capSend {
                conn_idx: 0,
                scid,
                data: vec![1, 2, 3],
            })
            .unwrap();
        assert_eq!(resp.result, Ok(ResponseData::None));
        let pdu = h.sent().pop().unwrap();
        assert_eq!(pdu.msg_id, L2CC_PDU_SEND_REQ);
        assert_eq!(&pdu.param[0..2], &0x0050u16.to_le_bytes());

        h.inject(ControllerEvent::PduSent {
            conn_idx: 0,
            status: L2C_ERR_INSUFF_CREDIT,
            dest_cid: 0x0050,
            dest_credit: 0,
        });
        assert_eq!(
            h.take_events(),
            vec![BleEvent::L2capSent {
                conn_idx: 0,
                scid,
                remote_credits: 0,
                status: Err(BleError::L2capNoCredits),
            }]
        );
    }

    #[test]
    fn test_send_size_limits() {
        let mut h = connected();
        let scid = listening(&mut h, 10, false);

        // Nothing the length field can carry
        let resp = h
            .command(Command::L2capSend {
                conn_idx: 0,
                scid,
                data: vec![0; 70_000],
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::InvalidParam));

        peer_connects(&mut h, 0x0050, 1);
        h.sent();
        let resp = h
            .command(Command::L2capSend {
                conn_idx: 0,
                scid,
                data: vec![0; 248],
            })
            .unwrap();
        assert_eq!(resp.result, Err(BleError::L2capMtuExceeded));
        assert!(h.sent().is_empty());

        let resp = h
            .command(Command::L2capSend {
                conn_idx: 0,
                scid,
                data: vec![0; 247],
            })
            .unwrap();
        assert_eq!(resp.result, Ok(ResponseData::None));
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_disconnect_and_disconnect_indication() {
        let mut h = connected();
        let scid = listening(&mut h, 10, false);
        peer_connects(&mut h, 0x0050, 1);
        h.take_events();

        assert!(h.command(Command::L2capDisconnect { conn_idx: 0, scid }).is_none());
        h.cmp(0, GAPC_LE_CB_DISCONNECTION, GAP_ERR_NO_ERROR);
        assert_eq!(h.response().unwrap().result, Ok(ResponseData::None));

        h.inject(ControllerEvent::LecbDisconnected {
            conn_idx: 0,
            le_psm: PSM,
            reason: 0,
        });
        assert_eq!(
            h.take_events(),
            vec![BleEvent::L2capDisconnected { conn_idx: 0, scid }]
        );
        assert!(h.manager.channels().is_empty());
        assert!(!h.manager.channels().pool().is_allocated(scid));
    }

    #[test]
    fn test_stop_listen() {
        let mut h = connected();
        let scid = listening(&mut h, 10, false);

        // Refused while in use: the listener stays
        h.command(Command::L2capStopListen { conn_idx: 0, scid });
        h.cmp(0, GAPC_LE_CB_DESTROY, GAP_ERR_COMMAND_DISALLOWED);
        assert_eq!(h.response().unwrap().result, Err(BleError::NotAllowed));
        assert_eq!(h.manager.channels().len(), 1);

        h.command(Command::L2capStopListen { conn_idx: 0, scid });
        h.cmp(0, GAPC_LE_CB_DESTROY, GAP_ERR_NO_ERROR);
        assert_eq!(h.response().unwrap().result, Ok(ResponseData::None));
        assert!(h.manager.channels().is_empty());
    }

    #[test]
    fn test_link_loss_releases_channels() {
        let mut h = connected();
        listening(&mut h, 10, false);
        h.command(Command::L2capConnect {
            conn_idx: 0,
            psm: 0x0081,
            initial_credits: 4,
        });
        assert_eq!(h.manager.channels().pool().in_use(), 2);

        h.inject(ControllerEvent::Disconnected {
            conn_idx: 0,
            conhdl: 0,
            reason: 0x13,
        });
        assert!(h.manager.channels().is_empty());
        assert_eq!(h.manager.channels().pool().in_use(), 0);
    }
}
