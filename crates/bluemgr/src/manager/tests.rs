//! Tests for message routing, back-pressure and stack reset

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::error::BleError;
    use crate::events::BleEvent;
    use crate::manager::testing::{connection_req, peer, Harness};
    use crate::storage::{MemoryPersistence, StoredDevice};
    use crate::wire::constants::*;
    use crate::wire::event::ControllerEvent;
    use crate::wire::message::WireMessage;

    fn ltk_missing_req(h: &mut Harness) {
        h.inject(ControllerEvent::EncryptReq {
            conn_idx: 0,
            ediv: 1,
            rand: 1,
        });
    }

    #[test]
    fn test_unhandled_messages_are_counted() {
        let mut h = Harness::new();
        h.inject(ControllerEvent::Unknown {
            msg_id: 0x7777,
            conn_idx: 0,
        });
        // Nobody asked for this one
        h.inject(ControllerEvent::ConRssi { conn_idx: 0, rssi: -40 });

        let stats = h.manager.stats();
        assert_eq!(stats.not_handled, 2);
        assert_eq!(stats.last_not_handled, Some(GAPC_CON_RSSI_IND));
        assert_eq!(stats.anomalies, 0);
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn test_short_payload_is_an_anomaly() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));
        assert!(h.command(Command::ConnRssi { conn_idx: 0 }).is_none());

        h.inject_msg(WireMessage::from_task(GAPC_CON_RSSI_IND, TASK_ID_GAPC, 0, vec![]));
        assert_eq!(h.manager.stats().anomalies, 1);
        assert!(h.response().is_none());

        // The request is still parked and gets the next good answer
        h.inject(ControllerEvent::ConRssi { conn_idx: 0, rssi: -70 });
        assert_eq!(h.response().unwrap().result, Ok(ResponseData::Rssi(-70)));
    }

    #[test]
    fn test_deferred_response_answers_its_own_call() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        assert!(h.command(Command::ConnRssi { conn_idx: 0 }).is_none());
        let resp = h.command(Command::Pair { conn_idx: 3, bond: true }).unwrap();
        assert_eq!(resp.result, Err(BleError::NotConnected));

        h.inject(ControllerEvent::ConRssi { conn_idx: 0, rssi: -50 });
        let tagged = h.tagged_response().unwrap();
        assert_eq!(tagged.call, 1);
        assert_eq!(tagged.response.result, Ok(ResponseData::Rssi(-50)));
    }

    #[test]
    fn test_full_waitqueue_refuses_before_sending() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));

        for _ in 0..h.manager.config.waitqueue_capacity {
            assert!(h.command(Command::ConnRssi { conn_idx: 0 }).is_none());
        }
        let resp = h.command(Command::ConnRssi { conn_idx: 0 }).unwrap();
        assert_eq!(resp.result, Err(BleError::InsufficientResources));
        assert_eq!(h.sent().len(), h.manager.config.waitqueue_capacity);
    }

    #[test]
    fn test_waiters_of_other_links_survive_disconnect() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));
        h.connect_peer(1, peer(2));

        h.command(Command::ConnRssi { conn_idx: 1 });
        h.inject(ControllerEvent::Disconnected {
            conn_idx: 0,
            conhdl: 0,
            reason: 0x08,
        });
        assert!(h.response().is_none());

        h.inject(ControllerEvent::ConRssi { conn_idx: 1, rssi: -55 });
        assert_eq!(h.response().unwrap().result, Ok(ResponseData::Rssi(-55)));
    }

    #[test]
    fn test_full_event_queue_pauses_controller() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));
        let capacity = h.events.capacity();

        for _ in 0..capacity {
            ltk_missing_req(&mut h);
        }
        assert!(h.events.is_full());
        assert_eq!(h.sent().len(), capacity);

        // Held back until the application makes room
        ltk_missing_req(&mut h);
        assert!(h.transport.is_paused());
        assert!(h.sent().is_empty());
        assert_eq!(h.events.len(), capacity);

        // Still full: the backlog keeps waiting
        h.manager.handle_input(ManagerInput::EventConsumed);
        assert!(h.sent().is_empty());

        assert_eq!(h.events.poll(), Some(BleEvent::LtkMissing { conn_idx: 0 }));
        h.manager.handle_input(ManagerInput::EventConsumed);
        assert!(!h.transport.is_paused());
        assert_eq!(h.transport.pause_changes(), 2);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(h.events.len(), capacity);
    }

    #[test]
    fn test_reset() {
        let bonded = StoredDevice {
            addr: peer(9),
            mitm: false,
            secure: false,
            ltk: None,
            remote_ltk: None,
            irk: None,
            csrk: None,
            remote_csrk: None,
            app_values: Vec::new(),
        };
        let mut h = Harness::with_persistence(
            Default::default(),
            MemoryPersistence::with_devices(vec![bonded]),
        );
        h.connect_peer(0, peer(1));
        h.command(Command::ConnRssi { conn_idx: 0 });
        h.sent();

        assert!(h.command(Command::Reset).is_none());
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_id, GAPM_RESET_CMD);

        // Everything but the reset completion is dropped meanwhile
        h.inject(connection_req(1, peer(2)));
        h.inject(ControllerEvent::ConRssi { conn_idx: 0, rssi: -40 });
        assert!(h.take_events().is_empty());
        assert!(h.response().is_none());

        h.gapm_cmp(GAPM_RESET, GAP_ERR_NO_ERROR);
        assert_eq!(
            h.response(),
            Some(Response {
                opcode: Opcode::RESET,
                result: Ok(ResponseData::None),
            })
        );

        // Only the bonded record is left
        let guard = h.store.acquire();
        assert_eq!(guard.len(), 1);
        assert!(guard.iter().all(|d| d.addr == peer(9) && !d.connected));
    }

    #[test]
    fn test_reset_failure() {
        let mut h = Harness::new();
        h.command(Command::Reset);
        h.gapm_cmp(GAPM_RESET, GAP_ERR_COMMAND_DISALLOWED);
        assert_eq!(h.response().unwrap().result, Err(BleError::Failed));

        // Routing is back to normal
        h.inject(connection_req(0, peer(1)));
        assert_eq!(h.take_events().len(), 1);
    }

    #[test]
    fn test_commit_request_and_shutdown() {
        let mut h = Harness::new();
        h.connect_peer(0, peer(1));
        h.inject(ControllerEvent::Bond {
            conn_idx: 0,
            info: crate::wire::event::BondInfo::CsrkExchange { key: [1; 16] },
        });
        assert_eq!(h.persistence.commit_count(), 0);

        assert!(h.manager.handle_input(ManagerInput::CommitStorage));
        assert_eq!(h.persistence.commit_count(), 1);

        assert!(!h.manager.handle_input(ManagerInput::Shutdown));
    }
}
