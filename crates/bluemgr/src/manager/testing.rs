//! In-process harness driving a [`Manager`] by hand
//!
//! The harness plays both the application and the controller: commands are run
//! directly on the manager, controller events are injected as wire messages,
//! and everything the manager sends is recorded.

use crate::config::ManagerConfig;
use crate::events::{BleEvent, EventQueue};
use crate::gap::types::BdAddr;
use crate::manager::{CallId, Command, Manager, ManagerInput, Response, TaggedResponse};
use crate::storage::{DeviceStore, MemoryPersistence};
use crate::transport::RecordingTransport;
use crate::wire::event::ControllerEvent;
use crate::wire::message::{Envelope, WireMessage};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

pub(crate) struct Harness {
    pub manager: Manager,
    pub transport: RecordingTransport,
    pub events: Arc<EventQueue>,
    pub store: DeviceStore,
    pub persistence: MemoryPersistence,
    responses: Receiver<TaggedResponse>,
    calls: CallId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_persistence(config, MemoryPersistence::new())
    }

    pub fn with_persistence(config: ManagerConfig, persistence: MemoryPersistence) -> Self {
        let transport = RecordingTransport::new();
        let store = DeviceStore::new(Box::new(persistence.clone()));
        let events = Arc::new(EventQueue::new(config.event_queue_len));
        let (tx, rx) = mpsc::channel();
        let manager = Manager::new(
            config,
            Box::new(transport.clone()),
            store.clone(),
            events.clone(),
            tx,
        );

        Self {
            manager,
            transport,
            events,
            store,
            persistence,
            responses: rx,
            calls: 0,
        }
    }

    /// Run a command and return its response if it was answered right away
    pub fn command(&mut self, cmd: Command) -> Option<Response> {
        self.calls += 1;
        self.manager.handle_command(self.calls, cmd);
        self.response()
    }

    pub fn response(&self) -> Option<Response> {
        self.tagged_response().map(|tagged| tagged.response)
    }

    pub fn tagged_response(&self) -> Option<TaggedResponse> {
        self.responses.try_recv().ok()
    }

    /// Deliver an event as the controller would
    pub fn inject(&mut self, event: ControllerEvent) {
        self.inject_msg(event.to_message());
    }

    pub fn inject_msg(&mut self, msg: WireMessage) {
        self.manager
            .handle_input(ManagerInput::Controller(Envelope::Stack(msg)));
    }

    pub fn cmp(&mut self, conn_idx: u16, operation: u8, status: u8) {
        self.inject(ControllerEvent::GapcCmp {
            conn_idx,
            operation,
            status,
        });
    }

    pub fn gapm_cmp(&mut self, operation: u8, status: u8) {
        self.inject(ControllerEvent::GapmCmp { operation, status });
    }

    /// Drain the application event queue
    pub fn take_events(&self) -> Vec<BleEvent> {
        std::iter::from_fn(|| self.events.poll()).collect()
    }

    /// Stack messages sent since the last call
    pub fn sent(&self) -> Vec<WireMessage> {
        self.transport.take_messages()
    }

    /// Bring up a connection to `peer` and forget the resulting traffic
    pub fn connect_peer(&mut self, conn_idx: u16, peer: BdAddr) {
        self.inject(connection_req(conn_idx, peer));
        self.take_events();
        self.sent();
    }
}

pub(crate) fn connection_req(conn_idx: u16, peer: BdAddr) -> ControllerEvent {
    ControllerEvent::ConnectionReq {
        conn_idx,
        conhdl: conn_idx,
        con_interval: 0x18,
        con_latency: 0,
        sup_to: 0x48,
        clk_accuracy: 0,
        peer_addr: peer,
    }
}

pub(crate) fn peer(last: u8) -> BdAddr {
    BdAddr::public([0x10, 0x20, 0x30, 0x40, 0x50, last])
}
