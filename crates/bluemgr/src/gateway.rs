//! Application-facing command gateway
//!
//! [`BleManager`] starts the manager thread and turns every call into a
//! [`Command`] followed by a blocking wait for its response. Only one call is
//! in flight at a time: the response channel doubles as the interface lock.
//! Every call gets a fresh [`CallId`] and the manager tags each response with
//! it, so the late answer of a call that timed out is dropped.
//!
//! With [`DispatchPolicy::Direct`] the command runs on the calling thread under
//! the manager lock; with [`DispatchPolicy::Queued`] it is posted to the
//! manager thread. Either way, commands that need an answer from the
//! controller are completed later by the manager thread.

use crate::config::{DispatchPolicy, ManagerConfig};
use crate::error::{BleError, BleResult, WireError};
use crate::events::{BleEvent, EventQueue};
use crate::gap::params::DevParams;
use crate::gap::types::{BdAddr, ConnParams, SecurityLevel};
use crate::l2cap::L2capConnStatus;
use crate::manager::router::{self, ManagerInput, RouterStats};
use crate::manager::{CallId, Command, Manager, ResponseData, TaggedResponse};
use crate::storage::{DeviceStore, Persistence, StorageKey};
use crate::transport::Transport;
use crate::wire::message::Envelope;
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Response channel and the id of the last call made through it
struct Calls {
    responses: Receiver<TaggedResponse>,
    last: CallId,
}

/// Handle to a running BLE manager
pub struct BleManager {
    core: Arc<Mutex<Manager>>,
    inputs: Sender<ManagerInput>,
    calls: Mutex<Calls>,
    events: Arc<EventQueue>,
    store: DeviceStore,
    dispatch: DispatchPolicy,
    timeout: Option<Duration>,
    thread: Option<JoinHandle<()>>,
}

impl BleManager {
    /// Load bonding data from `persistence` and start the manager thread
    pub fn start(
        config: ManagerConfig,
        transport: Box<dyn Transport>,
        persistence: Box<dyn Persistence>,
    ) -> BleResult<Self> {
        let store = DeviceStore::new(persistence);
        let events = Arc::new(EventQueue::new(config.event_queue_len));
        let (response_tx, response_rx) = mpsc::channel();
        let (input_tx, input_rx) = mpsc::channel();

        let dispatch = config.dispatch;
        let timeout = config.command_timeout();
        let manager = Manager::new(config, transport, store.clone(), events.clone(), response_tx);
        let core = Arc::new(Mutex::new(manager));

        let thread_core = core.clone();
        let thread = thread::Builder::new()
            .name("ble-manager".into())
            .spawn(move || router::run(thread_core, input_rx))
            .map_err(|e| {
                error!("Failed to start manager thread: {}", e);
                BleError::Failed
            })?;

        let commit_tx = Mutex::new(input_tx.clone());
        store.attach_manager(
            thread.thread().id(),
            Box::new(move || {
                let tx = commit_tx.lock().unwrap_or_else(PoisonError::into_inner);
                if tx.send(ManagerInput::CommitStorage).is_err() {
                    warn!("Manager thread gone, bonding data not committed");
                }
            }),
        );

        let consumed_tx = Mutex::new(input_tx.clone());
        events.set_consume_notify(Box::new(move || {
            let tx = consumed_tx.lock().unwrap_or_else(PoisonError::into_inner);
            // Only fails once the manager thread is gone
            let _ = tx.send(ManagerInput::EventConsumed);
        }));

        info!("BLE manager started ({:?} dispatch)", dispatch);
        Ok(Self {
            core,
            inputs: input_tx,
            calls: Mutex::new(Calls {
                responses: response_rx,
                last: 0,
            }),
            events,
            store,
            dispatch,
            timeout,
            thread: Some(thread),
        })
    }

    fn core(&self) -> MutexGuard<'_, Manager> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a command and wait for its response
    pub fn execute(&self, cmd: Command) -> BleResult<ResponseData> {
        let opcode = cmd.opcode();
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.last += 1;
        let call = calls.last;

        match self.dispatch {
            DispatchPolicy::Direct => self.core().handle_command(call, cmd),
            DispatchPolicy::Queued => self
                .inputs
                .send(ManagerInput::Command(call, cmd))
                .map_err(|_| BleError::Failed)?,
        }

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let tagged = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    calls.responses.recv_timeout(left).map_err(|e| match e {
                        RecvTimeoutError::Timeout => {
                            warn!("No response to {:?} within {:?}", opcode, self.timeout);
                            BleError::Timeout
                        }
                        RecvTimeoutError::Disconnected => BleError::Failed,
                    })?
                }
                None => calls.responses.recv().map_err(|_| BleError::Failed)?,
            };

            if tagged.call != call {
                warn!("Discarding response to abandoned call {}: {:?}", tagged.call, tagged.response);
                continue;
            }
            if tagged.response.opcode != opcode {
                error!("Expected response to {:?}, got {:?}", opcode, tagged.response);
                return Err(BleError::Failed);
            }
            return tagged.response.result;
        }
    }

    fn execute_none(&self, cmd: Command) -> BleResult<()> {
        self.execute(cmd).map(|_| ())
    }

    fn execute_scid(&self, cmd: Command) -> BleResult<u16> {
        match self.execute(cmd)? {
            ResponseData::Scid(scid) => Ok(scid),
            other => {
                error!("Expected a channel id, got {:?}", other);
                Err(BleError::Failed)
            }
        }
    }

    /// Hand a message received from the controller to the manager thread
    pub fn controller_input(&self, envelope: Envelope) -> BleResult<()> {
        self.inputs
            .send(ManagerInput::Controller(envelope))
            .map_err(|_| BleError::Failed)
    }

    /// Decode raw bytes from the controller and hand them to the manager thread
    pub fn controller_bytes(&self, data: &[u8]) -> Result<(), WireError> {
        let envelope = Envelope::parse(data)?;
        if self.controller_input(envelope).is_err() {
            warn!("Manager thread gone, dropping controller message");
        }
        Ok(())
    }

    pub fn reset(&self) -> BleResult<()> {
        self.execute_none(Command::Reset)
    }

    // GAP

    /// Start connecting to `peer`; the outcome arrives as `ConnectionCompleted`
    pub fn connect(&self, peer: BdAddr, conn_params: ConnParams) -> BleResult<()> {
        self.connect_ce(peer, conn_params, 0, 0)
    }

    /// Like [`connect`](Self::connect) with explicit connection event length bounds
    pub fn connect_ce(
        &self,
        peer: BdAddr,
        conn_params: ConnParams,
        ce_len_min: u16,
        ce_len_max: u16,
    ) -> BleResult<()> {
        self.execute_none(Command::Connect {
            peer,
            conn_params,
            ce_len_min,
            ce_len_max,
        })
    }

    pub fn connect_cancel(&self) -> BleResult<()> {
        self.execute_none(Command::ConnectCancel)
    }

    pub fn disconnect(&self, conn_idx: u16, reason: u8) -> BleResult<()> {
        self.execute_none(Command::Disconnect { conn_idx, reason })
    }

    pub fn conn_rssi(&self, conn_idx: u16) -> BleResult<i8> {
        match self.execute(Command::ConnRssi { conn_idx })? {
            ResponseData::Rssi(rssi) => Ok(rssi),
            other => {
                error!("Expected an RSSI, got {:?}", other);
                Err(BleError::Failed)
            }
        }
    }

    pub fn pair(&self, conn_idx: u16, bond: bool) -> BleResult<()> {
        self.execute_none(Command::Pair { conn_idx, bond })
    }

    pub fn pair_reply(&self, conn_idx: u16, accept: bool, bond: bool) -> BleResult<()> {
        self.execute_none(Command::PairReply {
            conn_idx,
            accept,
            bond,
        })
    }

    pub fn passkey_reply(&self, conn_idx: u16, accept: bool, passkey: u32) -> BleResult<()> {
        self.execute_none(Command::PasskeyReply {
            conn_idx,
            accept,
            passkey,
        })
    }

    pub fn numeric_reply(&self, conn_idx: u16, accept: bool) -> BleResult<()> {
        self.execute_none(Command::NumericReply { conn_idx, accept })
    }

    pub fn unpair(&self, addr: BdAddr) -> BleResult<()> {
        self.execute_none(Command::Unpair { addr })
    }

    pub fn set_sec_level(&self, conn_idx: u16, level: SecurityLevel) -> BleResult<()> {
        self.execute_none(Command::SetSecLevel { conn_idx, level })
    }

    pub fn address_resolve(&self, addr: BdAddr) -> BleResult<()> {
        self.execute_none(Command::AddressResolve { addr })
    }

    // L2CAP

    /// Listen on `psm`, accepting incoming connections without asking; returns the scid
    pub fn l2cap_listen(
        &self,
        conn_idx: u16,
        psm: u16,
        sec_level: SecurityLevel,
        initial_credits: u16,
    ) -> BleResult<u16> {
        self.execute_scid(Command::L2capListen {
            conn_idx,
            psm,
            sec_level,
            initial_credits,
            defer_setup: false,
        })
    }

    /// Listen on `psm`; each incoming connection waits for `l2cap_connection_cfm`
    pub fn l2cap_listen_defer_setup(
        &self,
        conn_idx: u16,
        psm: u16,
        sec_level: SecurityLevel,
        initial_credits: u16,
    ) -> BleResult<u16> {
        self.execute_scid(Command::L2capListen {
            conn_idx,
            psm,
            sec_level,
            initial_credits,
            defer_setup: true,
        })
    }

    pub fn l2cap_stop_listen(&self, conn_idx: u16, scid: u16) -> BleResult<()> {
        self.execute_none(Command::L2capStopListen { conn_idx, scid })
    }

    pub fn l2cap_connection_cfm(&self, conn_idx: u16, scid: u16, status: L2capConnStatus) -> BleResult<()> {
        self.execute_none(Command::L2capConnectionCfm {
            conn_idx,
            scid,
            status,
        })
    }

    pub fn l2cap_connect(&self, conn_idx: u16, psm: u16, initial_credits: u16) -> BleResult<u16> {
        self.execute_scid(Command::L2capConnect {
            conn_idx,
            psm,
            initial_credits,
        })
    }

    pub fn l2cap_disconnect(&self, conn_idx: u16, scid: u16) -> BleResult<()> {
        self.execute_none(Command::L2capDisconnect { conn_idx, scid })
    }

    pub fn l2cap_add_credits(&self, conn_idx: u16, scid: u16, credits: u16) -> BleResult<()> {
        self.execute_none(Command::L2capAddCredits {
            conn_idx,
            scid,
            credits,
        })
    }

    pub fn l2cap_send(&self, conn_idx: u16, scid: u16, data: &[u8]) -> BleResult<()> {
        self.execute_none(Command::L2capSend {
            conn_idx,
            scid,
            data: data.to_vec(),
        })
    }

    // Storage

    pub fn put_app_value(&self, conn_idx: u16, key: StorageKey, data: Vec<u8>, persistent: bool) -> BleResult<()> {
        self.store.put_app_value(conn_idx, key, data, persistent)
    }

    pub fn get_app_value(&self, conn_idx: u16, key: StorageKey) -> BleResult<Vec<u8>> {
        self.store.get_app_value(conn_idx, key)
    }

    pub fn remove_app_value(&self, conn_idx: u16, key: StorageKey) -> BleResult<()> {
        self.store.remove_app_value(conn_idx, key)
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    // Events

    /// Wait for the next event
    pub fn get_event(&self) -> BleEvent {
        self.events.get()
    }

    pub fn get_event_timeout(&self, timeout: Duration) -> Option<BleEvent> {
        self.events.get_timeout(timeout)
    }

    pub fn poll_event(&self) -> Option<BleEvent> {
        self.events.poll()
    }

    pub fn peek_event(&self) -> Option<BleEvent> {
        self.events.peek()
    }

    pub fn has_event(&self) -> bool {
        self.events.has_event()
    }

    // Diagnostics

    pub fn stats(&self) -> RouterStats {
        self.core().stats().clone()
    }

    pub fn params(&self) -> DevParams {
        self.core().params().clone()
    }
}

impl Drop for BleManager {
    fn drop(&mut self) {
        debug!("Stopping manager thread");
        // Fails only if the thread already exited
        let _ = self.inputs.send(ManagerInput::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Manager thread panicked");
            }
        }
    }
}
