//! Multi-client TCP server: bind (with port retry), admit, number, fan
//! out, evict.
//!
//! The server driver owns the listener and the `ClientId → peer` map. Each
//! admitted peer runs the same episode driver as a client session, minus
//! reconnection (the peer decides whether to come back). Peers hold only
//! their id and an exit channel back to the server, so there is no
//! ownership cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info};

use lanyard_core::config::TcpServerConfig;
use lanyard_core::hub::{report_communication_error, report_connection_error};
use lanyard_core::pool::MemoryPool;
use lanyard_core::reactor::Reactor;
use lanyard_core::state::{LinkState, StateCell};

use crate::session::{
    EpisodeEnd, MessageHandler, SessionCmd, SessionShared, Slot, StateHandler, TX_QUEUE_DEPTH,
    TxBuf, drive_stream,
};

/// Identifies one admitted peer within a server's lifetime. Assigned at
/// admission, strictly increasing, never reused.
pub type ClientId = u64;

pub type MultiConnectHandler = Arc<dyn Fn(ClientId, &str) + Send + Sync>;
pub type MultiDataHandler = Arc<dyn Fn(ClientId, &[u8]) + Send + Sync>;
pub type MultiDisconnectHandler = Arc<dyn Fn(ClientId) + Send + Sync>;

pub(crate) struct ServerCallbacks {
    pub(crate) on_state: Slot<StateHandler>,
    pub(crate) on_error: Slot<MessageHandler>,
    pub(crate) on_connect: Slot<MultiConnectHandler>,
    pub(crate) on_data: Slot<MultiDataHandler>,
    pub(crate) on_disconnect: Slot<MultiDisconnectHandler>,
}

struct PeerEntry {
    addr: String,
    tx: mpsc::Sender<SessionCmd>,
    shared: Arc<SessionShared>,
}

pub(crate) struct ServerShared {
    state: StateCell,
    pub(crate) callbacks: ServerCallbacks,
    peers: Mutex<BTreeMap<ClientId, PeerEntry>>,
    stop_flag: AtomicBool,
    stop_notify: Notify,
}

impl ServerShared {
    fn transition(&self, state: LinkState) {
        debug!(component = "tcp_server", %state, "link state");
        self.state.set(state);
        if let Some(on_state) = self.callbacks.on_state.get() {
            on_state(state);
        }
    }

    fn emit_error(&self, message: &str) {
        if let Some(on_error) = self.callbacks.on_error.get() {
            on_error(message);
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Queue `payload` on one peer's TX queue, dropping on overflow.
    fn enqueue_peer(&self, entry: &PeerEntry, payload: Bytes) {
        let len = payload.len();
        entry
            .shared
            .queued_bytes
            .fetch_add(len, Ordering::Relaxed);
        match entry.tx.try_send(SessionCmd::Send(TxBuf::Shared(payload))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                entry
                    .shared
                    .queued_bytes
                    .fetch_sub(len, Ordering::Relaxed);
                report_communication_error(
                    "tcp_server",
                    "send",
                    format!("peer tx queue full, dropping {len} bytes"),
                    true,
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                entry
                    .shared
                    .queued_bytes
                    .fetch_sub(len, Ordering::Relaxed);
            }
        }
    }

    fn broadcast_now(&self, payload: &Bytes) {
        let peers = self.peers.lock();
        for entry in peers.values() {
            self.enqueue_peer(entry, payload.clone());
        }
    }

    fn send_to_now(&self, id: ClientId, payload: Bytes) {
        // Unknown ids are a silent no-op.
        let peers = self.peers.lock();
        if let Some(entry) = peers.get(&id) {
            self.enqueue_peer(entry, payload);
        }
    }
}

enum ServerCmd {
    Broadcast(Bytes),
    SendTo(ClientId, Bytes),
    Stop,
}

/// A listening TCP endpoint multiplexing many peers on one reactor.
pub struct TcpServer {
    shared: Arc<ServerShared>,
    cmd_tx: mpsc::Sender<ServerCmd>,
    cmd_rx: Mutex<Option<mpsc::Receiver<ServerCmd>>>,
    started: AtomicBool,
    cfg: TcpServerConfig,
}

impl TcpServer {
    pub fn new(mut cfg: TcpServerConfig) -> Self {
        cfg.clamp();
        let (cmd_tx, cmd_rx) = mpsc::channel(TX_QUEUE_DEPTH);
        Self {
            shared: Arc::new(ServerShared {
                state: StateCell::default(),
                callbacks: ServerCallbacks {
                    on_state: Slot::empty(),
                    on_error: Slot::empty(),
                    on_connect: Slot::empty(),
                    on_data: Slot::empty(),
                    on_disconnect: Slot::empty(),
                },
                peers: Mutex::new(BTreeMap::new()),
                stop_flag: AtomicBool::new(false),
                stop_notify: Notify::new(),
            }),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            started: AtomicBool::new(false),
            cfg,
        }
    }

    /// Spawn the accept driver on `reactor`. Idempotent.
    pub fn start(&self, reactor: &Reactor) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            return;
        };
        let shared = self.shared.clone();
        let cfg = self.cfg.clone();
        reactor.spawn(run_server(shared, cfg, cmd_rx));
    }

    /// Tear the server down: close the listener, stop every peer, fire the
    /// remaining disconnect callbacks. No-op when never started.
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        self.shared.stop_flag.store(true, Ordering::Release);
        self.shared.stop_notify.notify_one();
        let _ = self.cmd_tx.try_send(ServerCmd::Stop);
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.state.is(LinkState::Listening)
    }

    /// A server counts as connected while at least one peer is admitted.
    pub fn is_connected(&self) -> bool {
        !self.shared.peers.lock().is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.shared.peers.lock().len()
    }

    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.shared.peers.lock().keys().copied().collect()
    }

    /// Queue `data` for every admitted peer. Peers share one immutable
    /// copy; a failing peer only affects itself.
    pub fn broadcast(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let payload = Bytes::copy_from_slice(data);
        let _ = self.cmd_tx.try_send(ServerCmd::Broadcast(payload));
    }

    pub fn broadcast_line(&self, line: &str) {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        self.broadcast(&framed);
    }

    /// Queue `data` for one peer; unknown ids are ignored.
    pub fn send_to(&self, id: ClientId, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let payload = Bytes::copy_from_slice(data);
        let _ = self.cmd_tx.try_send(ServerCmd::SendTo(id, payload));
    }

    pub fn on_state(&self, handler: impl Fn(LinkState) + Send + Sync + 'static) {
        self.shared.callbacks.on_state.set(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.callbacks.on_error.set(Arc::new(handler));
    }

    pub fn on_client_connect(&self, handler: impl Fn(ClientId, &str) + Send + Sync + 'static) {
        self.shared.callbacks.on_connect.set(Arc::new(handler));
    }

    pub fn on_client_data(&self, handler: impl Fn(ClientId, &[u8]) + Send + Sync + 'static) {
        self.shared.callbacks.on_data.set(Arc::new(handler));
    }

    pub fn on_client_disconnect(&self, handler: impl Fn(ClientId) + Send + Sync + 'static) {
        self.shared.callbacks.on_disconnect.set(Arc::new(handler));
    }

    pub fn config(&self) -> &TcpServerConfig {
        &self.cfg
    }
}

/// Bind, accept, and fan out until stopped.
async fn run_server(
    shared: Arc<ServerShared>,
    cfg: TcpServerConfig,
    mut cmd_rx: mpsc::Receiver<ServerCmd>,
) {
    let mut attempts = 0u32;
    let listener = loop {
        if shared.stop_requested() {
            shared.transition(LinkState::Closed);
            return;
        }
        match TcpListener::bind(("0.0.0.0", cfg.port)).await {
            Ok(listener) => break listener,
            Err(err) => {
                attempts += 1;
                let can_retry = cfg.enable_port_retry && attempts <= cfg.max_port_retries;
                report_connection_error("tcp_server", "bind", &err, can_retry);
                shared.emit_error(&format!("bind failed on port {}: {err}", cfg.port));
                if !can_retry {
                    shared.transition(LinkState::Error);
                    return;
                }
                tokio::select! {
                    biased;
                    _ = shared.stop_notify.notified() => {
                        shared.transition(LinkState::Closed);
                        return;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(
                        cfg.port_retry_interval_ms,
                    )) => {}
                }
            }
        }
    };

    info!(port = cfg.port, "listening");
    shared.transition(LinkState::Listening);

    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ClientId>();
    let mut next_id: ClientId = 1;

    loop {
        tokio::select! {
            biased;

            _ = shared.stop_notify.notified() => break,

            cmd = cmd_rx.recv() => match cmd {
                None | Some(ServerCmd::Stop) => break,
                Some(ServerCmd::Broadcast(payload)) => shared.broadcast_now(&payload),
                Some(ServerCmd::SendTo(id, payload)) => shared.send_to_now(id, payload),
            },

            exited = exit_rx.recv() => {
                if let Some(id) = exited {
                    let removed = shared.peers.lock().remove(&id);
                    if removed.is_some() {
                        info!(client_id = id, "peer disconnected");
                        if let Some(on_disconnect) = shared.callbacks.on_disconnect.get() {
                            on_disconnect(id);
                        }
                    }
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let at_capacity = cfg
                        .client_limit
                        .cap()
                        .is_some_and(|cap| shared.peers.lock().len() >= cap);
                    if at_capacity {
                        // Over the limit: close immediately, no id, no
                        // callback.
                        info!(peer = %addr, "rejecting peer over client limit");
                        drop(stream);
                        continue;
                    }

                    let id = next_id;
                    next_id += 1;
                    let addr_text = addr.to_string();

                    let peer_shared =
                        SessionShared::new("tcp_server", cfg.read_chunk, cfg.backpressure_threshold);
                    {
                        let server = shared.clone();
                        peer_shared.callbacks.on_bytes.set(Arc::new(move |bytes: &[u8]| {
                            if let Some(on_data) = server.callbacks.on_data.get() {
                                on_data(id, bytes);
                            }
                        }));
                    }

                    let (peer_tx, peer_rx) = mpsc::channel(TX_QUEUE_DEPTH);
                    shared.peers.lock().insert(id, PeerEntry {
                        addr: addr_text.clone(),
                        tx: peer_tx,
                        shared: peer_shared.clone(),
                    });

                    info!(client_id = id, peer = %addr_text, "peer connected");
                    if let Some(on_connect) = shared.callbacks.on_connect.get() {
                        on_connect(id, &addr_text);
                    }

                    let exit_tx = exit_tx.clone();
                    tokio::spawn(run_peer(stream, peer_shared, peer_rx, id, exit_tx));
                }
                Err(err) => {
                    report_connection_error("tcp_server", "accept", &err, true);
                    shared.emit_error(&format!("accept failed: {err}"));
                }
            },
        }
    }

    // Teardown: stop every peer and deliver their disconnects before the
    // server reports Closed.
    drop(listener);
    let peers = std::mem::take(&mut *shared.peers.lock());
    for (id, entry) in peers {
        entry.shared.request_stop();
        if let Some(on_disconnect) = shared.callbacks.on_disconnect.get() {
            on_disconnect(id);
        }
        debug!(client_id = id, addr = %entry.addr, "peer stopped with server");
    }
    shared.transition(LinkState::Closed);
}

/// One admitted peer: a single episode, then an exit notice to the server.
async fn run_peer(
    stream: tokio::net::TcpStream,
    peer_shared: Arc<SessionShared>,
    mut cmd_rx: mpsc::Receiver<SessionCmd>,
    id: ClientId,
    exit_tx: mpsc::UnboundedSender<ClientId>,
) {
    peer_shared.state.set(LinkState::Connected);
    let end = drive_stream(stream, &peer_shared, &mut cmd_rx, MemoryPool::global()).await;
    peer_shared.queued_bytes.store(0, Ordering::Relaxed);
    match end {
        EpisodeEnd::Stopped | EpisodeEnd::PeerClosed => {}
        EpisodeEnd::Failed(err) => {
            report_communication_error("tcp_server", "io", err.to_string(), false);
        }
    }
    peer_shared.state.set(LinkState::Closed);
    let _ = exit_tx.send(id);
}
