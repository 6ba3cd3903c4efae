//! Per-connection session machinery shared by the TCP client, serial and
//! accepted-peer variants.
//!
//! A session is a driver task on the reactor plus a [`Session`] handle.
//! The handle copies outgoing bytes into pool buffers and queues them on a
//! bounded command channel; the driver owns the stream and runs one
//! connected episode at a time with a single outstanding read and a single
//! in-flight write. All user callbacks fire on the reactor thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use lanyard_core::pool::{MemoryPool, PooledBuf};
use lanyard_core::state::{LinkState, StateCell};

/// Depth of the per-session TX command queue, in messages.
pub(crate) const TX_QUEUE_DEPTH: usize = 1024;

pub type BytesHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(LinkState) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
pub type BackpressureHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// One outgoing payload.
pub(crate) enum TxBuf {
    /// Caller bytes copied into a pool buffer; `usize` is the logical
    /// length within the class-sized buffer.
    Pooled(PooledBuf, usize),
    /// Shared immutable payload (broadcast fast path).
    Shared(Bytes),
}

impl TxBuf {
    pub(crate) fn len(&self) -> usize {
        match self {
            TxBuf::Pooled(_, len) => *len,
            TxBuf::Shared(bytes) => bytes.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            TxBuf::Pooled(buf, len) => &buf.as_slice()[..*len],
            TxBuf::Shared(bytes) => bytes,
        }
    }
}

pub(crate) enum SessionCmd {
    Send(TxBuf),
    Stop,
}

/// Late-bindable callback slot; registration after `start()` takes effect
/// on the next event.
pub(crate) struct Slot<T>(Mutex<Option<T>>);

impl<T: Clone> Slot<T> {
    pub(crate) fn empty() -> Self {
        Slot(Mutex::new(None))
    }

    pub(crate) fn set(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

pub(crate) struct Callbacks {
    pub(crate) on_bytes: Slot<BytesHandler>,
    pub(crate) on_state: Slot<StateHandler>,
    pub(crate) on_error: Slot<MessageHandler>,
    pub(crate) on_backpressure: Slot<BackpressureHandler>,
}

impl Callbacks {
    fn empty() -> Self {
        Self {
            on_bytes: Slot::empty(),
            on_state: Slot::empty(),
            on_error: Slot::empty(),
            on_backpressure: Slot::empty(),
        }
    }
}

/// State shared between a session handle and its driver task.
pub(crate) struct SessionShared {
    pub(crate) component: &'static str,
    pub(crate) state: StateCell,
    pub(crate) callbacks: Callbacks,
    pub(crate) queued_bytes: AtomicUsize,
    pub(crate) backpressure_threshold: usize,
    pub(crate) read_chunk: usize,
    /// Out-of-band stop: survives a full command queue.
    pub(crate) stop_flag: AtomicBool,
    pub(crate) stop_notify: Notify,
}

impl SessionShared {
    pub(crate) fn new(
        component: &'static str,
        read_chunk: usize,
        backpressure_threshold: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            component,
            state: StateCell::default(),
            callbacks: Callbacks::empty(),
            queued_bytes: AtomicUsize::new(0),
            backpressure_threshold,
            read_chunk,
            stop_flag: AtomicBool::new(false),
            stop_notify: Notify::new(),
        })
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }

    /// Move to `state` and notify the state callback (reactor thread only).
    pub(crate) fn transition(&self, state: LinkState) {
        debug!(component = self.component, %state, "link state");
        self.state.set(state);
        if let Some(on_state) = self.callbacks.on_state.get() {
            on_state(state);
        }
    }

    pub(crate) fn emit_error(&self, message: &str) {
        if let Some(on_error) = self.callbacks.on_error.get() {
            on_error(message);
        }
    }
}

/// Why a connected episode ended.
pub(crate) enum EpisodeEnd {
    /// `stop()` was observed; no further reconnects.
    Stopped,
    /// Clean EOF from the peer.
    PeerClosed,
    /// Read or write failure.
    Failed(std::io::Error),
}

/// Run one connected episode over `io`.
///
/// Selects between the command queue and a single outstanding read into a
/// fresh pool buffer; writes drain head-first with exactly one in flight.
/// Returns when stopped, on EOF, or on the first I/O error. Queued TX
/// buffers that were never transmitted are released by the caller when it
/// drains or drops the command receiver.
pub(crate) async fn drive_stream<S>(
    io: S,
    shared: &SessionShared,
    cmd_rx: &mut mpsc::Receiver<SessionCmd>,
    pool: &MemoryPool,
) -> EpisodeEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut rd, mut wr) = tokio::io::split(io);

    loop {
        if shared.stop_requested() {
            return EpisodeEnd::Stopped;
        }
        let mut rx_buf = pool.acquire(shared.read_chunk);
        if rx_buf.is_empty() {
            return EpisodeEnd::Failed(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "receive buffer unavailable",
            ));
        }

        tokio::select! {
            biased;

            _ = shared.stop_notify.notified() => return EpisodeEnd::Stopped,

            cmd = cmd_rx.recv() => match cmd {
                None | Some(SessionCmd::Stop) => return EpisodeEnd::Stopped,
                Some(SessionCmd::Send(tx)) => {
                    let queued = shared.queued_bytes.load(Ordering::Relaxed);
                    if queued > shared.backpressure_threshold {
                        if let Some(on_bp) = shared.callbacks.on_backpressure.get() {
                            on_bp(queued);
                        }
                    }
                    // Stop may interrupt a stalled write; the remote can
                    // observe a prefix of the payload in that case.
                    let result = tokio::select! {
                        biased;
                        _ = shared.stop_notify.notified() => {
                            shared.queued_bytes.fetch_sub(tx.len(), Ordering::Relaxed);
                            return EpisodeEnd::Stopped;
                        }
                        result = wr.write_all(tx.as_slice()) => result,
                    };
                    shared.queued_bytes.fetch_sub(tx.len(), Ordering::Relaxed);
                    trace!(component = shared.component, len = tx.len(), "wrote");
                    if let Err(err) = result {
                        return EpisodeEnd::Failed(err);
                    }
                }
            },

            read = rd.read(rx_buf.as_mut_slice()) => match read {
                Ok(0) => return EpisodeEnd::PeerClosed,
                Ok(n) => {
                    trace!(component = shared.component, len = n, "read");
                    if let Some(on_bytes) = shared.callbacks.on_bytes.get() {
                        on_bytes(&rx_buf.as_slice()[..n]);
                    }
                    // rx_buf drops here and returns to the pool; the next
                    // iteration acquires a fresh one.
                }
                Err(err) => return EpisodeEnd::Failed(err),
            },
        }
    }
}

/// Handle side of a session: non-blocking sends and lifecycle queries.
///
/// Usable from any thread; all mutation happens by queueing commands for
/// the driver.
pub struct Session {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) cmd_tx: mpsc::Sender<SessionCmd>,
    pub(crate) cmd_rx: Mutex<Option<mpsc::Receiver<SessionCmd>>>,
    pub(crate) started: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        component: &'static str,
        read_chunk: usize,
        backpressure_threshold: usize,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(TX_QUEUE_DEPTH);
        Self {
            shared: SessionShared::new(component, read_chunk, backpressure_threshold),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            started: AtomicBool::new(false),
        }
    }

    /// Take the driver half; `start()` may only consume it once.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<SessionCmd>> {
        self.cmd_rx.lock().take()
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Copy `data` into a pool buffer and queue it for transmission.
    ///
    /// Returns immediately; delivery is asynchronous. Dropped silently when
    /// the session is not connected (observe state via callbacks). A full
    /// TX queue drops the payload and reports a communication error.
    pub fn send(&self, data: &[u8]) {
        if data.is_empty() || !self.is_connected() {
            return;
        }
        let mut buf = MemoryPool::global().acquire(data.len());
        if buf.is_empty() {
            // Pool refused the request; already reported as critical.
            return;
        }
        buf.as_mut_slice()[..data.len()].copy_from_slice(data);
        self.enqueue(TxBuf::Pooled(buf, data.len()));
    }

    /// `send` with a trailing newline.
    pub fn send_line(&self, line: &str) {
        if !self.is_connected() {
            return;
        }
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        self.send(&framed);
    }

    pub(crate) fn enqueue(&self, tx: TxBuf) {
        let len = tx.len();
        self.shared.queued_bytes.fetch_add(len, Ordering::Relaxed);
        match self.cmd_tx.try_send(SessionCmd::Send(tx)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.queued_bytes.fetch_sub(len, Ordering::Relaxed);
                lanyard_core::hub::report_communication_error(
                    self.shared.component,
                    "send",
                    "tx queue full, dropping payload",
                    true,
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.queued_bytes.fetch_sub(len, Ordering::Relaxed);
            }
        }
    }

    /// Request teardown. Safe from any thread, idempotent; pending TX
    /// buffers are released to the pool without being transmitted.
    pub fn stop(&self) {
        self.shared.request_stop();
        // Also queue a Stop so a driver draining commands sees it in order.
        let _ = self.cmd_tx.try_send(SessionCmd::Stop);
    }

    pub fn on_bytes(&self, handler: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.shared.callbacks.on_bytes.set(Arc::new(handler));
    }

    pub fn on_state(&self, handler: impl Fn(LinkState) + Send + Sync + 'static) {
        self.shared.callbacks.on_state.set(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.callbacks.on_error.set(Arc::new(handler));
    }

    pub fn on_backpressure(&self, handler: impl Fn(usize) + Send + Sync + 'static) {
        self.shared.callbacks.on_backpressure.set(Arc::new(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_while_idle_is_dropped() {
        let session = Session::new("test", 4096, 1 << 20);
        session.send(b"hello");
        assert_eq!(session.shared.queued_bytes.load(Ordering::Relaxed), 0);
        let mut rx = session.take_receiver().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_while_connected_queues_a_pool_buffer() {
        let session = Session::new("test", 4096, 1 << 20);
        session.shared.state.set(LinkState::Connected);
        session.send(b"hello");
        assert_eq!(session.shared.queued_bytes.load(Ordering::Relaxed), 5);
        let mut rx = session.take_receiver().unwrap();
        match rx.try_recv() {
            Ok(SessionCmd::Send(tx)) => {
                assert_eq!(tx.as_slice(), b"hello");
                assert_eq!(tx.len(), 5);
            }
            _ => panic!("expected a queued send"),
        }
    }

    #[test]
    fn send_line_appends_newline() {
        let session = Session::new("test", 4096, 1 << 20);
        session.shared.state.set(LinkState::Connected);
        session.send_line("ping");
        let mut rx = session.take_receiver().unwrap();
        match rx.try_recv() {
            Ok(SessionCmd::Send(tx)) => assert_eq!(tx.as_slice(), b"ping\n"),
            _ => panic!("expected a queued send"),
        }
    }

    #[test]
    fn late_callback_registration_takes_effect() {
        let session = Session::new("test", 4096, 1 << 20);
        assert!(session.shared.callbacks.on_bytes.get().is_none());
        session.on_bytes(|_| {});
        assert!(session.shared.callbacks.on_bytes.get().is_some());
    }
}
