//! Reconnecting session loop shared by the TCP client and serial variants.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use lanyard_core::hub::report_connection_error;
use lanyard_core::pool::MemoryPool;
use lanyard_core::state::LinkState;

use crate::session::{EpisodeEnd, SessionCmd, SessionShared, drive_stream};

/// A factory that opens the underlying stream on demand.
///
/// Called on initial start and before every reconnect attempt.
pub trait Connector: Send + 'static {
    /// The stream type produced by this connector.
    type Stream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream.
    fn connect(&mut self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Reconnect behavior: a fixed delay between attempts and an optional cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before each reconnect attempt.
    pub interval: Duration,
    /// Give up (and enter `Error`) after this many consecutive failed
    /// attempts; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Re-arm the timer after an established stream is lost. Disabled for
    /// serial endpoints configured without reopen-on-error.
    pub reconnect: bool,
}

impl RetryPolicy {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            max_retries: None,
            reconnect: true,
        }
    }
}

/// Drain commands until stop; queued payloads are dropped (released to the
/// pool) because there is no stream to write them to.
async fn wait_for_stop(shared: &SessionShared, cmd_rx: &mut mpsc::Receiver<SessionCmd>) {
    loop {
        tokio::select! {
            _ = shared.stop_notify.notified() => return,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(SessionCmd::Stop) => return,
                Some(SessionCmd::Send(tx)) => {
                    shared.queued_bytes.fetch_sub(tx.len(), Ordering::Relaxed);
                }
            },
        }
    }
}

/// The session driver: connect, run one episode, schedule the next.
///
/// Runs until stopped, the retry budget is exhausted, or the policy says
/// the stream should not be re-established.
pub(crate) async fn run_session<C: Connector>(
    mut connector: C,
    policy: RetryPolicy,
    shared: Arc<SessionShared>,
    mut cmd_rx: mpsc::Receiver<SessionCmd>,
) {
    let pool = MemoryPool::global();
    let mut failed_attempts = 0u32;

    loop {
        if shared.stop_requested() {
            shared.transition(LinkState::Closed);
            return;
        }
        shared.transition(LinkState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = wait_for_stop(&shared, &mut cmd_rx) => {
                shared.transition(LinkState::Closed);
                return;
            }
            result = connector.connect() => result,
        };

        match connected {
            Err(err) => {
                failed_attempts += 1;
                let exhausted = policy
                    .max_retries
                    .is_some_and(|max| failed_attempts > max);
                report_connection_error(shared.component, "connect", &err, !exhausted);
                shared.emit_error(&format!("connect failed: {err}"));
                if exhausted {
                    shared.transition(LinkState::Error);
                    return;
                }
            }
            Ok(io) => {
                failed_attempts = 0;
                info!(component = shared.component, "connected");
                shared.transition(LinkState::Connected);

                let end = drive_stream(io, &shared, &mut cmd_rx, pool).await;
                shared.queued_bytes.store(0, Ordering::Relaxed);

                match end {
                    EpisodeEnd::Stopped => {
                        shared.transition(LinkState::Closed);
                        return;
                    }
                    EpisodeEnd::PeerClosed => {
                        info!(component = shared.component, "peer closed");
                        shared.transition(LinkState::Closed);
                    }
                    EpisodeEnd::Failed(err) => {
                        lanyard_core::hub::report_communication_error(
                            shared.component,
                            "io",
                            err.to_string(),
                            policy.reconnect,
                        );
                        shared.emit_error(&format!("stream failed: {err}"));
                        if !policy.reconnect {
                            shared.transition(LinkState::Error);
                            return;
                        }
                        shared.transition(LinkState::Closed);
                    }
                }

                if !policy.reconnect {
                    return;
                }
            }
        }

        // Arm the retry timer; stop cancels it.
        tokio::select! {
            biased;
            _ = wait_for_stop(&shared, &mut cmd_rx) => {
                shared.transition(LinkState::Closed);
                return;
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
