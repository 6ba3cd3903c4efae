//! Outbound TCP session.

use std::io;
use std::sync::atomic::Ordering;

use tokio::net::TcpStream;

use lanyard_core::config::TcpClientConfig;
use lanyard_core::reactor::Reactor;

use crate::connector::{Connector, RetryPolicy, run_session};
use crate::session::Session;

struct TcpConnector {
    host: String,
    port: u16,
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self) -> io::Result<TcpStream> {
        TcpStream::connect((self.host.as_str(), self.port)).await
    }
}

/// A TCP client session: connects, reads, writes, reconnects.
///
/// Follows the link state machine: `start()` enters `Connecting`, a
/// successful connect enters `Connected`, losing the stream re-arms the
/// retry timer, `stop()` lands in `Closed`. Unless capped, reconnects are
/// unbounded.
pub struct TcpClient {
    session: Session,
    cfg: TcpClientConfig,
}

impl TcpClient {
    /// Build an idle session; nothing happens until [`start`](Self::start).
    ///
    /// The configuration is clamped, not validated: builders reject bad
    /// values before constructing a session.
    pub fn new(mut cfg: TcpClientConfig) -> Self {
        cfg.clamp();
        Self {
            session: Session::new("tcp_client", cfg.read_chunk, cfg.backpressure_threshold),
            cfg,
        }
    }

    /// Spawn the driver on `reactor`. Idempotent: a session that is already
    /// connecting or connected is left alone.
    pub fn start(&self, reactor: &Reactor) {
        if self.session.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(cmd_rx) = self.session.take_receiver() else {
            return;
        };
        let connector = TcpConnector {
            host: self.cfg.host.clone(),
            port: self.cfg.port,
        };
        let policy = RetryPolicy {
            interval: std::time::Duration::from_millis(self.cfg.retry_interval_ms),
            max_retries: self.cfg.max_retries,
            reconnect: true,
        };
        let shared = self.session.shared.clone();
        reactor.spawn(run_session(connector, policy, shared, cmd_rx));
    }

    /// Tear the session down. Calling this on a never-started session is a
    /// no-op with no callbacks.
    pub fn stop(&self) {
        if self.session.started.load(Ordering::Acquire) {
            self.session.stop();
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.cfg
    }
}
