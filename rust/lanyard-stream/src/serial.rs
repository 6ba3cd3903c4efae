//! Local serial/UART session.

use std::io;
use std::sync::atomic::Ordering;

use tokio_serial::{SerialPortBuilderExt, SerialStream};

use lanyard_core::config::{FlowControl, Parity, SerialConfig};
use lanyard_core::reactor::Reactor;

use crate::connector::{Connector, RetryPolicy, run_session};
use crate::session::Session;

fn map_data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn map_stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn map_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn map_flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

struct SerialConnector {
    cfg: SerialConfig,
}

impl Connector for SerialConnector {
    type Stream = SerialStream;

    async fn connect(&mut self) -> io::Result<SerialStream> {
        tokio_serial::new(&self.cfg.device, self.cfg.baud_rate)
            .data_bits(map_data_bits(self.cfg.data_bits))
            .stop_bits(map_stop_bits(self.cfg.stop_bits))
            .parity(map_parity(self.cfg.parity))
            .flow_control(map_flow_control(self.cfg.flow_control))
            .open_native_async()
            .map_err(io::Error::other)
    }
}

/// A serial port session with the same lifecycle as the TCP client; device
/// loss re-arms the retry timer unless `reopen_on_error` is off.
pub struct Serial {
    session: Session,
    cfg: SerialConfig,
}

impl Serial {
    pub fn new(mut cfg: SerialConfig) -> Self {
        cfg.clamp();
        Self {
            session: Session::new("serial", cfg.read_chunk, cfg.backpressure_threshold),
            cfg,
        }
    }

    /// Spawn the driver on `reactor`. Idempotent.
    pub fn start(&self, reactor: &Reactor) {
        if self.session.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(cmd_rx) = self.session.take_receiver() else {
            return;
        };
        let connector = SerialConnector {
            cfg: self.cfg.clone(),
        };
        let policy = RetryPolicy {
            interval: std::time::Duration::from_millis(self.cfg.retry_interval_ms),
            max_retries: self.cfg.max_retries,
            reconnect: self.cfg.reopen_on_error,
        };
        let shared = self.session.shared.clone();
        reactor.spawn(run_session(connector, policy, shared, cmd_rx));
    }

    /// Tear the session down; no-op when never started.
    pub fn stop(&self) {
        if self.session.started.load(Ordering::Acquire) {
            self.session.stop();
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &SerialConfig {
        &self.cfg
    }
}
