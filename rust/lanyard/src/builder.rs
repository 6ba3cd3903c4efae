//! Declarative channel construction.
//!
//! ```no_run
//! use lanyard::Channel;
//!
//! let client = lanyard::tcp_client("127.0.0.1", 9000)
//!     .retry_interval(500)
//!     .on_data(|bytes| println!("got {} bytes", bytes.len()))
//!     .on_connect(|| println!("up"))
//!     .build()
//!     .unwrap();
//! client.start();
//! ```
//!
//! Validation happens at `build()`, before any socket, descriptor or
//! reactor resource is touched; rejected configurations also land in the
//! error hub as configuration errors.

use std::fmt;
use std::io;

use lanyard_core::config::{
    ClientLimit, FlowControl, SerialConfig, TcpClientConfig, TcpServerConfig,
};
use lanyard_core::hub::report_configuration_error;
use lanyard_core::validate::ValidationError;
use lanyard_stream::server::ClientId;

use crate::binding::ReactorBinding;
use crate::channel::Channel;
use crate::serial::Serial;
use crate::tcp_client::TcpClient;
use crate::tcp_server::TcpServer;

/// Why a channel could not be built.
#[derive(Debug)]
pub enum BuildError {
    /// A configuration value was rejected.
    Validation(ValidationError),
    /// The private reactor could not be started.
    Reactor(io::Error),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Validation(err) => write!(f, "{err}"),
            BuildError::Reactor(err) => write!(f, "failed to start reactor: {err}"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Validation(err) => Some(err),
            BuildError::Reactor(err) => Some(err),
        }
    }
}

impl From<ValidationError> for BuildError {
    fn from(err: ValidationError) -> Self {
        BuildError::Validation(err)
    }
}

type BoxedData = Box<dyn Fn(&[u8]) + Send + Sync>;
type BoxedUnit = Box<dyn Fn() + Send + Sync>;
type BoxedMessage = Box<dyn Fn(&str) + Send + Sync>;
type BoxedBackpressure = Box<dyn Fn(usize) + Send + Sync>;
type BoxedMultiData = Box<dyn Fn(ClientId, &[u8]) + Send + Sync>;
type BoxedMultiConnect = Box<dyn Fn(ClientId, &str) + Send + Sync>;
type BoxedMultiDisconnect = Box<dyn Fn(ClientId) + Send + Sync>;

/// Start configuring an outbound TCP connection.
pub fn tcp_client(host: impl Into<String>, port: u16) -> TcpClientBuilder {
    TcpClientBuilder {
        cfg: TcpClientConfig::new(host, port),
        auto_start: false,
        auto_manage: true,
        independent: false,
        on_data: None,
        on_connect: None,
        on_disconnect: None,
        on_error: None,
        on_backpressure: None,
    }
}

/// Start configuring a listening TCP server.
pub fn tcp_server(port: u16) -> TcpServerBuilder {
    TcpServerBuilder {
        cfg: TcpServerConfig::new(port),
        auto_start: false,
        auto_manage: true,
        independent: false,
        on_data: None,
        on_connect: None,
        on_disconnect: None,
        on_error: None,
        on_client_data: None,
        on_client_connect: None,
        on_client_disconnect: None,
    }
}

/// Start configuring a serial port.
pub fn serial(device: impl Into<String>, baud_rate: u32) -> SerialBuilder {
    SerialBuilder {
        cfg: SerialConfig::new(device, baud_rate),
        parity: None,
        auto_start: false,
        auto_manage: true,
        independent: false,
        on_data: None,
        on_connect: None,
        on_disconnect: None,
        on_error: None,
        on_backpressure: None,
    }
}

pub struct TcpClientBuilder {
    cfg: TcpClientConfig,
    auto_start: bool,
    auto_manage: bool,
    independent: bool,
    on_data: Option<BoxedData>,
    on_connect: Option<BoxedUnit>,
    on_disconnect: Option<BoxedUnit>,
    on_error: Option<BoxedMessage>,
    on_backpressure: Option<BoxedBackpressure>,
}

impl TcpClientBuilder {
    /// Delay between reconnect attempts, in milliseconds.
    pub fn retry_interval(mut self, interval_ms: u64) -> Self {
        self.cfg.retry_interval_ms = interval_ms;
        self
    }

    /// Give up after `max` consecutive failed connect attempts.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.cfg.max_retries = Some(max);
        self
    }

    /// Retry forever (the default).
    pub fn unlimited_retries(mut self) -> Self {
        self.cfg.max_retries = None;
        self
    }

    /// Queued-bytes level that triggers the backpressure handler.
    pub fn backpressure_threshold(mut self, bytes: usize) -> Self {
        self.cfg.backpressure_threshold = bytes;
        self
    }

    /// Start the channel as part of `build()`.
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Stop the channel when the handle is dropped (the default).
    pub fn auto_manage(mut self, auto_manage: bool) -> Self {
        self.auto_manage = auto_manage;
        self
    }

    /// Run on a private reactor instead of the shared one.
    pub fn independent_reactor(mut self, independent: bool) -> Self {
        self.independent = independent;
        self
    }

    pub fn on_data(mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Box::new(handler));
        self
    }

    pub fn on_connect(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(handler));
        self
    }

    pub fn on_disconnect(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn on_backpressure(mut self, handler: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_backpressure = Some(Box::new(handler));
        self
    }

    /// Validate and assemble the channel.
    pub fn build(self) -> Result<TcpClient, BuildError> {
        if let Err(err) = self.cfg.validate() {
            report_configuration_error("tcp_client", "build", err.to_string());
            return Err(err.into());
        }
        let binding = ReactorBinding::new(self.independent).map_err(BuildError::Reactor)?;
        let transport = lanyard_stream::client::TcpClient::new(self.cfg);
        let channel = TcpClient::from_parts(transport, binding, self.auto_manage);
        if let Some(handler) = self.on_data {
            channel.on_data(handler);
        }
        if let Some(handler) = self.on_connect {
            channel.on_connect(handler);
        }
        if let Some(handler) = self.on_disconnect {
            channel.on_disconnect(handler);
        }
        if let Some(handler) = self.on_error {
            channel.on_error(handler);
        }
        if let Some(handler) = self.on_backpressure {
            channel.on_backpressure(handler);
        }
        if self.auto_start {
            channel.start();
        }
        Ok(channel)
    }
}

pub struct TcpServerBuilder {
    cfg: TcpServerConfig,
    auto_start: bool,
    auto_manage: bool,
    independent: bool,
    on_data: Option<BoxedData>,
    on_connect: Option<BoxedUnit>,
    on_disconnect: Option<BoxedUnit>,
    on_error: Option<BoxedMessage>,
    on_client_data: Option<BoxedMultiData>,
    on_client_connect: Option<BoxedMultiConnect>,
    on_client_disconnect: Option<BoxedMultiDisconnect>,
}

impl TcpServerBuilder {
    /// Admit one peer at a time; extra connections are closed unadmitted.
    pub fn single_client(mut self) -> Self {
        self.cfg.client_limit = ClientLimit::Single;
        self
    }

    /// Admit at most `max` peers; `max` below 2 is rejected at `build()`
    /// (use [`single_client`](Self::single_client) or
    /// [`unlimited_clients`](Self::unlimited_clients)).
    pub fn limited_clients(mut self, max: usize) -> Self {
        self.cfg.client_limit = ClientLimit::Bounded(max);
        self
    }

    /// No admission cap (the default).
    pub fn unlimited_clients(mut self) -> Self {
        self.cfg.client_limit = ClientLimit::Unlimited;
        self
    }

    /// Retry a failed bind `max_retries` more times, `interval_ms` apart.
    pub fn port_retry(mut self, enable: bool, max_retries: u32, interval_ms: u64) -> Self {
        self.cfg.enable_port_retry = enable;
        self.cfg.max_port_retries = max_retries;
        self.cfg.port_retry_interval_ms = interval_ms;
        self
    }

    pub fn backpressure_threshold(mut self, bytes: usize) -> Self {
        self.cfg.backpressure_threshold = bytes;
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn auto_manage(mut self, auto_manage: bool) -> Self {
        self.auto_manage = auto_manage;
        self
    }

    pub fn independent_reactor(mut self, independent: bool) -> Self {
        self.independent = independent;
        self
    }

    pub fn on_data(mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Box::new(handler));
        self
    }

    pub fn on_connect(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(handler));
        self
    }

    pub fn on_disconnect(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn on_client_data(
        mut self,
        handler: impl Fn(ClientId, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_client_data = Some(Box::new(handler));
        self
    }

    pub fn on_client_connect(
        mut self,
        handler: impl Fn(ClientId, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_client_connect = Some(Box::new(handler));
        self
    }

    pub fn on_client_disconnect(
        mut self,
        handler: impl Fn(ClientId) + Send + Sync + 'static,
    ) -> Self {
        self.on_client_disconnect = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<TcpServer, BuildError> {
        if let Err(err) = self.cfg.validate() {
            report_configuration_error("tcp_server", "build", err.to_string());
            return Err(err.into());
        }
        let binding = ReactorBinding::new(self.independent).map_err(BuildError::Reactor)?;
        let transport = lanyard_stream::server::TcpServer::new(self.cfg);
        let channel = TcpServer::from_parts(transport, binding, self.auto_manage);
        if let Some(handler) = self.on_data {
            channel.on_data(handler);
        }
        if let Some(handler) = self.on_connect {
            channel.on_connect(handler);
        }
        if let Some(handler) = self.on_disconnect {
            channel.on_disconnect(handler);
        }
        if let Some(handler) = self.on_error {
            channel.on_error(handler);
        }
        if let Some(handler) = self.on_client_data {
            channel.on_client_data(handler);
        }
        if let Some(handler) = self.on_client_connect {
            channel.on_client_connect(handler);
        }
        if let Some(handler) = self.on_client_disconnect {
            channel.on_client_disconnect(handler);
        }
        if self.auto_start {
            channel.start();
        }
        Ok(channel)
    }
}

pub struct SerialBuilder {
    cfg: SerialConfig,
    /// Parity by name, parsed (case-insensitively) at `build()`.
    parity: Option<String>,
    auto_start: bool,
    auto_manage: bool,
    independent: bool,
    on_data: Option<BoxedData>,
    on_connect: Option<BoxedUnit>,
    on_disconnect: Option<BoxedUnit>,
    on_error: Option<BoxedMessage>,
    on_backpressure: Option<BoxedBackpressure>,
}

impl SerialBuilder {
    /// Character size, 5..=8.
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.cfg.data_bits = bits;
        self
    }

    /// 1 or 2.
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.cfg.stop_bits = bits;
        self
    }

    /// `"none"`, `"odd"` or `"even"`, case-insensitive.
    pub fn parity(mut self, parity: impl Into<String>) -> Self {
        self.parity = Some(parity.into());
        self
    }

    pub fn flow_control(mut self, flow: FlowControl) -> Self {
        self.cfg.flow_control = flow;
        self
    }

    /// Re-arm the retry timer after device loss (the default).
    pub fn reopen_on_error(mut self, reopen: bool) -> Self {
        self.cfg.reopen_on_error = reopen;
        self
    }

    pub fn retry_interval(mut self, interval_ms: u64) -> Self {
        self.cfg.retry_interval_ms = interval_ms;
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.cfg.max_retries = Some(max);
        self
    }

    pub fn unlimited_retries(mut self) -> Self {
        self.cfg.max_retries = None;
        self
    }

    pub fn backpressure_threshold(mut self, bytes: usize) -> Self {
        self.cfg.backpressure_threshold = bytes;
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn auto_manage(mut self, auto_manage: bool) -> Self {
        self.auto_manage = auto_manage;
        self
    }

    pub fn independent_reactor(mut self, independent: bool) -> Self {
        self.independent = independent;
        self
    }

    pub fn on_data(mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Box::new(handler));
        self
    }

    pub fn on_connect(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(handler));
        self
    }

    pub fn on_disconnect(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn on_backpressure(mut self, handler: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_backpressure = Some(Box::new(handler));
        self
    }

    pub fn build(mut self) -> Result<Serial, BuildError> {
        if let Some(name) = &self.parity {
            match name.parse() {
                Ok(parity) => self.cfg.parity = parity,
                Err(err) => {
                    report_configuration_error("serial", "build", err.to_string());
                    return Err(BuildError::Validation(err));
                }
            }
        }
        if let Err(err) = self.cfg.validate() {
            report_configuration_error("serial", "build", err.to_string());
            return Err(err.into());
        }
        let binding = ReactorBinding::new(self.independent).map_err(BuildError::Reactor)?;
        let transport = lanyard_stream::serial::Serial::new(self.cfg);
        let channel = Serial::from_parts(transport, binding, self.auto_manage);
        if let Some(handler) = self.on_data {
            channel.on_data(handler);
        }
        if let Some(handler) = self.on_connect {
            channel.on_connect(handler);
        }
        if let Some(handler) = self.on_disconnect {
            channel.on_disconnect(handler);
        }
        if let Some(handler) = self.on_error {
            channel.on_error(handler);
        }
        if let Some(handler) = self.on_backpressure {
            channel.on_backpressure(handler);
        }
        if self.auto_start {
            channel.start();
        }
        Ok(channel)
    }
}
