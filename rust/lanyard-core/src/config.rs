//! Endpoint configuration structs consumed by the session and server
//! drivers. Builders fill these in and call `validate()` before any
//! resource is acquired.

use std::str::FromStr;

use crate::validate::{
    self, MAX_RETRY_INTERVAL_MS, MIN_RETRY_INTERVAL_MS, ValidationError,
};

pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_READ_CHUNK: usize = 4096;
pub const DEFAULT_BACKPRESSURE_THRESHOLD: usize = 1 << 20;
pub const MIN_BACKPRESSURE_THRESHOLD: usize = 64 * 1024;
pub const MAX_BACKPRESSURE_THRESHOLD: usize = 256 * 1024 * 1024;
pub const DEFAULT_PORT_RETRY_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_PORT_RETRIES: u32 = 3;

fn clamp_backpressure(threshold: usize) -> usize {
    threshold.clamp(MIN_BACKPRESSURE_THRESHOLD, MAX_BACKPRESSURE_THRESHOLD)
}

fn clamp_retry_interval(interval_ms: u64) -> u64 {
    interval_ms.clamp(MIN_RETRY_INTERVAL_MS, MAX_RETRY_INTERVAL_MS)
}

/// Outbound TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    pub host: String,
    pub port: u16,
    /// Delay between reconnect attempts.
    pub retry_interval_ms: u64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub read_chunk: usize,
    pub backpressure_threshold: usize,
}

impl TcpClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retries: None,
            read_chunk: DEFAULT_READ_CHUNK,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate_host(&self.host)?;
        validate::validate_port(self.port)?;
        validate::validate_retry_interval(self.retry_interval_ms)?;
        Ok(())
    }

    /// Pull out-of-range tunables back into their working ranges.
    pub fn clamp(&mut self) {
        self.retry_interval_ms = clamp_retry_interval(self.retry_interval_ms);
        self.backpressure_threshold = clamp_backpressure(self.backpressure_threshold);
        if self.read_chunk == 0 {
            self.read_chunk = DEFAULT_READ_CHUNK;
        }
    }
}

/// Admission policy for a listening server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLimit {
    /// Exactly one peer at a time.
    Single,
    /// At most `n` peers, `n >= 2`.
    Bounded(usize),
    /// No admission cap beyond the process descriptor budget.
    Unlimited,
}

impl ClientLimit {
    /// Admission ceiling, if any.
    pub fn cap(self) -> Option<usize> {
        match self {
            ClientLimit::Single => Some(1),
            ClientLimit::Bounded(n) => Some(n),
            ClientLimit::Unlimited => None,
        }
    }
}

/// Listening TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    pub port: u16,
    pub enable_port_retry: bool,
    /// Extra bind attempts after the first failure.
    pub max_port_retries: u32,
    pub port_retry_interval_ms: u64,
    pub client_limit: ClientLimit,
    pub read_chunk: usize,
    pub backpressure_threshold: usize,
}

impl TcpServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            enable_port_retry: false,
            max_port_retries: DEFAULT_MAX_PORT_RETRIES,
            port_retry_interval_ms: DEFAULT_PORT_RETRY_INTERVAL_MS,
            client_limit: ClientLimit::Unlimited,
            read_chunk: DEFAULT_READ_CHUNK,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate_port(self.port)?;
        if let ClientLimit::Bounded(n) = self.client_limit {
            if n < 2 {
                return Err(ValidationError {
                    field: "client_limit",
                    message: n.to_string(),
                    expected: "2 or more (use single_client or unlimited_clients)",
                });
            }
        }
        if self.enable_port_retry {
            validate::validate_retry_interval(self.port_retry_interval_ms)?;
        }
        Ok(())
    }

    pub fn clamp(&mut self) {
        self.port_retry_interval_ms = clamp_retry_interval(self.port_retry_interval_ms);
        self.backpressure_threshold = clamp_backpressure(self.backpressure_threshold);
        if self.read_chunk == 0 {
            self.read_chunk = DEFAULT_READ_CHUNK;
        }
    }
}

/// Parity setting for a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate::validate_parity(s)?;
        match s.to_ascii_lowercase().as_str() {
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            _ => Ok(Parity::None),
        }
    }
}

/// Flow control for a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Local serial/UART endpoint.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Re-arm the retry timer after device loss.
    pub reopen_on_error: bool,
    pub retry_interval_ms: u64,
    pub max_retries: Option<u32>,
    pub read_chunk: usize,
    pub backpressure_threshold: usize,
}

impl SerialConfig {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
            reopen_on_error: true,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retries: None,
            read_chunk: DEFAULT_READ_CHUNK,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate_device_path(&self.device)?;
        validate::validate_baud_rate(self.baud_rate)?;
        validate::validate_data_bits(self.data_bits)?;
        validate::validate_stop_bits(self.stop_bits)?;
        validate::validate_retry_interval(self.retry_interval_ms)?;
        Ok(())
    }

    pub fn clamp(&mut self) {
        self.data_bits = self.data_bits.clamp(5, 8);
        if self.stop_bits != 1 && self.stop_bits != 2 {
            self.stop_bits = 1;
        }
        self.retry_interval_ms = clamp_retry_interval(self.retry_interval_ms);
        self.backpressure_threshold = clamp_backpressure(self.backpressure_threshold);
        if self.read_chunk == 0 {
            self.read_chunk = DEFAULT_READ_CHUNK;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults_validate() {
        let cfg = TcpClientConfig::new("localhost", 9000);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry_interval_ms, 2000);
        assert_eq!(cfg.read_chunk, 4096);
        assert!(cfg.max_retries.is_none());
    }

    #[test]
    fn client_rejects_bad_host_and_port() {
        assert!(TcpClientConfig::new("bad host", 9000).validate().is_err());
        assert!(TcpClientConfig::new("localhost", 0).validate().is_err());
    }

    #[test]
    fn bounded_limit_needs_two_or_more() {
        let mut cfg = TcpServerConfig::new(9000);
        cfg.client_limit = ClientLimit::Bounded(1);
        assert!(cfg.validate().is_err());
        cfg.client_limit = ClientLimit::Bounded(0);
        assert!(cfg.validate().is_err());
        cfg.client_limit = ClientLimit::Bounded(2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn limit_caps() {
        assert_eq!(ClientLimit::Single.cap(), Some(1));
        assert_eq!(ClientLimit::Bounded(7).cap(), Some(7));
        assert_eq!(ClientLimit::Unlimited.cap(), None);
    }

    #[test]
    fn serial_validation_covers_framing() {
        let mut cfg = SerialConfig::new("/dev/ttyUSB0", 115_200);
        assert!(cfg.validate().is_ok());
        cfg.data_bits = 9;
        assert!(cfg.validate().is_err());
        cfg.clamp();
        assert_eq!(cfg.data_bits, 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parity_parses_case_insensitively() {
        assert_eq!("NONE".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("Odd".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("even".parse::<Parity>().unwrap(), Parity::Even);
        assert!("mark".parse::<Parity>().is_err());
    }

    #[test]
    fn clamping_pulls_values_into_range() {
        let mut cfg = TcpClientConfig::new("localhost", 9000);
        cfg.retry_interval_ms = 0;
        cfg.backpressure_threshold = 1;
        cfg.clamp();
        assert_eq!(cfg.retry_interval_ms, MIN_RETRY_INTERVAL_MS);
        assert_eq!(cfg.backpressure_threshold, MIN_BACKPRESSURE_THRESHOLD);
    }
}
