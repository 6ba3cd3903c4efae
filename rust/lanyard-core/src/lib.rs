//! Core services for the lanyard transport library.
//!
//! This crate hosts the layers everything else stands on: the size-classed
//! [memory pool](pool), the single-threaded [reactor](reactor) that owns
//! all I/O, the [link state machine](state), the [error model](error) with
//! its process-wide [hub](hub), and the pure [validators](validate) and
//! [configuration types](config) consumed by the builder layer.

pub mod config;
pub mod error;
pub mod hub;
pub mod pool;
pub mod reactor;
pub mod state;
pub mod validate;

pub use config::{
    ClientLimit, FlowControl, Parity, SerialConfig, TcpClientConfig, TcpServerConfig,
};
pub use error::{ErrorCategory, ErrorInfo, ErrorLevel, ErrorStats};
pub use hub::ErrorHub;
pub use pool::{BufferClass, HealthMetrics, MemoryPool, PoolStats, PooledBuf};
pub use reactor::Reactor;
pub use state::{LinkState, StateCell};
pub use validate::ValidationError;
