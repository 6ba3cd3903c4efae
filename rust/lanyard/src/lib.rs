//! Unified event-driven transport over three byte-stream carriers:
//! outbound TCP connections, multi-client TCP servers, and local serial
//! ports.
//!
//! Compose a channel declaratively, receive a handle, then interact
//! through non-blocking sends and callbacks:
//!
//! ```no_run
//! use lanyard::Channel;
//!
//! let server = lanyard::tcp_server(9000)
//!     .unlimited_clients()
//!     .on_client_connect(|id, addr| println!("client {id} from {addr}"))
//!     .auto_start(true)
//!     .build()
//!     .unwrap();
//!
//! let client = lanyard::tcp_client("127.0.0.1", 9000)
//!     .on_data(|bytes| println!("{}", String::from_utf8_lossy(bytes)))
//!     .on_connect(|| println!("connected"))
//!     .build()
//!     .unwrap();
//! client.start();
//! client.send_line("hello");
//! # drop(server);
//! ```
//!
//! All I/O is multiplexed on a single shared reactor thread; every
//! callback runs there, so handlers must return promptly. Sessions
//! reconnect on a configurable interval, servers can retry an occupied
//! port and cap admissions, and all RX/TX buffers come from a size-classed
//! memory pool. Failures flow through a process-wide
//! [`ErrorHub`](lanyard_core::hub::ErrorHub) that callers can subscribe to.

mod binding;
mod builder;
mod channel;
mod handler;
mod serial;
mod tcp_client;
mod tcp_server;

pub use builder::{
    BuildError, SerialBuilder, TcpClientBuilder, TcpServerBuilder, serial, tcp_client, tcp_server,
};
pub use channel::Channel;
pub use serial::Serial;
pub use tcp_client::TcpClient;
pub use tcp_server::TcpServer;

pub use lanyard_core::config::{ClientLimit, FlowControl, Parity};
pub use lanyard_core::error::{ErrorCategory, ErrorInfo, ErrorLevel};
pub use lanyard_core::hub::ErrorHub;
pub use lanyard_core::pool::MemoryPool;
pub use lanyard_core::reactor::Reactor;
pub use lanyard_core::state::LinkState;
pub use lanyard_stream::server::ClientId;
