//! Session drivers for the lanyard transport library.
//!
//! Three carriers, one programming model: an outbound
//! [TCP client](client::TcpClient), a multi-peer
//! [TCP server](server::TcpServer), and a local
//! [serial port](serial::Serial). Each is a driver task on a
//! [`Reactor`](lanyard_core::reactor::Reactor) plus a thread-safe handle;
//! every user callback fires on the reactor thread.

pub mod client;
pub mod connector;
pub mod serial;
pub mod server;
pub mod session;

pub use client::TcpClient;
pub use connector::{Connector, RetryPolicy};
pub use serial::Serial;
pub use server::{ClientId, TcpServer};
pub use session::Session;
