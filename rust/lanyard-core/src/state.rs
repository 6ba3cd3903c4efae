//! Link state machine shared by every session and server.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a single link (session or server).
///
/// Transitions are monotonic within one episode: an episode spans from
/// `Idle`/`Connecting` to the next `Closed`/`Error`. A reconnecting
/// session starts a new episode by re-entering `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// Constructed but never started.
    Idle = 0,
    /// Connect or open in progress (includes waiting on the retry timer).
    Connecting = 1,
    /// Server bound and accepting.
    Listening = 2,
    /// Byte stream established.
    Connected = 3,
    /// Cleanly shut down, either locally or by the peer.
    Closed = 4,
    /// Unrecoverable failure; only `stop()` leaves this state.
    Error = 5,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LinkState::Idle,
            1 => LinkState::Connecting,
            2 => LinkState::Listening,
            3 => LinkState::Connected,
            4 => LinkState::Closed,
            _ => LinkState::Error,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Listening => "listening",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
            LinkState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Atomic snapshot cell for a [`LinkState`].
///
/// Written only by the driver on the reactor thread; read from any thread
/// (`is_connected()` is a relaxed load, never a lock).
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: LinkState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is(&self, state: LinkState) -> bool {
        self.get() == state
    }

    pub fn is_connected(&self) -> bool {
        self.is(LinkState::Connected)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(LinkState::Idle)
    }
}
