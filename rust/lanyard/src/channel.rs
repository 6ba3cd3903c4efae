//! The uniform byte-channel surface shared by all three carriers.

/// Operations common to TCP clients, TCP servers and serial ports.
///
/// Everything is non-blocking: `start`/`stop` queue lifecycle work on the
/// reactor, `send` copies into a pool buffer and returns, and delivery is
/// observed through the registered event handlers.
pub trait Channel {
    /// Begin connecting / listening / opening. Idempotent.
    fn start(&self);

    /// Tear the channel down; queued but untransmitted data is discarded.
    fn stop(&self);

    /// Queue bytes for transmission. Dropped silently when the channel is
    /// not connected.
    fn send(&self, data: &[u8]);

    /// [`send`](Channel::send) with a trailing newline.
    fn send_line(&self, line: &str) {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        self.send(&framed);
    }

    /// Atomic snapshot: is a byte stream currently established?
    fn is_connected(&self) -> bool;
}
