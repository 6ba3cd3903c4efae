//! Which reactor a channel runs on.

use std::io;
use std::sync::Arc;

use lanyard_core::reactor::Reactor;

/// A channel either joins the process-wide reactor or owns a private one
/// (test isolation, embedders that want a dedicated thread).
pub(crate) enum ReactorBinding {
    Shared,
    Independent(Arc<Reactor>),
}

impl ReactorBinding {
    pub(crate) fn new(independent: bool) -> io::Result<Self> {
        if independent {
            Ok(ReactorBinding::Independent(Arc::new(
                Reactor::independent()?,
            )))
        } else {
            Ok(ReactorBinding::Shared)
        }
    }

    pub(crate) fn reactor(&self) -> &Reactor {
        match self {
            ReactorBinding::Shared => Reactor::shared(),
            ReactorBinding::Independent(reactor) => reactor,
        }
    }

    /// Stop a private reactor; the shared one outlives any single channel.
    pub(crate) fn shutdown(&self) {
        if let ReactorBinding::Independent(reactor) = self {
            reactor.stop();
        }
    }
}
