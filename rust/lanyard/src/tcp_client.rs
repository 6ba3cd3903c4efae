//! User-facing TCP client channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lanyard_core::state::LinkState;
use lanyard_stream::client as transport;

use crate::binding::ReactorBinding;
use crate::channel::Channel;
use crate::handler::{ConnectHandler, DisconnectHandler, HandlerCell};

pub(crate) struct LifecycleHooks {
    pub(crate) on_connect: HandlerCell<ConnectHandler>,
    pub(crate) on_disconnect: HandlerCell<DisconnectHandler>,
    was_connected: AtomicBool,
}

impl LifecycleHooks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            on_connect: HandlerCell::empty(),
            on_disconnect: HandlerCell::empty(),
            was_connected: AtomicBool::new(false),
        })
    }

    /// Translate link-state transitions into connect/disconnect events.
    ///
    /// `on_disconnect` fires once per prior `on_connect`, including when a
    /// session dies in `Error` after having been connected.
    pub(crate) fn observe(&self, state: LinkState) {
        match state {
            LinkState::Connected => {
                self.was_connected.store(true, Ordering::Release);
                if let Some(on_connect) = self.on_connect.get() {
                    on_connect();
                }
            }
            LinkState::Closed | LinkState::Error => {
                if self.was_connected.swap(false, Ordering::AcqRel) {
                    if let Some(on_disconnect) = self.on_disconnect.get() {
                        on_disconnect();
                    }
                }
            }
            _ => {}
        }
    }
}

/// An outbound TCP connection with automatic reconnection.
///
/// Built by [`tcp_client`](crate::tcp_client); interact through
/// [`Channel`] operations and the event handlers.
pub struct TcpClient {
    transport: transport::TcpClient,
    binding: ReactorBinding,
    hooks: Arc<LifecycleHooks>,
    auto_manage: bool,
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient").finish_non_exhaustive()
    }
}

impl TcpClient {
    pub(crate) fn from_parts(
        transport: transport::TcpClient,
        binding: ReactorBinding,
        auto_manage: bool,
    ) -> Self {
        let hooks = LifecycleHooks::new();
        {
            let hooks = hooks.clone();
            transport
                .session()
                .on_state(move |state| hooks.observe(state));
        }
        Self {
            transport,
            binding,
            hooks,
            auto_manage,
        }
    }

    /// Bytes received from the peer, one call per read completion.
    pub fn on_data(&self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> &Self {
        self.transport.session().on_bytes(handler);
        self
    }

    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) -> &Self {
        self.hooks.on_connect.set(Arc::new(handler));
        self
    }

    pub fn on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) -> &Self {
        self.hooks.on_disconnect.set(Arc::new(handler));
        self
    }

    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        self.transport.session().on_error(handler);
        self
    }

    /// Queued TX bytes crossed the configured threshold.
    pub fn on_backpressure(&self, handler: impl Fn(usize) + Send + Sync + 'static) -> &Self {
        self.transport.session().on_backpressure(handler);
        self
    }

    pub fn state(&self) -> LinkState {
        self.transport.session().state()
    }
}

impl Channel for TcpClient {
    fn start(&self) {
        self.transport.start(self.binding.reactor());
    }

    fn stop(&self) {
        self.transport.stop();
    }

    fn send(&self, data: &[u8]) {
        self.transport.session().send(data);
    }

    fn send_line(&self, line: &str) {
        self.transport.session().send_line(line);
    }

    fn is_connected(&self) -> bool {
        self.transport.session().is_connected()
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if self.auto_manage {
            self.transport.stop();
        }
        self.binding.shutdown();
    }
}
