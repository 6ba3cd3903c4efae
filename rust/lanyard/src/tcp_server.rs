//! User-facing multi-client TCP server channel.

use std::sync::Arc;

use lanyard_core::state::LinkState;
use lanyard_stream::server as transport;
use lanyard_stream::server::ClientId;

use crate::binding::ReactorBinding;
use crate::channel::Channel;
use crate::handler::{ConnectHandler, DataHandler, DisconnectHandler, HandlerCell};

type MultiConnect = Arc<dyn Fn(ClientId, &str) + Send + Sync>;
type MultiData = Arc<dyn Fn(ClientId, &[u8]) + Send + Sync>;
type MultiDisconnect = Arc<dyn Fn(ClientId) + Send + Sync>;

/// Both handler forms: the id-carrying multi-client handlers and the plain
/// single-channel ones. Each event feeds whichever of the two is set.
struct ServerHooks {
    data: HandlerCell<DataHandler>,
    connect: HandlerCell<ConnectHandler>,
    disconnect: HandlerCell<DisconnectHandler>,
    multi_data: HandlerCell<MultiData>,
    multi_connect: HandlerCell<MultiConnect>,
    multi_disconnect: HandlerCell<MultiDisconnect>,
}

/// A listening TCP endpoint. Built by [`tcp_server`](crate::tcp_server).
///
/// On top of the uniform [`Channel`] surface (where [`send`](Channel::send)
/// broadcasts), servers expose per-peer addressing: every admitted peer
/// gets a strictly increasing [`ClientId`] that is valid until its
/// disconnect handler has run.
pub struct TcpServer {
    transport: transport::TcpServer,
    binding: ReactorBinding,
    hooks: Arc<ServerHooks>,
    auto_manage: bool,
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer").finish_non_exhaustive()
    }
}

impl TcpServer {
    pub(crate) fn from_parts(
        transport: transport::TcpServer,
        binding: ReactorBinding,
        auto_manage: bool,
    ) -> Self {
        let hooks = Arc::new(ServerHooks {
            data: HandlerCell::empty(),
            connect: HandlerCell::empty(),
            disconnect: HandlerCell::empty(),
            multi_data: HandlerCell::empty(),
            multi_connect: HandlerCell::empty(),
            multi_disconnect: HandlerCell::empty(),
        });

        {
            let hooks = hooks.clone();
            transport.on_client_data(move |id, bytes| {
                if let Some(handler) = hooks.multi_data.get() {
                    handler(id, bytes);
                }
                if let Some(handler) = hooks.data.get() {
                    handler(bytes);
                }
            });
        }
        {
            let hooks = hooks.clone();
            transport.on_client_connect(move |id, addr| {
                if let Some(handler) = hooks.multi_connect.get() {
                    handler(id, addr);
                }
                if let Some(handler) = hooks.connect.get() {
                    handler();
                }
            });
        }
        {
            let hooks = hooks.clone();
            transport.on_client_disconnect(move |id| {
                if let Some(handler) = hooks.multi_disconnect.get() {
                    handler(id);
                }
                if let Some(handler) = hooks.disconnect.get() {
                    handler();
                }
            });
        }

        Self {
            transport,
            binding,
            hooks,
            auto_manage,
        }
    }

    /// Data from any peer, without the id.
    pub fn on_data(&self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> &Self {
        self.hooks.data.set(Arc::new(handler));
        self
    }

    /// A peer was admitted.
    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) -> &Self {
        self.hooks.connect.set(Arc::new(handler));
        self
    }

    /// A peer went away.
    pub fn on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) -> &Self {
        self.hooks.disconnect.set(Arc::new(handler));
        self
    }

    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        self.transport.on_error(handler);
        self
    }

    pub fn on_client_data(
        &self,
        handler: impl Fn(ClientId, &[u8]) + Send + Sync + 'static,
    ) -> &Self {
        self.hooks.multi_data.set(Arc::new(handler));
        self
    }

    /// Admission event with the peer's id and address string.
    pub fn on_client_connect(
        &self,
        handler: impl Fn(ClientId, &str) + Send + Sync + 'static,
    ) -> &Self {
        self.hooks.multi_connect.set(Arc::new(handler));
        self
    }

    pub fn on_client_disconnect(
        &self,
        handler: impl Fn(ClientId) + Send + Sync + 'static,
    ) -> &Self {
        self.hooks.multi_disconnect.set(Arc::new(handler));
        self
    }

    /// Queue `data` for every admitted peer.
    pub fn broadcast(&self, data: &[u8]) {
        self.transport.broadcast(data);
    }

    pub fn broadcast_line(&self, line: &str) {
        self.transport.broadcast_line(line);
    }

    /// Queue `data` for one peer; unknown ids are a no-op.
    pub fn send_to(&self, id: ClientId, data: &[u8]) {
        self.transport.send_to(id, data);
    }

    pub fn client_count(&self) -> usize {
        self.transport.client_count()
    }

    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.transport.connected_clients()
    }

    pub fn is_listening(&self) -> bool {
        self.transport.is_listening()
    }

    pub fn state(&self) -> LinkState {
        self.transport.state()
    }
}

impl Channel for TcpServer {
    fn start(&self) {
        self.transport.start(self.binding.reactor());
    }

    fn stop(&self) {
        self.transport.stop();
    }

    /// For a server, the uniform `send` is a broadcast.
    fn send(&self, data: &[u8]) {
        self.transport.broadcast(data);
    }

    fn send_line(&self, line: &str) {
        self.transport.broadcast_line(line);
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        if self.auto_manage {
            self.transport.stop();
        }
        self.binding.shutdown();
    }
}
