//! User-facing serial channel.

use std::sync::Arc;

use lanyard_core::state::LinkState;
use lanyard_stream::serial as transport;

use crate::binding::ReactorBinding;
use crate::channel::Channel;
use crate::tcp_client::LifecycleHooks;

/// A local serial port with the same event surface as the TCP client.
///
/// Built by [`serial`](crate::serial). Device loss re-arms the retry timer
/// unless the builder disabled reopen-on-error.
pub struct Serial {
    transport: transport::Serial,
    binding: ReactorBinding,
    hooks: Arc<LifecycleHooks>,
    auto_manage: bool,
}

impl Serial {
    pub(crate) fn from_parts(
        transport: transport::Serial,
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

    pub fn on_backpressure(&self, handler: impl Fn(usize) + Send + Sync + 'static) -> &Self {
        self.transport.session().on_backpressure(handler);
        self
    }

    pub fn state(&self) -> LinkState {
        self.transport.session().state()
    }
}

impl Channel for Serial {
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

impl Drop for Serial {
    fn drop(&mut self) {
        if self.auto_manage {
            self.transport.stop();
        }
        self.binding.shutdown();
    }
}
