//! Late-bindable handler slots for the wrapper layer.

use std::sync::Arc;

use parking_lot::Mutex;

pub(crate) type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub(crate) type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
pub(crate) type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// A handler slot that may be filled before or after `start()`;
/// registrations take effect on the next event.
pub(crate) struct HandlerCell<T>(Mutex<Option<T>>);

impl<T: Clone> HandlerCell<T> {
    pub(crate) fn empty() -> Self {
        HandlerCell(Mutex::new(None))
    }

    pub(crate) fn set(&self, handler: T) {
        *self.0.lock() = Some(handler);
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}
