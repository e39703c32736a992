//! Ready-signal fan-out owned by a single connection manager.

use std::fmt;

use super::traits::TransportHandle;

type Listener = Box<dyn FnOnce(&mut dyn TransportHandle) + Send>;

/// One-shot listeners waiting for the current connection to become ready.
///
/// Listeners are invoked in registration order with the freshly opened handle and removed
/// immediately afterwards, so each registration fires at most once.
#[derive(Default)]
pub(crate) struct ReadyBus {
    listeners: Vec<Listener>,
}

impl ReadyBus {
    pub(crate) fn subscribe<F>(&mut self, listener: F)
    where
        F: FnOnce(&mut dyn TransportHandle) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Fire and drop every pending listener. Returns how many fired.
    pub(crate) fn publish(&mut self, handle: &mut dyn TransportHandle) -> usize {
        let listeners = std::mem::take(&mut self.listeners);
        let fired = listeners.len();
        for listener in listeners {
            listener(handle);
        }
        fired
    }

    /// Drop every pending listener without firing it.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.listeners.len();
        self.listeners.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for ReadyBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
