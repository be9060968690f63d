//! In-process message bus.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use super::{BusEvent, BusRequest, EventHandler, EventKind, MessageBus};

/// Bus living inside this process.
///
/// Events are pushed in with [`LocalBus::deliver`] from any thread; handlers
/// run on that thread. Published requests are queued on an unbounded channel
/// whose receiver belongs to whoever created the bus.
pub struct LocalBus {
    handlers: Mutex<HashMap<EventKind, Vec<EventHandler>>>,
    request_tx: mpsc::UnboundedSender<BusRequest>,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum::<usize>();
        f.debug_struct("LocalBus")
            .field("handlers", &handlers)
            .finish_non_exhaustive()
    }
}

impl LocalBus {
    /// Create a bus and the receiver of everything published to it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusRequest>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let bus = Self {
            handlers: Mutex::new(HashMap::new()),
            request_tx,
        };
        (bus, request_rx)
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Handlers are called outside the registration lock, so a handler may
    /// itself register more handlers. Returns the number invoked.
    pub fn deliver(&self, event: &BusEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, request: BusRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|e| anyhow!("bus request receiver dropped: {:?}", e.0))
    }

    fn on_event(&self, kind: EventKind, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(handler);
    }
}
