//! Application callbacks for applied requests
//!
//! The server loop publishes a [`SlaveEvent`] into a bounded channel and moves
//! on. A dispatcher task hands each event to the blocking thread pool, so a
//! callback may block (file or database I/O) without stalling the runtime.
//! A slow callback delays later callbacks but never frame reception.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::pdu::FunctionCode;

/// A request the slave applied successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveEvent {
    /// Unit id the request was addressed to (0 for a broadcast)
    pub unit_id: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub quantity: u16,
}

pub type Callback = Arc<dyn Fn(&SlaveEvent) + Send + Sync>;

/// Callbacks keyed by function code
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    callbacks: HashMap<FunctionCode, Vec<Callback>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("functions", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `function`; several callbacks per code run in
    /// registration order
    ///
    /// Callbacks run on a blocking-pool thread, one event at a time, and may
    /// block.
    pub fn on<F>(&mut self, function: FunctionCode, callback: F) -> &mut Self
    where
        F: Fn(&SlaveEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .entry(function)
            .or_default()
            .push(Arc::new(callback));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run the callbacks registered for the event's function code
    pub fn dispatch(&self, event: &SlaveEvent) {
        let Some(callbacks) = self.callbacks.get(&event.function) else {
            trace!("No callback for {}", event.function);
            return;
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

/// Bounded event channel between a slave and its dispatcher
pub fn event_channel(capacity: usize) -> (mpsc::Sender<SlaveEvent>, mpsc::Receiver<SlaveEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Run callbacks until every event sender is dropped
pub fn spawn_dispatcher(
    registry: CallbackRegistry,
    mut events: mpsc::Receiver<SlaveEvent>,
) -> JoinHandle<()> {
    let registry = Arc::new(registry);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let registry = registry.clone();
            // awaited one at a time to keep event order
            let outcome = tokio::task::spawn_blocking(move || registry.dispatch(&event)).await;
            if let Err(e) = outcome {
                warn!("Callback for {} panicked: {}", event.function, e);
            }
        }
        debug!("Callback dispatcher stopped");
    })
}
