//! The action queue: a FIFO of connection events between the transport
//! tasks (producers) and the engine loop (consumer).
//!
//! A single consumer drains the queue, so the total order is preserved and
//! with it the per-connection order the transport guarantees. The queue is
//! unbounded; the depth gauge makes backlog visible instead.

use std::sync::Arc;

use log::warn;
use signet_shared::ConnectionId;
use tokio::sync::mpsc;

use crate::metrics::EngineMetrics;

/// One connection event, in the order the transport observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A socket completed its handshake. Creates no engine state.
    Open { conn: ConnectionId },
    /// A socket went away, or the engine asked for it to go away.
    Close { conn: ConnectionId },
    /// A text frame arrived.
    Message { conn: ConnectionId, text: String },
    /// Drain and stop the engine loop.
    Shutdown,
}

/// Builds the queue and the gauge set shared with the rest of the engine.
pub fn action_queue() -> (ActionSender, ActionReceiver) {
    let metrics = Arc::new(EngineMetrics::default());
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ActionSender {
            tx,
            metrics: Arc::clone(&metrics),
        },
        ActionReceiver { rx, metrics },
    )
}

/// Producer handle. Cloned into every transport task.
#[derive(Clone)]
pub struct ActionSender {
    tx: mpsc::UnboundedSender<Action>,
    metrics: Arc<EngineMetrics>,
}

impl ActionSender {
    pub fn push(&self, action: Action) {
        if self.tx.send(action).is_err() {
            warn!("action queue closed; event dropped");
        } else {
            self.metrics.action_queued();
        }
    }

    /// Ask the engine loop to drain and exit. Queued events ahead of the
    /// signal are still processed.
    pub fn shutdown(&self) {
        self.push(Action::Shutdown);
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Consumer handle, owned by the engine loop.
pub struct ActionReceiver {
    rx: mpsc::UnboundedReceiver<Action>,
    metrics: Arc<EngineMetrics>,
}

impl ActionReceiver {
    pub async fn recv(&mut self) -> Option<Action> {
        let action = self.rx.recv().await;
        if action.is_some() {
            self.metrics.action_drained();
        }
        action
    }
}
