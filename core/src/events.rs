use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::blockchain::block::Block;
use crate::message::Message;

/// Events fanned out to `/listen` subscribers and the peer replicator.
///
/// A `block` event fires strictly after the block and its derived state
/// are committed and the save is enqueued; a `message` event fires
/// exactly when a message enters the mempool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeEvent {
    Block { block: Block },
    Message { message: Message },
    Peer { url: String },
}

/// Best-effort bounded fan-out: a slow subscriber lags and drops
/// events instead of back-pressuring the chain task.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}
