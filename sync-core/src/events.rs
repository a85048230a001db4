use sync_wire::{DocumentId, PeerId};
use tokio::sync::broadcast;

use crate::ready_state::ReadyRecord;

/// Notifications the application can subscribe to, independent of any particular document or
/// channel (spec §6).
#[derive(Debug, Clone)]
pub enum SynchronizerEvent {
    PeerAdded(PeerId),
    PeerRemoved(PeerId),
    DocAdded(DocumentId),
    DocRemoved(DocumentId),
    /// Spec §4.5/§6 `ready-state-changed{docId, readyStates}`: the full per-channel ready-state
    /// list, emitted whenever it differs from what was last emitted for this document (not just
    /// when the aggregate ready bit flips).
    ReadyStateChanged { doc_id: DocumentId, ready_states: Vec<ReadyRecord> },
}

/// Thin wrapper over a broadcast channel. Lagging subscribers drop old events rather than
/// blocking the synchronizer; `subscribe` callers that care about every event should drain
/// their receiver promptly.
pub struct EventEmitter {
    sender: broadcast::Sender<SynchronizerEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

impl EventEmitter {
    pub fn subscribe(&self) -> broadcast::Receiver<SynchronizerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SynchronizerEvent) {
        // No subscribers is the common case (nobody is listening yet); that's not an error.
        let _ = self.sender.send(event);
    }
}
