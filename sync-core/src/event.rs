use sync_wire::{DocumentId, Message};

use crate::channel::ChannelKind;
use crate::ids::ChannelId;

/// Everything the reducer can be asked to act on (spec §4.3's message list).
///
/// Distinct from [`crate::Command`]: an `Event` is an input driving one dispatch cycle, a
/// `Command` is an output effect of that cycle.
#[derive(Debug, Clone)]
pub enum Event {
    /// An adapter has attached a new channel. Handshake is initiated right away for network
    /// channels; storage channels go straight to established (they have no peer to identify).
    ChannelAdded {
        channel_id: ChannelId,
        kind: ChannelKind,
        adapter_type: String,
    },
    /// The adapter reports a channel is now able to carry the initial handshake (e.g. the
    /// underlying transport finished its own connect sequence). No-op for storage channels and
    /// for channels not currently pending.
    EstablishChannel { channel_id: ChannelId },
    /// The adapter reports a channel is gone. Idempotent: removing an already-removed or
    /// never-added channel id is a no-op.
    ChannelRemoved { channel_id: ChannelId },
    /// A decoded message arrived on a channel.
    ChannelReceiveMessage { channel_id: ChannelId, message: Message },
    /// Ensure a document exists locally without announcing it to peers (lazy materialization).
    DocEnsure { doc_id: DocumentId },
    /// Create (or ensure) a document and announce it to every established network peer.
    DocNew { doc_id: DocumentId },
    /// Request deletion of a document, broadcasting a delete-request to its subscribers.
    DocDelete { doc_id: DocumentId },
    /// Periodic tick: flush ephemeral state, prune expired peer presence, whatever the
    /// heartbeat is configured to do (spec's constructor-configurable interval).
    Heartbeat,
    /// The application changed a value in one of its local ephemeral stores.
    EphemeralLocalChange { doc_id: DocumentId, namespace: String },
}
