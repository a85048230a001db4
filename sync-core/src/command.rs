use sync_wire::{DocumentId, Message, PeerId};

use crate::ids::ChannelId;
use crate::ready_state::ReadyStatus;

/// An effect the reducer asks the surrounding runtime to perform.
///
/// The reducer itself never performs I/O or emits events; it only returns these, in order, for
/// the command executor to carry out after the dispatch cycle that produced them has finished
/// (spec §5's ordering rule: effects run before the next outbound flush, never interleaved with
/// further reduction).
#[derive(Debug, Clone)]
pub enum Command {
    /// Queue a message for outbound delivery on a channel. Queued, not sent immediately: the
    /// outbound batcher coalesces everything queued within one quiescence window into at most
    /// one frame per channel.
    Send { channel_id: ChannelId, message: Message },
    /// Ask the channel's adapter to tear the channel down. Used when the reducer itself decides
    /// a channel is no longer viable (e.g. a malformed handshake); routine removal is driven by
    /// the adapter calling `channel_removed`, not this command.
    StopChannel { channel_id: ChannelId },
    /// A document's per-channel ready states (spec §4.5) changed; update the async-waitable gate
    /// and emit `ready-state-changed` with the full list, not just the aggregate bit.
    SetDocReady { doc_id: DocumentId, ready_states: Vec<(ChannelId, ReadyStatus)> },
    EmitPeerAdded { peer_id: PeerId },
    EmitPeerRemoved { peer_id: PeerId },
    EmitDocAdded { doc_id: DocumentId },
    EmitDocRemoved { doc_id: DocumentId },
    /// A message was dropped by policy (permission denial, malformed payload, disconnected
    /// middleware exception) rather than acted on. Surfaced only through the optional
    /// diagnostic hook; never an error the caller has to handle.
    Diagnostic { message: String },
}
