use std::fmt;

use sync_wire::Message;

use crate::ids::ChannelId;
use crate::PeerId;

/// What a channel is for. Storage channels are always peerless and are never subscribed to
/// documents the way network channels are; the reducer treats the two kinds differently at
/// nearly every decision point (spec §3, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Network,
    Storage,
}

/// Handshake state of one channel, from the synchronizer's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Added but not yet established: outbound traffic other than the handshake itself is held
    /// back.
    Pending,
    /// Handshake completed. Network channels carry the remote peer's identity; storage channels
    /// have none.
    Established { peer_id: Option<PeerId> },
}

/// Failure returned by a [`Channel`] implementation when it cannot accept a message for sending.
#[derive(Debug, Clone, thiserror::Error)]
#[error("channel send failed: {0}")]
pub struct ChannelSendError(pub String);

/// An adapter-owned conduit the synchronizer writes wire [`Message`]s to.
///
/// The adapter is responsible for the other direction: when it decodes a message off the wire
/// (or out of storage) it calls the synchronizer's `channel_receive` entry point directly, rather
/// than this trait exposing a callback slot. That keeps `Channel` a pure outbound handle and
/// avoids a second, adapter-visible mutation path into the synchronizer's model.
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;
    fn kind(&self) -> ChannelKind;
    fn adapter_type(&self) -> &str;
    /// Write one already-encoded protocol message to this channel.
    fn send(&self, message: Message) -> Result<(), ChannelSendError>;
    /// Best-effort notification that the synchronizer is done with this channel. Adapters may
    /// use this to tear down underlying sockets or file handles; the synchronizer does not wait
    /// on it.
    fn stop(&self) {}
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("adapter_type", &self.adapter_type())
            .finish()
    }
}
