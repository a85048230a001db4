use sync_wire::DocumentId;

use crate::ids::ChannelId;

/// Errors surfaced synchronously to callers of the public API (spec §7).
///
/// These are all caller mistakes or environmental conditions the application is expected to
/// handle, never reducer-internal states: the reducer itself never fails, it only decides what
/// *not* to do (drop a message, skip a channel) and logs why.
#[derive(Debug, thiserror::Error)]
pub enum SynchronizerError {
    #[error("adapter type {0:?} is already registered")]
    DuplicateAdapter(String),

    #[error("channel {0} is unknown")]
    UnknownChannel(ChannelId),

    #[error("channel {0} belongs to an adapter not registered with this synchronizer")]
    UnregisteredAdapterChannel(ChannelId),

    #[error("document {0} does not exist locally")]
    UnknownDocument(DocumentId),

    #[error("waiting for document {0} to become ready timed out")]
    ReadyTimeout(DocumentId),

    #[error("message rejected by middleware")]
    RejectedByMiddleware,

    #[error("ephemeral store for document {0} namespace {1:?} is already registered")]
    DuplicateEphemeralStore(DocumentId, String),
}
