//! Wire codec and channel message taxonomy for the document synchronizer.
//!
//! This crate is a pure codec: it knows how to frame and parse bytes and how to shape the
//! protocol's message taxonomy. It has no opinion about channels, peers, or documents beyond
//! the identifiers those messages carry.

mod cbor_util;
mod error;
mod frame;
mod ids;
mod message;

pub use error::WireError;
pub use frame::{decode_frame, encode_batch_frame, encode_frame, is_batch_frame};
pub use ids::{DocumentId, PeerId};
pub use message::{
    DeleteStatus, EncodedVersion, EphemeralEntry, Message, MessageKind, PeerIdentity, PeerRole,
    Transmission,
};
