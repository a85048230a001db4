//! Event-driven document synchronizer: channel lifecycle, the sync protocol reducer,
//! storage-first coordination, ephemeral routing, and the [`Synchronizer`] facade that wires
//! them to a work queue, an outbound batcher, and an event emitter.
//!
//! This crate is transport- and storage-agnostic: it knows how to decide what to send and when
//! (`sync-wire` for the wire shapes, `sync-crdt` for the document engine), never how to move
//! bytes. Adapters (see `sync-adapters`) own every socket, file, and task.

mod adapter;
mod batcher;
mod channel;
mod command;
mod ephemeral;
mod error;
mod event;
mod events;
mod heartbeat;
mod ids;
mod middleware;
mod model;
mod permissions;
mod ready_state;
mod reducer;
mod sync_helpers;
mod synchronizer;
mod workqueue;

pub use adapter::{Adapter, AdapterManager};
pub use channel::{Channel, ChannelKind, ChannelSendError, ChannelState};
pub use ephemeral::{EphemeralStore, InMemoryEphemeralStore};
pub use error::SynchronizerError;
pub use events::SynchronizerEvent;
pub use ids::{ChannelId, ChannelIdAllocator};
pub use middleware::{Middleware, MiddlewareChain};
pub use permissions::{AllowAll, Permissions};
pub use ready_state::{ReadyRecord, ReadyStatus};
pub use synchronizer::{Synchronizer, SynchronizerBuilder};

pub use sync_wire::{DocumentId, Message, PeerId, PeerIdentity, PeerRole};
