use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use sync_core::{Adapter, Channel, ChannelId, ChannelKind, ChannelSendError, Synchronizer};
use sync_crdt::CrdtDocument;
use sync_wire::{DocumentId, Message, Transmission};

/// Adapter tag shared by every [`InMemoryStorageChannel`].
pub const ADAPTER_TYPE: &str = "in-memory-storage";

/// Shared backing store for one or more [`InMemoryStorageChannel`]s: a document id maps to its
/// last-persisted CRDT snapshot. Stands in for a durable storage backend (disk, object store,
/// database), the way the teacher's `OperationStore` stands in for p2panda's append-only log.
#[derive(Default)]
pub struct InMemoryStorageBackend {
    snapshots: Mutex<HashMap<DocumentId, Vec<u8>>>,
}

impl InMemoryStorageBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, doc_id: &DocumentId) -> Option<Vec<u8>> {
        self.snapshots.lock().unwrap().get(doc_id).cloned()
    }

    pub fn put(&self, doc_id: DocumentId, snapshot: Vec<u8>) {
        self.snapshots.lock().unwrap().insert(doc_id, snapshot);
    }

    pub fn contains(&self, doc_id: &DocumentId) -> bool {
        self.snapshots.lock().unwrap().contains_key(doc_id)
    }
}

/// Marker adapter for channels backed by an [`InMemoryStorageBackend`].
#[derive(Debug, Default)]
pub struct InMemoryStorageAdapter;

impl Adapter for InMemoryStorageAdapter {
    fn adapter_type(&self) -> &str {
        ADAPTER_TYPE
    }
}

/// A storage channel answering sync-requests out of an [`InMemoryStorageBackend`].
///
/// Replies with whatever snapshot is on file, or [`Transmission::Unavailable`] if the document
/// has never been persisted, matching the storage-first contract in spec §4.3: a document is
/// "ready" once every storage channel known when it was ensured has answered, data or none.
pub struct InMemoryStorageChannel<D: CrdtDocument> {
    id: ChannelId,
    backend: Arc<InMemoryStorageBackend>,
    synchronizer: Weak<Synchronizer<D>>,
}

impl<D: CrdtDocument> InMemoryStorageChannel<D> {
    pub fn new(
        id: ChannelId,
        backend: Arc<InMemoryStorageBackend>,
        synchronizer: &Arc<Synchronizer<D>>,
    ) -> Arc<Self> {
        Arc::new(Self { id, backend, synchronizer: Arc::downgrade(synchronizer) })
    }
}

impl<D: CrdtDocument> Channel for InMemoryStorageChannel<D> {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Storage
    }

    fn adapter_type(&self) -> &str {
        ADAPTER_TYPE
    }

    fn send(&self, message: Message) -> Result<(), ChannelSendError> {
        let Some(synchronizer) = self.synchronizer.upgrade() else {
            return Ok(());
        };
        match message {
            Message::SyncRequest { doc_id, .. } => {
                let transmission = match self.backend.get(&doc_id) {
                    Some(data) => Transmission::Snapshot { data, version: Vec::new() },
                    None => Transmission::Unavailable,
                };
                synchronizer.channel_receive(
                    self.id,
                    Message::SyncResponse { doc_id, transmission, ephemeral: None },
                );
            }
            Message::Update { doc_id, transmission } => match transmission {
                Transmission::Snapshot { data, .. } | Transmission::Update { data, .. } => {
                    self.backend.put(doc_id, data);
                }
                Transmission::UpToDate { .. } | Transmission::Unavailable => {}
            },
            other => {
                tracing::debug!(channel_id = %self.id, ?other, "in-memory storage channel ignored an unexpected message");
            }
        }
        Ok(())
    }
}
