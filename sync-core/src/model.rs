use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sync_crdt::CrdtDocument;
use sync_wire::{DocumentId, EphemeralEntry, PeerId, PeerIdentity};

use crate::channel::{ChannelKind, ChannelState};
use crate::ephemeral::{EphemeralStore, InMemoryEphemeralStore};
use crate::ids::{ChannelId, ChannelIdAllocator};
use crate::ready_state::DocReadyTracker;

/// Bookkeeping the synchronizer keeps about one channel, independent of what the adapter that
/// owns it is doing.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub kind: ChannelKind,
    pub adapter_type: String,
    pub state: ChannelState,
}

/// A sync-request from a network peer that arrived before the document's storage channels had
/// all settled. Replayed once the document becomes ready (spec's storage-first rule).
#[derive(Debug, Clone)]
pub struct PendingSyncRequest {
    pub channel_id: ChannelId,
    pub requester_version: Vec<u8>,
    pub bidirectional: bool,
    pub ephemeral: Option<Vec<EphemeralEntry>>,
}

/// Everything the synchronizer tracks about one document.
pub struct DocState<D: CrdtDocument> {
    pub doc: Arc<D>,
    /// Network channels known to want future updates to this document, because they either sent
    /// a bidirectional sync-request or have otherwise subscribed.
    pub subscribers: HashSet<ChannelId>,
    /// Channels we have already sent our own bidirectional sync-request to for this document
    /// (spec §4.3 rule 5: reciprocate the first time a channel asks about a doc, not every time).
    pub outbound_subscriptions: HashSet<ChannelId>,
    pub ready: DocReadyTracker,
    pub pending_network_requests: Vec<PendingSyncRequest>,
    /// Whether this document is known to actually have (or have had) content: created locally by
    /// the app, or filled in from a real snapshot/update received over the wire. `false` means the
    /// entry exists purely as bookkeeping (e.g. to track a pending sync-request or a NewDoc
    /// announcement) and a sync-response for it must report `unavailable`, not an empty snapshot.
    pub locally_known: bool,
}

impl<D: CrdtDocument> DocState<D> {
    fn new(doc: D) -> Self {
        Self {
            doc: Arc::new(doc),
            subscribers: HashSet::new(),
            outbound_subscriptions: HashSet::new(),
            ready: DocReadyTracker::default(),
            pending_network_requests: Vec::new(),
            locally_known: false,
        }
    }
}

/// What the synchronizer knows about a remote peer: which channels reach it and which documents
/// it has subscribed to (spec §3's peer-state invariants).
#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub identity: Option<PeerIdentity>,
    pub channels: HashSet<ChannelId>,
    pub subscriptions: HashSet<DocumentId>,
}

/// Per-(document, namespace) ephemeral stores, keyed lazily the first time either side touches
/// the namespace (spec §4.4 invariant: a store exists iff it has been read, written, or received
/// into).
#[derive(Default)]
pub struct EphemeralManager {
    stores: HashMap<(DocumentId, String), Arc<dyn EphemeralStore>>,
}

impl EphemeralManager {
    pub fn get_or_create_default(
        &mut self,
        local_peer_id: PeerId,
        doc_id: &DocumentId,
        namespace: &str,
    ) -> Arc<dyn EphemeralStore> {
        self.stores
            .entry((doc_id.clone(), namespace.to_string()))
            .or_insert_with(|| Arc::new(InMemoryEphemeralStore::new(local_peer_id)))
            .clone()
    }

    pub fn register_external(
        &mut self,
        doc_id: DocumentId,
        namespace: impl Into<String>,
        store: Arc<dyn EphemeralStore>,
    ) {
        self.stores.insert((doc_id, namespace.into()), store);
    }

    pub fn get(&self, doc_id: &DocumentId, namespace: &str) -> Option<Arc<dyn EphemeralStore>> {
        self.stores.get(&(doc_id.clone(), namespace.to_string())).cloned()
    }

    /// Every namespace currently tracked for a document, paired with its store.
    pub fn namespaces_for(&self, doc_id: &DocumentId) -> Vec<(String, Arc<dyn EphemeralStore>)> {
        self.stores
            .iter()
            .filter(|((id, _), _)| id == doc_id)
            .map(|((_, ns), store)| (ns.clone(), store.clone()))
            .collect()
    }

    pub fn remove_doc(&mut self, doc_id: &DocumentId) {
        self.stores.retain(|(id, _), _| id != doc_id);
    }
}

/// The synchronizer's entire mutable state. Plain data plus the ephemeral store manager; no I/O
/// lives here. The reducer is the only thing that mutates it, and does so synchronously.
pub struct Model<D: CrdtDocument> {
    pub local_identity: PeerIdentity,
    pub channels: HashMap<ChannelId, ChannelRecord>,
    pub adapter_channels: HashMap<String, HashSet<ChannelId>>,
    pub peers: HashMap<PeerId, PeerRecord>,
    pub docs: HashMap<DocumentId, DocState<D>>,
    pub ephemeral: EphemeralManager,
    pub channel_ids: ChannelIdAllocator,
    /// Messages that arrived on a network channel before its handshake validated a peer id
    /// (spec's Design Notes open question: buffer rather than record a placeholder peer id).
    /// Drained and replayed, in arrival order, the moment the channel becomes established.
    pub pending_channel_inbox: HashMap<ChannelId, Vec<sync_wire::Message>>,
}

impl<D: CrdtDocument> Model<D> {
    pub fn new(local_identity: PeerIdentity) -> Self {
        Self {
            local_identity,
            channels: HashMap::new(),
            adapter_channels: HashMap::new(),
            peers: HashMap::new(),
            docs: HashMap::new(),
            ephemeral: EphemeralManager::default(),
            channel_ids: ChannelIdAllocator::default(),
            pending_channel_inbox: HashMap::new(),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_identity.peer_id
    }

    pub fn ensure_doc(&mut self, doc_id: &DocumentId) -> &mut DocState<D> {
        self.docs
            .entry(doc_id.clone())
            .or_insert_with(|| DocState::new(D::new()))
    }

    pub fn insert_doc_from_snapshot(&mut self, doc_id: DocumentId, doc: D) -> &mut DocState<D> {
        self.docs.entry(doc_id).or_insert_with(|| DocState::new(doc))
    }

    pub fn storage_channel_ids(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|(_, record)| record.kind == ChannelKind::Storage)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn established_network_channel_ids(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|(_, record)| {
                record.kind == ChannelKind::Network
                    && matches!(record.state, ChannelState::Established { .. })
            })
            .map(|(id, _)| *id)
            .collect()
    }
}
