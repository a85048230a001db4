use sync_crdt::{CrdtDocument, VersionVectorOps};
use sync_wire::{DocumentId, EphemeralEntry, Message, Transmission};

use crate::model::{DocState, EphemeralManager};

/// Build the response to a sync-request for a document we hold locally, following the
/// tie-break table in spec §4.3:
///
/// - requester's version has length zero: reply with a full snapshot.
/// - requester is behind ours (and the versions aren't concurrent): reply with the update delta
///   computed from the requester's version.
/// - versions are concurrent: reply with an update too; the requester's CRDT engine merges it.
/// - requester is at or ahead of ours: reply up-to-date.
///
/// Permission checks happen at the call site before this is invoked; this function assumes the
/// requester is already allowed to see `doc`.
pub fn build_sync_response_message<D: CrdtDocument>(
    doc_id: &DocumentId,
    doc: &DocState<D>,
    requester_version: &[u8],
    ephemeral: &EphemeralManager,
    include_ephemeral: bool,
) -> Result<Message, sync_crdt::CrdtError> {
    let transmission = transmission_for(doc, requester_version)?;
    let ephemeral = if include_ephemeral {
        Some(encode_all_peer_stores(doc_id, ephemeral))
    } else {
        None
    };
    Ok(Message::SyncResponse {
        doc_id: doc_id.clone(),
        transmission,
        ephemeral,
    })
}

/// Build an unsolicited update message for a document's subscribers, always relative to a
/// previously recorded version (used after applying a locally- or remotely-originated change).
pub fn build_update_message<D: CrdtDocument>(
    doc_id: &DocumentId,
    doc: &DocState<D>,
    since_version: &D::Version,
) -> Result<Message, sync_crdt::CrdtError> {
    let data = doc.doc.export_update_from(since_version)?;
    let version = doc.doc.version().encode();
    Ok(Message::Update {
        doc_id: doc_id.clone(),
        transmission: Transmission::Update { data, version },
    })
}

fn transmission_for<D: CrdtDocument>(
    doc: &DocState<D>,
    requester_version_bytes: &[u8],
) -> Result<Transmission, sync_crdt::CrdtError> {
    if requester_version_bytes.is_empty() {
        return Ok(Transmission::Snapshot {
            data: doc.doc.export_snapshot(),
            version: doc.doc.version().encode(),
        });
    }

    let requester_version = D::Version::decode(requester_version_bytes)?;
    if requester_version.length() == 0 {
        return Ok(Transmission::Snapshot {
            data: doc.doc.export_snapshot(),
            version: doc.doc.version().encode(),
        });
    }

    let our_version = doc.doc.version();
    Ok(match requester_version.compare(&our_version) {
        sync_crdt::Comparison::Eq | sync_crdt::Comparison::Gt => {
            Transmission::UpToDate { version: our_version.encode() }
        }
        sync_crdt::Comparison::Lt | sync_crdt::Comparison::Concurrent => Transmission::Update {
            data: doc.doc.export_update_from(&requester_version)?,
            version: our_version.encode(),
        },
    })
}

/// Build the sync-request we send when attaching to a document for the first time on a channel:
/// our current version, whether we want future updates (`bidirectional`), and a snapshot of only
/// our own ephemeral contribution (not every known peer's, unlike a sync response's bundle).
pub fn build_sync_request_message<D: CrdtDocument>(
    doc_id: &DocumentId,
    doc: &DocState<D>,
    bidirectional: bool,
    local_peer_id: sync_wire::PeerId,
    ephemeral: &EphemeralManager,
) -> Message {
    let local_entries: Vec<EphemeralEntry> = ephemeral
        .namespaces_for(doc_id)
        .into_iter()
        .filter_map(|(namespace, store)| {
            let data = store.encode_all();
            if data.is_empty() {
                None
            } else {
                Some(EphemeralEntry {
                    peer_id: local_peer_id,
                    namespace,
                    data,
                })
            }
        })
        .collect();

    Message::SyncRequest {
        doc_id: doc_id.clone(),
        requester_version: doc.doc.version().encode(),
        bidirectional,
        ephemeral: if local_entries.is_empty() {
            None
        } else {
            Some(local_entries)
        },
    }
}

/// All namespaced ephemeral entries for a document, across every peer the local store has a
/// record of, skipping empty ones. Attached to sync *responses* (the initial bundle an
/// established peer needs); sync *requests* only ever attach the requester's own contribution
/// via [`build_sync_request_message`].
pub fn encode_all_peer_stores(doc_id: &DocumentId, ephemeral: &EphemeralManager) -> Vec<EphemeralEntry> {
    let mut entries = Vec::new();
    for (namespace, store) in ephemeral.namespaces_for(doc_id) {
        for (peer_id, data) in store.get_all_states() {
            if !data.is_empty() {
                entries.push(EphemeralEntry {
                    peer_id,
                    namespace: namespace.clone(),
                    data,
                });
            }
        }
    }
    entries
}
