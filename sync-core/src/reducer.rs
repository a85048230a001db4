use sync_crdt::CrdtDocument;
use sync_wire::{DeleteStatus, DocumentId, EphemeralEntry, Message, PeerIdentity, Transmission};

use crate::channel::{ChannelKind, ChannelState};
use crate::command::Command;
use crate::event::Event;
use crate::ids::ChannelId;
use crate::model::{ChannelRecord, Model, PendingSyncRequest};
use crate::permissions::Permissions;
use crate::ready_state::ReadyStatus;
use crate::sync_helpers::{
    build_sync_request_message, build_sync_response_message, build_update_message, encode_all_peer_stores,
};

/// The pure reducer: one input event in, zero or more effects out, model mutated in place.
///
/// Never performs I/O and never fails: everything it decides not to do (permission denial, a
/// message for an unknown channel, a doc that doesn't exist) is handled by doing nothing, or by
/// returning a [`Command::Diagnostic`] for optional observability, rather than an error.
pub fn reduce<D: CrdtDocument>(
    model: &mut Model<D>,
    event: Event,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    match event {
        Event::ChannelAdded { channel_id, kind, adapter_type } => {
            channel_added(model, channel_id, kind, adapter_type)
        }
        Event::EstablishChannel { channel_id } => establish_channel(model, channel_id),
        Event::ChannelRemoved { channel_id } => channel_removed(model, channel_id),
        Event::ChannelReceiveMessage { channel_id, message } => {
            receive_message(model, channel_id, message, permissions)
        }
        Event::DocEnsure { doc_id } => doc_ensure(model, doc_id, false, true),
        Event::DocNew { doc_id } => doc_ensure(model, doc_id, true, true),
        Event::DocDelete { doc_id } => doc_delete(model, doc_id),
        Event::Heartbeat => heartbeat(model),
        Event::EphemeralLocalChange { doc_id, namespace } => {
            ephemeral_local_change(model, doc_id, namespace)
        }
    }
}

fn channel_added<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    kind: ChannelKind,
    adapter_type: String,
) -> Vec<Command> {
    let mut commands = Vec::new();
    let state = match kind {
        ChannelKind::Storage => ChannelState::Established { peer_id: None },
        ChannelKind::Network => ChannelState::Pending,
    };
    model.channels.insert(channel_id, ChannelRecord { kind, adapter_type, state });

    if kind == ChannelKind::Storage {
        let doc_ids: Vec<DocumentId> = model.docs.keys().cloned().collect();
        for doc_id in doc_ids {
            let doc = model.docs.get_mut(&doc_id).expect("just listed");
            doc.ready.track(channel_id);
            let message = build_sync_request_message(
                &doc_id,
                doc,
                true,
                model.local_identity.peer_id,
                &model.ephemeral,
            );
            commands.push(Command::Send { channel_id, message });
            emit_ready_change(model, &doc_id, &mut commands);
        }
    }
    commands
}

/// Push a `Command::SetDocReady` carrying the new per-channel snapshot, but only if it actually
/// differs from the last one emitted for this document (spec §4.5/§6).
fn emit_ready_change<D: CrdtDocument>(model: &mut Model<D>, doc_id: &DocumentId, commands: &mut Vec<Command>) {
    if let Some(doc) = model.docs.get_mut(doc_id) {
        if let Some(ready_states) = doc.ready.take_changed_snapshot() {
            commands.push(Command::SetDocReady { doc_id: doc_id.clone(), ready_states });
        }
    }
}

fn establish_channel<D: CrdtDocument>(model: &mut Model<D>, channel_id: ChannelId) -> Vec<Command> {
    let Some(record) = model.channels.get(&channel_id) else {
        return Vec::new();
    };
    if record.kind != ChannelKind::Network || record.state != ChannelState::Pending {
        return Vec::new();
    }
    vec![Command::Send {
        channel_id,
        message: Message::EstablishRequest { sender: model.local_identity.clone() },
    }]
}

fn channel_removed<D: CrdtDocument>(model: &mut Model<D>, channel_id: ChannelId) -> Vec<Command> {
    let Some(record) = model.channels.remove(&channel_id) else {
        return Vec::new();
    };
    let mut commands = Vec::new();

    if let ChannelState::Established { peer_id: Some(peer_id) } = record.state {
        if let Some(peer) = model.peers.get_mut(&peer_id) {
            peer.channels.remove(&channel_id);
            if peer.channels.is_empty() {
                model.peers.remove(&peer_id);
                commands.push(Command::EmitPeerRemoved { peer_id });
            }
        }
    }

    let doc_ids: Vec<DocumentId> = model.docs.keys().cloned().collect();
    for doc_id in doc_ids {
        let became_ready = {
            let doc = model.docs.get_mut(&doc_id).expect("just listed");
            doc.subscribers.remove(&channel_id);
            doc.outbound_subscriptions.remove(&channel_id);
            doc.pending_network_requests.retain(|req| req.channel_id != channel_id);
            let was_ready = doc.ready.is_ready();
            doc.ready.untrack(channel_id);
            !was_ready && doc.ready.is_ready()
        };
        emit_ready_change(model, &doc_id, &mut commands);
        if became_ready {
            commands.extend(replay_pending_requests(model, &doc_id));
        }
    }
    commands
}

fn receive_message<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    message: Message,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let Some(record) = model.channels.get(&channel_id) else {
        return vec![Command::Diagnostic {
            message: format!("message received on unknown channel {channel_id}"),
        }];
    };

    // A network channel's peer id is only trustworthy once a validated establish message has
    // been processed; anything else that arrives first is buffered rather than acted on under a
    // placeholder identity, and replayed in order once the handshake lands (see `handshake`).
    let is_handshake_message = matches!(message, Message::EstablishRequest { .. } | Message::EstablishResponse { .. });
    if record.kind == ChannelKind::Network && record.state == ChannelState::Pending && !is_handshake_message {
        model
            .pending_channel_inbox
            .entry(channel_id)
            .or_default()
            .push(message);
        return Vec::new();
    }

    match message {
        Message::Batch { messages } => messages
            .into_iter()
            .flat_map(|inner| receive_message(model, channel_id, inner, permissions))
            .collect(),
        Message::EstablishRequest { sender } => {
            let mut commands = Vec::new();
            if model.channels.get(&channel_id).map(|r| r.kind) == Some(ChannelKind::Network) {
                commands.push(Command::Send {
                    channel_id,
                    message: Message::EstablishResponse { sender: model.local_identity.clone() },
                });
            }
            commands.extend(handshake(model, channel_id, sender, permissions));
            commands
        }
        Message::EstablishResponse { sender } => handshake(model, channel_id, sender, permissions),
        Message::SyncRequest { doc_id, requester_version, bidirectional, ephemeral } => {
            sync_request(model, channel_id, doc_id, requester_version, bidirectional, ephemeral, permissions)
        }
        Message::SyncResponse { doc_id, transmission, ephemeral } => {
            sync_response(model, channel_id, doc_id, transmission, ephemeral)
        }
        Message::Update { doc_id, transmission } => {
            update_received(model, channel_id, doc_id, transmission, permissions)
        }
        Message::NewDoc { doc_ids } => new_doc_announced(model, channel_id, doc_ids, permissions),
        Message::DirectoryRequest { doc_ids } => directory_request(model, channel_id, doc_ids, permissions),
        Message::DirectoryResponse { doc_ids } => {
            let mut commands = Vec::new();
            for doc_id in doc_ids {
                commands.extend(doc_ensure(model, doc_id, false, false));
            }
            commands
        }
        Message::DeleteRequest { doc_id } => delete_request(model, channel_id, doc_id, permissions),
        Message::DeleteResponse { .. } => Vec::new(),
        Message::Ephemeral { doc_id, hops_remaining, stores } => {
            ephemeral_received(model, channel_id, doc_id, hops_remaining, stores)
        }
    }
}

fn handshake<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    sender: PeerIdentity,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let Some(record) = model.channels.get_mut(&channel_id) else {
        return Vec::new();
    };
    if record.kind != ChannelKind::Network {
        return Vec::new();
    }
    record.state = ChannelState::Established { peer_id: Some(sender.peer_id) };

    let mut commands = Vec::new();
    let peer = model.peers.entry(sender.peer_id).or_default();
    let is_new_peer = peer.channels.is_empty();
    peer.identity = Some(sender.clone());
    peer.channels.insert(channel_id);
    if is_new_peer {
        commands.push(Command::EmitPeerAdded { peer_id: sender.peer_id });
    }

    if let Some(buffered) = model.pending_channel_inbox.remove(&channel_id) {
        for message in buffered {
            commands.extend(receive_message(model, channel_id, message, permissions));
        }
    }
    commands
}

#[allow(clippy::too_many_arguments)]
fn sync_request<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: DocumentId,
    requester_version: Vec<u8>,
    bidirectional: bool,
    ephemeral: Option<Vec<EphemeralEntry>>,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let Some(peer_id) = established_peer_of(model, channel_id) else {
        return Vec::new();
    };
    let is_storage = model.channels.get(&channel_id).map(|r| r.kind) == Some(ChannelKind::Storage);

    if let Some(peer_id) = peer_id {
        if !permissions.visibility(&doc_id, peer_id) {
            return vec![Command::Send {
                channel_id,
                message: Message::SyncResponse {
                    doc_id,
                    transmission: Transmission::Unavailable,
                    ephemeral: None,
                },
            }];
        }
    }

    let doc_exists = model.docs.contains_key(&doc_id);
    if !doc_exists {
        let allowed = match peer_id {
            Some(peer_id) => permissions.creation(&doc_id, peer_id),
            None => true,
        };
        if !allowed {
            return vec![Command::Send {
                channel_id,
                message: Message::SyncResponse {
                    doc_id,
                    transmission: Transmission::Unavailable,
                    ephemeral: None,
                },
            }];
        }
    }

    let mut commands = doc_ensure(model, doc_id.clone(), false, false);
    commands.extend(reciprocate_subscription(model, channel_id, &doc_id));

    let doc_ready = model.docs.get(&doc_id).map(|d| d.ready.is_ready()).unwrap_or(true);
    if !doc_ready && !is_storage {
        let doc = model.docs.get_mut(&doc_id).expect("ensured above");
        doc.pending_network_requests.push(PendingSyncRequest {
            channel_id,
            requester_version,
            bidirectional,
            ephemeral,
        });
        return commands;
    }

    commands.extend(respond_to_sync_request(
        model,
        channel_id,
        &doc_id,
        &requester_version,
        bidirectional,
        ephemeral,
    ));
    commands
}

/// Spec §4.3 rule 5: the first time a channel asks about a document, we ask back, so that both
/// sides end up subscribed to each other regardless of which one happened to ask first or
/// whether that first ask was itself bidirectional.
fn reciprocate_subscription<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: &DocumentId,
) -> Vec<Command> {
    let already_reciprocated = model
        .docs
        .get(doc_id)
        .map(|doc| doc.outbound_subscriptions.contains(&channel_id))
        .unwrap_or(true);
    if already_reciprocated {
        return Vec::new();
    }
    let Some(doc) = model.docs.get_mut(doc_id) else {
        return Vec::new();
    };
    doc.outbound_subscriptions.insert(channel_id);
    let message = build_sync_request_message(doc_id, doc, true, model.local_identity.peer_id, &model.ephemeral);
    vec![Command::Send { channel_id, message }]
}

/// Spec §4.3 "new-doc received": materialize locally unknown docs (subject to `creation`
/// permission) and pull their contents with a bidirectional sync-request toward the announcer.
fn new_doc_announced<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_ids: Vec<DocumentId>,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let peer_id = established_peer_of(model, channel_id).flatten();
    let mut commands = Vec::new();
    for doc_id in doc_ids {
        if model.docs.contains_key(&doc_id) {
            continue;
        }
        let allowed = match peer_id {
            Some(peer_id) => permissions.creation(&doc_id, peer_id),
            None => true,
        };
        if !allowed {
            continue;
        }
        commands.extend(doc_ensure(model, doc_id.clone(), false, false));
        commands.extend(reciprocate_subscription(model, channel_id, &doc_id));
    }
    commands
}

fn respond_to_sync_request<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: &DocumentId,
    requester_version: &[u8],
    bidirectional: bool,
    ephemeral: Option<Vec<EphemeralEntry>>,
) -> Vec<Command> {
    if let Some(entries) = ephemeral {
        for entry in entries {
            model
                .ephemeral
                .get_or_create_default(model.local_identity.peer_id, doc_id, &entry.namespace)
                .apply(entry.peer_id, entry.data);
        }
    }

    let mut commands = Vec::new();
    let Some(doc) = model.docs.get_mut(doc_id) else {
        return commands;
    };
    if bidirectional {
        doc.subscribers.insert(channel_id);
    }

    // A doc that exists purely as bookkeeping (never created locally, never filled in with a real
    // snapshot/update) has nothing to offer — report `unavailable` rather than synthesizing an
    // empty snapshot from a CRDT document nobody ever actually populated (spec scenarios S1, S2).
    if !doc.locally_known {
        let ephemeral_bundle = if bidirectional {
            let entries = encode_all_peer_stores(doc_id, &model.ephemeral);
            if entries.is_empty() { None } else { Some(entries) }
        } else {
            None
        };
        commands.push(Command::Send {
            channel_id,
            message: Message::SyncResponse {
                doc_id: doc_id.clone(),
                transmission: Transmission::Unavailable,
                ephemeral: ephemeral_bundle,
            },
        });
        return commands;
    }

    match build_sync_response_message(doc_id, doc, requester_version, &model.ephemeral, bidirectional) {
        Ok(message) => commands.push(Command::Send { channel_id, message }),
        Err(err) => commands.push(Command::Diagnostic {
            message: format!("failed to build sync response for {doc_id}: {err}"),
        }),
    }
    commands
}

fn replay_pending_requests<D: CrdtDocument>(model: &mut Model<D>, doc_id: &DocumentId) -> Vec<Command> {
    let Some(doc) = model.docs.get_mut(doc_id) else {
        return Vec::new();
    };
    let pending = std::mem::take(&mut doc.pending_network_requests);
    let mut commands = Vec::new();
    for request in pending {
        commands.extend(respond_to_sync_request(
            model,
            request.channel_id,
            doc_id,
            &request.requester_version,
            request.bidirectional,
            request.ephemeral,
        ));
    }
    commands
}

fn sync_response<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: DocumentId,
    transmission: Transmission,
    ephemeral: Option<Vec<EphemeralEntry>>,
) -> Vec<Command> {
    let mut commands = doc_ensure(model, doc_id.clone(), false, false);
    let Some(doc) = model.docs.get_mut(&doc_id) else {
        return commands;
    };
    let prev_version = doc.doc.version();

    let had_data = match &transmission {
        Transmission::Snapshot { data, .. } | Transmission::Update { data, .. } => {
            if let Err(err) = doc.doc.import(data) {
                commands.push(Command::Diagnostic {
                    message: format!("failed to import sync response for {doc_id}: {err}"),
                });
            }
            // Whoever sent this genuinely has the document, and we now hold (at least some of)
            // its content ourselves — no longer just bookkeeping.
            doc.locally_known = true;
            true
        }
        Transmission::UpToDate { .. } => {
            // The sender compared versions against us, which means it already considered the
            // document ours to own; an UpToDate reply never arrives for a doc we don't have.
            doc.locally_known = true;
            false
        }
        Transmission::Unavailable => false,
    };

    if let Some(entries) = ephemeral {
        for entry in entries {
            model
                .ephemeral
                .get_or_create_default(model.local_identity.peer_id, &doc_id, &entry.namespace)
                .apply(entry.peer_id, entry.data);
        }
    }

    let is_storage = model.channels.get(&channel_id).map(|r| r.kind) == Some(ChannelKind::Storage);
    if is_storage {
        let became_ready = if let Some(doc) = model.docs.get_mut(&doc_id) {
            let was_ready = doc.ready.is_ready();
            doc.ready.record(
                channel_id,
                if had_data { ReadyStatus::RespondedWithData } else { ReadyStatus::RespondedWithNoData },
            );
            !was_ready && doc.ready.is_ready()
        } else {
            false
        };
        emit_ready_change(model, &doc_id, &mut commands);
        if became_ready {
            commands.extend(replay_pending_requests(model, &doc_id));
        }
    }

    if had_data {
        if let Some(doc) = model.docs.get(&doc_id) {
            let subscribers: Vec<ChannelId> =
                doc.subscribers.iter().copied().filter(|id| *id != channel_id).collect();
            if !subscribers.is_empty() {
                match build_update_message(&doc_id, doc, &prev_version) {
                    Ok(message) => {
                        for subscriber in subscribers {
                            commands.push(Command::Send { channel_id: subscriber, message: message.clone() });
                        }
                    }
                    Err(err) => commands.push(Command::Diagnostic {
                        message: format!("failed to build update broadcast for {doc_id}: {err}"),
                    }),
                }
            }
        }
    }

    commands
}

fn update_received<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: DocumentId,
    transmission: Transmission,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let peer_id = established_peer_of(model, channel_id).flatten();
    if let Some(peer_id) = peer_id {
        if !permissions.mutability(&doc_id, peer_id) {
            return vec![Command::Diagnostic {
                message: format!("dropped update for {doc_id} from peer {peer_id}: mutability denied"),
            }];
        }
    }

    let Transmission::Snapshot { data, .. } | Transmission::Update { data, .. } = &transmission else {
        return Vec::new();
    };
    if !model.docs.contains_key(&doc_id) {
        return Vec::new();
    }

    let mut commands = Vec::new();
    let doc = model.docs.get_mut(&doc_id).expect("checked above");
    let prev_version = doc.doc.version();
    if let Err(err) = doc.doc.import(data) {
        commands.push(Command::Diagnostic {
            message: format!("failed to import update for {doc_id}: {err}"),
        });
        return commands;
    }
    // An ongoing update broadcast carries real content same as a sync-response would — a
    // subsequent sync-request for this doc now has something to answer with.
    doc.locally_known = true;

    let subscribers: Vec<ChannelId> =
        doc.subscribers.iter().copied().filter(|id| *id != channel_id).collect();
    if !subscribers.is_empty() {
        match build_update_message(&doc_id, doc, &prev_version) {
            Ok(message) => {
                for subscriber in subscribers {
                    commands.push(Command::Send { channel_id: subscriber, message: message.clone() });
                }
            }
            Err(err) => commands.push(Command::Diagnostic {
                message: format!("failed to build update broadcast for {doc_id}: {err}"),
            }),
        }
    }
    commands
}

fn directory_request<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_ids: Option<Vec<DocumentId>>,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let peer_id = established_peer_of(model, channel_id).flatten();
    let visible = |doc_id: &DocumentId| match peer_id {
        Some(peer_id) => permissions.visibility(doc_id, peer_id),
        None => true,
    };
    let doc_ids = match doc_ids {
        Some(requested) => requested.into_iter().filter(|id| model.docs.contains_key(id) && visible(id)).collect(),
        None => model.docs.keys().filter(|id| visible(id)).cloned().collect(),
    };
    vec![Command::Send { channel_id, message: Message::DirectoryResponse { doc_ids } }]
}

fn delete_request<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: DocumentId,
    permissions: &dyn Permissions,
) -> Vec<Command> {
    let peer_id = established_peer_of(model, channel_id).flatten();
    let allowed = match peer_id {
        Some(peer_id) => permissions.deletion(&doc_id, peer_id),
        None => true,
    };
    let existed = model.docs.contains_key(&doc_id);

    let status = if allowed && existed { DeleteStatus::Deleted } else { DeleteStatus::Ignored };
    let mut commands = vec![Command::Send {
        channel_id,
        message: Message::DeleteResponse { doc_id: doc_id.clone(), status },
    }];

    if status == DeleteStatus::Deleted {
        model.docs.remove(&doc_id);
        model.ephemeral.remove_doc(&doc_id);
        commands.push(Command::EmitDocRemoved { doc_id: doc_id.clone() });
        for other in model.channels.keys().copied().collect::<Vec<_>>() {
            if other != channel_id && matches!(model.channels.get(&other).map(|r| r.state), Some(ChannelState::Established { .. })) {
                commands.push(Command::Send {
                    channel_id: other,
                    message: Message::DeleteRequest { doc_id: doc_id.clone() },
                });
            }
        }
    }
    commands
}

fn ephemeral_received<D: CrdtDocument>(
    model: &mut Model<D>,
    channel_id: ChannelId,
    doc_id: DocumentId,
    hops_remaining: u8,
    stores: Vec<EphemeralEntry>,
) -> Vec<Command> {
    for entry in &stores {
        model
            .ephemeral
            .get_or_create_default(model.local_identity.peer_id, &doc_id, &entry.namespace)
            .apply(entry.peer_id, entry.data.clone());
    }

    if hops_remaining == 0 {
        return Vec::new();
    }
    let Some(doc) = model.docs.get(&doc_id) else {
        return Vec::new();
    };
    doc.subscribers
        .iter()
        .copied()
        .filter(|id| *id != channel_id)
        .map(|subscriber| Command::Send {
            channel_id: subscriber,
            message: Message::Ephemeral {
                doc_id: doc_id.clone(),
                hops_remaining: hops_remaining - 1,
                stores: stores.clone(),
            },
        })
        .collect()
}

/// Ensure a document's model entry exists. `announce` controls whether established network peers
/// are told about it (`NewDoc`); `locally_known` marks whether this call is the document actually
/// becoming known to us — a genuine local creation or the arrival of real content — as opposed to
/// a protocol-triggered call that only needs somewhere to track subscribers and pending requests
/// (an inbound sync-request or new-doc announcement for a document we don't have yet).
fn doc_ensure<D: CrdtDocument>(
    model: &mut Model<D>,
    doc_id: DocumentId,
    announce: bool,
    locally_known: bool,
) -> Vec<Command> {
    let mut commands = Vec::new();
    let is_new = !model.docs.contains_key(&doc_id);
    if is_new {
        model.ensure_doc(&doc_id);
        let storage_channels = model.storage_channel_ids();
        let doc = model.docs.get_mut(&doc_id).expect("just ensured");
        for channel_id in &storage_channels {
            doc.ready.track(*channel_id);
        }
        for channel_id in storage_channels {
            let doc = model.docs.get(&doc_id).expect("just ensured");
            let message = build_sync_request_message(
                &doc_id,
                doc,
                true,
                model.local_identity.peer_id,
                &model.ephemeral,
            );
            commands.push(Command::Send { channel_id, message });
        }
        commands.push(Command::EmitDocAdded { doc_id: doc_id.clone() });
        emit_ready_change(model, &doc_id, &mut commands);
    }

    if locally_known {
        if let Some(doc) = model.docs.get_mut(&doc_id) {
            doc.locally_known = true;
        }
    }

    if announce {
        for channel_id in model.established_network_channel_ids() {
            commands.push(Command::Send {
                channel_id,
                message: Message::NewDoc { doc_ids: vec![doc_id.clone()] },
            });
        }
    }
    commands
}

fn doc_delete<D: CrdtDocument>(model: &mut Model<D>, doc_id: DocumentId) -> Vec<Command> {
    if !model.docs.contains_key(&doc_id) {
        return Vec::new();
    }
    model.docs.remove(&doc_id);
    model.ephemeral.remove_doc(&doc_id);
    let mut commands = vec![Command::EmitDocRemoved { doc_id: doc_id.clone() }];
    for (channel_id, record) in &model.channels {
        if matches!(record.state, ChannelState::Established { .. }) {
            commands.push(Command::Send {
                channel_id: *channel_id,
                message: Message::DeleteRequest { doc_id: doc_id.clone() },
            });
        }
    }
    commands
}

/// Spec §4.3 heartbeat: for each doc with subscribed peers, a periodic anti-entropy sync-request
/// carrying our current version and `bidirectional=false`, bundled with our own ephemeral
/// snapshot (§4.4) rather than a separate broadcast.
fn heartbeat<D: CrdtDocument>(model: &mut Model<D>) -> Vec<Command> {
    let mut commands = Vec::new();
    let doc_ids: Vec<DocumentId> = model.docs.keys().cloned().collect();
    for doc_id in doc_ids {
        let Some(doc) = model.docs.get(&doc_id) else {
            continue;
        };
        if doc.subscribers.is_empty() {
            continue;
        }
        let message = build_sync_request_message(&doc_id, doc, false, model.local_identity.peer_id, &model.ephemeral);
        let subscribers: Vec<ChannelId> = doc.subscribers.iter().copied().collect();
        for channel_id in subscribers {
            commands.push(Command::Send { channel_id, message: message.clone() });
        }
    }
    commands
}

fn ephemeral_local_change<D: CrdtDocument>(
    model: &mut Model<D>,
    doc_id: DocumentId,
    namespace: String,
) -> Vec<Command> {
    let Some(store) = model.ephemeral.get(&doc_id, &namespace) else {
        return Vec::new();
    };
    let Some(doc) = model.docs.get(&doc_id) else {
        return Vec::new();
    };
    let data = store.encode_all();
    let entry = EphemeralEntry { peer_id: model.local_identity.peer_id, namespace, data };
    // Spec §4.3: hopsRemaining starts at the number of peers this broadcast would otherwise have
    // to reach through channels other than the one receiving it — the known peer count, since a
    // freshly originated broadcast (as opposed to a relayed one) has no source channel to exclude.
    let hops_remaining = u8::try_from(model.peers.len()).unwrap_or(u8::MAX);
    doc.subscribers
        .iter()
        .copied()
        .map(|channel_id| Command::Send {
            channel_id,
            message: Message::Ephemeral {
                doc_id: doc_id.clone(),
                hops_remaining,
                stores: vec![entry.clone()],
            },
        })
        .collect()
}

/// `None` if the channel doesn't exist or isn't established; `Some(None)` if established but
/// peerless (a storage channel); `Some(Some(peer_id))` for an established network channel.
fn established_peer_of<D: CrdtDocument>(
    model: &Model<D>,
    channel_id: ChannelId,
) -> Option<Option<sync_wire::PeerId>> {
    match model.channels.get(&channel_id)?.state {
        ChannelState::Established { peer_id } => Some(peer_id),
        ChannelState::Pending => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ChannelIdAllocator;
    use crate::permissions::AllowAll;
    use sync_crdt::LoroCrdtDoc;
    use sync_wire::{PeerId, PeerRole};

    fn identity(id: u64) -> PeerIdentity {
        PeerIdentity { peer_id: PeerId::from(id), display_name: format!("peer-{id}"), role: PeerRole::User }
    }

    fn new_model(id: u64) -> Model<LoroCrdtDoc> {
        Model::new(identity(id))
    }

    fn establish_network_channel(
        model: &mut Model<LoroCrdtDoc>,
        allocator: &ChannelIdAllocator,
        remote: u64,
    ) -> ChannelId {
        let channel_id = allocator.next();
        reduce(
            model,
            Event::ChannelAdded { channel_id, kind: ChannelKind::Network, adapter_type: "test".to_string() },
            &AllowAll,
        );
        reduce(
            model,
            Event::ChannelReceiveMessage { channel_id, message: Message::EstablishRequest { sender: identity(remote) } },
            &AllowAll,
        );
        channel_id
    }

    #[test]
    fn establishing_a_network_channel_adds_the_peer() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);

        assert!(model.peers.contains_key(&PeerId::from(2u64)));
        assert_eq!(
            model.channels.get(&channel_id).unwrap().state,
            ChannelState::Established { peer_id: Some(PeerId::from(2u64)) }
        );
    }

    #[test]
    fn sync_request_reciprocates_exactly_once_per_channel() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-a");

        let commands = reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: Vec::new(),
                    bidirectional: true,
                    ephemeral: None,
                },
            },
            &AllowAll,
        );
        let reciprocal_sends = commands
            .iter()
            .filter(|c| matches!(c, Command::Send { message: Message::SyncRequest { .. }, .. }))
            .count();
        assert_eq!(reciprocal_sends, 1, "first sync-request on a channel should provoke exactly one reciprocal request");
        assert!(model.docs.get(&doc_id).unwrap().outbound_subscriptions.contains(&channel_id));

        let commands = reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: Vec::new(),
                    bidirectional: true,
                    ephemeral: None,
                },
            },
            &AllowAll,
        );
        let reciprocal_sends = commands
            .iter()
            .filter(|c| matches!(c, Command::Send { message: Message::SyncRequest { .. }, .. }))
            .count();
        assert_eq!(reciprocal_sends, 0, "a channel that already got a reciprocal request shouldn't get a second one");
    }

    #[test]
    fn new_doc_announcement_materializes_and_pulls_the_document() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-b");

        let commands = reduce(
            &mut model,
            Event::ChannelReceiveMessage { channel_id, message: Message::NewDoc { doc_ids: vec![doc_id.clone()] } },
            &AllowAll,
        );

        assert!(model.docs.contains_key(&doc_id));
        assert!(commands.iter().any(|c| matches!(c, Command::EmitDocAdded { doc_id: id } if *id == doc_id)));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Send { message: Message::SyncRequest { doc_id: id, bidirectional: true, .. }, .. }
                if *id == doc_id
        )));
    }

    #[test]
    fn new_doc_announcement_is_refused_without_creation_permission() {
        struct DenyCreation;
        impl Permissions for DenyCreation {
            fn creation(&self, _doc: &DocumentId, _peer: PeerId) -> bool {
                false
            }
        }

        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-c");

        reduce(
            &mut model,
            Event::ChannelReceiveMessage { channel_id, message: Message::NewDoc { doc_ids: vec![doc_id.clone()] } },
            &DenyCreation,
        );

        assert!(!model.docs.contains_key(&doc_id));
    }

    #[test]
    fn channel_removed_forgets_outbound_subscription_bookkeeping() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-d");
        reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: Vec::new(),
                    bidirectional: true,
                    ephemeral: None,
                },
            },
            &AllowAll,
        );
        assert!(model.docs.get(&doc_id).unwrap().outbound_subscriptions.contains(&channel_id));

        reduce(&mut model, Event::ChannelRemoved { channel_id }, &AllowAll);
        assert!(model.docs.get(&doc_id).unwrap().outbound_subscriptions.is_empty());
    }

    #[test]
    fn sync_request_for_a_disallowed_document_reports_unavailable_without_creating_it() {
        struct DenyCreation;
        impl Permissions for DenyCreation {
            fn creation(&self, _doc: &DocumentId, _peer: PeerId) -> bool {
                false
            }
        }

        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-e");

        let commands = reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: Vec::new(),
                    bidirectional: true,
                    ephemeral: None,
                },
            },
            &DenyCreation,
        );

        assert!(!model.docs.contains_key(&doc_id));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Send { message: Message::SyncResponse { transmission: Transmission::Unavailable, .. }, .. }
        )));
    }

    #[test]
    fn heartbeat_reissues_a_sync_request_to_every_subscriber() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-f");

        // A bidirectional sync-request from the peer makes us treat its channel as a subscriber.
        reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: Vec::new(),
                    bidirectional: true,
                    ephemeral: None,
                },
            },
            &AllowAll,
        );

        let commands = reduce(&mut model, Event::Heartbeat, &AllowAll);
        let sync_requests: Vec<_> = commands
            .iter()
            .filter(|c| matches!(
                c,
                Command::Send { channel_id: id, message: Message::SyncRequest { doc_id: d, bidirectional: false, .. } }
                    if *id == channel_id && *d == doc_id
            ))
            .collect();
        assert_eq!(sync_requests.len(), 1, "heartbeat should re-request each subscribed doc, not just broadcast ephemeral frames");
    }

    #[test]
    fn heartbeat_skips_documents_with_no_subscribers() {
        let mut model = new_model(1);
        reduce(&mut model, Event::DocEnsure { doc_id: DocumentId::new("doc-g") }, &AllowAll);

        let commands = reduce(&mut model, Event::Heartbeat, &AllowAll);
        assert!(commands.is_empty());
    }

    #[test]
    fn ephemeral_broadcast_hop_count_tracks_known_peer_count() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_a = establish_network_channel(&mut model, &allocator, 2);
        let channel_b = establish_network_channel(&mut model, &allocator, 3);
        let doc_id = DocumentId::new("doc-h");
        reduce(&mut model, Event::DocEnsure { doc_id: doc_id.clone() }, &AllowAll);
        for channel_id in [channel_a, channel_b] {
            reduce(
                &mut model,
                Event::ChannelReceiveMessage {
                    channel_id,
                    message: Message::SyncRequest {
                        doc_id: doc_id.clone(),
                        requester_version: Vec::new(),
                        bidirectional: true,
                        ephemeral: None,
                    },
                },
                &AllowAll,
            );
        }

        let commands = reduce(
            &mut model,
            Event::EphemeralLocalChange { doc_id: doc_id.clone(), namespace: "presence".to_string() },
            &AllowAll,
        );
        let hops: Vec<u8> = commands
            .iter()
            .filter_map(|c| match c {
                Command::Send { message: Message::Ephemeral { hops_remaining, .. }, .. } => Some(*hops_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(hops, vec![2, 2], "hop count should reflect the two known peers, not a fixed constant");
    }

    #[test]
    fn ready_state_change_fires_per_channel_even_before_the_aggregate_flips() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let storage_a = allocator.next();
        let storage_b = allocator.next();
        reduce(
            &mut model,
            Event::ChannelAdded { channel_id: storage_a, kind: ChannelKind::Storage, adapter_type: "test".to_string() },
            &AllowAll,
        );
        reduce(
            &mut model,
            Event::ChannelAdded { channel_id: storage_b, kind: ChannelKind::Storage, adapter_type: "test".to_string() },
            &AllowAll,
        );

        let doc_id = DocumentId::new("doc-i");
        reduce(&mut model, Event::DocEnsure { doc_id: doc_id.clone() }, &AllowAll);

        // Only one of the two storage channels answers; the doc as a whole is still pending, but
        // the per-channel list changed and should be reported.
        let commands = reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id: storage_a,
                message: Message::SyncResponse { doc_id: doc_id.clone(), transmission: Transmission::Unavailable, ephemeral: None },
            },
            &AllowAll,
        );

        let ready_states = commands.iter().find_map(|c| match c {
            Command::SetDocReady { doc_id: d, ready_states } if *d == doc_id => Some(ready_states.clone()),
            _ => None,
        });
        let ready_states = ready_states.expect("expected a ready-state change after the first channel responded");
        assert_eq!(ready_states.len(), 2);
        assert!(ready_states.iter().any(|(id, status)| *id == storage_a && *status == ReadyStatus::RespondedWithNoData));
        assert!(ready_states.iter().any(|(id, status)| *id == storage_b && *status == ReadyStatus::Pending));
        assert!(!model.docs.get(&doc_id).unwrap().ready.is_ready(), "doc shouldn't be fully ready until both channels answer");
    }

    #[test]
    fn update_broadcast_marks_a_bookkeeping_only_document_as_locally_known() {
        let allocator = ChannelIdAllocator::default();
        let mut model = new_model(1);
        let channel_id = establish_network_channel(&mut model, &allocator, 2);
        let doc_id = DocumentId::new("doc-j");

        // The peer's bidirectional sync-request materializes the doc on our side purely as
        // bookkeeping; we have no content of our own for it yet.
        reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: Vec::new(),
                    bidirectional: true,
                    ephemeral: None,
                },
            },
            &AllowAll,
        );
        assert!(!model.docs.get(&doc_id).unwrap().locally_known);

        let source = LoroCrdtDoc::new();
        source.inner().get_text("text").insert(0, "hi").unwrap();
        let snapshot = source.export_snapshot();

        reduce(
            &mut model,
            Event::ChannelReceiveMessage {
                channel_id,
                message: Message::Update {
                    doc_id: doc_id.clone(),
                    transmission: Transmission::Update { data: snapshot, version: Vec::new() },
                },
            },
            &AllowAll,
        );

        assert!(
            model.docs.get(&doc_id).unwrap().locally_known,
            "a doc that just received real content over an update broadcast must stop being treated as unavailable"
        );
    }
}
