use ciborium::Value;

use crate::cbor_util::{as_array, as_bool, as_bytes, as_text, as_u64, as_u8, entry, get, map};
use crate::ids::{DocumentId, PeerId};
use crate::WireError;

/// The numeric `t` discriminant each message carries on the wire.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    EstablishRequest = 0,
    EstablishResponse = 1,
    SyncRequest = 2,
    SyncResponse = 3,
    Update = 4,
    NewDoc = 5,
    DirectoryRequest = 6,
    DirectoryResponse = 7,
    DeleteRequest = 8,
    DeleteResponse = 9,
    Ephemeral = 10,
    Batch = 11,
}

impl MessageKind {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        Ok(match value {
            0 => Self::EstablishRequest,
            1 => Self::EstablishResponse,
            2 => Self::SyncRequest,
            3 => Self::SyncResponse,
            4 => Self::Update,
            5 => Self::NewDoc,
            6 => Self::DirectoryRequest,
            7 => Self::DirectoryResponse,
            8 => Self::DeleteRequest,
            9 => Self::DeleteResponse,
            10 => Self::Ephemeral,
            11 => Self::Batch,
            other => return Err(WireError::UnknownKind(other)),
        })
    }

    /// Everything except the establish handshake and batch itself may be queued into a
    /// `channel/batch`.
    pub fn is_batchable(self) -> bool {
        !matches!(
            self,
            Self::EstablishRequest | Self::EstablishResponse | Self::Batch
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
    User,
    Service,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerIdentity {
    pub peer_id: PeerId,
    pub display_name: String,
    pub role: PeerRole,
}

/// An ephemeral payload from one peer, namespaced within a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralEntry {
    pub peer_id: PeerId,
    pub namespace: String,
    pub data: Vec<u8>,
}

/// Encoded bytes of the CRDT engine's opaque `VersionVector`.
///
/// The wire codec never interprets these bytes; only the CRDT engine (outside this crate)
/// knows how to decode and compare them.
pub type EncodedVersion = Vec<u8>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transmission {
    Snapshot {
        data: Vec<u8>,
        version: EncodedVersion,
    },
    Update {
        data: Vec<u8>,
        version: EncodedVersion,
    },
    UpToDate {
        version: EncodedVersion,
    },
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    EstablishRequest {
        sender: PeerIdentity,
    },
    EstablishResponse {
        sender: PeerIdentity,
    },
    SyncRequest {
        doc_id: DocumentId,
        requester_version: EncodedVersion,
        bidirectional: bool,
        ephemeral: Option<Vec<EphemeralEntry>>,
    },
    SyncResponse {
        doc_id: DocumentId,
        transmission: Transmission,
        ephemeral: Option<Vec<EphemeralEntry>>,
    },
    Update {
        doc_id: DocumentId,
        transmission: Transmission,
    },
    NewDoc {
        doc_ids: Vec<DocumentId>,
    },
    DirectoryRequest {
        doc_ids: Option<Vec<DocumentId>>,
    },
    DirectoryResponse {
        doc_ids: Vec<DocumentId>,
    },
    DeleteRequest {
        doc_id: DocumentId,
    },
    DeleteResponse {
        doc_id: DocumentId,
        status: DeleteStatus,
    },
    Ephemeral {
        doc_id: DocumentId,
        hops_remaining: u8,
        stores: Vec<EphemeralEntry>,
    },
    Batch {
        messages: Vec<Message>,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::EstablishRequest { .. } => MessageKind::EstablishRequest,
            Self::EstablishResponse { .. } => MessageKind::EstablishResponse,
            Self::SyncRequest { .. } => MessageKind::SyncRequest,
            Self::SyncResponse { .. } => MessageKind::SyncResponse,
            Self::Update { .. } => MessageKind::Update,
            Self::NewDoc { .. } => MessageKind::NewDoc,
            Self::DirectoryRequest { .. } => MessageKind::DirectoryRequest,
            Self::DirectoryResponse { .. } => MessageKind::DirectoryResponse,
            Self::DeleteRequest { .. } => MessageKind::DeleteRequest,
            Self::DeleteResponse { .. } => MessageKind::DeleteResponse,
            Self::Ephemeral { .. } => MessageKind::Ephemeral,
            Self::Batch { .. } => MessageKind::Batch,
        }
    }

    pub fn is_batchable(&self) -> bool {
        self.kind().is_batchable()
    }

    pub(crate) fn to_value(&self) -> Value {
        let t = Value::Integer((self.kind() as u8).into());
        match self {
            Self::EstablishRequest { sender } | Self::EstablishResponse { sender } => map(vec![
                entry("t", t),
                entry("peer", identity_to_value(sender)),
            ]),
            Self::SyncRequest {
                doc_id,
                requester_version,
                bidirectional,
                ephemeral,
            } => map(vec![
                entry("t", t),
                entry("doc", Value::Text(doc_id.as_str().to_string())),
                entry("v", Value::Bytes(requester_version.clone())),
                entry("bi", Value::Bool(*bidirectional)),
                entry("eph", ephemeral_opt_to_value(ephemeral)),
            ]),
            Self::SyncResponse {
                doc_id,
                transmission,
                ephemeral,
            } => map(vec![
                entry("t", t),
                entry("doc", Value::Text(doc_id.as_str().to_string())),
                entry("tx", transmission_to_value(transmission)),
                entry("eph", ephemeral_opt_to_value(ephemeral)),
            ]),
            Self::Update {
                doc_id,
                transmission,
            } => map(vec![
                entry("t", t),
                entry("doc", Value::Text(doc_id.as_str().to_string())),
                entry("tx", transmission_to_value(transmission)),
            ]),
            Self::NewDoc { doc_ids } => map(vec![
                entry("t", t),
                entry("docs", doc_ids_to_value(doc_ids)),
            ]),
            Self::DirectoryRequest { doc_ids } => map(vec![
                entry("t", t),
                entry(
                    "docs",
                    match doc_ids {
                        Some(ids) => doc_ids_to_value(ids),
                        None => Value::Null,
                    },
                ),
            ]),
            Self::DirectoryResponse { doc_ids } => map(vec![
                entry("t", t),
                entry("docs", doc_ids_to_value(doc_ids)),
            ]),
            Self::DeleteRequest { doc_id } => map(vec![
                entry("t", t),
                entry("doc", Value::Text(doc_id.as_str().to_string())),
            ]),
            Self::DeleteResponse { doc_id, status } => map(vec![
                entry("t", t),
                entry("doc", Value::Text(doc_id.as_str().to_string())),
                entry(
                    "st",
                    Value::Integer(match status {
                        DeleteStatus::Deleted => 0.into(),
                        DeleteStatus::Ignored => 1.into(),
                    }),
                ),
            ]),
            Self::Ephemeral {
                doc_id,
                hops_remaining,
                stores,
            } => map(vec![
                entry("t", t),
                entry("doc", Value::Text(doc_id.as_str().to_string())),
                entry("hops", Value::Integer((*hops_remaining).into())),
                entry("stores", stores_to_value(stores)),
            ]),
            Self::Batch { messages } => map(vec![
                entry("t", t),
                entry(
                    "msgs",
                    Value::Array(messages.iter().map(Message::to_value).collect()),
                ),
            ]),
        }
    }

    pub(crate) fn from_value(value: &Value) -> Result<Self, WireError> {
        let t = as_u8(get(value, "t")?)?;
        let kind = MessageKind::from_u8(t)?;
        Ok(match kind {
            MessageKind::EstablishRequest => Self::EstablishRequest {
                sender: identity_from_value(get(value, "peer")?)?,
            },
            MessageKind::EstablishResponse => Self::EstablishResponse {
                sender: identity_from_value(get(value, "peer")?)?,
            },
            MessageKind::SyncRequest => Self::SyncRequest {
                doc_id: DocumentId::new(as_text(get(value, "doc")?)?),
                requester_version: as_bytes(get(value, "v")?)?,
                bidirectional: as_bool(get(value, "bi")?)?,
                ephemeral: ephemeral_opt_from_value(get(value, "eph")?)?,
            },
            MessageKind::SyncResponse => Self::SyncResponse {
                doc_id: DocumentId::new(as_text(get(value, "doc")?)?),
                transmission: transmission_from_value(get(value, "tx")?)?,
                ephemeral: ephemeral_opt_from_value(get(value, "eph")?)?,
            },
            MessageKind::Update => Self::Update {
                doc_id: DocumentId::new(as_text(get(value, "doc")?)?),
                transmission: transmission_from_value(get(value, "tx")?)?,
            },
            MessageKind::NewDoc => Self::NewDoc {
                doc_ids: doc_ids_from_value(get(value, "docs")?)?,
            },
            MessageKind::DirectoryRequest => {
                let raw = get(value, "docs")?;
                Self::DirectoryRequest {
                    doc_ids: match raw {
                        Value::Null => None,
                        other => Some(doc_ids_from_value(other)?),
                    },
                }
            }
            MessageKind::DirectoryResponse => Self::DirectoryResponse {
                doc_ids: doc_ids_from_value(get(value, "docs")?)?,
            },
            MessageKind::DeleteRequest => Self::DeleteRequest {
                doc_id: DocumentId::new(as_text(get(value, "doc")?)?),
            },
            MessageKind::DeleteResponse => Self::DeleteResponse {
                doc_id: DocumentId::new(as_text(get(value, "doc")?)?),
                status: match as_u64(get(value, "st")?)? {
                    0 => DeleteStatus::Deleted,
                    _ => DeleteStatus::Ignored,
                },
            },
            MessageKind::Ephemeral => Self::Ephemeral {
                doc_id: DocumentId::new(as_text(get(value, "doc")?)?),
                hops_remaining: as_u8(get(value, "hops")?)?,
                stores: stores_from_value(get(value, "stores")?)?,
            },
            MessageKind::Batch => {
                let raw = as_array(get(value, "msgs")?)?;
                let mut messages = Vec::with_capacity(raw.len());
                for entry in raw {
                    messages.push(Message::from_value(entry)?);
                }
                Self::Batch { messages }
            }
        })
    }
}

fn identity_to_value(identity: &PeerIdentity) -> Value {
    map(vec![
        entry("id", Value::Text(identity.peer_id.to_string())),
        entry("name", Value::Text(identity.display_name.clone())),
        entry(
            "role",
            Value::Integer(match identity.role {
                PeerRole::User => 0.into(),
                PeerRole::Service => 1.into(),
            }),
        ),
    ])
}

fn identity_from_value(value: &Value) -> Result<PeerIdentity, WireError> {
    let peer_id = as_text(get(value, "id")?)?
        .parse()
        .map_err(|_| WireError::InvalidPeerId(as_text(get(value, "id")?).unwrap_or_default()))?;
    let display_name = as_text(get(value, "name")?)?;
    let role = match as_u64(get(value, "role")?)? {
        0 => PeerRole::User,
        _ => PeerRole::Service,
    };
    Ok(PeerIdentity {
        peer_id,
        display_name,
        role,
    })
}

fn doc_ids_to_value(doc_ids: &[DocumentId]) -> Value {
    Value::Array(
        doc_ids
            .iter()
            .map(|id| Value::Text(id.as_str().to_string()))
            .collect(),
    )
}

fn doc_ids_from_value(value: &Value) -> Result<Vec<DocumentId>, WireError> {
    as_array(value)?
        .iter()
        .map(|v| Ok(DocumentId::new(as_text(v)?)))
        .collect()
}

fn transmission_to_value(transmission: &Transmission) -> Value {
    match transmission {
        Transmission::Snapshot { data, version } => map(vec![
            entry("k", Value::Integer(0.into())),
            entry("data", Value::Bytes(data.clone())),
            entry("v", Value::Bytes(version.clone())),
        ]),
        Transmission::Update { data, version } => map(vec![
            entry("k", Value::Integer(1.into())),
            entry("data", Value::Bytes(data.clone())),
            entry("v", Value::Bytes(version.clone())),
        ]),
        Transmission::UpToDate { version } => map(vec![
            entry("k", Value::Integer(2.into())),
            entry("v", Value::Bytes(version.clone())),
        ]),
        Transmission::Unavailable => map(vec![entry("k", Value::Integer(3.into()))]),
    }
}

fn transmission_from_value(value: &Value) -> Result<Transmission, WireError> {
    Ok(match as_u64(get(value, "k")?)? {
        0 => Transmission::Snapshot {
            data: as_bytes(get(value, "data")?)?,
            version: as_bytes(get(value, "v")?)?,
        },
        1 => Transmission::Update {
            data: as_bytes(get(value, "data")?)?,
            version: as_bytes(get(value, "v")?)?,
        },
        2 => Transmission::UpToDate {
            version: as_bytes(get(value, "v")?)?,
        },
        3 => Transmission::Unavailable,
        other => return Err(WireError::Malformed(format!("unknown transmission kind {other}"))),
    })
}

fn stores_to_value(stores: &[EphemeralEntry]) -> Value {
    Value::Array(
        stores
            .iter()
            .map(|entry_| {
                map(vec![
                    entry("peer", Value::Text(entry_.peer_id.to_string())),
                    entry("ns", Value::Text(entry_.namespace.clone())),
                    entry("data", Value::Bytes(entry_.data.clone())),
                ])
            })
            .collect(),
    )
}

fn stores_from_value(value: &Value) -> Result<Vec<EphemeralEntry>, WireError> {
    as_array(value)?
        .iter()
        .map(|v| {
            Ok(EphemeralEntry {
                peer_id: as_text(get(v, "peer")?)?
                    .parse()
                    .map_err(|_| WireError::Malformed("bad peer id in ephemeral store".into()))?,
                namespace: as_text(get(v, "ns")?)?,
                data: as_bytes(get(v, "data")?)?,
            })
        })
        .collect()
}

fn ephemeral_opt_to_value(ephemeral: &Option<Vec<EphemeralEntry>>) -> Value {
    match ephemeral {
        Some(entries) => stores_to_value(entries),
        None => Value::Null,
    }
}

fn ephemeral_opt_from_value(value: &Value) -> Result<Option<Vec<EphemeralEntry>>, WireError> {
    match value {
        Value::Null => Ok(None),
        other => Ok(Some(stores_from_value(other)?)),
    }
}
