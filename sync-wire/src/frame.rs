//! Binary framing: `version(1) | flags(1) | payload_length(4, big-endian)` followed by the
//! CBOR-encoded payload.

use ciborium::Value;

use crate::message::Message;
use crate::WireError;

const HEADER_LEN: usize = 6;
const WIRE_VERSION: u8 = 1;
const FLAG_BATCH: u8 = 0b0000_0001;

struct Header {
    flags: u8,
    payload_len: u32,
}

fn parse_header(bytes: &[u8]) -> Result<Header, WireError> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::ShortHeader(bytes.len()));
    }
    let version = bytes[0];
    if version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let flags = bytes[1];
    let payload_len = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    Ok(Header { flags, payload_len })
}

fn encode_value(value: &Value) -> Result<Vec<u8>, WireError> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    Ok(payload)
}

fn decode_value(bytes: &[u8]) -> Result<Value, WireError> {
    Ok(ciborium::from_reader(bytes)?)
}

fn build_frame(payload: &[u8], batch: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(WIRE_VERSION);
    frame.push(if batch { FLAG_BATCH } else { 0 });
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Encode a single message into one frame (not batch-wrapped).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, WireError> {
    let payload = encode_value(&message.to_value())?;
    Ok(build_frame(&payload, false))
}

/// Wrap a sequence of messages into a `channel/batch` frame.
///
/// A single-element sequence still produces a valid batch frame; `decode_frame` flattens it back
/// to a one-element list either way (batch idempotence, spec §8 property 6).
pub fn encode_batch_frame(messages: Vec<Message>) -> Result<Vec<u8>, WireError> {
    let batch = Message::Batch { messages };
    let payload = encode_value(&batch.to_value())?;
    Ok(build_frame(&payload, true))
}

/// Decode one frame into its flattened list of inner messages.
///
/// A plain (non-batch) frame yields a single-element list; a `channel/batch` frame yields its
/// inner messages in order. Buffers from a platform that subclasses the raw byte-array type are
/// accepted as-is since this operates on a plain `&[u8]` view.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<Message>, WireError> {
    let header = parse_header(bytes)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() < header.payload_len as usize {
        return Err(WireError::TruncatedPayload {
            declared: header.payload_len,
            available: payload.len(),
        });
    }
    let payload = &payload[..header.payload_len as usize];
    let value = decode_value(payload)?;
    let message = Message::from_value(&value)?;
    Ok(match message {
        Message::Batch { messages } => messages,
        other => vec![other],
    })
}

/// Whether the frame header declares the batch flag (informational; `decode_frame` already
/// flattens batches transparently).
pub fn is_batch_frame(bytes: &[u8]) -> Result<bool, WireError> {
    let header = parse_header(bytes)?;
    Ok(header.flags & FLAG_BATCH != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, PeerIdentity, PeerRole};
    use crate::ids::{DocumentId, PeerId};

    fn sample_sync_request() -> Message {
        Message::SyncRequest {
            doc_id: DocumentId::new("doc-1"),
            requester_version: vec![1, 2, 3],
            bidirectional: true,
            ephemeral: None,
        }
    }

    #[test]
    fn round_trips_a_single_message() {
        let message = sample_sync_request();
        let frame = encode_frame(&message).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn batch_of_one_decodes_to_one_message() {
        let message = sample_sync_request();
        let frame = encode_batch_frame(vec![message.clone()]).unwrap();
        assert!(is_batch_frame(&frame).unwrap());
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn batch_of_many_preserves_order() {
        let a = sample_sync_request();
        let b = Message::DirectoryRequest { doc_ids: None };
        let frame = encode_batch_frame(vec![a.clone(), b.clone()]).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn rejects_short_header() {
        let err = decode_frame(&[1, 0, 0]).unwrap_err();
        assert!(matches!(err, WireError::ShortHeader(3)));
    }

    #[test]
    fn rejects_unknown_version() {
        let frame = build_frame(&[], false);
        let mut bad = frame;
        bad[0] = 9;
        let err = decode_frame(&bad).unwrap_err();
        assert!(matches!(err, WireError::UnsupportedVersion(9)));
    }

    #[test]
    fn rejects_truncated_payload() {
        let message = sample_sync_request();
        let mut frame = encode_frame(&message).unwrap();
        frame.truncate(frame.len() - 2);
        let err = decode_frame(&frame).unwrap_err();
        assert!(matches!(err, WireError::TruncatedPayload { .. }));
    }

    #[test]
    fn establish_identity_round_trips() {
        let message = Message::EstablishRequest {
            sender: PeerIdentity {
                peer_id: PeerId::new(2000),
                display_name: "alice".into(),
                role: PeerRole::User,
            },
        };
        let frame = encode_frame(&message).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), vec![message]);
    }

    #[test]
    fn ephemeral_stores_round_trip() {
        use crate::message::EphemeralEntry;
        let message = Message::Ephemeral {
            doc_id: DocumentId::new("doc-3"),
            hops_remaining: 2,
            stores: vec![EphemeralEntry {
                peer_id: PeerId::new(3000),
                namespace: "presence".into(),
                data: vec![9, 9, 9],
            }],
        };
        let frame = encode_frame(&message).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), vec![message]);
    }
}
