//! Small helpers for building and reading the tagged CBOR maps used on the wire.
//!
//! The message taxonomy is hand-encoded into `ciborium::Value` maps instead of
//! derived, so that the top-level `t` discriminant is a genuine CBOR integer
//! (as specified) rather than whatever a derived enum tag would produce.

use ciborium::Value;

use crate::WireError;

pub fn entry(key: &str, value: Value) -> (Value, Value) {
    (Value::Text(key.to_string()), value)
}

pub fn map(entries: Vec<(Value, Value)>) -> Value {
    Value::Map(entries)
}

pub fn get<'a>(map: &'a Value, key: &str) -> Result<&'a Value, WireError> {
    let Value::Map(entries) = map else {
        return Err(WireError::Malformed("expected a map".to_string()));
    };
    entries
        .iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
        .map(|(_, v)| v)
        .ok_or_else(|| WireError::Malformed(format!("missing field {key:?}")))
}

pub fn as_u8(v: &Value) -> Result<u8, WireError> {
    v.as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| WireError::Malformed("expected a u8".to_string()))
}

pub fn as_u64(v: &Value) -> Result<u64, WireError> {
    v.as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| WireError::Malformed("expected a u64".to_string()))
}

pub fn as_bool(v: &Value) -> Result<bool, WireError> {
    v.as_bool()
        .ok_or_else(|| WireError::Malformed("expected a bool".to_string()))
}

pub fn as_text(v: &Value) -> Result<String, WireError> {
    v.as_text()
        .map(str::to_string)
        .ok_or_else(|| WireError::Malformed("expected a string".to_string()))
}

pub fn as_bytes(v: &Value) -> Result<Vec<u8>, WireError> {
    v.as_bytes()
        .cloned()
        .ok_or_else(|| WireError::Malformed("expected a byte string".to_string()))
}

pub fn as_array<'a>(v: &'a Value) -> Result<&'a Vec<Value>, WireError> {
    v.as_array()
        .ok_or_else(|| WireError::Malformed("expected an array".to_string()))
}
