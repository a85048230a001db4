#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame header is shorter than 6 bytes ({0} bytes received)")]
    ShortHeader(usize),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("frame declares payload length {declared} but only {available} bytes are available")]
    TruncatedPayload { declared: u32, available: usize },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("invalid peer id {0:?}")]
    InvalidPeerId(String),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error(transparent)]
    Cbor(#[from] ciborium::de::Error<std::io::Error>),
    #[error(transparent)]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),
}
