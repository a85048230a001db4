#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("failed to import CRDT bytes: {0}")]
    Import(String),
    #[error("failed to export CRDT bytes: {0}")]
    Export(String),
    #[error("failed to decode version vector: {0}")]
    DecodeVersion(String),
}
