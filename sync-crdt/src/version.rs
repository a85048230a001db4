use crate::error::CrdtError;

/// Result of comparing two version vectors, per spec: `{lt, eq, gt, concurrent}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Eq,
    Gt,
    Concurrent,
}

/// The narrow interface the synchronizer needs from an opaque CRDT version vector: compare,
/// count peers with nonzero counters, and encode to bytes for the wire.
pub trait VersionVectorOps: Clone + PartialEq + Send + Sync + 'static {
    fn compare(&self, other: &Self) -> Comparison;
    /// Count of peers with a nonzero counter.
    fn length(&self) -> usize;
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, CrdtError>
    where
        Self: Sized;
    fn empty() -> Self;
}
