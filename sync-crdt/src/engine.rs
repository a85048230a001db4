use crate::error::CrdtError;
use crate::version::VersionVectorOps;

/// Narrow interface the synchronizer consumes from the CRDT engine (spec §6).
///
/// The synchronizer never reaches past this trait into document internals: it creates empty
/// documents, imports/exports bytes, and reads the current version. Everything else (text,
/// lists, maps, merge semantics) is the CRDT engine's business.
pub trait CrdtDocument: Send + Sync + 'static {
    type Version: VersionVectorOps;

    fn new() -> Self
    where
        Self: Sized;

    fn from_snapshot(bytes: &[u8]) -> Result<Self, CrdtError>
    where
        Self: Sized;

    fn import(&self, bytes: &[u8]) -> Result<(), CrdtError>;

    fn export_snapshot(&self) -> Vec<u8>;

    fn export_update_from(&self, version: &Self::Version) -> Result<Vec<u8>, CrdtError>;

    fn version(&self) -> Self::Version;
}
