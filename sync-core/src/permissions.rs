use sync_wire::{DocumentId, PeerId};

/// Authorization hooks consulted by the reducer before it acts on a remote request.
///
/// Every hook defaults to allow, matching spec.md's "no policy configured behaves as if every
/// hook returns true" rule. Applications plug in their own trust model (capability tokens, ACLs,
/// whatever) by overriding the hooks they care about; this trait does not know or care how that
/// decision is made.
pub trait Permissions: Send + Sync {
    /// May `peer` learn that `doc` exists and read its contents?
    fn visibility(&self, doc: &DocumentId, peer: PeerId) -> bool {
        let _ = (doc, peer);
        true
    }

    /// May `peer` submit changes to `doc`?
    fn mutability(&self, doc: &DocumentId, peer: PeerId) -> bool {
        let _ = (doc, peer);
        true
    }

    /// May `peer` cause a brand-new document to be materialized locally (via an inbound
    /// sync-request or new-doc announcement)?
    fn creation(&self, doc: &DocumentId, peer: PeerId) -> bool {
        let _ = (doc, peer);
        true
    }

    /// May `peer` request deletion of `doc`?
    fn deletion(&self, doc: &DocumentId, peer: PeerId) -> bool {
        let _ = (doc, peer);
        true
    }
}

/// Default policy: every hook allows. Used when a `Synchronizer` is built without an explicit
/// `Permissions` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Permissions for AllowAll {}
