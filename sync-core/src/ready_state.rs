use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::ids::ChannelId;
use crate::SynchronizerError;
use sync_wire::{DocumentId, PeerId};

/// Whether one channel has weighed in on a document's initial sync-request (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyStatus {
    Pending,
    RespondedWithData,
    RespondedWithNoData,
}

impl ReadyStatus {
    fn is_settled(self) -> bool {
        !matches!(self, ReadyStatus::Pending)
    }
}

/// One document's ready-state record, per channel (spec §4.5's `getReadyStates`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyRecord {
    pub channel_id: ChannelId,
    pub peer_id: Option<PeerId>,
    pub status: ReadyStatus,
}

/// Tracks, per document, which storage channels still owe an answer to the initial
/// sync-request. A document is "ready" once every storage channel known at the time it was
/// ensured has settled (responded with data or explicitly with none). Network channels never
/// gate readiness: storage is authoritative for what the document contains locally.
#[derive(Debug, Default, Clone)]
pub struct DocReadyTracker {
    storage: HashMap<ChannelId, ReadyStatus>,
    /// The per-channel snapshot last handed back by `take_changed_snapshot`, so repeated
    /// mutations that don't actually change any status (or that flip back and forth within one
    /// dispatch cycle) don't re-emit `ready-state-changed` (spec §4.5/§6: emit only on change).
    last_emitted: Vec<(ChannelId, ReadyStatus)>,
}

impl DocReadyTracker {
    pub fn track(&mut self, channel_id: ChannelId) {
        self.storage.entry(channel_id).or_insert(ReadyStatus::Pending);
    }

    pub fn record(&mut self, channel_id: ChannelId, status: ReadyStatus) {
        self.storage.insert(channel_id, status);
    }

    pub fn untrack(&mut self, channel_id: ChannelId) {
        self.storage.remove(&channel_id);
    }

    pub fn is_ready(&self) -> bool {
        self.storage.values().all(|status| status.is_settled())
    }

    /// Every tracked storage channel and its current status, for `getReadyStates` (spec §6).
    pub fn entries(&self) -> impl Iterator<Item = (ChannelId, ReadyStatus)> + '_ {
        self.storage.iter().map(|(id, status)| (*id, *status))
    }

    fn snapshot(&self) -> Vec<(ChannelId, ReadyStatus)> {
        let mut entries: Vec<_> = self.entries().collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// The current per-channel snapshot, if it differs from the one last returned by this method
    /// (deep-equal, not just the aggregate ready bit) — `None` means nothing worth emitting.
    pub fn take_changed_snapshot(&mut self) -> Option<Vec<(ChannelId, ReadyStatus)>> {
        let snapshot = self.snapshot();
        if snapshot == self.last_emitted {
            return None;
        }
        self.last_emitted = snapshot.clone();
        Some(snapshot)
    }
}

/// Async-waitable readiness signal per document, consulted by `waitUntilReady` (spec §6).
///
/// Kept separate from [`DocReadyTracker`] (which is plain synchronous model state mutated by the
/// reducer) because awaiting a `tokio::sync::watch` receiver is the one place the public API
/// needs to suspend; the reducer itself never does.
#[derive(Default)]
pub struct ReadyGate {
    senders: Mutex<HashMap<DocumentId, watch::Sender<bool>>>,
}

impl ReadyGate {
    fn sender_for(&self, doc_id: &DocumentId) -> watch::Sender<bool> {
        let mut senders = self.senders.lock().unwrap();
        senders
            .entry(doc_id.clone())
            .or_insert_with(|| watch::channel(false).0)
            .clone()
    }

    /// Called by the command executor whenever a document's ready state may have changed.
    pub fn set(&self, doc_id: &DocumentId, ready: bool) {
        let sender = self.sender_for(doc_id);
        let _ = sender.send(ready);
    }

    pub fn is_ready(&self, doc_id: &DocumentId) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(doc_id)
            .map(|sender| *sender.borrow())
            .unwrap_or(false)
    }

    /// A receiver that wakes on every readiness transition for `doc_id`, for callers (like
    /// `Synchronizer::wait_until_ready`) that need to re-check a caller-supplied predicate rather
    /// than a plain boolean.
    pub fn subscribe(&self, doc_id: &DocumentId) -> watch::Receiver<bool> {
        self.sender_for(doc_id).subscribe()
    }

    /// Drop every tracked document's readiness state, used by `Synchronizer::reset`.
    pub fn clear(&self) {
        self.senders.lock().unwrap().clear();
    }

    /// Await readiness, optionally bounded by `deadline`. Returns
    /// [`SynchronizerError::ReadyTimeout`] if the deadline elapses first.
    pub async fn wait_until_ready(
        &self,
        doc_id: &DocumentId,
        deadline: Option<Duration>,
    ) -> Result<(), SynchronizerError> {
        let mut receiver = self.sender_for(doc_id).subscribe();
        if *receiver.borrow() {
            return Ok(());
        }
        let wait = receiver.wait_for(|ready| *ready);
        match deadline {
            Some(duration) => timeout(duration, wait)
                .await
                .map_err(|_| SynchronizerError::ReadyTimeout(doc_id.clone()))?
                .map(|_| ())
                .map_err(|_| SynchronizerError::ReadyTimeout(doc_id.clone())),
            None => wait.await.map(|_| ()).map_err(|_| SynchronizerError::ReadyTimeout(doc_id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_is_ready_with_no_storage_channels() {
        let tracker = DocReadyTracker::default();
        assert!(tracker.is_ready());
    }

    #[test]
    fn tracker_is_not_ready_until_every_tracked_channel_settles() {
        let mut tracker = DocReadyTracker::default();
        tracker.track(ChannelIdStub::a());
        tracker.track(ChannelIdStub::b());
        assert!(!tracker.is_ready());
        tracker.record(ChannelIdStub::a(), ReadyStatus::RespondedWithData);
        assert!(!tracker.is_ready());
        tracker.record(ChannelIdStub::b(), ReadyStatus::RespondedWithNoData);
        assert!(tracker.is_ready());
    }

    struct ChannelIdStub;
    impl ChannelIdStub {
        fn a() -> ChannelId {
            crate::ids::ChannelIdAllocator::default().next()
        }
        fn b() -> ChannelId {
            let allocator = crate::ids::ChannelIdAllocator::default();
            allocator.next();
            allocator.next()
        }
    }

    #[test]
    fn gate_defaults_to_not_ready() {
        let gate = ReadyGate::default();
        let doc = DocumentId::new("doc-1");
        assert!(!gate.is_ready(&doc));
    }

    #[tokio::test]
    async fn gate_wakes_waiter_once_set_ready() {
        let gate = ReadyGate::default();
        let doc = DocumentId::new("doc-1");
        gate.set(&doc, true);
        gate.wait_until_ready(&doc, Some(Duration::from_millis(50)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gate_times_out_when_never_set_ready() {
        let gate = ReadyGate::default();
        let doc = DocumentId::new("doc-1");
        let result = gate
            .wait_until_ready(&doc, Some(Duration::from_millis(10)))
            .await;
        assert!(result.is_err());
    }
}
