use std::collections::HashMap;
use std::sync::Mutex;

use sync_wire::PeerId;

/// One namespaced, per-document ephemeral data store (spec §4.4, §6).
///
/// Ephemeral stores hold transient, unpersisted, per-peer state (cursors, presence, awareness)
/// keyed by namespace within a document. The default implementation tracks each known peer's
/// last-seen encoded blob and the local peer's own key/value map; applications that already own
/// an ephemeral data structure (a Yjs-style awareness object, say) can implement this trait
/// directly over it instead and register it with `registerExternalStore`.
pub trait EphemeralStore: Send + Sync {
    /// Set a value under `key` in the local peer's portion of the store.
    fn set(&self, key: &str, value: Vec<u8>);
    /// Read a value previously set locally.
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    /// Remove a locally set value.
    fn delete(&self, key: &str);
    /// Every peer's last-known encoded state, including our own.
    fn get_all_states(&self) -> HashMap<PeerId, Vec<u8>>;
    /// Encode the local peer's current state for broadcast.
    fn encode_all(&self) -> Vec<u8>;
    /// Merge in a remote peer's encoded state.
    fn apply(&self, peer_id: PeerId, data: Vec<u8>);
    /// Register a callback fired whenever a local `set`/`delete` changes this store, so the
    /// synchronizer can schedule a broadcast (spec's ephemeral-local-change reducer message).
    fn subscribe_local_updates(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// Default, in-memory [`EphemeralStore`]. Plain `HashMap`s under a mutex; ephemeral data is by
/// definition not persisted and read/write volume is low (presence, cursors), so there is no
/// need for anything fancier.
pub struct InMemoryEphemeralStore {
    local_peer_id: PeerId,
    local: Mutex<HashMap<String, Vec<u8>>>,
    remote: Mutex<HashMap<PeerId, Vec<u8>>>,
    on_local_update: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl InMemoryEphemeralStore {
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            local: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            on_local_update: Mutex::new(None),
        }
    }

    fn notify_local_update(&self) {
        if let Some(callback) = self.on_local_update.lock().unwrap().as_ref() {
            callback();
        }
    }
}

impl EphemeralStore for InMemoryEphemeralStore {
    fn set(&self, key: &str, value: Vec<u8>) {
        self.local.lock().unwrap().insert(key.to_string(), value);
        self.notify_local_update();
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.local.lock().unwrap().get(key).cloned()
    }

    fn delete(&self, key: &str) {
        self.local.lock().unwrap().remove(key);
        self.notify_local_update();
    }

    fn get_all_states(&self) -> HashMap<PeerId, Vec<u8>> {
        let mut states = self.remote.lock().unwrap().clone();
        states.insert(self.local_peer_id, self.encode_all());
        states
    }

    fn encode_all(&self) -> Vec<u8> {
        let local = self.local.lock().unwrap();
        postcard::to_allocvec(&*local).expect("local ephemeral map always serializes")
    }

    fn apply(&self, peer_id: PeerId, data: Vec<u8>) {
        self.remote.lock().unwrap().insert(peer_id, data);
    }

    fn subscribe_local_updates(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.on_local_update.lock().unwrap() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_set_is_visible_in_all_states_under_our_own_peer_id() {
        let me = PeerId::from(1u64);
        let store = InMemoryEphemeralStore::new(me);
        store.set("cursor", vec![1, 2, 3]);
        let states = store.get_all_states();
        assert!(states.contains_key(&me));
    }

    #[test]
    fn applying_a_remote_peer_state_makes_it_visible() {
        let me = PeerId::from(1u64);
        let other = PeerId::from(2u64);
        let store = InMemoryEphemeralStore::new(me);
        store.apply(other, vec![9, 9]);
        let states = store.get_all_states();
        assert_eq!(states.get(&other), Some(&vec![9, 9]));
    }

    #[test]
    fn delete_removes_a_locally_set_key() {
        let me = PeerId::from(1u64);
        let store = InMemoryEphemeralStore::new(me);
        store.set("k", vec![1]);
        store.delete("k");
        assert_eq!(store.get("k"), None);
    }
}
