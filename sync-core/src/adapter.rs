use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::channel::Channel;
use crate::ids::ChannelId;
use crate::SynchronizerError;

/// A registered transport adapter, identified by a stable type tag (spec §4.2).
///
/// The synchronizer never calls into an adapter directly beyond this marker: adapters push
/// channel lifecycle and inbound messages into the synchronizer through its four adapter-facing
/// entry points, and the synchronizer's only outbound path back is a channel's own `send`. This
/// trait exists so `addAdapter`/`getAdapter` have something concrete to register and return.
pub trait Adapter: Send + Sync + 'static {
    fn adapter_type(&self) -> &str;
}

/// Tracks which channels belong to which adapter, so that removing an adapter removes every
/// channel it owns (spec §4.2). The synchronizer has no other notion of "adapter" beyond this
/// bookkeeping.
#[derive(Default)]
pub struct AdapterManager {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    channels: HashMap<ChannelId, Arc<dyn Channel>>,
    by_adapter: HashMap<String, HashSet<ChannelId>>,
}

impl AdapterManager {
    /// Register an adapter. Registering a type that is already registered is caller misuse
    /// (spec §7), not an idempotent no-op: it almost always means two independent adapter
    /// instances accidentally share a name, and channels would otherwise become ambiguous as to
    /// which adapter owns them.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Result<(), SynchronizerError> {
        let adapter_type = adapter.adapter_type().to_string();
        if self.adapters.contains_key(&adapter_type) {
            return Err(SynchronizerError::DuplicateAdapter(adapter_type));
        }
        self.by_adapter.entry(adapter_type.clone()).or_default();
        self.adapters.insert(adapter_type, adapter);
        Ok(())
    }

    /// Unregister an adapter type and every channel it owns. Idempotent: removing an adapter
    /// that was never registered, or already removed, is a no-op and returns the empty list.
    pub fn unregister(&mut self, adapter_type: &str) -> Vec<Arc<dyn Channel>> {
        self.adapters.remove(adapter_type);
        let Some(channel_ids) = self.by_adapter.remove(adapter_type) else {
            return Vec::new();
        };
        channel_ids
            .into_iter()
            .filter_map(|id| self.channels.remove(&id))
            .collect()
    }

    pub fn is_registered(&self, adapter_type: &str) -> bool {
        self.adapters.contains_key(adapter_type)
    }

    pub fn get_adapter(&self, adapter_type: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(adapter_type).cloned()
    }

    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) -> Result<(), SynchronizerError> {
        let adapter_type = channel.adapter_type().to_string();
        if !self.adapters.contains_key(&adapter_type) {
            return Err(SynchronizerError::UnregisteredAdapterChannel(channel.id()));
        }
        let id = channel.id();
        self.by_adapter.entry(adapter_type).or_default().insert(id);
        self.channels.insert(id, channel);
        Ok(())
    }

    /// Remove a single channel (routine teardown reported by its adapter), independent of
    /// removing the whole adapter.
    pub fn remove_channel(&mut self, channel_id: ChannelId) -> Option<Arc<dyn Channel>> {
        let channel = self.channels.remove(&channel_id)?;
        if let Some(set) = self.by_adapter.get_mut(channel.adapter_type()) {
            set.remove(&channel_id);
        }
        Some(channel)
    }

    pub fn get_channel(&self, channel_id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels.get(&channel_id).cloned()
    }

    /// Drop every tracked channel, keeping adapters registered. Used by `Synchronizer::reset`
    /// (spec §7's only terminal operation): the adapters themselves stay registered, but their
    /// channel sets are cleared the way the spec describes.
    pub fn clear_channels(&mut self) -> Vec<Arc<dyn Channel>> {
        for set in self.by_adapter.values_mut() {
            set.clear();
        }
        self.channels.drain().map(|(_, channel)| channel).collect()
    }
}
