use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sync_crdt::CrdtDocument;
use sync_wire::{DocumentId, Message, PeerId, PeerIdentity};
use tokio::sync::broadcast;

use crate::adapter::{Adapter, AdapterManager};
use crate::batcher::OutboundBatcher;
use crate::channel::{Channel, ChannelState};
use crate::command::Command;
use crate::ephemeral::EphemeralStore;
use crate::event::Event;
use crate::events::{EventEmitter, SynchronizerEvent};
use crate::heartbeat::Heartbeat;
use crate::ids::ChannelId;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::model::Model;
use crate::permissions::{AllowAll, Permissions};
use crate::ready_state::{ReadyGate, ReadyRecord, ReadyStatus};
use crate::reducer::reduce;
use crate::workqueue::WorkQueue;
use crate::SynchronizerError;

/// Builds a [`Synchronizer`] (spec §6's `{identity, adapters[], permissions?, middleware?,
/// onUpdate?}` constructor).
///
/// `adapters[]` is not a builder field here: adapters are registered after construction via
/// [`Synchronizer::add_adapter`], since most adapters need a handle back to the synchronizer
/// they're feeding (the channel-added/receive entry points) which doesn't exist until the
/// synchronizer itself does. `onUpdate?` is [`Synchronizer::subscribe`].
pub struct SynchronizerBuilder<D: CrdtDocument> {
    identity: PeerIdentity,
    permissions: Box<dyn Permissions>,
    middleware: MiddlewareChain,
    heartbeat_interval: Duration,
    on_diagnostic: Option<Box<dyn Fn(&str) + Send + Sync>>,
    _marker: PhantomData<D>,
}

impl<D: CrdtDocument> SynchronizerBuilder<D> {
    fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            permissions: Box::new(AllowAll),
            middleware: MiddlewareChain::default(),
            heartbeat_interval: Duration::from_secs(10),
            on_diagnostic: None,
            _marker: PhantomData,
        }
    }

    pub fn permissions(mut self, permissions: impl Permissions + 'static) -> Self {
        self.permissions = Box::new(permissions);
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Heartbeat tick interval (spec's Open Question: a constructor parameter, not hard-coded).
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Diagnostic hook invoked whenever a message is silently dropped (middleware rejection,
    /// middleware panic, permission denial, malformed state) so embedders can observe it without
    /// the core surfacing it as an error (spec §7, Design Notes resolution 4).
    pub fn on_diagnostic(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_diagnostic = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Arc<Synchronizer<D>> {
        Arc::new(Synchronizer {
            model: Mutex::new(Model::new(self.identity)),
            permissions: self.permissions,
            middleware: self.middleware,
            adapters: Mutex::new(AdapterManager::default()),
            batcher: Mutex::new(OutboundBatcher::default()),
            queue: WorkQueue::default(),
            events: EventEmitter::default(),
            ready: ReadyGate::default(),
            heartbeat: Heartbeat::default(),
            heartbeat_interval: self.heartbeat_interval,
            on_diagnostic: self.on_diagnostic,
        })
    }
}

/// The document synchronizer: the full event-driven state machine described in spec §2–§6,
/// assembled from the pure reducer plus the collaborators that give it somewhere to run
/// (adapters, an outbound batcher, an event emitter, a heartbeat timer).
///
/// One dispatch cycle runs to quiescence before its flush (spec §5); `WorkQueue` enforces that
/// under its own lock, so two channels calling in from different tasks at once are serialized
/// into the same cycle rather than racing — see [`crate::workqueue`].
pub struct Synchronizer<D: CrdtDocument> {
    model: Mutex<Model<D>>,
    permissions: Box<dyn Permissions>,
    middleware: MiddlewareChain,
    adapters: Mutex<AdapterManager>,
    batcher: Mutex<OutboundBatcher>,
    queue: WorkQueue<Event>,
    events: EventEmitter,
    ready: ReadyGate,
    heartbeat: Heartbeat,
    heartbeat_interval: Duration,
    on_diagnostic: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl<D: CrdtDocument> Synchronizer<D> {
    pub fn builder(identity: PeerIdentity) -> SynchronizerBuilder<D> {
        SynchronizerBuilder::new(identity)
    }

    pub fn with_defaults(identity: PeerIdentity) -> Arc<Self> {
        Self::builder(identity).build()
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.model.lock().unwrap().local_identity.clone()
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.model.lock().unwrap().local_peer_id()
    }

    // ---- adapter lifecycle (spec §6) ----

    pub fn add_adapter(&self, adapter: Arc<dyn Adapter>) -> Result<(), SynchronizerError> {
        self.adapters.lock().unwrap().register(adapter)
    }

    pub fn remove_adapter(&self, adapter_type: &str) {
        let channels = self.adapters.lock().unwrap().unregister(adapter_type);
        for channel in channels {
            channel.stop();
            self.dispatch(Event::ChannelRemoved { channel_id: channel.id() });
        }
    }

    pub fn has_adapter(&self, adapter_type: &str) -> bool {
        self.adapters.lock().unwrap().is_registered(adapter_type)
    }

    pub fn get_adapter(&self, adapter_type: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.lock().unwrap().get_adapter(adapter_type)
    }

    // ---- channel lifecycle: the four adapter-facing entry points (spec §4.2) ----

    pub fn channel_added(&self, channel: Arc<dyn Channel>) -> Result<(), SynchronizerError> {
        let channel_id = channel.id();
        let kind = channel.kind();
        let adapter_type = channel.adapter_type().to_string();
        self.adapters.lock().unwrap().add_channel(channel)?;
        self.dispatch(Event::ChannelAdded { channel_id, kind, adapter_type });
        Ok(())
    }

    pub fn channel_establish(&self, channel_id: ChannelId) {
        self.dispatch(Event::EstablishChannel { channel_id });
    }

    pub fn channel_removed(&self, channel_id: ChannelId) {
        self.adapters.lock().unwrap().remove_channel(channel_id);
        self.dispatch(Event::ChannelRemoved { channel_id });
    }

    pub fn channel_receive(&self, channel_id: ChannelId, message: Message) {
        if let Some(message) = self.apply_middleware(channel_id, message) {
            self.dispatch(Event::ChannelReceiveMessage { channel_id, message });
        }
    }

    /// Run `message` through the middleware chain, unwrapping and re-bundling a `channel/batch`
    /// so every middleware stage only ever sees (and can rewrite) individual messages (spec
    /// §4.7).
    fn apply_middleware(&self, channel_id: ChannelId, message: Message) -> Option<Message> {
        match message {
            Message::Batch { messages } => {
                let survivors: Vec<Message> = messages
                    .into_iter()
                    .filter_map(|inner| self.middleware_apply(channel_id, inner))
                    .collect();
                match survivors.len() {
                    0 => None,
                    1 => survivors.into_iter().next(),
                    _ => Some(Message::Batch { messages: survivors }),
                }
            }
            other => self.middleware_apply(channel_id, other),
        }
    }

    fn middleware_apply(&self, channel_id: ChannelId, message: Message) -> Option<Message> {
        let on_diagnostic = &self.on_diagnostic;
        self.middleware.apply(channel_id, message, |reason| {
            tracing::debug!(%channel_id, reason, "middleware dropped message");
            if let Some(hook) = on_diagnostic {
                hook(reason);
            }
        })
    }

    // ---- local document lifecycle (spec §6) ----

    pub fn get_or_create_document_state(&self, doc_id: &DocumentId) -> Arc<D> {
        self.dispatch(Event::DocEnsure { doc_id: doc_id.clone() });
        self.model
            .lock()
            .unwrap()
            .docs
            .get(doc_id)
            .map(|doc| doc.doc.clone())
            .expect("just ensured")
    }

    pub fn get_document_state(&self, doc_id: &DocumentId) -> Option<Arc<D>> {
        self.model.lock().unwrap().docs.get(doc_id).map(|doc| doc.doc.clone())
    }

    /// Create (or ensure) a document and announce it to established peers, as opposed to
    /// `get_or_create_document_state`'s silent lazy materialization.
    pub fn new_document(&self, doc_id: DocumentId) -> Arc<D> {
        self.dispatch(Event::DocNew { doc_id: doc_id.clone() });
        self.model
            .lock()
            .unwrap()
            .docs
            .get(&doc_id)
            .map(|doc| doc.doc.clone())
            .expect("just ensured")
    }

    pub fn remove_document(&self, doc_id: &DocumentId) {
        self.dispatch(Event::DocDelete { doc_id: doc_id.clone() });
    }

    // ---- heartbeat (spec §5, §9) ----

    pub fn start_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.heartbeat.start(self.heartbeat_interval, move || {
            if let Some(sync) = weak.upgrade() {
                sync.dispatch(Event::Heartbeat);
            }
        });
    }

    pub fn stop_heartbeat(&self) {
        self.heartbeat.stop();
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    // ---- peers, ready state (spec §6) ----

    pub fn get_peers(&self) -> Vec<PeerIdentity> {
        self.model
            .lock()
            .unwrap()
            .peers
            .values()
            .filter_map(|peer| peer.identity.clone())
            .collect()
    }

    pub fn get_ready_states(&self, doc_id: &DocumentId) -> Vec<ReadyRecord> {
        let model = self.model.lock().unwrap();
        let Some(doc) = model.docs.get(doc_id) else {
            return Vec::new();
        };
        doc.ready
            .entries()
            .map(|(channel_id, status)| {
                let peer_id = model.channels.get(&channel_id).and_then(|record| match record.state {
                    ChannelState::Established { peer_id } => peer_id,
                    ChannelState::Pending => None,
                });
                ReadyRecord { channel_id, peer_id, status }
            })
            .collect()
    }

    /// Await `predicate` becoming true of a document's ready states, re-checking it every time
    /// readiness is recomputed. Returns immediately if already true. `deadline` bounds the wait
    /// without touching model state on expiry (spec §5).
    pub async fn wait_until_ready(
        &self,
        doc_id: &DocumentId,
        mut predicate: impl FnMut(&[ReadyRecord]) -> bool,
        deadline: Option<Duration>,
    ) -> Result<(), SynchronizerError> {
        if predicate(&self.get_ready_states(doc_id)) {
            return Ok(());
        }
        let mut receiver = self.ready.subscribe(doc_id);
        let wait = async {
            loop {
                if receiver.changed().await.is_err() {
                    return;
                }
                if predicate(&self.get_ready_states(doc_id)) {
                    return;
                }
            }
        };
        match deadline {
            Some(duration) => tokio::time::timeout(duration, wait)
                .await
                .map_err(|_| SynchronizerError::ReadyTimeout(doc_id.clone())),
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    // ---- ephemeral (spec §6) ----

    pub fn get_or_create_namespaced_store(self: &Arc<Self>, doc_id: &DocumentId, namespace: &str) -> Arc<dyn EphemeralStore> {
        let local_peer_id = self.local_peer_id();
        let mut model = self.model.lock().unwrap();
        let existed = model.ephemeral.get(doc_id, namespace).is_some();
        let store = model.ephemeral.get_or_create_default(local_peer_id, doc_id, namespace);
        drop(model);
        if !existed {
            self.wire_local_change_notifications(doc_id.clone(), namespace.to_string(), &store);
        }
        store
    }

    pub fn register_external_store(
        self: &Arc<Self>,
        doc_id: DocumentId,
        namespace: impl Into<String>,
        store: Arc<dyn EphemeralStore>,
    ) -> Result<(), SynchronizerError> {
        let namespace = namespace.into();
        {
            let mut model = self.model.lock().unwrap();
            if model.ephemeral.get(&doc_id, &namespace).is_some() {
                return Err(SynchronizerError::DuplicateEphemeralStore(doc_id, namespace));
            }
            model.ephemeral.register_external(doc_id.clone(), namespace.clone(), store.clone());
        }
        self.wire_local_change_notifications(doc_id, namespace, &store);
        Ok(())
    }

    pub fn broadcast_namespaced_store(&self, doc_id: &DocumentId, namespace: &str) {
        self.dispatch(Event::EphemeralLocalChange {
            doc_id: doc_id.clone(),
            namespace: namespace.to_string(),
        });
    }

    fn wire_local_change_notifications(self: &Arc<Self>, doc_id: DocumentId, namespace: String, store: &Arc<dyn EphemeralStore>) {
        let weak = Arc::downgrade(self);
        store.subscribe_local_updates(Box::new(move || {
            if let Some(sync) = weak.upgrade() {
                sync.dispatch(Event::EphemeralLocalChange {
                    doc_id: doc_id.clone(),
                    namespace: namespace.clone(),
                });
            }
        }));
    }

    // ---- events (spec §6) ----

    pub fn subscribe(&self) -> broadcast::Receiver<SynchronizerEvent> {
        self.events.subscribe()
    }

    // ---- reset (spec §7's only terminal operation) ----

    /// Reinitialize the model and clear every adapter's channel set. Adapters themselves stay
    /// registered; their channels are dropped and stopped, exactly as spec §7 describes.
    pub fn reset(&self) {
        let local_identity = self.model.lock().unwrap().local_identity.clone();
        *self.model.lock().unwrap() = Model::new(local_identity);
        self.batcher.lock().unwrap().flush();
        self.ready.clear();
        for channel in self.adapters.lock().unwrap().clear_channels() {
            channel.stop();
        }
    }

    // ---- dispatch / command execution ----

    fn dispatch(&self, event: Event) {
        self.queue.dispatch(
            event,
            |event| self.process(event),
            || self.flush(),
        );
    }

    fn process(&self, event: Event) {
        let commands = {
            let mut model = self.model.lock().unwrap();
            reduce(&mut model, event, self.permissions.as_ref())
        };
        for command in commands {
            self.execute_command(command);
        }
    }

    fn execute_command(&self, command: Command) {
        match command {
            Command::Send { channel_id, message } => {
                self.batcher.lock().unwrap().queue(channel_id, message);
            }
            Command::StopChannel { channel_id } => {
                if let Some(channel) = self.adapters.lock().unwrap().remove_channel(channel_id) {
                    channel.stop();
                }
                // Routine model cleanup (removing the peer/doc bookkeeping) follows the same
                // path as an adapter-reported removal, so it only has to live in one place.
                self.dispatch(Event::ChannelRemoved { channel_id });
            }
            Command::SetDocReady { doc_id, ready_states } => {
                let records: Vec<ReadyRecord> = {
                    let model = self.model.lock().unwrap();
                    ready_states
                        .into_iter()
                        .map(|(channel_id, status)| {
                            let peer_id = model.channels.get(&channel_id).and_then(|record| match record.state {
                                ChannelState::Established { peer_id } => peer_id,
                                ChannelState::Pending => None,
                            });
                            ReadyRecord { channel_id, peer_id, status }
                        })
                        .collect()
                };
                let ready = records.iter().all(|record| record.status != ReadyStatus::Pending);
                self.ready.set(&doc_id, ready);
                self.events.emit(SynchronizerEvent::ReadyStateChanged { doc_id, ready_states: records });
            }
            Command::EmitPeerAdded { peer_id } => self.events.emit(SynchronizerEvent::PeerAdded(peer_id)),
            Command::EmitPeerRemoved { peer_id } => self.events.emit(SynchronizerEvent::PeerRemoved(peer_id)),
            Command::EmitDocAdded { doc_id } => self.events.emit(SynchronizerEvent::DocAdded(doc_id)),
            Command::EmitDocRemoved { doc_id } => {
                self.ready.set(&doc_id, false);
                self.events.emit(SynchronizerEvent::DocRemoved(doc_id));
            }
            Command::Diagnostic { message } => {
                tracing::warn!(%message, "synchronizer diagnostic");
                if let Some(hook) = &self.on_diagnostic {
                    hook(&message);
                }
            }
        }
    }

    /// Flush everything queued by this dispatch cycle to the wire, one frame per channel (spec
    /// §4.6, §5). Runs exactly once per quiescence point regardless of how many events were
    /// absorbed into the cycle.
    fn flush(&self) {
        let flushed = self.batcher.lock().unwrap().flush();
        if flushed.is_empty() {
            return;
        }
        let adapters = self.adapters.lock().unwrap();
        for (channel_id, message) in flushed {
            match adapters.get_channel(channel_id) {
                Some(channel) => {
                    if let Err(err) = channel.send(message) {
                        tracing::warn!(%channel_id, %err, "adapter rejected a flushed message");
                    }
                }
                None => {
                    tracing::warn!(%channel_id, "dropping flushed message for an unknown or removed channel");
                }
            }
        }
    }
}
