use std::sync::{Arc, Weak};

use sync_core::{Adapter, Channel, ChannelId, ChannelKind, ChannelSendError, Synchronizer};
use sync_crdt::CrdtDocument;
use sync_wire::Message;
use tokio::sync::mpsc;

/// Adapter tag shared by every channel [`connect`] creates.
pub const ADAPTER_TYPE: &str = "in-process-bridge";

/// Marker adapter registered with a synchronizer before any [`BridgeChannel`] is added to it.
/// Carries no state of its own; the actual wiring between two synchronizers lives in the
/// channel pair [`connect`] returns.
#[derive(Debug, Default)]
pub struct BridgeAdapter;

impl Adapter for BridgeAdapter {
    fn adapter_type(&self) -> &str {
        ADAPTER_TYPE
    }
}

/// One end of an in-process network link between two synchronizers in the same process.
///
/// `send` hands the message to an unbounded channel rather than calling the peer synchronously:
/// delivery happens on a background task, so this exercises the same `channel_receive` entry
/// point a real transport would, including the peer's dispatch possibly running on a different
/// task than the sender's.
pub struct BridgeChannel {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Channel for BridgeChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Network
    }

    fn adapter_type(&self) -> &str {
        ADAPTER_TYPE
    }

    fn send(&self, message: Message) -> Result<(), ChannelSendError> {
        self.outbound
            .send(message)
            .map_err(|_| ChannelSendError("bridge peer has shut down".to_string()))
    }
}

/// Wire two synchronizers together over an in-process bridge: registers [`BridgeAdapter`] on
/// both (if not already registered) and adds one [`BridgeChannel`] to each, returning their
/// channel ids. Neither side is established yet; call `channel_establish` on both to run the
/// handshake (spec §4.2's pending-until-established rule).
pub fn connect<D: CrdtDocument>(
    a: &Arc<Synchronizer<D>>,
    b: &Arc<Synchronizer<D>>,
    a_channel_id: ChannelId,
    b_channel_id: ChannelId,
) -> anyhow::Result<()> {
    let (a_tx, mut a_rx) = mpsc::unbounded_channel::<Message>();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel::<Message>();

    if !a.has_adapter(ADAPTER_TYPE) {
        a.add_adapter(Arc::new(BridgeAdapter))?;
    }
    if !b.has_adapter(ADAPTER_TYPE) {
        b.add_adapter(Arc::new(BridgeAdapter))?;
    }

    a.channel_added(Arc::new(BridgeChannel { id: a_channel_id, outbound: a_tx }))?;
    b.channel_added(Arc::new(BridgeChannel { id: b_channel_id, outbound: b_tx }))?;

    let b_weak: Weak<Synchronizer<D>> = Arc::downgrade(b);
    tokio::spawn(async move {
        while let Some(message) = a_rx.recv().await {
            let Some(b) = b_weak.upgrade() else { break };
            b.channel_receive(b_channel_id, message);
        }
    });

    let a_weak: Weak<Synchronizer<D>> = Arc::downgrade(a);
    tokio::spawn(async move {
        while let Some(message) = b_rx.recv().await {
            let Some(a) = a_weak.upgrade() else { break };
            a.channel_receive(a_channel_id, message);
        }
    });

    Ok(())
}
