use std::collections::HashMap;

use sync_wire::Message;

use crate::ids::ChannelId;

/// Coalesces everything queued for a channel within one quiescence window into a single
/// `channel/batch` frame (spec §4.6), or sends the lone message unwrapped if only one was
/// queued. Batching a single message into a one-element batch is valid (batch idempotence
/// property, tested in `sync-wire`) but wasteful on the wire, so this skips it when it can.
#[derive(Default)]
pub struct OutboundBatcher {
    pending: HashMap<ChannelId, Vec<Message>>,
}

impl OutboundBatcher {
    pub fn queue(&mut self, channel_id: ChannelId, message: Message) {
        self.pending.entry(channel_id).or_default().push(message);
    }

    /// Drain everything queued, one batch per channel, in first-queued order. Called exactly
    /// once per quiescence point.
    pub fn flush(&mut self) -> Vec<(ChannelId, Message)> {
        self.pending
            .drain()
            .map(|(channel_id, mut messages)| {
                let message = if messages.len() == 1 {
                    messages.remove(0)
                } else {
                    Message::Batch { messages }
                };
                (channel_id, message)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_wire::DocumentId;

    fn delete_request(tag: &str) -> Message {
        Message::DeleteRequest {
            doc_id: DocumentId::new(tag),
        }
    }

    #[test]
    fn single_queued_message_flushes_unwrapped() {
        let mut batcher = OutboundBatcher::default();
        let channel = crate::ids::ChannelIdAllocator::default().next();
        batcher.queue(channel, delete_request("a"));
        let flushed = batcher.flush();
        assert_eq!(flushed.len(), 1);
        assert!(!matches!(flushed[0].1, Message::Batch { .. }));
    }

    #[test]
    fn multiple_queued_messages_flush_as_one_batch_preserving_order() {
        let mut batcher = OutboundBatcher::default();
        let channel = crate::ids::ChannelIdAllocator::default().next();
        batcher.queue(channel, delete_request("a"));
        batcher.queue(channel, delete_request("b"));
        let flushed = batcher.flush();
        assert_eq!(flushed.len(), 1);
        match &flushed[0].1 {
            Message::Batch { messages } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0], delete_request("a"));
                assert_eq!(messages[1], delete_request("b"));
            }
            other => panic!("expected a batch, got {other:?}"),
        }
    }

    #[test]
    fn flush_drains_the_queue() {
        let mut batcher = OutboundBatcher::default();
        let channel = crate::ids::ChannelIdAllocator::default().next();
        batcher.queue(channel, delete_request("a"));
        batcher.flush();
        assert!(batcher.is_empty());
    }
}
