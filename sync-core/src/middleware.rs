use sync_wire::Message;

use crate::ids::ChannelId;

/// A pre-dispatch hook consulted for every inbound message, batch members included (spec
/// §4.7). Returns the message to let it through — possibly rewritten into a different message —
/// or `None` to silently drop it: it never reaches the reducer, and the channel it arrived on is
/// otherwise unaffected.
///
/// Implementations must not panic on messages they don't understand; a middleware that panics
/// is treated the same as one that returns `None`; with the optional diagnostic hook, if one is
/// configured, recording why.
pub trait Middleware: Send + Sync {
    fn process(&self, channel_id: ChannelId, message: Message) -> Option<Message>;
}

/// Ordered chain of [`Middleware`]. A batch is unwrapped to its members before this chain sees
/// them, so middleware never has to special-case `Message::Batch` itself; each original
/// sub-message is filtered (and possibly rewritten) independently and surviving ones are
/// re-batched by the caller.
#[derive(Default)]
pub struct MiddlewareChain {
    stages: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn push(&mut self, middleware: Box<dyn Middleware>) {
        self.stages.push(middleware);
    }

    /// Run `message` through every stage in order, threading each stage's (possibly rewritten)
    /// output into the next. Returns `None` if any stage rejects it; a panicking stage is caught
    /// and treated as a rejection, with `on_dropped` invoked once per panic or rejection so a
    /// host application can log or count it without the drop becoming an error the caller has to
    /// handle.
    pub fn apply(
        &self,
        channel_id: ChannelId,
        message: Message,
        mut on_dropped: impl FnMut(&str),
    ) -> Option<Message> {
        let mut current = message;
        for stage in &self.stages {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                stage.process(channel_id, current)
            }));
            match outcome {
                Ok(Some(rewritten)) => current = rewritten,
                Ok(None) => {
                    on_dropped("middleware stage rejected message");
                    return None;
                }
                Err(_) => {
                    on_dropped("middleware stage panicked; message dropped");
                    return None;
                }
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_wire::DocumentId;

    struct RejectEverything;
    impl Middleware for RejectEverything {
        fn process(&self, _channel_id: ChannelId, _message: Message) -> Option<Message> {
            None
        }
    }

    struct PanicsAlways;
    impl Middleware for PanicsAlways {
        fn process(&self, _channel_id: ChannelId, _message: Message) -> Option<Message> {
            panic!("boom");
        }
    }

    struct RewritesDeletesToDirectoryRequests;
    impl Middleware for RewritesDeletesToDirectoryRequests {
        fn process(&self, _channel_id: ChannelId, message: Message) -> Option<Message> {
            match message {
                Message::DeleteRequest { .. } => Some(Message::DirectoryRequest { doc_ids: None }),
                other => Some(other),
            }
        }
    }

    fn sample_message() -> Message {
        Message::DeleteRequest {
            doc_id: DocumentId::new("doc-1"),
        }
    }

    #[test]
    fn empty_chain_accepts_everything() {
        let chain = MiddlewareChain::default();
        let channel = crate::ids::ChannelIdAllocator::default().next();
        assert_eq!(chain.apply(channel, sample_message(), |_| {}), Some(sample_message()));
    }

    #[test]
    fn a_rejecting_stage_drops_the_message() {
        let mut chain = MiddlewareChain::default();
        chain.push(Box::new(RejectEverything));
        let channel = crate::ids::ChannelIdAllocator::default().next();
        assert_eq!(chain.apply(channel, sample_message(), |_| {}), None);
    }

    #[test]
    fn a_panicking_stage_is_treated_as_a_silent_drop() {
        let mut chain = MiddlewareChain::default();
        chain.push(Box::new(PanicsAlways));
        let channel = crate::ids::ChannelIdAllocator::default().next();
        let mut dropped_reason = None;
        assert_eq!(
            chain.apply(channel, sample_message(), |reason| {
                dropped_reason = Some(reason.to_string());
            }),
            None
        );
        assert!(dropped_reason.is_some());
    }

    #[test]
    fn a_stage_can_rewrite_the_message_it_passes_on() {
        let mut chain = MiddlewareChain::default();
        chain.push(Box::new(RewritesDeletesToDirectoryRequests));
        let channel = crate::ids::ChannelIdAllocator::default().next();
        let rewritten = chain.apply(channel, sample_message(), |_| {}).unwrap();
        assert!(matches!(rewritten, Message::DirectoryRequest { doc_ids: None }));
    }
}
