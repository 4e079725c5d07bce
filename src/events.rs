//! Session lifecycle events for caller-supplied observability hooks

use std::sync::Arc;

/// Something that happened on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connecting { endpoint: String },
    HelloSent,
    HelloReceived {
        session_id: Option<u32>,
        capabilities: usize,
    },
    RequestSent { message_id: u64 },
    ReplyReceived { message_id: u64 },
    /// A reply arrived for a message-id nobody is waiting on
    UnmatchedReply { message_id: u64 },
    RequestTimedOut { message_id: u64 },
    Closed { reason: Option<String> },
}

/// Callback invoked synchronously for every [`SessionEvent`]
pub type EventHook = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

pub(crate) fn emit(hook: Option<&EventHook>, event: SessionEvent) {
    if let Some(hook) = hook {
        hook(&event);
    }
}
