use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::Event;
use crate::event::EventType;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{handler} does not handle {event_type} events")]
    Unsupported {
        handler: &'static str,
        event_type: EventType,
    },

    #[error("{handler} failed: {reason}")]
    Failed {
        handler: &'static str,
        reason: String,
    },
}

impl HandlerError {
    pub fn failed(handler: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            handler,
            reason: reason.into(),
        }
    }
}

/// Processes one decoded event (handler abstraction).
///
/// Handlers are type-gated: the consumer only calls `handle` when
/// `can_handle(event.event_type())` holds. An `Err` withholds the
/// acknowledgment so the entry is redelivered to the same group; since
/// delivery is at-least-once, handlers must tolerate duplicates.
///
/// Handlers are shared across events and worker tasks, hence `Send + Sync`
/// and `&self`. They must not keep mutable per-event state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Pure predicate over the event type.
    fn can_handle(&self, event_type: EventType) -> bool;

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}
