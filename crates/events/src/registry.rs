//! Event type -> handlers routing table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::EventType;
use crate::handler::EventHandler;

/// Ordered handlers per event type.
///
/// The table is copy-on-write: cloning is cheap (one `Arc`), and `register`
/// on a clone that is shared with someone else copies the table first. A
/// worker that took a clone therefore keeps a frozen snapshot, and handlers
/// registered afterwards never reach it. Register everything before
/// subscriptions start.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    table: Arc<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `event_type`. Returns the new list length.
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> usize {
        let handlers = Arc::make_mut(&mut self.table).entry(event_type).or_default();
        handlers.push(handler);
        handlers.len()
    }

    /// Handlers for `event_type`, in registration order (empty if none).
    pub fn handlers_for(&self, event_type: EventType) -> &[Arc<dyn EventHandler>] {
        self.table
            .get(&event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers_for(event_type).len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.values().all(Vec::is_empty)
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (event_type, handlers) in self.table.iter() {
            let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
            map.entry(event_type, &names);
        }
        map.finish()
    }
}
