use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use geotrack_events::{Event, EventHandler, EventType, HandlerError};

use super::clock;

/// Live position pushed to realtime subscribers (websocket fan-out etc.).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    pub event_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sector: String,
    pub timestamp: DateTime<Utc>,
}

/// Broadcasts position changes to in-process subscribers.
///
/// Having no subscriber is not an error: the update is simply not seen. Slow
/// subscribers lag and lose the oldest updates.
#[derive(Debug, Clone)]
pub struct RealtimeHandler {
    updates: broadcast::Sender<PositionUpdate>,
}

impl RealtimeHandler {
    const NAME: &'static str = "realtime";

    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self { updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PositionUpdate> {
        self.updates.subscribe()
    }
}

#[async_trait]
impl EventHandler for RealtimeHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, event_type: EventType) -> bool {
        event_type == EventType::PositionChanged
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Some(data) = event.data().as_position_changed() else {
            return Err(HandlerError::Unsupported {
                handler: Self::NAME,
                event_type: event.event_type(),
            });
        };

        info!(
            user_id = event.user_id(),
            position = %format!("{:.6},{:.6}", data.new_lat, data.new_lng),
            sector = %data.new_sector,
            timestamp = %clock(event.timestamp()),
            "realtime: broadcasting position update"
        );

        let update = PositionUpdate {
            event_id: event.id().to_string(),
            user_id: event.user_id().to_string(),
            latitude: data.new_lat,
            longitude: data.new_lng,
            sector: data.new_sector.clone(),
            timestamp: event.timestamp(),
        };
        if self.updates.send(update).is_err() {
            debug!(user_id = event.user_id(), "no realtime subscribers");
        }
        Ok(())
    }
}
