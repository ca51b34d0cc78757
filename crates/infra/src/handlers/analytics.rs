use async_trait::async_trait;
use tracing::info;

use geotrack_events::{Event, EventHandler, EventType, HandlerError};

use super::clock;

/// Records position-change metrics as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsHandler;

impl AnalyticsHandler {
    const NAME: &'static str = "analytics";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for AnalyticsHandler {
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
            distance_moved = data.distance_moved,
            sector_changed = data.sector_changed(),
            new_sector = %data.new_sector,
            timestamp = %clock(event.timestamp()),
            "analytics: position change"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use geotrack_events::{PositionChangedData, SectorChangedData, SectorTransition};

    use super::*;

    #[tokio::test]
    async fn tracks_position_changes_only() {
        let handler = AnalyticsHandler::new();
        assert!(handler.can_handle(EventType::PositionChanged));
        assert!(!handler.can_handle(EventType::UserEnteredSector));

        let moved = Event::position_changed("u", "c", PositionChangedData::default());
        handler.handle(&moved).await.unwrap();

        let entered = Event::sector_changed(
            "u",
            "c",
            SectorTransition::Entered,
            SectorChangedData::default(),
        );
        assert!(handler.handle(&entered).await.is_err());
    }
}
