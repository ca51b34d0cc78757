//! Publishes the events that follow a committed position write.

use std::sync::Arc;

use tracing::{error, info};

use geotrack_core::{Coordinate, DomainResult, Sector};
use geotrack_events::{Event, PositionChangedData, SectorChangedData, SectorTransition};

use crate::publisher::{EventPublisher, PublishError};
use crate::stream_log::StreamLog;

/// A user's position write, as seen by the event layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionChange {
    pub user_id: String,
    /// Correlation id of the request that saved the position.
    pub context_id: String,
    pub position_id: String,
    /// `None` for the user's first position.
    pub previous: Option<Coordinate>,
    pub current: Coordinate,
    /// Users in the new sector, this one included.
    pub users_in_sector: u32,
}

/// One event that could not be published.
#[derive(Debug)]
pub struct PublishFailure {
    pub event: Event,
    pub error: PublishError,
}

/// Outcome of [`PositionTracker::track`]. Failures never undo the position write.
#[derive(Debug, Default)]
pub struct TrackReport {
    pub published: Vec<Event>,
    pub failed: Vec<PublishFailure>,
}

impl TrackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turns position writes into position and sector events.
#[derive(Debug)]
pub struct PositionTracker<L> {
    publisher: EventPublisher<L>,
}

impl<L> Clone for PositionTracker<L> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
        }
    }
}

impl<L: StreamLog> PositionTracker<L> {
    pub fn new(publisher: EventPublisher<L>) -> Self {
        Self { publisher }
    }

    /// Publish `position.changed`, plus `sector.user_left` / `sector.user_entered`
    /// when the move crossed a sector boundary.
    ///
    /// Fails only if a coordinate is outside the sector grid, before anything
    /// is published. Publish errors are logged and collected in the report.
    pub async fn track(&self, change: &PositionChange) -> DomainResult<TrackReport> {
        let data = PositionChangedData::between(
            change.position_id.as_str(),
            change.previous.as_ref(),
            &change.current,
        )?;
        let sector_changed = data.sector_changed();

        let mut pending = vec![(
            Event::position_changed(change.user_id.as_str(), change.context_id.as_str(), data),
            Stream::Position,
        )];

        if sector_changed {
            if let Some(previous) = &change.previous {
                let left = Sector::from_coordinate(previous)?;
                pending.push((
                    Event::sector_changed(
                        change.user_id.as_str(),
                        change.context_id.as_str(),
                        SectorTransition::Left,
                        SectorChangedData::at(&left, previous, 0),
                    ),
                    Stream::Sector,
                ));
            }

            let entered = Sector::from_coordinate(&change.current)?;
            pending.push((
                Event::sector_changed(
                    change.user_id.as_str(),
                    change.context_id.as_str(),
                    SectorTransition::Entered,
                    SectorChangedData::at(&entered, &change.current, change.users_in_sector),
                ),
                Stream::Sector,
            ));
        }

        let mut report = TrackReport::default();
        for (mut event, stream) in pending {
            let published = match stream {
                Stream::Position => self.publisher.publish_position_changed(&mut event).await,
                Stream::Sector => self.publisher.publish_sector_changed(&mut event).await,
            };

            match published {
                Ok(()) => report.published.push(event),
                Err(err) => {
                    error!(
                        user_id = %change.user_id,
                        position_id = %change.position_id,
                        event_type = %event.event_type(),
                        error = %err,
                        "failed to publish position event"
                    );
                    report.failed.push(PublishFailure { event, error: err });
                }
            }
        }

        info!(
            user_id = %change.user_id,
            position_id = %change.position_id,
            published = report.published.len(),
            failed = report.failed.len(),
            "position events published"
        );
        Ok(report)
    }
}

impl<L: StreamLog> From<Arc<L>> for PositionTracker<L> {
    fn from(log: Arc<L>) -> Self {
        Self::new(EventPublisher::new(log, Default::default()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Position,
    Sector,
}

#[cfg(test)]
mod tests {
    use geotrack_events::EventType;
    use geotrack_events::streams::{POSITION_EVENTS, SECTOR_EVENTS};

    use super::*;
    use crate::stream_log::InMemoryStreamLog;

    fn change(previous: Option<(f64, f64)>, current: (f64, f64)) -> PositionChange {
        PositionChange {
            user_id: "user-1".into(),
            context_id: "req-1".into(),
            position_id: "pos-1".into(),
            previous: previous.map(|(lat, lng)| Coordinate::new(lat, lng).unwrap()),
            current: Coordinate::new(current.0, current.1).unwrap(),
            users_in_sector: 2,
        }
    }

    #[tokio::test]
    async fn first_position_publishes_only_the_position_event() {
        let log = Arc::new(InMemoryStreamLog::new());
        let tracker = PositionTracker::from(log.clone());

        let report = tracker.track(&change(None, (0.0, 0.0))).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.published.len(), 1);
        assert_eq!(log.len(POSITION_EVENTS).await.unwrap(), 1);
        assert_eq!(log.len(SECTOR_EVENTS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn crossing_a_sector_publishes_left_then_entered() {
        let log = Arc::new(InMemoryStreamLog::new());
        let tracker = PositionTracker::from(log.clone());

        let report = tracker
            .track(&change(Some((0.0, 0.0)), (0.0018, 0.0)))
            .await
            .unwrap();

        let types: Vec<EventType> = report.published.iter().map(Event::event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::PositionChanged,
                EventType::UserLeftSector,
                EventType::UserEnteredSector
            ]
        );
        assert_eq!(log.len(SECTOR_EVENTS).await.unwrap(), 2);

        let entered = report.published[2].data().as_sector_changed().unwrap();
        assert_eq!(entered.sector_id, "sector_0_2");
        assert_eq!(entered.users_in_sector, 2);
        assert!(report.published.iter().all(|e| e.stream_id().is_some()));
    }

    #[tokio::test]
    async fn moving_within_a_sector_publishes_no_sector_events() {
        let log = Arc::new(InMemoryStreamLog::new());
        let tracker = PositionTracker::from(log.clone());

        tracker
            .track(&change(Some((0.0, 0.0)), (0.0001, 0.0001)))
            .await
            .unwrap();
        assert_eq!(log.len(SECTOR_EVENTS).await.unwrap(), 0);
    }
}
