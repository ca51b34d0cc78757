use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use geotrack_events::{Event, EventHandler, EventType, HandlerError};

use super::clock;

/// Moves shorter than this (metres) do not trigger a push notification.
pub const PUSH_DISTANCE_THRESHOLD_M: f64 = 100.0;

/// Something the notification handler decided to tell someone.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Push to the user who moved.
    Push { user_id: String, message: String },
    /// Tell the other users in a sector that someone arrived.
    SectorArrival {
        sector_id: String,
        user_id: String,
        total_users: u32,
    },
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery channel for notifications (push service, websocket fan-out, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Push { user_id, message } => {
                info!(user_id = %user_id, message = %message, "sending push notification");
            }
            Notification::SectorArrival {
                sector_id,
                user_id,
                total_users,
            } => {
                info!(
                    sector_id = %sector_id,
                    user_id = %user_id,
                    total_users,
                    "notifying other users in sector"
                );
            }
        }
        Ok(())
    }
}

pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationHandler {
    const NAME: &'static str = "notification";

    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    async fn position_changed(&self, event: &Event) -> Result<(), HandlerError> {
        let data = event
            .data()
            .as_position_changed()
            .ok_or_else(|| HandlerError::failed(Self::NAME, "expected a position payload"))?;

        info!(
            user_id = event.user_id(),
            event_id = event.id(),
            new_position = %format!("{:.6},{:.6}", data.new_lat, data.new_lng),
            distance_moved_m = data.distance_moved,
            new_sector = %data.new_sector,
            previous_sector = %data.previous_sector,
            timestamp = %clock(event.timestamp()),
            "position changed notification"
        );

        if data.distance_moved > PUSH_DISTANCE_THRESHOLD_M {
            let message = format!(
                "You moved {:.0}m to sector {}",
                data.distance_moved, data.new_sector
            );
            self.deliver(Notification::Push {
                user_id: event.user_id().to_string(),
                message,
            })
            .await?;
        }
        Ok(())
    }

    async fn user_entered_sector(&self, event: &Event) -> Result<(), HandlerError> {
        let data = event
            .data()
            .as_sector_changed()
            .ok_or_else(|| HandlerError::failed(Self::NAME, "expected a sector payload"))?;

        info!(
            user_id = event.user_id(),
            sector_id = %data.sector_id,
            users_in_sector = data.users_in_sector,
            timestamp = %clock(event.timestamp()),
            "user entered sector notification"
        );

        if data.users_in_sector > 1 {
            self.deliver(Notification::SectorArrival {
                sector_id: data.sector_id.clone(),
                user_id: event.user_id().to_string(),
                total_users: data.users_in_sector,
            })
            .await?;
        }
        Ok(())
    }

    fn user_left_sector(&self, event: &Event) -> Result<(), HandlerError> {
        let sector_id = event
            .data()
            .as_sector_changed()
            .map(|d| d.sector_id.as_str())
            .unwrap_or_default();

        info!(
            user_id = event.user_id(),
            sector_id,
            timestamp = %clock(event.timestamp()),
            "user left sector notification"
        );
        Ok(())
    }

    async fn deliver(&self, notification: Notification) -> Result<(), HandlerError> {
        self.notifier
            .notify(notification)
            .await
            .map_err(|e| HandlerError::failed(Self::NAME, e.to_string()))
    }
}

impl Default for NotificationHandler {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::PositionChanged | EventType::UserEnteredSector | EventType::UserLeftSector
        )
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        match event.event_type() {
            EventType::PositionChanged => self.position_changed(event).await,
            EventType::UserEnteredSector => self.user_entered_sector(event).await,
            EventType::UserLeftSector => self.user_left_sector(event),
            other => Err(HandlerError::Unsupported {
                handler: Self::NAME,
                event_type: other,
            }),
        }
    }
}

/// Notifier that records what it was asked to send.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use geotrack_events::{
        PositionChangedData, ProximityData, SectorChangedData, SectorTransition,
    };

    use super::*;

    fn handler() -> (NotificationHandler, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (NotificationHandler::new(notifier.clone()), notifier)
    }

    fn moved(distance: f64) -> Event {
        Event::position_changed(
            "user-u",
            "ctx",
            PositionChangedData {
                new_sector: "sector_3_4".into(),
                distance_moved: distance,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn pushes_only_for_long_moves() {
        let (handler, notifier) = handler();

        handler.handle(&moved(150.0)).await.unwrap();
        handler.handle(&moved(50.0)).await.unwrap();
        handler.handle(&moved(100.0)).await.unwrap();

        assert_eq!(
            notifier.sent(),
            vec![Notification::Push {
                user_id: "user-u".into(),
                message: "You moved 150m to sector sector_3_4".into(),
            }]
        );
    }

    #[tokio::test]
    async fn sector_arrival_notifies_only_when_others_are_there() {
        let (handler, notifier) = handler();
        let entered = |users| {
            Event::sector_changed(
                "user-u",
                "ctx",
                SectorTransition::Entered,
                SectorChangedData {
                    sector_id: "sector_1_1".into(),
                    users_in_sector: users,
                    ..Default::default()
                },
            )
        };

        handler.handle(&entered(1)).await.unwrap();
        assert!(notifier.sent().is_empty());

        handler.handle(&entered(3)).await.unwrap();
        assert_eq!(
            notifier.sent(),
            vec![Notification::SectorArrival {
                sector_id: "sector_1_1".into(),
                user_id: "user-u".into(),
                total_users: 3,
            }]
        );
    }

    #[tokio::test]
    async fn leaving_a_sector_only_logs() {
        let (handler, notifier) = handler();
        let left = Event::sector_changed(
            "user-u",
            "ctx",
            SectorTransition::Left,
            SectorChangedData::default(),
        );

        handler.handle(&left).await.unwrap();
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn proximity_is_not_handled() {
        let (handler, _) = handler();
        assert!(!handler.can_handle(EventType::UserNearby));

        let err = handler
            .handle(&Event::user_nearby("u", "c", ProximityData::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unsupported { .. }));
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _: Notification) -> Result<(), NotifyError> {
            Err(NotifyError("push gateway down".into()))
        }
    }

    #[tokio::test]
    async fn delivery_failure_fails_the_handler() {
        let handler = NotificationHandler::new(Arc::new(FailingNotifier));
        let err = handler.handle(&moved(500.0)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed { .. }));
    }
}
