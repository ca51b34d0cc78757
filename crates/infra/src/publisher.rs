//! Durable append of events to the well-known streams.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use geotrack_events::streams::{
    POSITION_EVENTS, PROXIMITY_EVENTS, SECTOR_EVENTS, WELL_KNOWN_GROUPS, WELL_KNOWN_STREAMS,
};
use geotrack_events::{Event, WireError, wire};

use crate::metrics::PipelineMetrics;
use crate::stream_log::{LogError, StreamLog};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event {event_id} was already published as {stream_id}")]
    AlreadyPublished { event_id: String, stream_id: String },

    #[error("failed to encode event: {0}")]
    Encode(#[from] WireError),

    #[error("failed to append to {stream}: {source}")]
    Append {
        stream: String,
        #[source]
        source: LogError,
    },

    #[error("failed to initialize group {group} on {stream}: {source}")]
    Initialize {
        stream: String,
        group: String,
        #[source]
        source: LogError,
    },
}

/// Appends events to a [`StreamLog`].
///
/// Holds no state beyond the log handle and the shared counters; cheap to clone.
#[derive(Debug)]
pub struct EventPublisher<L> {
    log: Arc<L>,
    metrics: Arc<PipelineMetrics>,
}

impl<L> Clone for EventPublisher<L> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<L: StreamLog> EventPublisher<L> {
    pub fn new(log: Arc<L>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { log, metrics }
    }

    /// Append `event` to `stream`.
    ///
    /// Assigns an id if the event has none. On success the event carries the
    /// log-assigned stream id; on failure its stream id stays unset.
    #[instrument(
        skip(self, event),
        fields(event_type = %event.event_type(), user_id = %event.user_id()),
        err
    )]
    pub async fn publish(&self, stream: &str, event: &mut Event) -> Result<(), PublishError> {
        if let Some(stream_id) = event.stream_id() {
            return Err(PublishError::AlreadyPublished {
                event_id: event.id().to_string(),
                stream_id: stream_id.to_string(),
            });
        }

        event.ensure_id();
        let fields = wire::encode(event).inspect_err(|_| self.metrics.record_publish_failure())?;

        let stream_id = self.log.append(stream, &fields).await.map_err(|source| {
            self.metrics.record_publish_failure();
            PublishError::Append {
                stream: stream.to_string(),
                source,
            }
        })?;

        // Cannot fail: the stream id was checked unset above and `event` is borrowed mutably.
        if let Err(err) = event.mark_appended(stream_id.clone()) {
            warn!(error = %err, "stream id already set after append");
        }
        self.metrics.record_published();

        debug!(stream, event_id = event.id(), stream_id = %stream_id, "event published");
        Ok(())
    }

    pub async fn publish_position_changed(&self, event: &mut Event) -> Result<(), PublishError> {
        self.publish(POSITION_EVENTS, event).await
    }

    pub async fn publish_sector_changed(&self, event: &mut Event) -> Result<(), PublishError> {
        self.publish(SECTOR_EVENTS, event).await
    }

    pub async fn publish_proximity(&self, event: &mut Event) -> Result<(), PublishError> {
        self.publish(PROXIMITY_EVENTS, event).await
    }

    /// Ensure every well-known stream exists with every well-known group.
    ///
    /// Idempotent: groups that already exist are left untouched.
    pub async fn initialize_streams(&self) -> Result<(), PublishError> {
        for stream in WELL_KNOWN_STREAMS {
            for group in WELL_KNOWN_GROUPS {
                match self.log.create_group(stream, group).await {
                    Ok(()) => debug!(stream, group, "consumer group created"),
                    Err(LogError::GroupExists { .. }) => {}
                    Err(source) => {
                        return Err(PublishError::Initialize {
                            stream: stream.to_string(),
                            group: group.to_string(),
                            source,
                        });
                    }
                }
            }
        }

        info!(
            streams = WELL_KNOWN_STREAMS.len(),
            groups = WELL_KNOWN_GROUPS.len(),
            "event streams initialized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use geotrack_events::PositionChangedData;

    use super::*;
    use crate::stream_log::{GroupRead, InMemoryStreamLog, LogEntry};

    fn publisher() -> (EventPublisher<InMemoryStreamLog>, Arc<InMemoryStreamLog>) {
        let log = Arc::new(InMemoryStreamLog::new());
        (
            EventPublisher::new(log.clone(), Arc::new(PipelineMetrics::new())),
            log,
        )
    }

    fn event() -> Event {
        Event::position_changed(
            "user-1",
            "ctx",
            PositionChangedData {
                distance_moved: 12.0,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn publish_assigns_id_and_stream_id() {
        let (publisher, log) = publisher();
        let mut event = event();

        publisher.publish_position_changed(&mut event).await.unwrap();

        assert!(!event.id().is_empty());
        assert!(event.stream_id().is_some());
        assert_eq!(log.len(POSITION_EVENTS).await.unwrap(), 1);
        assert_eq!(publisher.metrics.snapshot().published, 1);
    }

    #[tokio::test]
    async fn republishing_is_rejected() {
        let (publisher, log) = publisher();
        let mut event = event();
        publisher.publish_sector_changed(&mut event).await.unwrap();

        let err = publisher.publish_sector_changed(&mut event).await.unwrap_err();
        assert!(matches!(err, PublishError::AlreadyPublished { .. }));
        assert_eq!(log.len(SECTOR_EVENTS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn initialize_streams_is_idempotent() {
        let (publisher, log) = publisher();
        publisher.initialize_streams().await.unwrap();
        publisher.initialize_streams().await.unwrap();

        for stream in WELL_KNOWN_STREAMS {
            for group in WELL_KNOWN_GROUPS {
                assert_eq!(log.pending_count(stream, group).await.unwrap(), 0);
            }
        }
    }

    #[tokio::test]
    async fn encode_failure_fails_only_that_publish() {
        let (publisher, log) = publisher();
        let mut broken = Event::position_changed(
            "user-1",
            "ctx",
            PositionChangedData {
                distance_moved: f64::NAN,
                ..Default::default()
            },
        );

        let err = publisher.publish_position_changed(&mut broken).await.unwrap_err();
        assert!(matches!(err, PublishError::Encode(WireError::EncodeData(_))));
        assert!(broken.stream_id().is_none());
        assert_eq!(log.len(POSITION_EVENTS).await.unwrap(), 0);
        assert_eq!(publisher.metrics.snapshot().publish_failures, 1);

        let mut fine = event();
        publisher.publish_position_changed(&mut fine).await.unwrap();
        assert_eq!(log.len(POSITION_EVENTS).await.unwrap(), 1);
    }

    struct RejectingLog;

    #[async_trait]
    impl StreamLog for RejectingLog {
        async fn append(&self, _: &str, _: &[(&str, String)]) -> Result<String, LogError> {
            Err(LogError::Connection("refused".into()))
        }
        async fn create_group(&self, _: &str, _: &str) -> Result<(), LogError> {
            Err(LogError::Connection("refused".into()))
        }
        async fn read_group(&self, _: &GroupRead<'_>) -> Result<Vec<LogEntry>, LogError> {
            Ok(vec![])
        }
        async fn ack(&self, _: &str, _: &str, _: &[String]) -> Result<u64, LogError> {
            Ok(0)
        }
        async fn len(&self, _: &str) -> Result<u64, LogError> {
            Ok(0)
        }
        async fn pending_count(&self, _: &str, _: &str) -> Result<u64, LogError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn append_failure_leaves_stream_id_unset() {
        let metrics = Arc::new(PipelineMetrics::new());
        let publisher = EventPublisher::new(Arc::new(RejectingLog), metrics.clone());
        let mut event = event();

        let err = publisher.publish_proximity(&mut event).await.unwrap_err();
        assert!(matches!(err, PublishError::Append { .. }));
        assert!(event.stream_id().is_none());
        assert_eq!(metrics.snapshot().publish_failures, 1);

        assert!(matches!(
            publisher.initialize_streams().await,
            Err(PublishError::Initialize { .. })
        ));
    }
}
