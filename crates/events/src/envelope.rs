use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::event::EventType;
use crate::payload::{EventData, PositionChangedData, ProximityData, SectorChangedData};

/// `Metadata.Source` stamped by the factories.
pub const DEFAULT_SOURCE: &str = "position-api";

/// Payload schema version stamped by the factories.
pub const SCHEMA_VERSION: &str = "1.0";

/// Provenance of an event (not business data).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventMetadata {
    pub source: String,
    pub version: String,
    pub request_id: String,
}

impl EventMetadata {
    /// Metadata for events built by the position API.
    pub fn position_api() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            version: SCHEMA_VERSION.to_string(),
            request_id: String::new(),
        }
    }
}

/// Direction of a sector transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SectorTransition {
    Entered,
    Left,
}

impl SectorTransition {
    pub fn event_type(self) -> EventType {
        match self {
            SectorTransition::Entered => EventType::UserEnteredSector,
            SectorTransition::Left => EventType::UserLeftSector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("event type {event_type} does not carry a {payload} payload")]
    PayloadMismatch {
        event_type: EventType,
        payload: &'static str,
    },

    #[error("event {event_id} was already appended as {stream_id}")]
    AlreadyAppended { event_id: String, stream_id: String },
}

/// The unit of transport through the position event log.
///
/// Lifecycle:
/// - built by the business layer through one of the factories (no `id`, no `stream_id`)
/// - the publisher assigns `id` if empty and, after a successful append, the log-assigned `stream_id`
/// - a consumer decodes log entries back into an equivalent `Event` whose `stream_id`
///   is the entry's identifier
///
/// `stream_id` is set at most once; it is the acknowledgment key.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    event_type: EventType,
    stream_id: Option<String>,

    user_id: String,
    /// Correlation id of the business context that produced the event.
    context_id: String,

    /// When the event happened (not when it was appended).
    timestamp: DateTime<Utc>,

    data: EventData,
    metadata: EventMetadata,
}

impl Event {
    /// Build an event, rejecting a payload whose shape does not match `event_type`.
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        context_id: impl Into<String>,
        data: EventData,
    ) -> Result<Self, EnvelopeError> {
        if !data.accepts(event_type) {
            return Err(EnvelopeError::PayloadMismatch {
                event_type,
                payload: data.kind(),
            });
        }

        Ok(Self::unchecked(event_type, user_id.into(), context_id.into(), data))
    }

    fn unchecked(event_type: EventType, user_id: String, context_id: String, data: EventData) -> Self {
        Self {
            id: String::new(),
            event_type,
            stream_id: None,
            user_id,
            context_id,
            timestamp: Utc::now(),
            data,
            metadata: EventMetadata::position_api(),
        }
    }

    pub fn position_changed(
        user_id: impl Into<String>,
        context_id: impl Into<String>,
        data: PositionChangedData,
    ) -> Self {
        Self::unchecked(
            EventType::PositionChanged,
            user_id.into(),
            context_id.into(),
            EventData::PositionChanged(data),
        )
    }

    pub fn sector_changed(
        user_id: impl Into<String>,
        context_id: impl Into<String>,
        transition: SectorTransition,
        data: SectorChangedData,
    ) -> Self {
        Self::unchecked(
            transition.event_type(),
            user_id.into(),
            context_id.into(),
            EventData::SectorChanged(data),
        )
    }

    pub fn user_nearby(
        user_id: impl Into<String>,
        context_id: impl Into<String>,
        data: ProximityData,
    ) -> Self {
        Self::unchecked(
            EventType::UserNearby,
            user_id.into(),
            context_id.into(),
            EventData::Proximity(data),
        )
    }

    /// Rebuild an event read back from the log. The payload was decoded for `event_type`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_log(
        stream_id: String,
        id: String,
        event_type: EventType,
        user_id: String,
        context_id: String,
        timestamp: DateTime<Utc>,
        data: EventData,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            id,
            event_type,
            stream_id: Some(stream_id),
            user_id,
            context_id,
            timestamp,
            data,
            metadata,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.metadata.request_id = request_id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Log-assigned identifier; `None` until a successful append.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Assign a fresh id (UUIDv7) if none was set. Returns the id.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = Uuid::now_v7().to_string();
        }
        &self.id
    }

    /// Record the identifier the log assigned on append. Fails if one is already set.
    pub fn mark_appended(&mut self, stream_id: impl Into<String>) -> Result<(), EnvelopeError> {
        if let Some(existing) = &self.stream_id {
            return Err(EnvelopeError::AlreadyAppended {
                event_id: self.id.clone(),
                stream_id: existing.clone(),
            });
        }
        self.stream_id = Some(stream_id.into());
        Ok(())
    }
}
