//! Layout of one log record.
//!
//! An event is stored as seven string fields. `data` and `metadata` are JSON
//! objects encoded as text; `timestamp` is RFC3339 with nanoseconds.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::envelope::{Event, EventMetadata};
use crate::event::EventType;
use crate::payload::EventData;

pub const FIELD_EVENT_ID: &str = "event_id";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_EVENT_CTX: &str = "event_ctx";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_DATA: &str = "data";
pub const FIELD_METADATA: &str = "metadata";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("event has no id")]
    MissingId,

    #[error("failed to encode event data: {0}")]
    EncodeData(#[source] serde_json::Error),

    #[error("failed to encode event metadata: {0}")]
    EncodeMetadata(#[source] serde_json::Error),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("unknown event type {0}")]
    UnknownType(String),

    #[error("invalid timestamp {value}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to decode event data: {0}")]
    DecodeData(#[source] serde_json::Error),

    #[error("failed to decode event metadata: {0}")]
    DecodeMetadata(#[source] serde_json::Error),
}

/// Encode an event into `(field, value)` pairs, in record order.
///
/// The event must already have an id.
pub fn encode(event: &Event) -> Result<Vec<(&'static str, String)>, WireError> {
    if event.id().is_empty() {
        return Err(WireError::MissingId);
    }

    let data = event.data().to_json().map_err(WireError::EncodeData)?;
    let metadata = serde_json::to_string(event.metadata()).map_err(WireError::EncodeMetadata)?;

    Ok(vec![
        (FIELD_EVENT_ID, event.id().to_string()),
        (FIELD_TYPE, event.event_type().as_str().to_string()),
        (FIELD_USER_ID, event.user_id().to_string()),
        (FIELD_EVENT_CTX, event.context_id().to_string()),
        (FIELD_TIMESTAMP, format_timestamp(event.timestamp())),
        (FIELD_DATA, data),
        (FIELD_METADATA, metadata),
    ])
}

/// Decode a log entry. `stream_id` is the entry's own identifier.
pub fn decode(stream_id: &str, fields: &HashMap<String, String>) -> Result<Event, WireError> {
    let id = field(fields, FIELD_EVENT_ID)?;
    let raw_type = field(fields, FIELD_TYPE)?;
    let user_id = field(fields, FIELD_USER_ID)?;
    let context_id = field(fields, FIELD_EVENT_CTX)?;
    let raw_timestamp = field(fields, FIELD_TIMESTAMP)?;
    let raw_data = field(fields, FIELD_DATA)?;
    let raw_metadata = field(fields, FIELD_METADATA)?;

    let event_type: EventType = raw_type
        .parse()
        .map_err(|_| WireError::UnknownType(raw_type.to_string()))?;

    let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
        .map_err(|source| WireError::InvalidTimestamp {
            value: raw_timestamp.to_string(),
            source,
        })?
        .with_timezone(&Utc);

    let data = EventData::from_json(event_type, raw_data).map_err(WireError::DecodeData)?;
    let metadata: EventMetadata =
        serde_json::from_str(raw_metadata).map_err(WireError::DecodeMetadata)?;

    Ok(Event::from_log(
        stream_id.to_string(),
        id.to_string(),
        event_type,
        user_id.to_string(),
        context_id.to_string(),
        timestamp,
        data,
        metadata,
    ))
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &'static str) -> Result<&'a str, WireError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(WireError::MissingField(name))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
