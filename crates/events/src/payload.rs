//! Typed event payloads.
//!
//! On the wire a payload is a flat JSON object (the `data` field of a record);
//! the record's `type` field says which struct it is. Decoding is lenient per
//! field: a missing or wrongly-typed field becomes its zero value instead of
//! failing the whole entry. Encoding is strict: a NaN or infinite float is
//! an error rather than a `null` that would decode back as zero.

use serde::de::{DeserializeOwned, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use geotrack_core::{Coordinate, DomainResult, Sector};

use crate::event::EventType;

/// Data of a `position.changed` event.
///
/// `previous_*` fields are zero/empty for a user's first position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionChangedData {
    #[serde(deserialize_with = "lenient")]
    pub position_id: String,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub previous_lat: f64,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub previous_lng: f64,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub new_lat: f64,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub new_lng: f64,
    #[serde(deserialize_with = "lenient")]
    pub previous_sector: String,
    #[serde(deserialize_with = "lenient")]
    pub new_sector: String,
    /// Metres between the previous and the new position.
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub distance_moved: f64,
}

impl PositionChangedData {
    /// Build the payload for a move from `previous` (if any) to `current`.
    ///
    /// Fails only if a position falls outside the sector grid.
    pub fn between(
        position_id: impl Into<String>,
        previous: Option<&Coordinate>,
        current: &Coordinate,
    ) -> DomainResult<Self> {
        let new_sector = Sector::from_coordinate(current)?;

        let mut data = Self {
            position_id: position_id.into(),
            new_lat: current.latitude(),
            new_lng: current.longitude(),
            new_sector: new_sector.id(),
            ..Self::default()
        };

        if let Some(prev) = previous {
            data.previous_lat = prev.latitude();
            data.previous_lng = prev.longitude();
            data.previous_sector = Sector::from_coordinate(prev)?.id();
            data.distance_moved = prev.distance_to(current);
        }

        Ok(data)
    }

    /// True when there was a previous sector and it differs from the new one.
    pub fn sector_changed(&self) -> bool {
        !self.previous_sector.is_empty() && self.previous_sector != self.new_sector
    }
}

/// Data of `sector.user_entered` / `sector.user_left` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorChangedData {
    #[serde(deserialize_with = "lenient")]
    pub sector_x: i64,
    #[serde(deserialize_with = "lenient")]
    pub sector_y: i64,
    /// e.g. `sector_100_200`
    #[serde(deserialize_with = "lenient")]
    pub sector_id: String,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub latitude: f64,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub longitude: f64,
    #[serde(deserialize_with = "lenient_count")]
    pub users_in_sector: u32,
}

impl SectorChangedData {
    pub fn at(sector: &Sector, coordinate: &Coordinate, users_in_sector: u32) -> Self {
        Self {
            sector_x: sector.x(),
            sector_y: sector.y(),
            sector_id: sector.id(),
            latitude: coordinate.latitude(),
            longitude: coordinate.longitude(),
            users_in_sector,
        }
    }
}

/// Data of a `proximity.user_nearby` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityData {
    #[serde(deserialize_with = "lenient")]
    pub near_user_id: String,
    #[serde(deserialize_with = "lenient")]
    pub near_user_name: String,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub distance: f64,
    #[serde(deserialize_with = "lenient", serialize_with = "finite")]
    pub max_distance: f64,
    /// `true` when entering the radius, `false` when leaving it.
    #[serde(deserialize_with = "lenient")]
    pub is_entering: bool,
}

/// Payload of an event, one variant per payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    PositionChanged(PositionChangedData),
    SectorChanged(SectorChangedData),
    Proximity(ProximityData),
}

impl EventData {
    /// Whether this payload is the shape expected for `event_type`.
    pub fn accepts(&self, event_type: EventType) -> bool {
        matches!(
            (self, event_type),
            (EventData::PositionChanged(_), EventType::PositionChanged)
                | (
                    EventData::SectorChanged(_),
                    EventType::UserEnteredSector | EventType::UserLeftSector
                )
                | (EventData::Proximity(_), EventType::UserNearby)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventData::PositionChanged(_) => "PositionChanged",
            EventData::SectorChanged(_) => "SectorChanged",
            EventData::Proximity(_) => "Proximity",
        }
    }

    /// Encode as a flat JSON object.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            EventData::PositionChanged(d) => serde_json::to_string(d),
            EventData::SectorChanged(d) => serde_json::to_string(d),
            EventData::Proximity(d) => serde_json::to_string(d),
        }
    }

    /// Decode the payload shape that belongs to `event_type`.
    ///
    /// `null` decodes to an all-zero payload; any other non-object is an error.
    pub fn from_json(event_type: EventType, raw: &str) -> Result<Self, serde_json::Error> {
        let value: JsonValue = serde_json::from_str(raw)?;
        let value = match value {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other,
        };

        Ok(match event_type {
            EventType::PositionChanged => EventData::PositionChanged(serde_json::from_value(value)?),
            EventType::UserEnteredSector | EventType::UserLeftSector => {
                EventData::SectorChanged(serde_json::from_value(value)?)
            }
            EventType::UserNearby => EventData::Proximity(serde_json::from_value(value)?),
        })
    }

    pub fn as_position_changed(&self) -> Option<&PositionChangedData> {
        match self {
            EventData::PositionChanged(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_sector_changed(&self) -> Option<&SectorChangedData> {
        match self {
            EventData::SectorChanged(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_proximity(&self) -> Option<&ProximityData> {
        match self {
            EventData::Proximity(d) => Some(d),
            _ => None,
        }
    }
}

/// Deserialize a field, falling back to its zero value when the JSON type is wrong.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Counts may arrive as JSON floats (`2.0`); truncate them. Anything else is zero.
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value.as_f64() {
        Some(n) if n.is_finite() && n > 0.0 => n as u32,
        _ => 0,
    })
}

fn finite<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if !value.is_finite() {
        return Err(<S::Error as ser::Error>::custom(format!(
            "non-finite number {value}"
        )));
    }
    serializer.serialize_f64(*value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_fills_sectors_and_distance() {
        let a = Coordinate::new(0.0, 0.0).unwrap();
        let b = Coordinate::new(0.0018, 0.0).unwrap(); // ~200 m north

        let first = PositionChangedData::between("p1", None, &a).unwrap();
        assert_eq!(first.previous_sector, "");
        assert_eq!(first.distance_moved, 0.0);
        assert!(!first.sector_changed());

        let moved = PositionChangedData::between("p2", Some(&a), &b).unwrap();
        assert_eq!(moved.previous_sector, "sector_0_0");
        assert_eq!(moved.new_sector, "sector_0_2");
        assert!((195.0..205.0).contains(&moved.distance_moved));
        assert!(moved.sector_changed());
    }

    #[test]
    fn missing_and_mistyped_fields_become_zero() {
        let raw = r#"{"new_lat": "north", "distance_moved": 150, "new_sector": 7}"#;
        let data = EventData::from_json(EventType::PositionChanged, raw).unwrap();
        let d = data.as_position_changed().unwrap();

        assert_eq!(d.new_lat, 0.0);
        assert_eq!(d.distance_moved, 150.0);
        assert_eq!(d.new_sector, "");
        assert_eq!(d.position_id, "");
    }

    #[test]
    fn null_payload_decodes_to_defaults_but_arrays_do_not() {
        let data = EventData::from_json(EventType::UserNearby, "null").unwrap();
        assert_eq!(data, EventData::Proximity(ProximityData::default()));

        assert!(EventData::from_json(EventType::UserNearby, "[1,2]").is_err());
    }

    #[test]
    fn sector_types_share_a_payload_shape() {
        let data = EventData::SectorChanged(SectorChangedData::default());
        assert!(data.accepts(EventType::UserEnteredSector));
        assert!(data.accepts(EventType::UserLeftSector));
        assert!(!data.accepts(EventType::PositionChanged));
        assert!(!data.accepts(EventType::UserNearby));
    }

    #[test]
    fn non_finite_floats_fail_to_encode() {
        let data = EventData::PositionChanged(PositionChangedData {
            distance_moved: f64::NAN,
            ..Default::default()
        });
        assert!(data.to_json().is_err());

        let data = EventData::Proximity(ProximityData {
            distance: f64::INFINITY,
            ..Default::default()
        });
        assert!(data.to_json().is_err());
    }

    #[test]
    fn integral_float_counts_are_accepted() {
        let raw = r#"{"sector_id": "sector_1_2", "users_in_sector": 2.0}"#;
        let data = EventData::from_json(EventType::UserEnteredSector, raw).unwrap();
        assert_eq!(data.as_sector_changed().unwrap().users_in_sector, 2);

        let raw = r#"{"users_in_sector": 3.7}"#;
        let data = EventData::from_json(EventType::UserLeftSector, raw).unwrap();
        assert_eq!(data.as_sector_changed().unwrap().users_in_sector, 3);

        let raw = r#"{"users_in_sector": -1}"#;
        let data = EventData::from_json(EventType::UserLeftSector, raw).unwrap();
        assert_eq!(data.as_sector_changed().unwrap().users_in_sector, 0);
    }

    #[test]
    fn encodes_as_flat_object() {
        let data = EventData::SectorChanged(SectorChangedData {
            sector_x: 1,
            sector_y: 2,
            sector_id: "sector_1_2".into(),
            latitude: 0.5,
            longitude: 0.25,
            users_in_sector: 3,
        });

        let value: JsonValue = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(value["sector_id"], "sector_1_2");
        assert_eq!(value["users_in_sector"], 3);
    }
}
