use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a position event. Determines the shape of the payload.
///
/// The serialized names are the ones written to the `type` field of a log record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A user reported a new position.
    #[serde(rename = "position.changed")]
    PositionChanged,

    #[serde(rename = "sector.user_entered")]
    UserEnteredSector,

    #[serde(rename = "sector.user_left")]
    UserLeftSector,

    /// Two users came within (or left) a configured radius of each other.
    #[serde(rename = "proximity.user_nearby")]
    UserNearby,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::PositionChanged,
        EventType::UserEnteredSector,
        EventType::UserLeftSector,
        EventType::UserNearby,
    ];

    /// Stable wire name (e.g. `"position.changed"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PositionChanged => "position.changed",
            EventType::UserEnteredSector => "sector.user_entered",
            EventType::UserLeftSector => "sector.user_left",
            EventType::UserNearby => "proximity.user_nearby",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>(), Ok(t));
        }
        assert_eq!(
            "position.moved".parse::<EventType>(),
            Err(UnknownEventType("position.moved".to_string()))
        );
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::UserLeftSector).unwrap();
        assert_eq!(json, "\"sector.user_left\"");
    }
}
