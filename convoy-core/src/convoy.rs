use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConvoyError, Result};
use crate::types::{ConvoyId, Coordinate, UserId};

/// Last known position of a convoy member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub user_id: UserId,
    pub display_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl PositionRecord {
    pub fn new(user_id: UserId, display_name: &str, coordinate: Coordinate) -> Self {
        let display_name = display_name_or_id(display_name, &user_id);
        Self {
            user_id,
            display_name,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            updated_at: Utc::now(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Empty (or blank) display names fall back to the user id
pub fn display_name_or_id(display_name: &str, user_id: &UserId) -> String {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        user_id.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: UserId,
    pub display_name: String,
}

/// Full state of a convoy as delivered to a new subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoySnapshot {
    pub convoy_id: ConvoyId,
    /// Ordered by user id
    pub members: Vec<MemberView>,
    /// Ordered by user id
    pub positions: Vec<PositionRecord>,
    pub destination: Option<Coordinate>,
}

impl ConvoySnapshot {
    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// The member asked to leave
    Left,
    /// The presence monitor stopped hearing from the member
    Evicted,
}

/// Events pushed to convoy subscribers, in per-convoy publish order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConvoyEvent {
    // Always first on a fresh subscription
    Snapshot {
        snapshot: ConvoySnapshot,
    },

    MemberJoined {
        user_id: UserId,
        display_name: String,
    },
    PositionUpdated {
        user_id: UserId,
        record: PositionRecord,
    },
    MemberLeft {
        user_id: UserId,
        reason: LeaveReason,
    },
    DestinationChanged {
        coordinate: Coordinate,
    },

    // Last member gone; the subscription closes after this
    ConvoyClosed,
}

impl ConvoyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::MemberJoined { .. } => "member_joined",
            Self::PositionUpdated { .. } => "position_updated",
            Self::MemberLeft { .. } => "member_left",
            Self::DestinationChanged { .. } => "destination_changed",
            Self::ConvoyClosed => "convoy_closed",
        }
    }
}

/// Destination as typed by a member: either a literal coordinate or an
/// address to resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum DestinationInput {
    Coordinate(Coordinate),
    Text(String),
}

impl DestinationInput {
    /// Text made of exactly two comma-separated floats is a literal
    /// coordinate; anything else is handed to address lookup.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ConvoyError::invalid("destination must not be empty"));
        }

        let parts: Vec<&str> = trimmed.split(',').collect();
        if let [lat, lon] = parts.as_slice()
            && let (Ok(lat), Ok(lon)) =
                (lat.trim().parse::<f64>(), lon.trim().parse::<f64>())
        {
            return Coordinate::new(lat, lon).map(Self::Coordinate);
        }

        Ok(Self::Text(trimmed.to_string()))
    }
}

impl From<Coordinate> for DestinationInput {
    fn from(value: Coordinate) -> Self {
        Self::Coordinate(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pair_parses_as_coordinate() {
        let parsed = DestinationInput::parse("48.8566,2.3522").unwrap();
        assert_eq!(
            parsed,
            DestinationInput::Coordinate(Coordinate::new(48.8566, 2.3522).unwrap())
        );

        let spaced = DestinationInput::parse(" 48.8566 , 2.3522 ").unwrap();
        assert!(matches!(spaced, DestinationInput::Coordinate(_)));
    }

    #[test]
    fn out_of_range_literal_is_invalid_not_an_address() {
        assert!(matches!(
            DestinationInput::parse("200,2.35"),
            Err(ConvoyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn addresses_with_commas_fall_through_to_text() {
        let parsed = DestinationInput::parse("5 Avenue Anatole France, Paris").unwrap();
        assert_eq!(
            parsed,
            DestinationInput::Text("5 Avenue Anatole France, Paris".into())
        );
        assert_eq!(
            DestinationInput::parse("Eiffel Tower").unwrap(),
            DestinationInput::Text("Eiffel Tower".into())
        );
        assert!(matches!(
            DestinationInput::parse("1,2,3").unwrap(),
            DestinationInput::Text(_)
        ));
    }

    #[test]
    fn blank_destination_is_rejected() {
        assert!(DestinationInput::parse("   ").is_err());
    }

    #[test]
    fn blank_display_name_falls_back_to_user_id() {
        let user = UserId::parse("user_42").unwrap();
        let record = PositionRecord::new(
            user.clone(),
            "  ",
            Coordinate::new(1.0, 2.0).unwrap(),
        );
        assert_eq!(record.display_name, "user_42");
        assert_eq!(display_name_or_id("Alice", &user), "Alice");
    }

    #[test]
    fn events_use_snake_case_tags_and_camel_case_fields() {
        let event = ConvoyEvent::MemberLeft {
            user_id: UserId::parse("u1").unwrap(),
            reason: LeaveReason::Evicted,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "member_left");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["reason"], "evicted");

        let closed = serde_json::to_value(ConvoyEvent::ConvoyClosed).unwrap();
        assert_eq!(closed["type"], "convoy_closed");
    }
}
