use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::CreateDonationRequest;
use crate::models::{DonationFields, DonationStatus, DonationSummary, GeoPoint, Role};

/// Addressing scheme for real-time delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Exactly one principal's private channel.
    User(Uuid),
    /// Every connected principal of a role.
    Role(Role),
    /// Every principal subscribed to one donation.
    Post(Uuid),
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Role(role) => write!(f, "role:{}", role),
            Self::Post(id) => write!(f, "post:{}", id),
        }
    }
}

/// The kind of a committed donation change. One canonical event is emitted per
/// change; audiences decide relevance from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleKind {
    Created,
    Accepted,
    Picked,
    Verified,
    FieldsUpdated,
    Expired,
    StatusOverride,
}

/// Body of a donation notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationNotice {
    pub kind: LifecycleKind,
    pub donation_id: Uuid,
    pub status: DonationStatus,
    pub previous_status: Option<DonationStatus>,
    pub donor_id: Uuid,
    pub donor_name: String,
    pub receiver_id: Option<Uuid>,
    pub receiver_name: Option<String>,
    pub actor_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<DonationFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DonationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_pickup_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Events sent FROM server TO client over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: Uuid,
        name: String,
        role: Role,
    },

    /// A donation was created or changed
    Donation(DonationNotice),

    /// An administrator approved the receiver account
    ReceiverVerified {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Live position of someone handling a pickup
    LocationUpdate {
        donation_id: Uuid,
        user_id: Uuid,
        location: GeoPoint,
        timestamp: DateTime<Utc>,
    },

    /// A receiver rated one of the donor's donations
    FeedbackReceived {
        donation_id: Uuid,
        rating: u8,
        comment: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A command from this connection was rejected
    Error { code: String, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to a donation's channel
    JoinPost { donation_id: Uuid },

    /// Drop a donation channel subscription
    LeavePost { donation_id: Uuid },

    /// Move a donation to a new status
    RequestStatusChange {
        donation_id: Uuid,
        status: DonationStatus,
        #[serde(default)]
        estimated_pickup_time: Option<DateTime<Utc>>,
    },

    /// Edit donation metadata (donor only)
    RequestFieldUpdate {
        donation_id: Uuid,
        fields: DonationFields,
    },

    /// Publish a new donation
    BroadcastNewDonation { donation: CreateDonationRequest },

    /// Share the sender's live position on a donation channel
    ShareLocation {
        donation_id: Uuid,
        location: GeoPoint,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_selector_format() {
        let id = Uuid::nil();
        assert_eq!(
            Audience::User(id).to_string(),
            "user:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Audience::Role(Role::Admin).to_string(), "role:admin");
        assert!(Audience::Post(id).to_string().starts_with("post:"));
    }

    #[test]
    fn commands_are_adjacently_tagged() {
        let raw = r#"{"type":"JoinPost","data":{"donation_id":"00000000-0000-0000-0000-000000000001"}}"#;
        match serde_json::from_str::<ClientCommand>(raw).unwrap() {
            ClientCommand::JoinPost { donation_id } => assert_eq!(donation_id.as_u128(), 1),
            other => panic!("unexpected command {:?}", other),
        }

        let raw = r#"{"type":"RequestStatusChange","data":{"donation_id":"00000000-0000-0000-0000-000000000001","status":"picked"}}"#;
        match serde_json::from_str::<ClientCommand>(raw).unwrap() {
            ClientCommand::RequestStatusChange {
                status,
                estimated_pickup_time,
                ..
            } => {
                assert_eq!(status, DonationStatus::Picked);
                assert!(estimated_pickup_time.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn error_event_shape() {
        let event = ServerEvent::Error {
            code: "unauthorized".into(),
            message: "nope".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["data"]["code"], "unauthorized");
    }
}
