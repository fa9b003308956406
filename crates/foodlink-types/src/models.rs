use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FoodlinkError;

// -- Roles --

/// The three actor roles. A user's role is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Receiver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donor => "donor",
            Self::Receiver => "receiver",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FoodlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donor" => Ok(Self::Donor),
            "receiver" => Ok(Self::Receiver),
            "admin" => Ok(Self::Admin),
            other => Err(FoodlinkError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

// -- Donation status --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Accepted,
    Picked,
    Verified,
    Expired,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Picked => "picked",
            Self::Verified => "verified",
            Self::Expired => "expired",
        }
    }

    /// `verified` and `expired` are dead ends.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Expired)
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DonationStatus {
    type Err = FoodlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "picked" => Ok(Self::Picked),
            "verified" => Ok(Self::Verified),
            "expired" => Ok(Self::Expired),
            other => Err(FoodlinkError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

// -- Food classification --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoodType {
    #[serde(rename = "veg")]
    Veg,
    #[serde(rename = "non-veg")]
    NonVeg,
}

impl FoodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Veg => "veg",
            Self::NonVeg => "non-veg",
        }
    }
}

impl FromStr for FoodType {
    type Err = FoodlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "veg" => Ok(Self::Veg),
            "non-veg" => Ok(Self::NonVeg),
            other => Err(FoodlinkError::Validation(format!("unknown food type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Perishable,
    NonPerishable,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perishable => "perishable",
            Self::NonPerishable => "non-perishable",
        }
    }
}

impl FromStr for Category {
    type Err = FoodlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "perishable" => Ok(Self::Perishable),
            "non-perishable" => Ok(Self::NonPerishable),
            other => Err(FoodlinkError::Validation(format!("unknown category '{}'", other))),
        }
    }
}

// -- Location --

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Rejects NaN/infinite values and out-of-range degrees.
    pub fn validate(&self) -> Result<(), FoodlinkError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(FoodlinkError::Validation("coordinates must be numeric".into()));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(FoodlinkError::Validation(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(FoodlinkError::Validation(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub verified: bool,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

/// An authenticated caller. Built by the session gate from a token plus the
/// current user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub verified: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            name: user.name.clone(),
            role: user.role,
            verified: user.verified,
        }
    }
}

// -- Donations --

/// One entry of the append-only status history. `actor_id` is `None` when the
/// system clock drove the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: DonationStatus,
    pub at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
}

/// Pickup timestamps. Every field is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PickupDetails {
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub estimated_pickup_time: Option<DateTime<Utc>>,
    pub actual_pickup_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub donor_name: String,
    pub receiver_id: Option<Uuid>,
    pub receiver_name: Option<String>,
    pub quantity: f64,
    pub food_type: FoodType,
    pub category: Category,
    pub expiry_at: DateTime<Utc>,
    pub pickup_deadline: DateTime<Utc>,
    pub location: GeoPoint,
    pub notes: String,
    pub image_url: Option<String>,
    pub status: DonationStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    pub pickup: PickupDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    pub fn summary(&self) -> DonationSummary {
        DonationSummary {
            id: self.id,
            donor_id: self.donor_id,
            donor_name: self.donor_name.clone(),
            quantity: self.quantity,
            food_type: self.food_type,
            category: self.category,
            expiry_at: self.expiry_at,
            pickup_deadline: self.pickup_deadline,
            location: self.location,
            notes: self.notes.clone(),
            image_url: self.image_url.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// The public face of a donation used in discovery results and broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationSummary {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub donor_name: String,
    pub quantity: f64,
    pub food_type: FoodType,
    pub category: Category,
    pub expiry_at: DateTime<Utc>,
    pub pickup_deadline: DateTime<Utc>,
    pub location: GeoPoint,
    pub notes: String,
    pub image_url: Option<String>,
    pub status: DonationStatus,
    pub created_at: DateTime<Utc>,
}

/// A discovery hit: the summary plus its great-circle distance from the
/// query origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyDonation {
    #[serde(flatten)]
    pub donation: DonationSummary,
    pub distance_m: f64,
}

/// Metadata a donor may edit while the donation is still pending or accepted.
/// Quantity is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DonationFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_type: Option<FoodType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DonationFields {
    pub fn is_empty(&self) -> bool {
        self.food_type.is_none()
            && self.category.is_none()
            && self.expiry_at.is_none()
            && self.pickup_deadline.is_none()
            && self.notes.is_none()
    }
}

// -- Feedback --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub donation_id: Uuid,
    pub donor_id: Uuid,
    pub receiver_id: Uuid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
