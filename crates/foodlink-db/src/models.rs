//! Write-side records and query parameters for the store. Read results are
//! the shared `foodlink_types` models.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use foodlink_types::models::{
    Category, DonationFields, DonationStatus, FoodType, GeoPoint, Role, User,
};

pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub verified: bool,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash, for login only.
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
}

pub struct NewDonation {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub quantity: f64,
    pub food_type: FoodType,
    pub category: Category,
    pub expiry_at: DateTime<Utc>,
    pub pickup_deadline: DateTime<Utc>,
    pub location: GeoPoint,
    pub notes: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Compare-current-status-and-set. The update applies only when the row still
/// matches every guard; otherwise nothing is written.
#[derive(Debug, Clone)]
pub struct StatusWrite {
    pub donation_id: Uuid,
    pub expected_status: DonationStatus,
    /// When set, the stored receiver must equal this id.
    pub expected_receiver: Option<Uuid>,
    /// When true, the stored receiver must be null.
    pub require_unassigned: bool,
    pub new_status: DonationStatus,
    /// Only fills a null receiver; an assigned receiver is never replaced.
    pub assign_receiver: Option<Uuid>,
    pub stamps: PickupStamps,
    pub actor_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Pickup timestamps to fill. Already-set columns keep their value.
#[derive(Debug, Clone, Default)]
pub struct PickupStamps {
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub estimated_pickup_time: Option<DateTime<Utc>>,
    pub actual_pickup_time: Option<DateTime<Utc>>,
}

/// Donor metadata edit, guarded on ownership and an editable status.
#[derive(Debug, Clone)]
pub struct FieldWrite {
    pub donation_id: Uuid,
    pub donor_id: Uuid,
    pub fields: DonationFields,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct GeoQuery {
    pub origin: GeoPoint,
    pub radius_m: f64,
    pub status: DonationStatus,
}
