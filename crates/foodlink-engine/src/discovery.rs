use chrono::Utc;
use tracing::debug;

use foodlink_db::models::GeoQuery;
use foodlink_types::api::NearbyQuery;
use foodlink_types::models::{
    Category, DonationStatus, FoodType, GeoPoint, NearbyDonation, Principal, Role,
};
use foodlink_types::{FoodlinkError, Result};

use crate::service::Engine;

/// A parsed discovery request. `origin` and `radius_m` fall back to the
/// caller's stored location and the configured default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryQuery {
    pub origin: Option<GeoPoint>,
    pub radius_m: Option<f64>,
    pub food_type: Option<FoodType>,
    pub category: Option<Category>,
}

impl DiscoveryQuery {
    pub fn parse(raw: &NearbyQuery) -> Result<Self> {
        let origin = match (raw.latitude.as_deref(), raw.longitude.as_deref()) {
            (None, None) => None,
            (Some(lat), Some(lng)) => {
                let point = GeoPoint::new(parse_number(lat, "latitude")?, parse_number(lng, "longitude")?);
                point.validate()?;
                Some(point)
            }
            _ => {
                return Err(FoodlinkError::Validation(
                    "latitude and longitude must be given together".into(),
                ));
            }
        };

        let radius_m = raw
            .max_distance
            .as_deref()
            .map(|r| parse_number(r, "max_distance"))
            .transpose()?;
        if let Some(r) = radius_m {
            if r <= 0.0 {
                return Err(FoodlinkError::Validation(
                    "max_distance must be positive".into(),
                ));
            }
        }

        Ok(Self {
            origin,
            radius_m,
            food_type: raw.food_type,
            category: raw.category,
        })
    }
}

fn parse_number(raw: &str, field: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FoodlinkError::Validation(format!("{} must be numeric", field)))
}

impl Engine {
    /// Pending donations near an origin, nearest first.
    pub async fn discover(
        &self,
        principal: &Principal,
        query: DiscoveryQuery,
    ) -> Result<Vec<NearbyDonation>> {
        if !matches!(principal.role, Role::Receiver | Role::Admin) {
            return Err(FoodlinkError::Unauthorized(
                "only receivers can browse donations".into(),
            ));
        }

        let origin = match query.origin {
            Some(origin) => origin,
            None => self.profile(principal).await?.location.ok_or_else(|| {
                FoodlinkError::Validation(
                    "no origin given and no location on the profile".into(),
                )
            })?,
        };
        let geo = GeoQuery {
            origin,
            radius_m: query.radius_m.unwrap_or(self.settings().default_radius_m),
            status: DonationStatus::Pending,
        };

        let now = Utc::now();
        let hits: Vec<NearbyDonation> = self
            .store(move |db| db.find_within(&geo))
            .await?
            .into_iter()
            .filter(|hit| hit.donation.pickup_deadline > now)
            .filter(|hit| query.food_type.is_none_or(|f| hit.donation.food_type == f))
            .filter(|hit| query.category.is_none_or(|c| hit.donation.category == c))
            .collect();

        debug!(
            "Discovery for {} around ({}, {}) r={}m: {} hit(s)",
            principal.name,
            origin.latitude,
            origin.longitude,
            geo.radius_m,
            hits.len()
        );
        Ok(hits)
    }
}
