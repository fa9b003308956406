use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use foodlink_types::{FoodlinkError, Result};

use crate::service::Engine;

/// Background task that expires donations whose pickup deadline has passed.
///
/// Every expiry goes through the regular transition path, so it is guarded,
/// recorded in the history with no actor, and announced like any other.
pub async fn run_expiry_sweeper(engine: Engine, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match engine.expire_overdue().await {
            Ok(count) => {
                if count > 0 {
                    info!("Expiry sweep: expired {} donations", count);
                }
            }
            Err(e) => {
                warn!("Expiry sweep error: {}", e);
            }
        }
    }
}

impl Engine {
    /// One sweep. Returns how many donations were expired.
    pub async fn expire_overdue(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.store(move |db| db.expirable_donation_ids(&now)).await?;

        let mut expired = 0;
        for id in due {
            match self.expire_as_system(id).await {
                Ok(_) => expired += 1,
                // Someone got there first (accepted-then-picked, admin expiry).
                Err(FoodlinkError::InvalidTransition { from, .. }) => {
                    debug!("Skipping expiry of {}: now {}", id, from);
                }
                Err(e) => warn!("Failed to expire {}: {}", id, e),
            }
        }

        let pruned = self.locks().prune();
        if pruned > 0 {
            debug!("Pruned {} idle record locks", pruned);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine, seed_user};
    use chrono::Duration as ChronoDuration;
    use foodlink_db::models::NewDonation;
    use foodlink_types::events::{Audience, LifecycleKind, ServerEvent};
    use foodlink_types::models::{Category, DonationStatus, FoodType, GeoPoint, Role};
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_expires_only_past_deadline() {
        let (engine, directory) = engine();
        let donor = seed_user(&engine, Role::Donor, false, None).await;
        let now = Utc::now();

        // Inserted straight into the store; the create path refuses past deadlines.
        let offer = |pickup_deadline| NewDonation {
            id: Uuid::new_v4(),
            donor_id: donor.user_id,
            quantity: 1.0,
            food_type: FoodType::Veg,
            category: Category::Perishable,
            expiry_at: now + ChronoDuration::hours(3),
            pickup_deadline,
            location: GeoPoint::new(17.385, 78.4867),
            notes: String::new(),
            image_url: None,
            created_at: now - ChronoDuration::hours(2),
        };
        let stale = offer(now - ChronoDuration::minutes(1));
        let fresh = offer(now + ChronoDuration::hours(1));
        let (stale_id, fresh_id) = (stale.id, fresh.id);
        engine.store(move |db| db.insert_donation(&stale)).await.unwrap();
        engine.store(move |db| db.insert_donation(&fresh)).await.unwrap();

        assert_eq!(engine.expire_overdue().await.unwrap(), 1);
        assert_eq!(engine.expire_overdue().await.unwrap(), 0);

        let expired = engine.load(stale_id).await.unwrap();
        assert_eq!(expired.status, DonationStatus::Expired);
        let last = expired.status_history.last().unwrap();
        assert_eq!(last.status, DonationStatus::Expired);
        assert!(last.actor_id.is_none());
        assert_eq!(
            engine.load(fresh_id).await.unwrap().status,
            DonationStatus::Pending
        );

        let deliveries = directory.take();
        assert_eq!(deliveries.len(), 1);
        let (audiences, event) = &deliveries[0];
        assert!(audiences.contains(&Audience::Post(stale_id)));
        assert!(audiences.contains(&Audience::Role(Role::Admin)));
        assert!(matches!(
            event,
            ServerEvent::Donation(notice) if notice.kind == LifecycleKind::Expired
        ));
        assert!(engine.locks().is_empty());
    }
}
