use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use foodlink_types::api::SubmitFeedbackRequest;
use foodlink_types::models::{Feedback, Principal, Role};
use foodlink_types::{FoodlinkError, Result};

use crate::lifecycle;
use crate::router::Notification;
use crate::service::{Engine, require_admin};

impl Engine {
    /// Rate a donation. Only the receiver holding it may do so, once.
    pub async fn submit_feedback(
        &self,
        principal: &Principal,
        req: SubmitFeedbackRequest,
    ) -> Result<Feedback> {
        if principal.role != Role::Receiver {
            return Err(FoodlinkError::Unauthorized(
                "only receivers can leave feedback".into(),
            ));
        }
        if !(1..=5).contains(&req.rating) {
            return Err(FoodlinkError::Validation(
                "rating must be between 1 and 5".into(),
            ));
        }

        let donation = self.load(req.donation_id).await?;
        if donation.receiver_id != Some(principal.user_id) {
            return Err(FoodlinkError::Unauthorized(
                "feedback is only open to the receiver of this donation".into(),
            ));
        }

        let feedback = Feedback {
            id: Uuid::new_v4(),
            donation_id: donation.id,
            donor_id: donation.donor_id,
            receiver_id: principal.user_id,
            rating: req.rating,
            comment: req
                .comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            created_at: Utc::now(),
        };
        let row = feedback.clone();
        if !self.store(move |db| db.insert_feedback(&row)).await? {
            return Err(FoodlinkError::Conflict(
                "feedback already submitted for this donation".into(),
            ));
        }

        info!(
            "Feedback {}/5 on {} from {}",
            feedback.rating, feedback.donation_id, principal.name
        );
        self.router()
            .publish(Notification::FeedbackReceived(feedback.clone()))
            .await;
        Ok(feedback)
    }

    pub async fn feedback_for_donation(
        &self,
        principal: &Principal,
        donation_id: Uuid,
    ) -> Result<Vec<Feedback>> {
        let donation = self.load(donation_id).await?;
        if !lifecycle::may_watch(&donation, principal) {
            return Err(FoodlinkError::Unauthorized(
                "not allowed to view feedback for this donation".into(),
            ));
        }
        self.store(move |db| db.feedback_for_donation(donation_id)).await
    }

    /// Feedback the caller gave (receivers) or got (donors).
    pub async fn my_feedback(&self, principal: &Principal) -> Result<Vec<Feedback>> {
        let id = principal.user_id;
        match principal.role {
            Role::Donor => self.store(move |db| db.feedback_by_donor(id)).await,
            Role::Receiver => self.store(move |db| db.feedback_by_receiver(id)).await,
            Role::Admin => self.store(|db| db.all_feedback()).await,
        }
    }

    pub async fn all_feedback(&self, principal: &Principal) -> Result<Vec<Feedback>> {
        require_admin(principal)?;
        self.store(|db| db.all_feedback()).await
    }
}
