use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use foodlink_db::Database;
use foodlink_db::models::{FieldWrite, NewDonation};
use foodlink_types::api::CreateDonationRequest;
use foodlink_types::events::LifecycleKind;
use foodlink_types::models::{
    Donation, DonationFields, DonationStatus, GeoPoint, Principal, Role,
};
use foodlink_types::{FoodlinkError, Result};

use crate::directory::ChannelDirectory;
use crate::lifecycle::{self, Action, Actor};
use crate::locks::RecordLocks;
use crate::router::{LifecycleEvent, Notification, NotificationRouter};
use crate::session::SessionGate;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
    pub default_radius_m: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(5000),
            default_radius_m: 5000.0,
        }
    }
}

/// Entry point for every state-changing and discovery operation.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    db: Arc<Database>,
    router: NotificationRouter,
    locks: RecordLocks,
    session: SessionGate,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        db: Arc<Database>,
        directory: Arc<dyn ChannelDirectory>,
        session: SessionGate,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                db,
                router: NotificationRouter::new(directory),
                locks: RecordLocks::new(),
                session,
                settings,
            }),
        }
    }

    pub fn session(&self) -> &SessionGate {
        &self.inner.session
    }

    pub fn directory(&self) -> &Arc<dyn ChannelDirectory> {
        self.inner.router.directory()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub(crate) fn router(&self) -> &NotificationRouter {
        &self.inner.router
    }

    pub(crate) fn locks(&self) -> &RecordLocks {
        &self.inner.locks
    }

    /// Run a blocking store call off the async runtime, bounded by the store
    /// timeout. Any store failure surfaces as `ServiceUnavailable`.
    pub(crate) async fn store<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.inner.settings.store_timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => {
                warn!("Store call failed: {:#}", e);
                Err(FoodlinkError::ServiceUnavailable("store error".into()))
            }
            Ok(Err(e)) => {
                warn!("Store task aborted: {}", e);
                Err(FoodlinkError::ServiceUnavailable("store task aborted".into()))
            }
            Err(_) => {
                warn!(
                    "Store call exceeded {:?}",
                    self.inner.settings.store_timeout
                );
                Err(FoodlinkError::ServiceUnavailable("store timed out".into()))
            }
        }
    }

    pub(crate) async fn load(&self, id: Uuid) -> Result<Donation> {
        self.store(move |db| db.get_donation(id))
            .await?
            .ok_or_else(|| FoodlinkError::NotFound(format!("donation {}", id)))
    }

    // -- Creation --

    pub async fn create_donation(
        &self,
        principal: &Principal,
        req: CreateDonationRequest,
    ) -> Result<Donation> {
        if principal.role != Role::Donor {
            return Err(FoodlinkError::Unauthorized(
                "only donors can create donations".into(),
            ));
        }
        let now = Utc::now();
        validate_new_donation(&req, now)?;

        let new = NewDonation {
            id: Uuid::new_v4(),
            donor_id: principal.user_id,
            quantity: req.quantity,
            food_type: req.food_type,
            category: req.category,
            expiry_at: req.expiry_at,
            pickup_deadline: req.pickup_deadline,
            location: req.location,
            notes: req.notes.map(|n| n.trim().to_string()).unwrap_or_default(),
            image_url: req.image_url.filter(|u| !u.trim().is_empty()),
            created_at: now,
        };
        let donation = self.store(move |db| db.insert_donation(&new)).await?;

        info!(
            "Donation {} created by {} ({} {})",
            donation.id, principal.name, donation.quantity, donation.food_type.as_str()
        );
        self.router()
            .publish(Notification::Lifecycle(LifecycleEvent {
                kind: LifecycleKind::Created,
                donation: donation.clone(),
                previous_status: None,
                actor_id: Some(principal.user_id),
                changes: None,
                at: now,
            }))
            .await;
        Ok(donation)
    }

    // -- Transitions --

    pub async fn accept(
        &self,
        principal: &Principal,
        id: Uuid,
        estimated_pickup_time: Option<DateTime<Utc>>,
    ) -> Result<Donation> {
        let action = Action::Accept {
            estimated_pickup_time,
        };
        self.transition(Actor::User(principal.clone()), id, action).await
    }

    pub async fn confirm_pickup(&self, principal: &Principal, id: Uuid) -> Result<Donation> {
        self.transition(Actor::User(principal.clone()), id, Action::ConfirmPickup)
            .await
    }

    pub async fn verify(&self, principal: &Principal, id: Uuid) -> Result<Donation> {
        self.transition(Actor::User(principal.clone()), id, Action::Verify)
            .await
    }

    pub async fn expire(&self, principal: &Principal, id: Uuid) -> Result<Donation> {
        self.transition(Actor::User(principal.clone()), id, Action::Expire)
            .await
    }

    /// Expire on behalf of the deadline clock.
    pub async fn expire_as_system(&self, id: Uuid) -> Result<Donation> {
        self.transition(Actor::System, id, Action::Expire).await
    }

    pub async fn override_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: DonationStatus,
    ) -> Result<Donation> {
        self.transition(Actor::User(principal.clone()), id, Action::Override(status))
            .await
    }

    /// Map a requested target status onto the transition that reaches it.
    /// Administrators asking for accepted or picked go through the override.
    pub async fn request_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: DonationStatus,
        estimated_pickup_time: Option<DateTime<Utc>>,
    ) -> Result<Donation> {
        let is_admin = principal.role == Role::Admin;
        match status {
            DonationStatus::Accepted if !is_admin => {
                self.accept(principal, id, estimated_pickup_time).await
            }
            DonationStatus::Picked if !is_admin => self.confirm_pickup(principal, id).await,
            DonationStatus::Verified => self.verify(principal, id).await,
            DonationStatus::Expired => self.expire(principal, id).await,
            other => self.override_status(principal, id, other).await,
        }
    }

    async fn transition(&self, actor: Actor, id: Uuid, action: Action) -> Result<Donation> {
        lifecycle::authorize(&actor, &action)?;

        // Held until the notification is handed off, so one donation's events
        // leave in commit order.
        let _guard = self.locks().acquire(id).await;

        let current = self.load(id).await?;
        let now = Utc::now();
        let plan = lifecycle::plan(&current, &actor, &action, now)?;
        let write = plan.to_write(&current, actor.id(), now);

        let updated = match self.store(move |db| db.compare_and_set_status(&write)).await? {
            Some(updated) => updated,
            None => {
                let latest = self.load(id).await.map(|d| d.status).unwrap_or(current.status);
                debug!(
                    "{} on {} lost the compare-and-set (now {})",
                    action.name(),
                    id,
                    latest
                );
                return Err(FoodlinkError::invalid_transition(latest, action.name()));
            }
        };

        match &actor {
            Actor::User(p) => info!(
                "Donation {}: {} -> {} by {} ({})",
                id, plan.from, plan.to, p.name, p.role
            ),
            Actor::System => info!("Donation {}: {} -> {} (deadline)", id, plan.from, plan.to),
        }

        self.router()
            .publish(Notification::Lifecycle(LifecycleEvent {
                kind: plan.kind,
                donation: updated.clone(),
                previous_status: Some(plan.from),
                actor_id: actor.id(),
                changes: None,
                at: now,
            }))
            .await;
        Ok(updated)
    }

    // -- Field edits --

    pub async fn update_fields(
        &self,
        principal: &Principal,
        id: Uuid,
        fields: DonationFields,
    ) -> Result<Donation> {
        if principal.role != Role::Donor {
            return Err(FoodlinkError::Unauthorized(
                "only the donor can edit this donation".into(),
            ));
        }
        if fields.is_empty() {
            return Err(FoodlinkError::Validation("no fields to update".into()));
        }

        let _guard = self.locks().acquire(id).await;
        let current = self.load(id).await?;
        lifecycle::check_field_edit(&current, principal)?;

        // Checked against the merged record: a one-sided edit must not
        // push the deadline past the stored expiry, or vice versa.
        let expiry = fields.expiry_at.unwrap_or(current.expiry_at);
        let deadline = fields.pickup_deadline.unwrap_or(current.pickup_deadline);
        if deadline > expiry {
            return Err(FoodlinkError::Validation(
                "pickup deadline must not be after expiry".into(),
            ));
        }

        let now = Utc::now();
        let write = FieldWrite {
            donation_id: id,
            donor_id: principal.user_id,
            fields: fields.clone(),
            at: now,
        };
        let updated = match self.store(move |db| db.update_donation_fields(&write)).await? {
            Some(updated) => updated,
            None => {
                let latest = self.load(id).await.map(|d| d.status).unwrap_or(current.status);
                return Err(FoodlinkError::invalid_transition(latest, "edit"));
            }
        };

        info!("Donation {} fields edited by {}", id, principal.name);
        self.router()
            .publish(Notification::Lifecycle(LifecycleEvent {
                kind: LifecycleKind::FieldsUpdated,
                donation: updated.clone(),
                previous_status: Some(current.status),
                actor_id: Some(principal.user_id),
                changes: Some(fields),
                at: now,
            }))
            .await;
        Ok(updated)
    }

    // -- Reads --

    pub async fn get_donation(&self, principal: &Principal, id: Uuid) -> Result<Donation> {
        let donation = self.load(id).await?;
        if !lifecycle::may_view(&donation, principal) {
            return Err(FoodlinkError::Unauthorized(
                "not allowed to view this donation".into(),
            ));
        }
        Ok(donation)
    }

    /// Donors see what they posted, receivers what they accepted,
    /// administrators everything.
    pub async fn my_donations(&self, principal: &Principal) -> Result<Vec<Donation>> {
        let user_id = principal.user_id;
        match principal.role {
            Role::Donor => self.store(move |db| db.donations_by_donor(user_id)).await,
            Role::Receiver => self.store(move |db| db.donations_by_receiver(user_id)).await,
            Role::Admin => self.store(|db| db.all_donations()).await,
        }
    }

    pub async fn all_donations(&self, principal: &Principal) -> Result<Vec<Donation>> {
        require_admin(principal)?;
        self.store(|db| db.all_donations()).await
    }

    pub async fn overdue_donations(&self, principal: &Principal) -> Result<Vec<Donation>> {
        require_admin(principal)?;
        let now = Utc::now();
        self.store(move |db| db.overdue_donations(&now)).await
    }

    /// Channel entitlement check used by the gateway. Unknown ids and
    /// non-entitled callers both come back `false`.
    pub async fn may_watch(&self, principal: &Principal, id: Uuid) -> Result<bool> {
        match self.store(move |db| db.get_donation(id)).await? {
            Some(donation) => Ok(lifecycle::may_watch(&donation, principal)),
            None => Ok(false),
        }
    }
}

impl Engine {
    /// Publish the caller's live position on a donation channel. Only
    /// principals entitled to watch the donation may share.
    pub async fn share_location(
        &self,
        principal: &Principal,
        id: Uuid,
        location: GeoPoint,
    ) -> Result<()> {
        location.validate()?;
        let donation = self.load(id).await?;
        if !lifecycle::may_watch(&donation, principal) {
            return Err(FoodlinkError::Unauthorized(
                "not a participant of this donation".into(),
            ));
        }
        if donation.status.is_terminal() {
            return Err(FoodlinkError::invalid_transition(donation.status, "share-location"));
        }

        self.router()
            .publish(Notification::LocationShared {
                donation_id: id,
                user_id: principal.user_id,
                location,
                at: Utc::now(),
            })
            .await;
        Ok(())
    }
}

pub(crate) fn require_admin(principal: &Principal) -> Result<()> {
    if principal.role == Role::Admin {
        Ok(())
    } else {
        Err(FoodlinkError::Unauthorized(
            "administrator role required".into(),
        ))
    }
}

fn validate_new_donation(req: &CreateDonationRequest, now: DateTime<Utc>) -> Result<()> {
    if !req.quantity.is_finite() || req.quantity <= 0.0 {
        return Err(FoodlinkError::Validation(
            "quantity must be a positive number".into(),
        ));
    }
    req.location.validate()?;
    if req.pickup_deadline <= now {
        return Err(FoodlinkError::Validation(
            "pickup deadline must be in the future".into(),
        ));
    }
    if req.pickup_deadline > req.expiry_at {
        return Err(FoodlinkError::Validation(
            "pickup deadline must not be after expiry".into(),
        ));
    }
    Ok(())
}
