//! Account operations. Password hashing happens at the edge; this module only
//! ever sees the finished hash.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use foodlink_db::models::{NewUser, ProfileUpdate, UserCredentials};
use foodlink_types::api::UpdateProfileRequest;
use foodlink_types::models::{GeoPoint, Principal, Role, User};
use foodlink_types::{FoodlinkError, Result};

use crate::router::Notification;
use crate::service::{Engine, require_admin};

/// Validated input for a new account.
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
}

impl AccountDraft {
    fn validate(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        self.email = normalize_email(&self.email);
        if self.name.is_empty() {
            return Err(FoodlinkError::Validation("name is required".into()));
        }
        if !is_plausible_email(&self.email) {
            return Err(FoodlinkError::Validation("email address is invalid".into()));
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(self)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

impl Engine {
    /// Self-service sign-up. Administrators cannot register themselves and
    /// receivers start unverified.
    pub async fn register(&self, draft: AccountDraft, password_hash: String) -> Result<User> {
        if draft.role == Role::Admin {
            return Err(FoodlinkError::Unauthorized(
                "administrator accounts cannot be self-registered".into(),
            ));
        }
        let draft = draft.validate()?;
        let user = self.insert_user(draft, password_hash, false).await?;
        info!("Registered {} {} ({})", user.role, user.name, user.id);
        Ok(user)
    }

    /// Administrator-created account with an explicit verification flag.
    pub async fn onboard(
        &self,
        admin: &Principal,
        draft: AccountDraft,
        password_hash: String,
        verified: bool,
    ) -> Result<User> {
        require_admin(admin)?;
        let draft = draft.validate()?;
        let user = self.insert_user(draft, password_hash, verified).await?;
        info!(
            "{} onboarded {} {} ({})",
            admin.name, user.role, user.name, user.id
        );
        Ok(user)
    }

    async fn insert_user(&self, draft: AccountDraft, password_hash: String, verified: bool) -> Result<User> {
        let new = NewUser {
            id: Uuid::new_v4(),
            name: draft.name,
            email: draft.email,
            password_hash,
            role: draft.role,
            verified,
            phone: draft.phone,
            address: draft.address,
            location: draft.location,
            created_at: Utc::now(),
        };
        let id = new.id;
        let created = self.store(move |db| db.create_user(&new)).await?;
        if !created {
            return Err(FoodlinkError::Conflict("email is already registered".into()));
        }
        self.store(move |db| db.get_user_by_id(id))
            .await?
            .ok_or_else(|| FoodlinkError::NotFound(format!("user {}", id)))
    }

    /// Stored credentials for a login attempt.
    pub async fn credentials(&self, email: &str) -> Result<Option<UserCredentials>> {
        let email = normalize_email(email);
        self.store(move |db| db.get_credentials_by_email(&email)).await
    }

    pub async fn profile(&self, principal: &Principal) -> Result<User> {
        let id = principal.user_id;
        self.store(move |db| db.get_user_by_id(id))
            .await?
            .ok_or_else(|| FoodlinkError::NotFound(format!("user {}", id)))
    }

    pub async fn update_profile(&self, principal: &Principal, req: UpdateProfileRequest) -> Result<User> {
        let name = req.name.map(|n| n.trim().to_string());
        if name.as_deref() == Some("") {
            return Err(FoodlinkError::Validation("name cannot be empty".into()));
        }
        if let Some(location) = &req.location {
            location.validate()?;
        }

        let update = ProfileUpdate {
            name,
            phone: req.phone,
            address: req.address,
            location: req.location,
        };
        let id = principal.user_id;
        self.store(move |db| db.update_profile(id, &update))
            .await?
            .ok_or_else(|| FoodlinkError::NotFound(format!("user {}", id)))
    }

    pub async fn list_users(&self, principal: &Principal) -> Result<Vec<User>> {
        require_admin(principal)?;
        self.store(|db| db.list_users()).await
    }

    /// Approve a receiver so they may accept donations.
    pub async fn verify_receiver(&self, admin: &Principal, user_id: Uuid) -> Result<User> {
        require_admin(admin)?;
        let user = self
            .store(move |db| db.set_receiver_verified(user_id))
            .await?
            .ok_or_else(|| FoodlinkError::NotFound(format!("receiver {}", user_id)))?;

        info!("{} verified receiver {} ({})", admin.name, user.name, user.id);
        self.router()
            .publish(Notification::ReceiverVerified {
                receiver_id: user.id,
                at: Utc::now(),
            })
            .await;
        Ok(user)
    }
}
