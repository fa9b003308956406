use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::warn;

use foodlink_types::api::Claims;
use foodlink_types::models::{Principal, User};
use foodlink_types::{FoodlinkError, Result};

use crate::service::Engine;

/// Issues and checks session tokens (HS256 JWT).
#[derive(Clone)]
pub struct SessionGate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl SessionGate {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: chrono::Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let exp = (chrono::Utc::now() + self.ttl).timestamp() as usize;
        let claims = Claims {
            sub: user.id,
            name: user.name.clone(),
            role: user.role,
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            warn!("Token encoding failed: {}", e);
            FoodlinkError::ServiceUnavailable("could not issue token".into())
        })
    }

    pub fn decode(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| FoodlinkError::Unauthorized("invalid or expired token".into()))
    }
}

impl Engine {
    /// Resolve a token to a principal. Role and verification come from the
    /// current user row, not from the token.
    pub async fn authenticate(&self, token: &str) -> Result<Principal> {
        let claims = self.session().decode(token)?;
        let user = self
            .store(move |db| db.get_user_by_id(claims.sub))
            .await?
            .ok_or_else(|| FoodlinkError::Unauthorized("account no longer exists".into()))?;

        if user.role != claims.role {
            return Err(FoodlinkError::Unauthorized("token role is stale".into()));
        }
        Ok(Principal::from(&user))
    }

    /// Re-read a long-lived principal (a WebSocket session) so that a
    /// verification granted after connect takes effect immediately.
    pub async fn refresh(&self, principal: &Principal) -> Result<Principal> {
        let id = principal.user_id;
        self.store(move |db| db.get_user_by_id(id))
            .await?
            .map(|user| Principal::from(&user))
            .ok_or_else(|| FoodlinkError::Unauthorized("account no longer exists".into()))
    }
}
