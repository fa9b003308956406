use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use rand::{Rng, distr::Alphanumeric};
use tracing::{info, warn};

use foodlink_engine::Engine;
use foodlink_engine::accounts::AccountDraft;
use foodlink_types::FoodlinkError;
use foodlink_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Engine,
}

const MIN_PASSWORD_LEN: usize = 8;
const GENERATED_PASSWORD_LEN: usize = 16;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(FoodlinkError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }

    let password_hash = hash_password(&req.password)?;
    let user = state
        .engine
        .register(
            AccountDraft {
                name: req.name,
                email: req.email,
                role: req.role,
                phone: req.phone,
                address: req.address,
                location: req.location,
            },
            password_hash,
        )
        .await?;

    let token = state.engine.session().issue(&user)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let credentials = state
        .engine
        .credentials(&req.email)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    if !verify_password(&req.password, &credentials.password_hash) {
        warn!("Failed login for {}", credentials.user.email);
        return Err(ApiError::Unauthenticated);
    }

    let user = credentials.user;
    let token = state.engine.session().issue(&user)?;
    info!("{} ({}) logged in", user.name, user.role);

    Ok(Json(LoginResponse {
        user_id: user.id,
        name: user.name,
        role: user.role,
        token,
    }))
}

/// Argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> Result<String, FoodlinkError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            warn!("Password hashing failed: {}", e);
            FoodlinkError::ServiceUnavailable("could not hash password".into())
        })
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Random password handed back once when an administrator onboards a user.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
