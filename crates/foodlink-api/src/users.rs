use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use foodlink_engine::accounts::AccountDraft;
use foodlink_types::api::{OnboardUserRequest, OnboardUserResponse, UpdateProfileRequest};
use foodlink_types::models::Principal;

use crate::auth::{AppState, generate_password, hash_password};
use crate::error::ApiResult;

pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.profile(&principal).await?))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.update_profile(&principal, req).await?))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.list_users(&principal).await?))
}

/// Administrator-created account. The generated password is returned once.
pub async fn onboard(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<OnboardUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let generated_password = generate_password();
    let password_hash = hash_password(&generated_password)?;

    let user = state
        .engine
        .onboard(
            &principal,
            AccountDraft {
                name: req.name,
                email: req.email,
                role: req.role,
                phone: None,
                address: None,
                location: None,
            },
            password_hash,
            req.verified,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OnboardUserResponse {
            user,
            generated_password,
        }),
    ))
}

pub async fn verify_receiver(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.verify_receiver(&principal, user_id).await?))
}
