use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use foodlink_types::api::SubmitFeedbackRequest;
use foodlink_types::models::Principal;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn submit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<SubmitFeedbackRequest>,
) -> ApiResult<impl IntoResponse> {
    let feedback = state.engine.submit_feedback(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn for_donation(
    State(state): State<AppState>,
    Path(donation_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .engine
            .feedback_for_donation(&principal, donation_id)
            .await?,
    ))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.my_feedback(&principal).await?))
}

pub async fn all(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.all_feedback(&principal).await?))
}
