use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use foodlink_engine::discovery::DiscoveryQuery;
use foodlink_types::api::{
    AcceptDonationRequest, CreateDonationRequest, NearbyQuery, StatusOverrideRequest,
};
use foodlink_types::models::{DonationFields, Principal};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateDonationRequest>,
) -> ApiResult<impl IntoResponse> {
    let donation = state.engine.create_donation(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

pub async fn list_all(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.all_donations(&principal).await?))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.my_donations(&principal).await?))
}

pub async fn overdue(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.overdue_donations(&principal).await?))
}

/// Pending donations near a point, nearest first.
pub async fn nearby(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(raw): Query<NearbyQuery>,
) -> ApiResult<impl IntoResponse> {
    let query = DiscoveryQuery::parse(&raw)?;
    Ok(Json(state.engine.discover(&principal, query).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_donation(&principal, id).await?))
}

pub async fn update_fields(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(fields): Json<DonationFields>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.update_fields(&principal, id, fields).await?))
}

/// The body is optional; it only carries an estimated pickup time.
pub async fn accept(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    body: Option<Json<AcceptDonationRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .accept(&principal, id, req.estimated_pickup_time)
            .await?,
    ))
}

pub async fn confirm_pickup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.confirm_pickup(&principal, id).await?))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.verify(&principal, id).await?))
}

pub async fn expire(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.expire(&principal, id).await?))
}

/// Administrator override to an explicit status.
pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<StatusOverrideRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .engine
            .request_status(&principal, id, req.status, None)
            .await?,
    ))
}
