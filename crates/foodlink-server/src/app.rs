use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use foodlink_api::auth::{self, AppState, AppStateInner};
use foodlink_api::error::ApiError;
use foodlink_api::middleware::require_auth;
use foodlink_api::{donations, feedback, users};
use foodlink_engine::Engine;
use foodlink_gateway::connection::{self, GatewayConfig};

#[derive(Clone)]
struct ServerState {
    engine: Engine,
    gateway: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Full HTTP surface: REST routes, the `/gateway` WebSocket and `/health`.
pub fn build_router(engine: Engine, gateway: GatewayConfig) -> Router {
    let app_state: AppState = Arc::new(AppStateInner {
        engine: engine.clone(),
    });

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/donations", post(donations::create).get(donations::list_all))
        .route("/donations/mine", get(donations::mine))
        .route("/donations/nearby", get(donations::nearby))
        .route("/donations/overdue", get(donations::overdue))
        .route(
            "/donations/{id}",
            get(donations::get).patch(donations::update_fields),
        )
        .route("/donations/{id}/accept", put(donations::accept))
        .route("/donations/{id}/confirm", put(donations::confirm_pickup))
        .route("/donations/{id}/verify", put(donations::verify))
        .route("/donations/{id}/expire", put(donations::expire))
        .route("/donations/{id}/status", put(donations::set_status))
        .route("/donations/{id}/feedback", get(feedback::for_donation))
        .route("/users", get(users::list))
        .route("/users/me", get(users::me).put(users::update_me))
        .route("/users/onboard", post(users::onboard))
        .route("/users/{id}/verify", put(users::verify_receiver))
        .route("/feedback", post(feedback::submit).get(feedback::all))
        .route("/feedback/mine", get(feedback::mine))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(ServerState { engine, gateway });

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// A `?token=` query authenticates before the upgrade; otherwise the client
/// must send `Identify` as its first frame.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ServerState { engine, gateway } = state;

    match query.token {
        Some(token) => match engine.authenticate(&token).await {
            Ok(principal) => ws
                .on_upgrade(move |socket| {
                    connection::handle_connection_authenticated(socket, engine, principal, gateway)
                })
                .into_response(),
            Err(e) => {
                warn!("WebSocket upgrade rejected: {}", e);
                ApiError::Unauthenticated.into_response()
            }
        },
        None => ws
            .on_upgrade(move |socket| connection::handle_connection(socket, engine, gateway))
            .into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
