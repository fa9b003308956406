use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use foodlink_api::auth::hash_password;
use foodlink_db::Database;
use foodlink_engine::accounts::AccountDraft;
use foodlink_engine::{Engine, EngineSettings, SessionGate};
use foodlink_gateway::Dispatcher;
use foodlink_gateway::connection::GatewayConfig;
use foodlink_server::app::build_router;
use foodlink_types::models::{Principal, Role};

struct TestApp {
    router: Router,
    engine: Engine,
}

impl TestApp {
    fn new() -> Self {
        let engine = Engine::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(Dispatcher::new()),
            SessionGate::new("http-test-secret", 1),
            EngineSettings::default(),
        );
        Self {
            router: build_router(engine.clone(), GatewayConfig::default()),
            engine,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Register over HTTP and return (user id, token).
    async fn register(&self, role: &str, email: &str) -> (Uuid, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "name": "Test User",
                    "email": email,
                    "password": "long-enough-password",
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id = body["user_id"].as_str().unwrap().parse().unwrap();
        (id, body["token"].as_str().unwrap().to_string())
    }

    /// Administrators cannot self-register; create one directly and log in.
    async fn admin_token(&self) -> String {
        let bootstrap = Principal {
            user_id: Uuid::new_v4(),
            name: "bootstrap".into(),
            role: Role::Admin,
            verified: true,
        };
        self.engine
            .onboard(
                &bootstrap,
                AccountDraft {
                    name: "Admin".into(),
                    email: "admin@example.org".into(),
                    role: Role::Admin,
                    phone: None,
                    address: None,
                    location: None,
                },
                hash_password("admin-password").unwrap(),
                true,
            )
            .await
            .unwrap();

        let (status, body) = self
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": "admin@example.org", "password": "admin-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }
}

fn donation_body() -> Value {
    let now = Utc::now();
    json!({
        "quantity": 12.0,
        "food_type": "veg",
        "category": "perishable",
        "expiry_at": now + Duration::hours(6),
        "pickup_deadline": now + Duration::hours(2),
        "location": { "latitude": 17.385, "longitude": 78.4867 },
        "notes": "rice and dal",
    })
}

#[tokio::test]
async fn registration_rules() {
    let app = TestApp::new();
    app.register("donor", "donor@example.org").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "name": "Again",
                "email": "DONOR@example.org",
                "password": "long-enough-password",
                "role": "donor",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "name": "Boss",
                "email": "boss@example.org",
                "password": "long-enough-password",
                "role": "admin",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "name": "Short",
                "email": "short@example.org",
                "password": "short",
                "role": "receiver",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn login_and_session_checks() {
    let app = TestApp::new();
    let (id, _) = app.register("receiver", "r@example.org").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "r@example.org", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": " R@Example.org ", "password": "long-enough-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "receiver");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, _) = app.call(Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.call(Method::GET, "/users/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, me) = app.call(Method::GET, "/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], id.to_string());
    assert_eq!(me["verified"], false);
}

#[tokio::test]
async fn donation_lifecycle_over_http() {
    let app = TestApp::new();
    let admin = app.admin_token().await;
    let (_, donor) = app.register("donor", "d@example.org").await;
    let (receiver_id, receiver) = app.register("receiver", "r@example.org").await;
    let (_, rival) = app.register("receiver", "rival@example.org").await;

    let (status, created) = app
        .call(Method::POST, "/donations", Some(&donor), Some(donation_body()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_str().unwrap().to_string();

    // Receivers cannot create, and unverified receivers cannot accept.
    let (status, _) = app
        .call(Method::POST, "/donations", Some(&receiver), Some(donation_body()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let accept = format!("/donations/{}/accept", id);
    let (status, body) = app.call(Method::PUT, &accept, Some(&receiver), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "unauthorized");

    // The same token works once an administrator verifies the account.
    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/users/{}/verify", receiver_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let eta = Utc::now() + Duration::minutes(45);
    let (status, accepted) = app
        .call(
            Method::PUT,
            &accept,
            Some(&receiver),
            Some(json!({ "estimated_pickup_time": eta })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", accepted);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["receiver_id"], receiver_id.to_string());

    // A second accept is a state conflict; an unverified rival is refused on
    // role grounds whatever the state.
    let (status, body) = app.call(Method::PUT, &accept, Some(&receiver), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
    let (status, _) = app.call(Method::PUT, &accept, Some(&rival), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, picked) = app
        .call(Method::PUT, &format!("/donations/{}/confirm", id), Some(&receiver), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(picked["status"], "picked");

    let (status, _) = app
        .call(Method::PUT, &format!("/donations/{}/verify", id), Some(&donor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, verified) = app
        .call(Method::PUT, &format!("/donations/{}/verify", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["status"], "verified");

    let (status, body) = app
        .call(Method::PUT, &format!("/donations/{}/expire", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let (status, mine) = app.call(Method::GET, "/donations/mine", Some(&receiver), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, feedback) = app
        .call(
            Method::POST,
            "/feedback",
            Some(&receiver),
            Some(json!({ "donation_id": id, "rating": 5, "comment": "fresh" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", feedback);
    let (status, _) = app
        .call(
            Method::POST,
            "/feedback",
            Some(&receiver),
            Some(json!({ "donation_id": id, "rating": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, list) = app
        .call(Method::GET, &format!("/donations/{}/feedback", id), Some(&donor), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn discovery_over_http() {
    let app = TestApp::new();
    let admin = app.admin_token().await;
    let (_, donor) = app.register("donor", "d@example.org").await;
    let (receiver_id, receiver) = app.register("receiver", "r@example.org").await;
    app.call(
        Method::PUT,
        &format!("/users/{}/verify", receiver_id),
        Some(&admin),
        None,
    )
    .await;
    app.call(Method::POST, "/donations", Some(&donor), Some(donation_body()))
        .await;

    let (status, hits) = app
        .call(
            Method::GET,
            "/donations/nearby?latitude=17.3958&longitude=78.4867&max_distance=5000",
            Some(&receiver),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    let distance = hits[0]["distance_m"].as_f64().unwrap();
    assert!((distance - 1200.0).abs() < 15.0, "{}", distance);

    let (status, body) = app
        .call(
            Method::GET,
            "/donations/nearby?latitude=north&longitude=78.4867",
            Some(&receiver),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    // No coordinates and no stored location.
    let (status, _) = app
        .call(Method::GET, "/donations/nearby", Some(&receiver), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(Method::PUT, "/users/me", Some(&receiver), Some(json!({
            "location": { "latitude": 17.3958, "longitude": 78.4867 }
        })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, hits) = app
        .call(Method::GET, "/donations/nearby", Some(&receiver), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(Method::GET, "/donations/nearby?latitude=17.3&longitude=78.4", Some(&donor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_only_routes() {
    let app = TestApp::new();
    let admin = app.admin_token().await;
    let (_, donor) = app.register("donor", "d@example.org").await;

    for uri in ["/users", "/donations", "/donations/overdue", "/feedback"] {
        let (status, _) = app.call(Method::GET, uri, Some(&donor), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        let (status, _) = app.call(Method::GET, uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
    }

    let (status, onboarded) = app
        .call(
            Method::POST,
            "/users/onboard",
            Some(&admin),
            Some(json!({ "name": "Shelter", "email": "shelter@example.org", "role": "receiver" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(onboarded["user"]["verified"], true);
    let password = onboarded["generated_password"].as_str().unwrap();

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "shelter@example.org", "password": password })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            Method::GET,
            &format!("/donations/{}", Uuid::new_v4()),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
