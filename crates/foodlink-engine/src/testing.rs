//! Fixtures shared by the unit tests in this crate.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use foodlink_db::Database;
use foodlink_db::models::NewUser;
use foodlink_types::events::{Audience, ServerEvent};
use foodlink_types::models::{
    Category, Donation, DonationStatus, FoodType, GeoPoint, PickupDetails, Principal, Role,
};

use crate::directory::{ChannelDirectory, ConnectionId};
use crate::service::{Engine, EngineSettings};
use crate::session::SessionGate;

pub fn principal(role: Role, verified: bool) -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        name: format!("test-{}", role),
        role,
        verified,
    }
}

pub fn donation(status: DonationStatus, receiver_id: Option<Uuid>) -> Donation {
    let now = Utc::now();
    Donation {
        id: Uuid::new_v4(),
        donor_id: Uuid::new_v4(),
        donor_name: "donor".into(),
        receiver_id,
        receiver_name: receiver_id.map(|_| "receiver".into()),
        quantity: 5.0,
        food_type: FoodType::Veg,
        category: Category::Perishable,
        expiry_at: now + Duration::hours(6),
        pickup_deadline: now + Duration::hours(2),
        location: GeoPoint::new(17.385, 78.4867),
        notes: String::new(),
        image_url: None,
        status,
        status_history: Vec::new(),
        pickup: PickupDetails::default(),
        created_at: now,
        updated_at: now,
    }
}

/// Captures every delivery instead of pushing it to sockets.
#[derive(Default)]
pub struct RecordingDirectory {
    pub deliveries: Mutex<Vec<(Vec<Audience>, ServerEvent)>>,
}

impl RecordingDirectory {
    pub fn take(&self) -> Vec<(Vec<Audience>, ServerEvent)> {
        std::mem::take(&mut *self.deliveries.lock().unwrap())
    }
}

#[async_trait]
impl ChannelDirectory for RecordingDirectory {
    async fn register(&self, _principal: &Principal) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (_tx, rx) = mpsc::unbounded_channel();
        (Uuid::new_v4(), rx)
    }

    async fn unregister(&self, _conn_id: ConnectionId) {}

    async fn join(&self, _conn_id: ConnectionId, _audience: Audience) -> bool {
        true
    }

    async fn leave(&self, _conn_id: ConnectionId, _audience: Audience) -> bool {
        true
    }

    async fn lookup(&self, _audience: Audience) -> Vec<ConnectionId> {
        Vec::new()
    }

    async fn send_to_connection(&self, _conn_id: ConnectionId, _event: ServerEvent) -> bool {
        true
    }

    async fn deliver(&self, audiences: &[Audience], event: &ServerEvent) -> usize {
        self.deliveries
            .lock()
            .unwrap()
            .push((audiences.to_vec(), event.clone()));
        audiences.len()
    }
}

pub fn engine() -> (Engine, Arc<RecordingDirectory>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let directory = Arc::new(RecordingDirectory::default());
    let engine = Engine::new(
        db,
        directory.clone(),
        SessionGate::new("test-secret", 1),
        EngineSettings::default(),
    );
    (engine, directory)
}

/// Insert a user row and return the matching principal.
pub async fn seed_user(
    engine: &Engine,
    role: Role,
    verified: bool,
    location: Option<GeoPoint>,
) -> Principal {
    let new = NewUser {
        id: Uuid::new_v4(),
        name: format!("{}-{}", role, Uuid::new_v4().simple()),
        email: format!("{}@example.org", Uuid::new_v4()),
        password_hash: "x".into(),
        role,
        verified,
        phone: None,
        address: None,
        location,
        created_at: Utc::now(),
    };
    let principal = Principal {
        user_id: new.id,
        name: new.name.clone(),
        role,
        verified,
    };
    engine.store(move |db| db.create_user(&new)).await.unwrap();
    principal
}
