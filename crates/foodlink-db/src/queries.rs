use anyhow::Result;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use foodlink_types::models::{Feedback, GeoPoint, User};

use crate::Database;
use crate::codec::{self, fmt_ts};
use crate::models::{NewUser, ProfileUpdate, UserCredentials};

const USER_COLUMNS: &str =
    "id, name, email, role, verified, phone, address, latitude, longitude, created_at";

const FEEDBACK_COLUMNS: &str =
    "id, donation_id, donor_id, receiver_id, rating, comment, created_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns false when the email is already registered.
    pub fn create_user(&self, user: &NewUser) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users
                    (id, name, email, password, role, verified, phone, address, latitude, longitude, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.verified,
                    user.phone,
                    user.address,
                    user.location.map(|l| l.latitude),
                    user.location.map(|l| l.longitude),
                    fmt_ts(&user.created_at),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {}, password FROM users WHERE email = ?1", USER_COLUMNS);
            let row = conn
                .query_row(&sql, [email], |row| {
                    Ok(UserCredentials {
                        user: user_from_row(row)?,
                        password_hash: row.get(10)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY created_at", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<User>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    name = COALESCE(?1, name),
                    phone = COALESCE(?2, phone),
                    address = COALESCE(?3, address),
                    latitude = COALESCE(?4, latitude),
                    longitude = COALESCE(?5, longitude)
                 WHERE id = ?6",
                params![
                    update.name,
                    update.phone,
                    update.address,
                    update.location.map(|l| l.latitude),
                    update.location.map(|l| l.longitude),
                    id.to_string(),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user_by_id(conn, id)
        })
    }

    /// Flip a receiver's verification flag. Returns `None` when the id does
    /// not name a receiver.
    pub fn set_receiver_verified(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET verified = 1 WHERE id = ?1 AND role = 'receiver'",
                [id.to_string()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user_by_id(conn, id)
        })
    }

    // -- Feedback --

    /// Insert feedback. Returns false when this receiver already rated the
    /// donation.
    pub fn insert_feedback(&self, feedback: &Feedback) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO feedback
                    (id, donation_id, donor_id, receiver_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    feedback.id.to_string(),
                    feedback.donation_id.to_string(),
                    feedback.donor_id.to_string(),
                    feedback.receiver_id.to_string(),
                    feedback.rating,
                    feedback.comment,
                    fmt_ts(&feedback.created_at),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn feedback_for_donation(&self, donation_id: Uuid) -> Result<Vec<Feedback>> {
        self.query_feedback("WHERE donation_id = ?1", Some(donation_id))
    }

    pub fn feedback_by_donor(&self, donor_id: Uuid) -> Result<Vec<Feedback>> {
        self.query_feedback("WHERE donor_id = ?1", Some(donor_id))
    }

    pub fn feedback_by_receiver(&self, receiver_id: Uuid) -> Result<Vec<Feedback>> {
        self.query_feedback("WHERE receiver_id = ?1", Some(receiver_id))
    }

    pub fn all_feedback(&self) -> Result<Vec<Feedback>> {
        self.query_feedback("", None)
    }

    fn query_feedback(&self, filter: &str, id: Option<Uuid>) -> Result<Vec<Feedback>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM feedback {} ORDER BY created_at",
                FEEDBACK_COLUMNS, filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = match id {
                Some(id) => stmt
                    .query_map([id.to_string()], feedback_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], feedback_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], user_from_row)
        .optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let latitude: Option<f64> = row.get(7)?;
    let longitude: Option<f64> = row.get(8)?;
    Ok(User {
        id: codec::uuid(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: codec::parsed(row, 3)?,
        verified: row.get(4)?,
        phone: row.get(5)?,
        address: row.get(6)?,
        location: latitude
            .zip(longitude)
            .map(|(lat, lng)| GeoPoint::new(lat, lng)),
        created_at: codec::ts(row, 9)?,
    })
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<Feedback> {
    Ok(Feedback {
        id: codec::uuid(row, 0)?,
        donation_id: codec::uuid(row, 1)?,
        donor_id: codec::uuid(row, 2)?,
        receiver_id: codec::uuid(row, 3)?,
        rating: row.get(4)?,
        comment: row.get(5)?,
        created_at: codec::ts(row, 6)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foodlink_types::models::Role;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            name: "Asha".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role,
            verified: false,
            phone: None,
            address: None,
            location: Some(GeoPoint::new(17.385, 78.4867)),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_user(&new_user("a@example.org", Role::Donor)).unwrap());
        assert!(!db.create_user(&new_user("a@example.org", Role::Receiver)).unwrap());
    }

    #[test]
    fn credentials_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("b@example.org", Role::Receiver);
        db.create_user(&user).unwrap();

        let creds = db.get_credentials_by_email("b@example.org").unwrap().unwrap();
        assert_eq!(creds.user.id, user.id);
        assert_eq!(creds.user.role, Role::Receiver);
        assert_eq!(creds.password_hash, "hash");
        assert_eq!(creds.user.location, Some(GeoPoint::new(17.385, 78.4867)));
        assert!(db.get_credentials_by_email("nobody@example.org").unwrap().is_none());
    }

    #[test]
    fn only_receivers_can_be_verified() {
        let db = Database::open_in_memory().unwrap();
        let donor = new_user("d@example.org", Role::Donor);
        let receiver = new_user("r@example.org", Role::Receiver);
        db.create_user(&donor).unwrap();
        db.create_user(&receiver).unwrap();

        assert!(db.set_receiver_verified(donor.id).unwrap().is_none());
        let verified = db.set_receiver_verified(receiver.id).unwrap().unwrap();
        assert!(verified.verified);
        // Idempotent.
        assert!(db.set_receiver_verified(receiver.id).unwrap().is_some());
    }

    #[test]
    fn profile_update_keeps_unset_fields() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("p@example.org", Role::Donor);
        db.create_user(&user).unwrap();

        let updated = db
            .update_profile(
                user.id,
                &ProfileUpdate {
                    phone: Some("+91 98765 43210".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Asha");
        assert_eq!(updated.phone.as_deref(), Some("+91 98765 43210"));
        assert!(db.update_profile(Uuid::new_v4(), &ProfileUpdate::default()).unwrap().is_none());
    }
}
