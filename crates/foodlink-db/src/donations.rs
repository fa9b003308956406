use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use tracing::debug;
use uuid::Uuid;

use foodlink_types::models::{
    Donation, DonationStatus, GeoPoint, NearbyDonation, PickupDetails, StatusHistoryEntry,
};

use crate::Database;
use crate::codec::{self, fmt_opt_ts, fmt_ts};
use crate::geo::{BoundingBox, haversine_m};
use crate::models::{FieldWrite, GeoQuery, NewDonation, StatusWrite};
use crate::queries::OptionalExt;

const DONATION_SELECT: &str = "
    SELECT d.id, d.donor_id, du.name, d.receiver_id, ru.name, d.quantity, d.food_type,
           d.category, d.expiry_at, d.pickup_deadline, d.latitude, d.longitude, d.notes,
           d.image_url, d.status, d.accepted_at, d.picked_at, d.verified_at,
           d.estimated_pickup_time, d.actual_pickup_time, d.created_at, d.updated_at
    FROM donations d
    JOIN users du ON du.id = d.donor_id
    LEFT JOIN users ru ON ru.id = d.receiver_id";

impl Database {
    /// Insert a new pending donation together with its first history entry.
    pub fn insert_donation(&self, new: &NewDonation) -> Result<Donation> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created = fmt_ts(&new.created_at);
            tx.execute(
                "INSERT INTO donations
                    (id, donor_id, quantity, food_type, category, expiry_at, pickup_deadline,
                     latitude, longitude, notes, image_url, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?12)",
                params![
                    new.id.to_string(),
                    new.donor_id.to_string(),
                    new.quantity,
                    new.food_type.as_str(),
                    new.category.as_str(),
                    fmt_ts(&new.expiry_at),
                    fmt_ts(&new.pickup_deadline),
                    new.location.latitude,
                    new.location.longitude,
                    new.notes,
                    new.image_url,
                    created,
                ],
            )?;
            append_history(
                &tx,
                new.id,
                DonationStatus::Pending,
                &new.created_at,
                Some(new.donor_id),
            )?;

            let donation = load_donation(&tx, new.id)?
                .ok_or_else(|| anyhow::anyhow!("donation {} vanished after insert", new.id))?;
            tx.commit()?;
            Ok(donation)
        })
    }

    pub fn get_donation(&self, id: Uuid) -> Result<Option<Donation>> {
        self.with_conn(|conn| load_donation(conn, id))
    }

    pub fn donations_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>> {
        self.with_conn(|conn| {
            load_donations(
                conn,
                "WHERE d.donor_id = ?1 ORDER BY d.created_at DESC",
                params![donor_id.to_string()],
            )
        })
    }

    pub fn donations_by_receiver(&self, receiver_id: Uuid) -> Result<Vec<Donation>> {
        self.with_conn(|conn| {
            load_donations(
                conn,
                "WHERE d.receiver_id = ?1 ORDER BY d.created_at DESC",
                params![receiver_id.to_string()],
            )
        })
    }

    pub fn all_donations(&self) -> Result<Vec<Donation>> {
        self.with_conn(|conn| load_donations(conn, "ORDER BY d.created_at DESC", params![]))
    }

    /// Donations still pending or accepted whose expiry window or pickup
    /// deadline is already behind `now`.
    pub fn overdue_donations(&self, now: &DateTime<Utc>) -> Result<Vec<Donation>> {
        self.with_conn(|conn| {
            load_donations(
                conn,
                "WHERE d.status IN ('pending', 'accepted')
                   AND (d.expiry_at < ?1 OR d.pickup_deadline < ?1)
                 ORDER BY d.pickup_deadline",
                params![fmt_ts(now)],
            )
        })
    }

    /// Ids of pending/accepted donations whose pickup deadline has passed.
    pub fn expirable_donation_ids(&self, now: &DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM donations
                 WHERE status IN ('pending', 'accepted') AND pickup_deadline < ?1
                 ORDER BY pickup_deadline",
            )?;
            let ids = stmt
                .query_map([fmt_ts(now)], |row| codec::uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Atomically apply a status change if the row still satisfies the write's
    /// guards. Status, receiver, pickup stamps and the history entry commit
    /// together. Returns `None` when a guard no longer holds.
    pub fn compare_and_set_status(&self, write: &StatusWrite) -> Result<Option<Donation>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let at = fmt_ts(&write.at);
            let stamps = &write.stamps;

            let changed = tx.execute(
                "UPDATE donations SET
                    status = ?1,
                    receiver_id = COALESCE(receiver_id, ?2),
                    accepted_at = COALESCE(accepted_at, ?3),
                    picked_at = COALESCE(picked_at, ?4),
                    verified_at = COALESCE(verified_at, ?5),
                    estimated_pickup_time = COALESCE(estimated_pickup_time, ?6),
                    actual_pickup_time = COALESCE(actual_pickup_time, ?7),
                    updated_at = ?8
                 WHERE id = ?9
                   AND status = ?10
                   AND (?11 IS NULL OR receiver_id = ?11)
                   AND (?12 = 0 OR receiver_id IS NULL)",
                params![
                    write.new_status.as_str(),
                    write.assign_receiver.map(|id| id.to_string()),
                    fmt_opt_ts(stamps.accepted_at.as_ref()),
                    fmt_opt_ts(stamps.picked_at.as_ref()),
                    fmt_opt_ts(stamps.verified_at.as_ref()),
                    fmt_opt_ts(stamps.estimated_pickup_time.as_ref()),
                    fmt_opt_ts(stamps.actual_pickup_time.as_ref()),
                    at,
                    write.donation_id.to_string(),
                    write.expected_status.as_str(),
                    write.expected_receiver.map(|id| id.to_string()),
                    write.require_unassigned,
                ],
            )?;

            if changed == 0 {
                debug!(
                    "Status write {} -> {} on {} lost its guard",
                    write.expected_status, write.new_status, write.donation_id
                );
                return Ok(None);
            }

            append_history(
                &tx,
                write.donation_id,
                write.new_status,
                &write.at,
                write.actor_id,
            )?;

            let donation = load_donation(&tx, write.donation_id)?;
            tx.commit()?;
            Ok(donation)
        })
    }

    /// Apply a donor's metadata edit. Returns `None` when the caller is not
    /// the donor or the donation is no longer editable.
    pub fn update_donation_fields(&self, write: &FieldWrite) -> Result<Option<Donation>> {
        self.with_conn_mut(|conn| {
            let fields = &write.fields;
            let changed = conn.execute(
                "UPDATE donations SET
                    food_type = COALESCE(?1, food_type),
                    category = COALESCE(?2, category),
                    expiry_at = COALESCE(?3, expiry_at),
                    pickup_deadline = COALESCE(?4, pickup_deadline),
                    notes = COALESCE(?5, notes),
                    updated_at = ?6
                 WHERE id = ?7 AND donor_id = ?8 AND status IN ('pending', 'accepted')",
                params![
                    fields.food_type.map(|f| f.as_str()),
                    fields.category.map(|c| c.as_str()),
                    fmt_opt_ts(fields.expiry_at.as_ref()),
                    fmt_opt_ts(fields.pickup_deadline.as_ref()),
                    fields.notes,
                    fmt_ts(&write.at),
                    write.donation_id.to_string(),
                    write.donor_id.to_string(),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            load_donation(conn, write.donation_id)
        })
    }

    /// Geo index lookup: donations in `query.status` within `query.radius_m`
    /// of the origin, nearest first. Equal distances keep insertion order.
    pub fn find_within(&self, query: &GeoQuery) -> Result<Vec<NearbyDonation>> {
        let bbox = BoundingBox::around(&query.origin, query.radius_m);

        let candidates = self.with_conn(|conn| {
            let (lng_lo, lng_hi) = bbox.lng.unwrap_or((-180.0, 180.0));
            let sql = format!(
                "{} WHERE d.status = ?1
                      AND d.latitude BETWEEN ?2 AND ?3
                      AND d.longitude BETWEEN ?4 AND ?5
                    ORDER BY d.rowid",
                DONATION_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        query.status.as_str(),
                        bbox.min_lat,
                        bbox.max_lat,
                        lng_lo,
                        lng_hi
                    ],
                    donation_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut hits: Vec<NearbyDonation> = candidates
            .into_iter()
            .filter_map(|donation| {
                let distance_m = haversine_m(&query.origin, &donation.location);
                (distance_m <= query.radius_m).then(|| NearbyDonation {
                    donation: donation.summary(),
                    distance_m,
                })
            })
            .collect();

        // Stable: ties stay in rowid (creation) order.
        hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(hits)
    }
}

fn append_history(
    conn: &Connection,
    donation_id: Uuid,
    status: DonationStatus,
    at: &DateTime<Utc>,
    actor_id: Option<Uuid>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO status_history (donation_id, status, at, actor_id) VALUES (?1, ?2, ?3, ?4)",
        params![
            donation_id.to_string(),
            status.as_str(),
            fmt_ts(at),
            actor_id.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

fn load_donation(conn: &Connection, id: Uuid) -> Result<Option<Donation>> {
    let sql = format!("{} WHERE d.id = ?1", DONATION_SELECT);
    let donation = conn
        .query_row(&sql, [id.to_string()], donation_from_row)
        .optional()?;

    match donation {
        Some(mut donation) => {
            donation.status_history = load_history(conn, &[donation.id])?
                .remove(&donation.id)
                .unwrap_or_default();
            Ok(Some(donation))
        }
        None => Ok(None),
    }
}

fn load_donations(
    conn: &Connection,
    clause: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Donation>> {
    let sql = format!("{} {}", DONATION_SELECT, clause);
    let mut stmt = conn.prepare(&sql)?;
    let mut donations = stmt
        .query_map(params, donation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Batch-fetch history for the whole page instead of one query per row
    let ids: Vec<Uuid> = donations.iter().map(|d| d.id).collect();
    let mut history = load_history(conn, &ids)?;
    for donation in &mut donations {
        donation.status_history = history.remove(&donation.id).unwrap_or_default();
    }
    Ok(donations)
}

fn load_history(
    conn: &Connection,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<StatusHistoryEntry>>> {
    let mut by_donation: HashMap<Uuid, Vec<StatusHistoryEntry>> = HashMap::new();
    if ids.is_empty() {
        return Ok(by_donation);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT donation_id, status, at, actor_id FROM status_history
         WHERE donation_id IN ({})
         ORDER BY seq",
        placeholders.join(", ")
    );

    let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> = id_strings
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((
            codec::uuid(row, 0)?,
            StatusHistoryEntry {
                status: codec::parsed(row, 1)?,
                at: codec::ts(row, 2)?,
                actor_id: codec::opt_uuid(row, 3)?,
            },
        ))
    })?;

    for row in rows {
        let (donation_id, entry) = row?;
        by_donation.entry(donation_id).or_default().push(entry);
    }
    Ok(by_donation)
}

fn donation_from_row(row: &Row<'_>) -> rusqlite::Result<Donation> {
    Ok(Donation {
        id: codec::uuid(row, 0)?,
        donor_id: codec::uuid(row, 1)?,
        donor_name: row.get(2)?,
        receiver_id: codec::opt_uuid(row, 3)?,
        receiver_name: row.get(4)?,
        quantity: row.get(5)?,
        food_type: codec::parsed(row, 6)?,
        category: codec::parsed(row, 7)?,
        expiry_at: codec::ts(row, 8)?,
        pickup_deadline: codec::ts(row, 9)?,
        location: GeoPoint::new(row.get(10)?, row.get(11)?),
        notes: row.get(12)?,
        image_url: row.get(13)?,
        status: codec::parsed(row, 14)?,
        status_history: Vec::new(),
        pickup: PickupDetails {
            accepted_at: codec::opt_ts(row, 15)?,
            picked_at: codec::opt_ts(row, 16)?,
            verified_at: codec::opt_ts(row, 17)?,
            estimated_pickup_time: codec::opt_ts(row, 18)?,
            actual_pickup_time: codec::opt_ts(row, 19)?,
        },
        created_at: codec::ts(row, 20)?,
        updated_at: codec::ts(row, 21)?,
    })
}
