use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('donor', 'receiver', 'admin')),
                verified    INTEGER NOT NULL DEFAULT 0,
                phone       TEXT,
                address     TEXT,
                latitude    REAL,
                longitude   REAL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE donations (
                id                      TEXT PRIMARY KEY,
                donor_id                TEXT NOT NULL REFERENCES users(id),
                receiver_id             TEXT REFERENCES users(id),
                quantity                REAL NOT NULL CHECK (quantity > 0),
                food_type               TEXT NOT NULL,
                category                TEXT NOT NULL,
                expiry_at               TEXT NOT NULL,
                pickup_deadline         TEXT NOT NULL,
                latitude                REAL NOT NULL,
                longitude               REAL NOT NULL,
                notes                   TEXT NOT NULL DEFAULT '',
                image_url               TEXT,
                status                  TEXT NOT NULL DEFAULT 'pending',
                accepted_at             TEXT,
                picked_at               TEXT,
                verified_at             TEXT,
                estimated_pickup_time   TEXT,
                actual_pickup_time      TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            -- Spatial prefilter: discovery scans pending rows inside a lat/lng box
            CREATE INDEX idx_donations_geo
                ON donations(status, latitude, longitude);

            CREATE INDEX idx_donations_donor ON donations(donor_id, created_at);
            CREATE INDEX idx_donations_receiver ON donations(receiver_id, created_at);
            CREATE INDEX idx_donations_deadline ON donations(status, pickup_deadline);

            CREATE TABLE status_history (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                donation_id TEXT NOT NULL REFERENCES donations(id),
                status      TEXT NOT NULL,
                at          TEXT NOT NULL,
                actor_id    TEXT
            );

            CREATE INDEX idx_history_donation ON status_history(donation_id, seq);

            CREATE TABLE feedback (
                id          TEXT PRIMARY KEY,
                donation_id TEXT NOT NULL REFERENCES donations(id),
                donor_id    TEXT NOT NULL REFERENCES users(id),
                receiver_id TEXT NOT NULL REFERENCES users(id),
                rating      INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment     TEXT,
                created_at  TEXT NOT NULL,
                UNIQUE(donation_id, receiver_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
