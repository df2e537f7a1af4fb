use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the pending (`scheduled_jobs`) and history (`past_jobs`) tables
/// (idempotent). The `(status, scheduled_at)` index backs the due-job query.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            client_name   TEXT    NOT NULL CHECK (length(client_name) > 0),
            job_name      TEXT    NOT NULL CHECK (length(job_name) > 0),
            job_type      TEXT    NOT NULL CHECK (job_type IN ('post', 'video', 'whatsapp')),
            payload       TEXT    NOT NULL DEFAULT '{}',   -- opaque JSON
            media_url     TEXT,
            scheduled_at  TEXT    NOT NULL,                -- RFC 3339, UTC, millis
            status        TEXT    NOT NULL DEFAULT 'to_do'
                          CHECK (status IN ('to_do', 'in_progress')),
            attempts      INTEGER NOT NULL DEFAULT 0,
            claimed_at    TEXT,
            created_at    TEXT    NOT NULL
        ) STRICT;

        -- SELECT … WHERE status = 'to_do' AND scheduled_at <= ? ORDER BY scheduled_at
        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due
            ON scheduled_jobs (status, scheduled_at);

        CREATE TABLE IF NOT EXISTS past_jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            client_name   TEXT    NOT NULL,
            job_name      TEXT    NOT NULL,
            job_type      TEXT    NOT NULL,
            payload       TEXT    NOT NULL DEFAULT '{}',
            media_url     TEXT,
            status        TEXT    NOT NULL CHECK (status IN ('delivered', 'failed')),
            error         TEXT,
            attempts      INTEGER NOT NULL DEFAULT 0,
            scheduled_at  TEXT    NOT NULL,
            created_at    TEXT    NOT NULL,
            delivered_at  TEXT    NOT NULL,
            CHECK ((status = 'failed') = (error IS NOT NULL))
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_past_jobs_delivered_at
            ON past_jobs (delivered_at);
        ",
    )?;
    Ok(())
}

/// Fixed-width UTC timestamp so text comparison orders chronologically.
pub(crate) fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_db_time(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
