use rusqlite::Connection;

use crate::error::Result;

/// Initialise the registry schema in `conn`.
///
/// Creates the `scheduled_tasks` table (one row per outstanding task) and the
/// `scheduler_state` key/value table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            task_id       INTEGER NOT NULL PRIMARY KEY,
            task_info     TEXT    NOT NULL,   -- JSON-encoded TaskInfo
            persisted     INTEGER NOT NULL DEFAULT 0,
            backend       TEXT    NOT NULL,   -- BackendKind holding the OS registration
            scheduled_at  INTEGER NOT NULL,   -- epoch millis
            registration  TEXT    NOT NULL    -- UUIDv7, new on every schedule
        ) STRICT;

        CREATE TABLE IF NOT EXISTS scheduler_state (
            key    TEXT NOT NULL PRIMARY KEY,
            value  TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
