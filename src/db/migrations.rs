use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 2;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            chat_id INTEGER,
            analyzed_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS file_metadata (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            field TEXT NOT NULL,
            value TEXT NOT NULL,
            UNIQUE(file_id, field),
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_file_metadata_file ON file_metadata(file_id);
        CREATE INDEX IF NOT EXISTS idx_file_metadata_field ON file_metadata(field);

        CREATE TABLE IF NOT EXISTS fields (
            field TEXT PRIMARY KEY,
            kind TEXT NOT NULL
        );
        COMMIT;
        ",
    )?;

    let existing: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    if existing < 2 {
        // Migration 2 added the fields registry; backfill kinds for stores
        // created before it by marking every known field as a string.
        conn.execute(
            "INSERT OR IGNORE INTO fields(field, kind)
             SELECT DISTINCT field, 'string' FROM file_metadata",
            [],
        )?;
    }

    if existing < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}
