use anyhow::{Context, Result};
use rusqlite::Connection;

// `created_at` is declared without a type so SQLite keeps whatever was
// written: integer seconds, integer milliseconds or numeric text.
pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            parent_id INTEGER,
            name TEXT NOT NULL,
            created_at,
            extra TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (parent_id) REFERENCES records(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS records_kind_parent ON records(kind, parent_id);
        CREATE INDEX IF NOT EXISTS records_parent ON records(parent_id);
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
