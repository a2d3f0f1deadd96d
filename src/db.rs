use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const LOCAL_DB_FILE: &str = "attendbook.sqlite3";
pub const SHEET_DB_FILE: &str = "sheet.sqlite3";

/// Device-local store: serialized ledger state and small settings blobs.
pub fn open_local_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(LOCAL_DB_FILE))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    Ok(conn)
}

/// The remote ledger: roster rows and submitted attendance rows.
pub fn open_sheet_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roster(
            student_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            app_number TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_sort ON roster(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_rows(
            id TEXT PRIMARY KEY,
            date_key TEXT NOT NULL,
            batch_key TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            app_number TEXT NOT NULL,
            status TEXT NOT NULL,
            time TEXT NOT NULL,
            UNIQUE(date_key, batch_key, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_rows_date ON attendance_rows(date_key)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS proofs(
            date_key TEXT NOT NULL,
            batch_key TEXT NOT NULL,
            url TEXT NOT NULL,
            PRIMARY KEY(date_key, batch_key)
        )",
        [],
    )?;
    Ok(conn)
}

/// Raw JSON text stored under `key`; decoding is left to the caller.
pub fn settings_get_raw(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value_json FROM settings WHERE key = ?",
        [key],
        |r| r.get(0),
    )
    .optional()
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    let now = chrono::Local::now().to_rfc3339();
    conn.execute(
        "INSERT INTO settings(key, value_json, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value_json = excluded.value_json,
           updated_at = excluded.updated_at",
        (key, value.to_string(), now),
    )?;
    Ok(())
}
