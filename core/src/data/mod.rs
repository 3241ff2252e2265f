//! SQLite persistence
//!
//! The message log lives in `storage.db` under the data directory. All
//! access goes through free functions taking a `Connection`; the supervisor
//! serializes callers behind one shared handle.

pub mod messages;
pub mod schema;

use std::path::Path;

use rusqlite::Connection;

pub use messages::{
    cleanup_expired, delete_message, find_message_by_hash, get_all_messages, last_rowid,
    message_count, messages_since_rowid, retrieve_messages, store_message,
};
pub use schema::create_all_tables;

/// Current Unix time in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Open (or create) the message database and ensure the schema exists.
pub fn start_db(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    create_all_tables(&conn)?;
    Ok(conn)
}

/// In-memory database for tests and ephemeral runs.
pub fn start_db_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    create_all_tables(&conn)?;
    Ok(conn)
}
