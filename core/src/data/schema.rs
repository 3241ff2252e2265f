//! Database schema definitions

use rusqlite::Connection;

/// Creates all required database tables
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_messages_table(conn)?;
    Ok(())
}

/// Message log: one row per `(pub_key, hash)` pair.
///
/// `rowid` is the commit order; retrieval after a last-hash cursor and the
/// gossip delta both walk it. `expiration` is `timestamp + ttl` in
/// milliseconds, precomputed so the sweep can index on it.
pub fn create_messages_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            pub_key TEXT NOT NULL,
            hash TEXT NOT NULL,
            data BLOB NOT NULL,
            ttl INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            expiration INTEGER NOT NULL,
            nonce TEXT NOT NULL,
            UNIQUE(pub_key, hash)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_pub_key ON messages(pub_key)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_expiration ON messages(expiration)",
        [],
    )?;

    Ok(())
}
