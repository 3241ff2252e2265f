//! Message log data layer
//!
//! Commit order is the SQLite rowid. For a fixed recipient, retrieval after
//! a last-hash cursor returns strictly later rows; duplicate inserts are
//! no-ops by the `(pub_key, hash)` unique constraint. Expiry is lazy: rows
//! past their expiration are filtered from reads and purged by the sweep.

use rusqlite::{params, Connection, OptionalExtension};

use crate::node::types::Message;

fn parse_message_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        pub_key: row.get(0)?,
        hash: row.get(1)?,
        data: row.get(2)?,
        ttl: row.get::<_, i64>(3)? as u64,
        timestamp: row.get::<_, i64>(4)? as u64,
        nonce: row.get(5)?,
    })
}

const MESSAGE_COLUMNS: &str = "pub_key, hash, data, ttl, timestamp, nonce";

/// Insert a message. Returns true if a new row was committed, false if the
/// `(pub_key, hash)` pair already existed.
pub fn store_message(conn: &Connection, msg: &Message) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO messages (pub_key, hash, data, ttl, timestamp, expiration, nonce)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            msg.pub_key,
            msg.hash,
            msg.data,
            msg.ttl as i64,
            msg.timestamp as i64,
            msg.expiration() as i64,
            msg.nonce,
        ],
    )?;
    Ok(inserted > 0)
}

/// Messages for `pub_key` committed strictly after the row identified by
/// `last_hash`, oldest first. An empty or unknown `last_hash` returns every
/// live message for the recipient.
pub fn retrieve_messages(
    conn: &Connection,
    pub_key: &str,
    last_hash: &str,
    now_ms: u64,
) -> rusqlite::Result<Vec<Message>> {
    let cursor: i64 = if last_hash.is_empty() {
        0
    } else {
        conn.query_row(
            "SELECT rowid FROM messages WHERE pub_key = ?1 AND hash = ?2",
            params![pub_key, last_hash],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE pub_key = ?1 AND rowid > ?2 AND expiration > ?3
         ORDER BY rowid ASC"
    ))?;

    let messages = stmt
        .query_map(params![pub_key, cursor, now_ms as i64], parse_message_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

/// Every live message in commit order, with its rowid. `after_rowid = 0`
/// starts from the beginning. Feeds the gossip delta and the salvage scan.
pub fn messages_since_rowid(
    conn: &Connection,
    after_rowid: i64,
    now_ms: u64,
    limit: usize,
) -> rusqlite::Result<Vec<(i64, Message)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT rowid, {MESSAGE_COLUMNS} FROM messages
         WHERE rowid > ?1 AND expiration > ?2
         ORDER BY rowid ASC
         LIMIT ?3"
    ))?;

    let limit = limit.min(i64::MAX as usize) as i64;
    let rows = stmt
        .query_map(params![after_rowid, now_ms as i64, limit], |row| {
            let rowid: i64 = row.get(0)?;
            let msg = Message {
                pub_key: row.get(1)?,
                hash: row.get(2)?,
                data: row.get(3)?,
                ttl: row.get::<_, i64>(4)? as u64,
                timestamp: row.get::<_, i64>(5)? as u64,
                nonce: row.get(6)?,
            };
            Ok((rowid, msg))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Every message, expired or not. Integration-test only.
pub fn get_all_messages(conn: &Connection) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY rowid ASC"
    ))?;
    let messages = stmt
        .query_map([], parse_message_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Look up a message by hash alone. Used by storage tests, where the tester
/// only knows the hash.
pub fn find_message_by_hash(conn: &Connection, hash: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE hash = ?1"),
        params![hash],
        parse_message_row,
    )
    .optional()
}

/// Delete one message. Returns whether a row was removed.
pub fn delete_message(conn: &Connection, pub_key: &str, hash: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM messages WHERE pub_key = ?1 AND hash = ?2",
        params![pub_key, hash],
    )?;
    Ok(rows > 0)
}

/// Purge expired rows. Returns the number removed.
pub fn cleanup_expired(conn: &Connection, now_ms: u64) -> rusqlite::Result<usize> {
    let rows = conn.execute(
        "DELETE FROM messages WHERE expiration <= ?1",
        params![now_ms as i64],
    )?;
    Ok(rows)
}

/// Highest committed rowid, or 0 for an empty log.
pub fn last_rowid(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(rowid), 0) FROM messages",
        [],
        |row| row.get(0),
    )
}

/// Total rows in the log (live and expired).
pub fn message_count(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM messages", [], |row| {
        row.get::<_, i64>(0).map(|n| n as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_db_in_memory;

    fn test_message(pk: &str, hash: &str, ts: u64, ttl: u64) -> Message {
        Message {
            pub_key: pk.to_string(),
            hash: hash.to_string(),
            data: format!("payload-{}", hash).into_bytes(),
            ttl,
            timestamp: ts,
            nonce: "nonce".to_string(),
        }
    }

    #[test]
    fn test_store_and_retrieve() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        let msg = test_message(&pk, "h1", 1000, 60_000);

        assert!(store_message(&conn, &msg).unwrap());

        let got = retrieve_messages(&conn, &pk, "", 2000).unwrap();
        assert_eq!(got, vec![msg]);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        let msg = test_message(&pk, "h1", 1000, 60_000);

        assert!(store_message(&conn, &msg).unwrap());
        assert!(!store_message(&conn, &msg).unwrap());
        assert_eq!(message_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_retrieve_after_last_hash() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        for i in 1..=4 {
            store_message(&conn, &test_message(&pk, &format!("h{}", i), 1000, 60_000)).unwrap();
        }

        let got = retrieve_messages(&conn, &pk, "h2", 2000).unwrap();
        let hashes: Vec<&str> = got.iter().map(|m| m.hash.as_str()).collect();
        assert_eq!(hashes, vec!["h3", "h4"]);
    }

    #[test]
    fn test_retrieve_unknown_last_hash_returns_all() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        store_message(&conn, &test_message(&pk, "h1", 1000, 60_000)).unwrap();

        let got = retrieve_messages(&conn, &pk, "missing", 2000).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn test_retrieve_filters_other_recipients() {
        let conn = start_db_in_memory().unwrap();
        let pk_a = "aa".repeat(32);
        let pk_b = "bb".repeat(32);
        store_message(&conn, &test_message(&pk_a, "h1", 1000, 60_000)).unwrap();
        store_message(&conn, &test_message(&pk_b, "h2", 1000, 60_000)).unwrap();

        let got = retrieve_messages(&conn, &pk_a, "", 2000).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].hash, "h1");
    }

    #[test]
    fn test_retrieve_skips_expired() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        store_message(&conn, &test_message(&pk, "expired", 1000, 10)).unwrap();
        store_message(&conn, &test_message(&pk, "live", 1000, 60_000)).unwrap();

        let got = retrieve_messages(&conn, &pk, "", 5000).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].hash, "live");
    }

    #[test]
    fn test_cleanup_expired() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        store_message(&conn, &test_message(&pk, "old", 1000, 10)).unwrap();
        store_message(&conn, &test_message(&pk, "new", 1000, 60_000)).unwrap();

        let removed = cleanup_expired(&conn, 5000).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(message_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_messages_since_rowid_pagination() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        for i in 1..=5 {
            store_message(&conn, &test_message(&pk, &format!("h{}", i), 1000, 60_000)).unwrap();
        }

        let first = messages_since_rowid(&conn, 0, 2000, 3).unwrap();
        assert_eq!(first.len(), 3);
        let cursor = first.last().unwrap().0;

        let rest = messages_since_rowid(&conn, cursor, 2000, 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].1.hash, "h4");
    }

    #[test]
    fn test_find_message_by_hash() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        let msg = test_message(&pk, "needle", 1000, 60_000);
        store_message(&conn, &msg).unwrap();

        assert_eq!(find_message_by_hash(&conn, "needle").unwrap(), Some(msg));
        assert_eq!(find_message_by_hash(&conn, "nothing").unwrap(), None);
    }

    #[test]
    fn test_delete_message() {
        let conn = start_db_in_memory().unwrap();
        let pk = "aa".repeat(32);
        store_message(&conn, &test_message(&pk, "h1", 1000, 60_000)).unwrap();

        assert!(delete_message(&conn, &pk, "h1").unwrap());
        assert!(!delete_message(&conn, &pk, "h1").unwrap());
        assert_eq!(message_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_last_rowid_advances() {
        let conn = start_db_in_memory().unwrap();
        assert_eq!(last_rowid(&conn).unwrap(), 0);
        let pk = "aa".repeat(32);
        store_message(&conn, &test_message(&pk, "h1", 1000, 60_000)).unwrap();
        let first = last_rowid(&conn).unwrap();
        store_message(&conn, &test_message(&pk, "h2", 1000, 60_000)).unwrap();
        assert!(last_rowid(&conn).unwrap() > first);
    }
}
