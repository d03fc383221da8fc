//! Query helpers operating on a raw connection.
//!
//! `Database` wraps these behind its write lock; they are public so tools can
//! run them against a connection they own.

use crate::{
    format_timestamp, parse_timestamp, DeliveryState, QueueStats, QueuedMessage, StoreError,
    StoreResult,
};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

const MESSAGE_COLUMNS: &str = "id, topic, payload, timestamp, published";

/// Insert a new pending message and return its id.
pub fn insert_message(
    conn: &Connection,
    topic: &str,
    payload: &[u8],
    enqueued_at: DateTime<Utc>,
) -> StoreResult<i64> {
    if topic.is_empty() {
        return Err(StoreError::InvalidData("topic must not be empty".to_string()));
    }

    conn.execute(
        "INSERT INTO messages (topic, payload, timestamp, published) VALUES (?1, ?2, ?3, 0)",
        params![topic, payload, format_timestamp(enqueued_at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get a message by id.
pub fn get_message(conn: &Connection, id: i64) -> StoreResult<Option<QueuedMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
    ))?;
    let message = stmt.query_row(params![id], map_message).optional()?;
    Ok(message)
}

/// All pending messages in ascending id order.
pub fn list_pending_messages(conn: &Connection) -> StoreResult<Vec<QueuedMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE published = 0 ORDER BY id ASC"
    ))?;
    let messages = stmt
        .query_map([], map_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// The lowest-id pending message, if any.
pub fn next_pending_message(conn: &Connection) -> StoreResult<Option<QueuedMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE published = 0 ORDER BY id ASC LIMIT 1"
    ))?;
    let message = stmt.query_row([], map_message).optional()?;
    Ok(message)
}

/// Every message regardless of state, ascending id.
pub fn list_all_messages(conn: &Connection) -> StoreResult<Vec<QueuedMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY id ASC"
    ))?;
    let messages = stmt
        .query_map([], map_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Flag a message as delivered.
///
/// Idempotent for existing rows; `NotFound` when the row is gone.
pub fn mark_message_delivered(conn: &Connection, id: i64) -> StoreResult<()> {
    let updated = conn.execute(
        "UPDATE messages SET published = ?1 WHERE id = ?2",
        params![DeliveryState::Delivered.as_flag(), id],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(format!("message {id}")));
    }
    Ok(())
}

/// Delete every message enqueued strictly before `cutoff`, in any state.
///
/// Stored times are whole microseconds; a cutoff with a finer part is rounded
/// up so records between the truncated and the exact cutoff still go.
pub fn delete_messages_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> StoreResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM messages WHERE timestamp < ?1",
        params![format_timestamp(ceil_to_micros(cutoff))],
    )?;
    Ok(deleted)
}

fn ceil_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    let floor = at.trunc_subsecs(6);
    if floor == at {
        at
    } else {
        floor + Duration::microseconds(1)
    }
}

/// Aggregate counters over the whole table.
pub fn queue_stats(conn: &Connection) -> StoreResult<QueueStats> {
    let (total, pending, oldest, last_id): (i64, i64, Option<String>, Option<i64>) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN published = 0 THEN 1 ELSE 0 END), 0),
                    MIN(CASE WHEN published = 0 THEN timestamp END),
                    MAX(id)
             FROM messages",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

    let oldest_pending_at = match oldest {
        Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
            StoreError::InvalidData(format!("unparsable timestamp {raw:?}"))
        })?),
        None => None,
    };

    Ok(QueueStats {
        total: total as usize,
        pending: pending as usize,
        delivered: (total - pending) as usize,
        oldest_pending_at,
        last_id,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<QueuedMessage> {
    let raw_timestamp: String = row.get(3)?;
    let enqueued_at = parse_timestamp(&raw_timestamp).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            Box::new(StoreError::InvalidData(format!(
                "unparsable timestamp {raw_timestamp:?}"
            ))),
        )
    })?;

    Ok(QueuedMessage {
        id: row.get(0)?,
        topic: row.get(1)?,
        payload: row.get(2)?,
        enqueued_at,
        state: DeliveryState::from_flag(row.get(4)?),
    })
}
