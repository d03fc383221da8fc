//! Store model types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of a queued message. Monotonic: never reverts to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }

    /// Value stored in the `published` column.
    pub fn as_flag(&self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
        }
    }

    pub fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            Self::Pending
        } else {
            Self::Delivered
        }
    }
}

/// One durable record in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    pub state: DeliveryState,
}

/// Queue counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub delivered: usize,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub last_id: Option<i64>,
}

/// Render a timestamp for the `timestamp` column.
///
/// Fixed width (microseconds, `Z` suffix) so lexical order in SQL equals
/// chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored ISO-8601 timestamp back into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
