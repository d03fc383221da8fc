//! Durable message store for the EdgeQ publish queue.
//!
//! This crate provides:
//! - `Database`: thread-safe, append-only SQLite record of queued messages
//! - Schema migrations
//! - Model types (`QueuedMessage`, `DeliveryState`, `QueueStats`)
//! - Query helpers operating on a raw connection
//! - `Clock` abstraction so retention can be driven by simulated time
//!
//! # Ordering
//!
//! Ids come from `INTEGER PRIMARY KEY AUTOINCREMENT`: strictly increasing in
//! append order, persisted across restarts, and never reused even after the
//! highest record has been purged.
//!
//! ```ignore
//! let db = Database::open(Path::new("queue.db"))?;
//! let id = db.append("sensors/temperature", b"21.5")?;
//! for message in db.list_pending()? {
//!     // publish, then:
//!     db.mark_delivered(message.id)?;
//! }
//! ```

mod clock;
mod db;
mod error;
mod migrations;
mod models;
pub mod queries;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{format_timestamp, parse_timestamp, DeliveryState, QueueStats, QueuedMessage};
