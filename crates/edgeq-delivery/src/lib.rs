//! Delivery side of the EdgeQ queue.
//!
//! - [`ConnectionManager`] owns the transport and its connect/backoff state
//!   machine, publishing connectivity changes on a broadcast channel.
//! - [`DeliveryEngine`] drains pending records in id order, one publish in
//!   flight, halting a cycle at the first unacknowledged record.
//! - [`RetentionReaper`] purges records older than the retention window,
//!   delivered or not.
//! - [`EdgeQueue`] wires the three together around one store and spawns
//!   their loops under a shared cancellation token.

mod backoff;
mod connection;
mod engine;
mod error;
mod reaper;
mod runtime;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectivityEvent};
pub use engine::{CycleOutcome, CycleReport, DeliveryConfig, DeliveryEngine};
pub use error::{DeliveryError, DeliveryResult};
pub use reaper::{RetentionConfig, RetentionReaper};
pub use runtime::{EdgeQueue, QueueRuntime, QueueSettings};

pub use tokio_util::sync::CancellationToken;
