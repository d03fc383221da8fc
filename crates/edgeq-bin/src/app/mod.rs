//! Application wiring.

mod commands;
mod run;

pub use commands::{list, open_local, purge, push, stats};
pub use run::run_queue;
