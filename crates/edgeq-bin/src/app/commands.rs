//! One-shot local commands. None of these touch the network.

use anyhow::Context;
use edgeq_config_and_utils::{init_logging, Config, Paths};
use edgeq_delivery::{RetentionConfig, RetentionReaper};
use edgeq_store::{format_timestamp, Database, QueuedMessage};
use std::sync::Arc;
use std::time::Duration;

/// Set up stderr logging and open the configured store.
pub fn open_local(config: &Config, paths: &Paths) -> anyhow::Result<Arc<Database>> {
    init_logging(&config.log_level, None);
    let path = config.resolved_store_path(paths);
    let store =
        Database::open(&path).with_context(|| format!("opening store at {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn push(store: &Database, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
    let id = store.append(topic, payload)?;
    println!("{id}");
    Ok(())
}

pub fn list(store: &Database, pending_only: bool) -> anyhow::Result<()> {
    let messages = if pending_only {
        store.list_pending()?
    } else {
        store.all_messages()?
    };
    for message in &messages {
        println!("{}", render(message));
    }
    Ok(())
}

pub fn stats(store: &Database) -> anyhow::Result<()> {
    let stats = store.stats()?;
    println!("total:     {}", stats.total);
    println!("pending:   {}", stats.pending);
    println!("delivered: {}", stats.delivered);
    if let Some(oldest) = stats.oldest_pending_at {
        println!("oldest pending: {}", format_timestamp(oldest));
    }
    if let Some(last_id) = stats.last_id {
        println!("last id:   {last_id}");
    }
    Ok(())
}

/// Run one retention sweep with the given or configured threshold.
pub fn purge(
    store: &Arc<Database>,
    config: &Config,
    older_than_seconds: Option<u64>,
) -> anyhow::Result<()> {
    let window = older_than_seconds
        .map(Duration::from_secs)
        .or_else(|| config.retention_window())
        .context("no retention window configured; pass --older-than-seconds")?;

    let reaper = RetentionReaper::new(
        Arc::clone(store),
        RetentionConfig {
            window,
            sweep_interval: config.retention_sweep(),
        },
    );
    let deleted = reaper.sweep()?;
    println!("purged {deleted}");
    Ok(())
}

fn render(message: &QueuedMessage) -> String {
    format!(
        "{:>6}  {:<9}  {}  {}  {}",
        message.id,
        message.state.as_str(),
        format_timestamp(message.enqueued_at),
        message.topic,
        String::from_utf8_lossy(&message.payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeq_store::ManualClock;

    #[test]
    fn purge_deletes_records_past_threshold() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(Database::open_in_memory_with_clock(clock.clone()).unwrap());
        store.append("t", b"old").unwrap();
        clock.advance(chrono::Duration::seconds(120));
        store.append("t", b"new").unwrap();

        purge(&store, &Config::default(), Some(60)).unwrap();
        let remaining = store.all_messages().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].payload, b"new");
    }

    #[test]
    fn purge_without_window_is_an_error() {
        let store = Arc::new(Database::open_in_memory().unwrap());
        assert!(purge(&store, &Config::default(), None).is_err());
    }

    #[test]
    fn render_shows_state_and_payload() {
        let store = Database::open_in_memory().unwrap();
        let id = store.append("sensors/temp", b"21.5").unwrap();
        let line = render(&store.get(id).unwrap().unwrap());

        assert!(line.contains("pending"));
        assert!(line.contains("sensors/temp"));
        assert!(line.ends_with("21.5"));
    }
}
