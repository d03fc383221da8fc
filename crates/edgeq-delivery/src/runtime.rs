//! Queue context and its running loops.

use crate::{
    ConnectionConfig, ConnectionManager, DeliveryConfig, DeliveryEngine, DeliveryResult,
    RetentionConfig, RetentionReaper,
};
use edgeq_store::Database;
use edgeq_transport::Transport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything needed to assemble an [`EdgeQueue`].
#[derive(Debug, Clone, Default)]
pub struct QueueSettings {
    pub connection: ConnectionConfig,
    pub delivery: DeliveryConfig,
    /// `None` disables purging.
    pub retention: Option<RetentionConfig>,
}

/// The queue's components, built once and shared by reference.
///
/// Producers call [`push`](Self::push) from any task or thread; it touches
/// only the store and never waits on the network.
pub struct EdgeQueue {
    store: Arc<Database>,
    connection: Arc<ConnectionManager>,
    engine: Arc<DeliveryEngine>,
    reaper: Option<Arc<RetentionReaper>>,
}

impl EdgeQueue {
    pub fn new(store: Arc<Database>, transport: Arc<dyn Transport>, settings: QueueSettings) -> Self {
        let connection = Arc::new(ConnectionManager::new(transport, settings.connection));
        let engine = Arc::new(DeliveryEngine::new(
            Arc::clone(&store),
            Arc::clone(&connection),
            settings.delivery,
        ));
        let reaper = settings
            .retention
            .map(|config| Arc::new(RetentionReaper::new(Arc::clone(&store), config)));

        Self {
            store,
            connection,
            engine,
            reaper,
        }
    }

    /// Durably enqueue a message and wake the delivery loop.
    pub fn push(&self, topic: &str, payload: &[u8]) -> DeliveryResult<i64> {
        let id = self.store.append(topic, payload)?;
        self.engine.nudge();
        Ok(id)
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.store
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn reaper(&self) -> Option<&Arc<RetentionReaper>> {
        self.reaper.as_ref()
    }

    /// Spawn the connection, delivery, and (when configured) retention loops.
    pub fn start(&self) -> QueueRuntime {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        let connection = Arc::clone(&self.connection);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { connection.run(token).await }));

        let engine = Arc::clone(&self.engine);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { engine.run(token).await }));

        if let Some(reaper) = &self.reaper {
            let reaper = Arc::clone(reaper);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move { reaper.run(token).await }));
        }

        info!(
            loops = tasks.len(),
            retention = self.reaper.is_some(),
            "Queue started"
        );
        QueueRuntime { cancel, tasks }
    }
}

/// Handle to the spawned loops.
pub struct QueueRuntime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl QueueRuntime {
    /// Cancel every loop and wait for all of them to finish.
    ///
    /// The connection loop closes the transport on its way out.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Queue task ended abnormally");
            }
        }
        info!("Queue stopped");
    }
}
