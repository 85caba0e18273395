use std::path::PathBuf;

use tokio::sync::broadcast;

/// Typed lifecycle events emitted by the update agent and the file watcher.
///
/// Document events (`DocCreated`, `DocUpdated`, `DocRemoved`, `DocIndexed`)
/// are always emitted before the `ReindexTriggered` that follows a write.
#[derive(Debug, Clone)]
pub enum DocEvent {
    /// A watched file appeared and was picked up for indexing.
    DocIndexed { path: PathBuf },
    /// The update agent created a new document.
    DocCreated { path: PathBuf },
    /// An existing document changed (agent write or external edit).
    DocUpdated { path: PathBuf },
    /// A watched file was deleted.
    DocRemoved { path: PathBuf },
    /// Caches for the root were invalidated; the next read re-indexes.
    ReindexTriggered { root: PathBuf },
    /// A watcher error. Informational only; the watcher keeps running.
    Error { message: String },
}

impl DocEvent {
    /// Wire-level kind tag, used in logs and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            DocEvent::DocIndexed { .. } => "doc_indexed",
            DocEvent::DocCreated { .. } => "doc_created",
            DocEvent::DocUpdated { .. } => "doc_updated",
            DocEvent::DocRemoved { .. } => "doc_removed",
            DocEvent::ReindexTriggered { .. } => "reindex_triggered",
            DocEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast bus for [`DocEvent`]s. Slow consumers miss events rather than
/// blocking producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DocEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Returns quietly when nobody is subscribed.
    pub fn emit(&self, event: DocEvent) {
        tracing::debug!(kind = event.kind(), "doc event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
