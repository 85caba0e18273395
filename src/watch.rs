//! File watcher: observes the corpus root for Markdown changes, debounces
//! per path, invalidates caches, and re-emits typed events.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::events::DocEvent;
use crate::state::AppState;

/// Path components that are never watched.
const IGNORED_COMPONENTS: &[&str] = &["node_modules", ".git", "build"];

/// Async callback invoked after cache invalidation, before the doc event.
pub type ReindexCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Watcher over one corpus root. Dropping (or calling [`DocWatcher::stop`])
/// cancels every pending debounce timer and releases the OS watcher.
pub struct DocWatcher {
    // Held for its Drop: deregisters the OS-level watches.
    _watcher: RecommendedWatcher,
    pending: Arc<Mutex<HashMap<PathBuf, tokio::task::JoinHandle<()>>>>,
    dispatch: tokio::task::JoinHandle<()>,
}

impl DocWatcher {
    /// Start watching the configured corpus root. Must be called from
    /// within a tokio runtime.
    pub fn spawn(state: AppState, on_reindex: Option<ReindexCallback>) -> CoreResult<Self> {
        let root = state.config.docs_root.clone();
        let debounce = state.config.watch_debounce();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;

        let pending = Arc::new(Mutex::new(HashMap::new()));
        let dispatch = tokio::spawn(dispatch_loop(
            state,
            root,
            rx,
            pending.clone(),
            on_reindex,
            debounce,
        ));

        Ok(Self {
            _watcher: watcher,
            pending,
            dispatch,
        })
    }

    /// Stop watching: cancel pending timers and release the watcher.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for DocWatcher {
    fn drop(&mut self) {
        self.dispatch.abort();
        for (_, task) in self.pending.lock().drain() {
            task.abort();
        }
    }
}

async fn dispatch_loop(
    state: AppState,
    root: PathBuf,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    pending: Arc<Mutex<HashMap<PathBuf, tokio::task::JoinHandle<()>>>>,
    on_reindex: Option<ReindexCallback>,
    debounce: Duration,
) {
    while let Some(result) = rx.recv().await {
        match result {
            Ok(event) => {
                let Some(kind) = classify(&event.kind) else {
                    continue;
                };
                for path in event.paths {
                    if !is_watched_md(&path) {
                        continue;
                    }
                    schedule(
                        &state,
                        &root,
                        path,
                        kind,
                        &pending,
                        on_reindex.clone(),
                        debounce,
                    );
                }
            }
            Err(e) => {
                tracing::error!("Watcher error: {e}");
                state.events.emit(DocEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Start (or reset) the debounce timer for `path`. When it fires: caches
/// are invalidated, the reindex callback runs, then the doc event goes out.
fn schedule(
    state: &AppState,
    root: &Path,
    path: PathBuf,
    kind: ChangeKind,
    pending: &Arc<Mutex<HashMap<PathBuf, tokio::task::JoinHandle<()>>>>,
    on_reindex: Option<ReindexCallback>,
    debounce: Duration,
) {
    let state = state.clone();
    let root = root.to_path_buf();
    let pending_map = pending.clone();
    let timer_path = path.clone();

    let task = tokio::spawn(async move {
        tokio::time::sleep(debounce).await;
        pending_map.lock().remove(&timer_path);

        state.invalidate_root(&root);
        if let Some(callback) = on_reindex {
            callback().await;
        }
        let event = match kind {
            ChangeKind::Added => DocEvent::DocIndexed { path: timer_path },
            ChangeKind::Changed => DocEvent::DocUpdated { path: timer_path },
            ChangeKind::Removed => DocEvent::DocRemoved { path: timer_path },
        };
        state.events.emit(event);
    });

    let mut map = pending.lock();
    if let Some(previous) = map.insert(path, task) {
        previous.abort();
    }
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(_) => Some(ChangeKind::Changed),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

fn is_watched_md(path: &Path) -> bool {
    if path.extension().map(|e| e != "md").unwrap_or(true) {
        return false;
    }
    !path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        IGNORED_COMPONENTS.contains(&name.as_ref())
    })
}
