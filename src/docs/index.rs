use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::docs::parser;
use crate::error::CoreResult;
use crate::models::DocIndex;

/// How often the background sweep evicts expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CacheEntry {
    index: Arc<DocIndex>,
    expires_at: Instant,
}

/// Per-root slot so a rebuild for one root never blocks readers of another.
#[derive(Default)]
struct RootSlot {
    entry: Mutex<Option<CacheEntry>>,
}

/// Process-wide cache of parsed corpora, keyed by root path.
///
/// A rebuild holds the root's slot lock, so concurrent misses on the same
/// root parse once; fresh reads only take the lock long enough to clone an
/// `Arc`.
pub struct DocIndexCache {
    slots: Mutex<HashMap<PathBuf, Arc<RootSlot>>>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DocCacheStats {
    pub roots: usize,
    pub fresh: usize,
    pub expired: usize,
}

impl DocIndexCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached index for `root`, rebuilding when absent or stale.
    ///
    /// With `cache_enabled = false` the result is always fresh and never
    /// stored.
    pub fn get(&self, root: &Path, ttl: Duration, cache_enabled: bool) -> CoreResult<Arc<DocIndex>> {
        let slot = self.slot(root);
        let mut entry = slot.entry.lock();

        if cache_enabled {
            if let Some(cached) = entry.as_ref() {
                if Instant::now() < cached.expires_at {
                    return Ok(cached.index.clone());
                }
            }
        }

        let index = Arc::new(build_index(root)?);
        if cache_enabled {
            *entry = Some(CacheEntry {
                index: index.clone(),
                expires_at: Instant::now() + ttl,
            });
        }
        Ok(index)
    }

    /// Fingerprint of the cached index for `root`, if one is held (fresh or
    /// not). Used to target query-cache invalidation.
    pub fn cached_fingerprint(&self, root: &Path) -> Option<String> {
        let slot = self.slot(root);
        let entry = slot.entry.lock();
        entry.as_ref().map(|e| e.index.fingerprint.clone())
    }

    pub fn invalidate(&self, root: &Path) {
        let slot = self.slot(root);
        *slot.entry.lock() = None;
    }

    pub fn invalidate_all(&self) {
        let slots = self.slots.lock();
        for slot in slots.values() {
            *slot.entry.lock() = None;
        }
    }

    pub fn stats(&self) -> DocCacheStats {
        let slots = self.slots.lock();
        let now = Instant::now();
        let mut fresh = 0;
        let mut expired = 0;
        for slot in slots.values() {
            match slot.entry.lock().as_ref() {
                Some(entry) if now < entry.expires_at => fresh += 1,
                Some(_) => expired += 1,
                None => {}
            }
        }
        DocCacheStats {
            roots: slots.len(),
            fresh,
            expired,
        }
    }

    /// Drop entries whose TTL has elapsed. Called by the sweeper.
    pub fn sweep(&self) {
        let slots = self.slots.lock();
        let now = Instant::now();
        for slot in slots.values() {
            let mut entry = slot.entry.lock();
            if entry.as_ref().is_some_and(|e| now >= e.expires_at) {
                *entry = None;
            }
        }
    }

    /// Start the 60-second background sweep. The returned handle stops it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await; // First tick fires immediately; skip it.
            loop {
                tick.tick().await;
                cache.sweep();
            }
        });
        SweeperHandle { handle }
    }

    fn slot(&self, root: &Path) -> Arc<RootSlot> {
        let mut slots = self.slots.lock();
        slots.entry(root.to_path_buf()).or_default().clone()
    }
}

impl Default for DocIndexCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop handle for the background sweep task.
pub struct SweeperHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn build_index(root: &Path) -> CoreResult<DocIndex> {
    let fingerprint = compute_fingerprint(root)?;
    let files = parser::list_selected_files(root)?;
    let sections = parser::parse(root)?;
    Ok(DocIndex {
        sections,
        fingerprint,
        built_at: Instant::now(),
        file_count: files.len(),
    })
}

/// SHA-256 over the sorted (absolute path, mtime millis) pairs of every file
/// the walk selects, then the root path. Any add, remove, rename, or touch
/// under the root changes the digest. The root is canonicalized first, so
/// the digest depends only on the filesystem path, never on the working
/// directory a relative root was resolved against.
pub fn compute_fingerprint(root: &Path) -> CoreResult<String> {
    let root = root.canonicalize()?;
    let mut files = parser::list_selected_files(&root)?;
    files.sort();

    let mut hasher = Sha256::new();
    for path in &files {
        let mtime_ms = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis())
            .unwrap_or(0);
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(mtime_ms.to_string().as_bytes());
    }
    hasher.update(root.to_string_lossy().as_bytes());

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ttl() -> Duration {
        Duration::from_secs(300)
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        fs::write(root.join(rel), contents).unwrap();
    }

    #[test]
    fn test_fingerprint_stable_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");

        let a = compute_fingerprint(dir.path()).unwrap();
        let b = compute_fingerprint(dir.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_on_add_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");
        let before = compute_fingerprint(dir.path()).unwrap();

        write(dir.path(), "R2-B.md", "# H2\nY\n");
        let added = compute_fingerprint(dir.path()).unwrap();
        assert_ne!(before, added);

        fs::remove_file(dir.path().join("R2-B.md")).unwrap();
        let removed = compute_fingerprint(dir.path()).unwrap();
        assert_eq!(before, removed);
    }

    #[test]
    fn test_fingerprint_independent_of_path_spelling() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");
        fs::create_dir(dir.path().join("sub")).unwrap();

        let direct = compute_fingerprint(dir.path()).unwrap();
        let spelled = compute_fingerprint(&dir.path().join("sub").join("..")).unwrap();
        assert_eq!(direct, spelled);
    }

    #[test]
    fn test_fingerprint_changes_on_mtime_bump() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("R1-A.md");
        fs::write(&file, "# H\nX\n").unwrap();
        let before = compute_fingerprint(dir.path()).unwrap();

        // Push mtime forward explicitly; rewriting alone can land in the
        // same millisecond.
        let future = std::time::SystemTime::now() + Duration::from_secs(5);
        let f = fs::OpenOptions::new().write(true).open(&file).unwrap();
        f.set_modified(future).unwrap();

        let after = compute_fingerprint(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_get_caches_and_invalidate_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");

        let cache = DocIndexCache::new();
        let first = cache.get(dir.path(), ttl(), true).unwrap();
        let second = cache.get(dir.path(), ttl(), true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.invalidate(dir.path());
        let third = cache.get(dir.path(), ttl(), true).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.built_at > first.built_at);
        assert_eq!(third.fingerprint, first.fingerprint);
    }

    #[test]
    fn test_get_uncached_always_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");

        let cache = DocIndexCache::new();
        let a = cache.get(dir.path(), ttl(), false).unwrap();
        let b = cache.get(dir.path(), ttl(), false).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(cache.cached_fingerprint(dir.path()).is_none());
    }

    #[test]
    fn test_expired_entry_rebuilt_on_get() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");

        let cache = DocIndexCache::new();
        let first = cache.get(dir.path(), Duration::ZERO, true).unwrap();
        let second = cache.get(dir.path(), Duration::ZERO, true).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        write(dir_a.path(), "R1-A.md", "# A\nx\n");
        write(dir_b.path(), "R1-B.md", "# B\ny\n");

        let cache = DocIndexCache::new();
        cache.get(dir_a.path(), Duration::ZERO, true).unwrap();
        cache.get(dir_b.path(), ttl(), true).unwrap();

        cache.sweep();
        let stats = cache.stats();
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.expired, 0);
    }

    #[test]
    fn test_file_count_tracks_selection() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "R1-A.md", "# H\nX\n");
        write(dir.path(), "loose.md", "no headings here\n");

        let cache = DocIndexCache::new();
        let index = cache.get(dir.path(), ttl(), true).unwrap();
        assert_eq!(index.file_count, 2);
        assert_eq!(index.sections.len(), 1);
    }
}
