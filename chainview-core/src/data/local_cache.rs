//! Local persistent cache of raw chunk responses, keyed by exact request URL.
//!
//! Layout: `{cache_dir}/{blake3(url)}.json`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Reads happen on the owner thread before a network attempt
//! - Writes are handed to a background writer thread and never block
//! - Failures are logged and otherwise ignored; the cache is best effort

use super::provider::FetchError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Raw response storage keyed by request URL.
pub trait LocalStore: Send + Sync {
    fn load(&self, url: &str) -> Result<Option<String>, FetchError>;
    fn store(&self, url: &str, body: &str) -> Result<(), FetchError>;
}

/// File-backed store, one file per URL.
#[derive(Debug, Clone)]
pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the entry for a URL: `{cache_dir}/{blake3(url)}.json`
    fn entry_path(&self, url: &str) -> PathBuf {
        let digest = blake3::hash(url.as_bytes()).to_hex();
        self.cache_dir.join(format!("{digest}.json"))
    }

    /// Entry count and total size on disk.
    pub fn status(&self) -> Result<CacheStatus, FetchError> {
        if !self.cache_dir.exists() {
            return Ok(CacheStatus::default());
        }
        let mut status = CacheStatus::default();
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| FetchError::LocalCache(format!("read dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| FetchError::LocalCache(format!("dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            status.entries += 1;
            status.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        Ok(status)
    }

    /// Remove every cached entry. Returns the number of files removed.
    pub fn clear(&self) -> Result<usize, FetchError> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| FetchError::LocalCache(format!("read dir: {e}")))?;
        for entry in entries {
            let path = entry
                .map_err(|e| FetchError::LocalCache(format!("dir entry: {e}")))?
                .path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some("json") || ext == Some("tmp") {
                fs::remove_file(&path).map_err(|e| {
                    FetchError::LocalCache(format!("remove {}: {e}", path.display()))
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl LocalStore for FileStore {
    fn load(&self, url: &str) -> Result<Option<String>, FetchError> {
        let path = self.entry_path(url);
        match fs::read_to_string(&path) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::LocalCache(format!("read {}: {e}", path.display()))),
        }
    }

    fn store(&self, url: &str, body: &str) -> Result<(), FetchError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| FetchError::LocalCache(format!("failed to create dir: {e}")))?;

        let path = self.entry_path(url);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, body)
            .map_err(|e| FetchError::LocalCache(format!("write {}: {e}", tmp_path.display())))?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            // Clean up temp file on rename failure
            let _ = fs::remove_file(&tmp_path);
            FetchError::LocalCache(format!("atomic rename failed: {e}"))
        })
    }
}

/// In-memory store for tests and `--no-cache` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryStore {
    fn load(&self, url: &str) -> Result<Option<String>, FetchError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(url).cloned())
    }

    fn store(&self, url: &str, body: &str) -> Result<(), FetchError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(url.to_string(), body.to_string());
        Ok(())
    }
}

/// Cache size report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub entries: usize,
    pub bytes: u64,
}

/// Engine-side handle: synchronous reads, fire-and-forget writes.
///
/// Dropping it closes the write queue and waits for queued writes to land.
pub struct LocalCache {
    store: Arc<dyn LocalStore>,
    writer: Option<Sender<(String, String)>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl LocalCache {
    /// Writes go through a dedicated background thread.
    pub fn background(store: Arc<dyn LocalStore>) -> Self {
        let (tx, rx) = mpsc::channel::<(String, String)>();
        let worker_store = store.clone();
        let spawned = thread::Builder::new()
            .name("chainview-cache-writer".into())
            .spawn(move || {
                for (url, body) in rx {
                    if let Err(e) = worker_store.store(&url, &body) {
                        warn!(%url, error = %e, "local cache write failed");
                    }
                }
            });

        match spawned {
            Ok(handle) => Self {
                store,
                writer: Some(tx),
                writer_thread: Some(handle),
            },
            Err(e) => {
                warn!(error = %e, "cache writer thread unavailable, writing inline");
                Self::inline(store)
            }
        }
    }

    /// Writes happen on the calling thread (tests, short-lived CLI runs).
    pub fn inline(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            writer: None,
            writer_thread: None,
        }
    }

    /// Read the raw body cached for a URL. Errors are logged and read as a miss.
    pub fn read(&self, url: &str) -> Option<String> {
        match self.store.load(url) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%url, error = %e, "local cache read failed");
                None
            }
        }
    }

    /// Persist a raw body, best effort.
    pub fn persist(&self, url: &str, body: &str) {
        match &self.writer {
            Some(tx) => {
                if tx.send((url.to_string(), body.to_string())).is_err() {
                    debug!(%url, "cache writer gone, dropping write");
                }
            }
            None => {
                if let Err(e) = self.store.store(url, body) {
                    warn!(%url, error = %e, "local cache write failed");
                }
            }
        }
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop once the queue is drained.
        self.writer.take();
        if let Some(handle) = self.writer_thread.take() {
            if handle.join().is_err() {
                warn!("cache writer thread panicked");
            }
        }
    }
}
