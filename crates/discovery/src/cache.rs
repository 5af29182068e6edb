//! URL keyed response cache: a moka memory tier mirrored to disk.
//!
//! # Design
//!
//! - **Key**: the request URL with its fragment removed.
//! - **Capacity**: total body bytes across all entries, enforced by moka's
//!   weigher under an LRU eviction policy. An entry evicted for size also
//!   loses its disk file. Entries larger than the whole capacity are not
//!   stored.
//! - **Disk tier**: one JSON file per entry, named by the BLAKE3 hash of
//!   the key. Files are written to a temporary name and renamed into place,
//!   so a reader never sees a half-written entry. On open, existing files
//!   are loaded back (oldest first) and corrupt files are deleted.
//! - **Batches**: [`ResponseCache::put_all`] and [`ResponseCache::get_pair`]
//!   exclude each other, so a pair written together is read together.
//! - **Snapshots**: lookups hand out `Arc<CachedResponse>`; eviction only
//!   drops the cache's own reference.
//!
//! Disk I/O is blocking. Async callers go through `run_blocking`, which
//! moves the work onto tokio's blocking pool.
//!
//! Disk failures never lose the memory copy: the memory tier is updated
//! first and the error is returned afterwards.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CacheError;
use crate::transport::HttpResponse;

const ENTRY_EXTENSION: &str = "json";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Normalized cache key for a URL: scheme, host, path and query.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// A cached HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// Unix milliseconds at insertion
    pub stored_at: u64,
}

impl CachedResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            url: cache_key(&response.url),
            status: response.status,
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            stored_at: current_timestamp_ms(),
        }
    }

    fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// On-disk representation of a cache entry.
#[derive(Serialize, Deserialize)]
struct DiskEntry {
    url: String,
    status: u16,
    content_type: Option<String>,
    stored_at: u64,
    body: String,
}

impl DiskEntry {
    fn from_cached(entry: &CachedResponse) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            content_type: entry.content_type.clone(),
            stored_at: entry.stored_at,
            body: STANDARD.encode(&entry.body),
        }
    }

    fn into_cached(self) -> Result<CachedResponse, CacheError> {
        let body = STANDARD
            .decode(self.body)
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        Ok(CachedResponse {
            url: self.url,
            status: self.status,
            content_type: self.content_type,
            body: Bytes::from(body),
            stored_at: self.stored_at,
        })
    }
}

/// Response cache shared by the fetchers.
pub struct ResponseCache {
    directory: Option<PathBuf>,
    capacity_bytes: u64,
    memory: Cache<String, Arc<CachedResponse>>,
    /// Held for writing by `put_all`, for reading by lookups
    batch: RwLock<()>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("directory", &self.directory)
            .field("capacity_bytes", &self.capacity_bytes)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Creates a cache without a disk tier.
    pub fn in_memory(capacity_bytes: u64) -> Self {
        Self::build(None, capacity_bytes)
    }

    /// Opens (creating if needed) a disk backed cache and loads its entries.
    pub fn open<P: AsRef<Path>>(directory: P, capacity_bytes: u64) -> Result<Self, CacheError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).map_err(|source| CacheError::Io {
            path: directory.clone(),
            source,
        })?;

        let cache = Self::build(Some(directory), capacity_bytes);
        cache.load_from_disk()?;
        Ok(cache)
    }

    fn build(directory: Option<PathBuf>, capacity_bytes: u64) -> Self {
        let listener_directory = directory.clone();
        let memory = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &String, entry: &Arc<CachedResponse>| -> u32 {
                u32::try_from(entry.size()).unwrap_or(u32::MAX)
            })
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                move |key: Arc<String>, _entry: Arc<CachedResponse>, cause: RemovalCause| {
                    // Replaced and explicit removals manage their own files
                    if !cause.was_evicted() {
                        return;
                    }
                    debug!(url = %key, ?cause, "Evicted cache entry");
                    if let Some(directory) = &listener_directory {
                        remove_entry_file(&entry_path(directory, &key));
                    }
                },
            )
            .build();

        Self {
            directory,
            capacity_bytes,
            memory,
            batch: RwLock::new(()),
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn read_batch(&self) -> RwLockReadGuard<'_, ()> {
        self.batch
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_batch(&self) -> RwLockWriteGuard<'_, ()> {
        self.batch
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Looks up a response and marks it most recently used.
    ///
    /// A memory miss falls back to the disk tier, which may hold entries
    /// written by another process sharing the directory.
    pub fn get(&self, url: &Url) -> Option<Arc<CachedResponse>> {
        let _batch = self.read_batch();
        self.lookup(url)
    }

    /// Looks up two responses stored by the same `put_all` call. Both are
    /// read without an intervening batch write.
    pub fn get_pair(
        &self,
        first: &Url,
        second: &Url,
    ) -> (Option<Arc<CachedResponse>>, Option<Arc<CachedResponse>>) {
        let _batch = self.read_batch();
        (self.lookup(first), self.lookup(second))
    }

    fn lookup(&self, url: &Url) -> Option<Arc<CachedResponse>> {
        let key = cache_key(url);
        if let Some(hit) = self.memory.get(&key) {
            return Some(hit);
        }

        let path = entry_path(self.directory.as_deref()?, &key);
        if !path.exists() {
            return None;
        }
        match read_entry(&path) {
            Ok(entry) if entry.url == key && entry.size() <= self.capacity_bytes => {
                let entry = Arc::new(entry);
                self.memory.insert(key, entry.clone());
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Removing corrupt cache entry");
                remove_entry_file(&path);
                None
            }
        }
    }

    /// True when the memory tier holds `url`. Does not touch recency.
    pub fn contains(&self, url: &Url) -> bool {
        self.memory.contains_key(&cache_key(url))
    }

    pub fn len(&self) -> usize {
        self.memory.run_pending_tasks();
        self.memory.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> u64 {
        self.memory.run_pending_tasks();
        self.memory.weighted_size()
    }

    /// Stores one response.
    pub fn put(&self, response: &HttpResponse) -> Result<(), CacheError> {
        self.put_all(std::slice::from_ref(response))
    }

    /// Stores several responses as one batch: no [`ResponseCache::get_pair`]
    /// observes only part of it.
    pub fn put_all(&self, responses: &[HttpResponse]) -> Result<(), CacheError> {
        let _batch = self.write_batch();
        let mut first_error = None;

        for response in responses {
            let entry = Arc::new(CachedResponse::from_response(response));
            if entry.size() > self.capacity_bytes {
                debug!(
                    url = %entry.url,
                    bytes = entry.size(),
                    capacity = self.capacity_bytes,
                    "Response larger than cache capacity, not cached"
                );
                continue;
            }

            let key = entry.url.clone();
            self.memory.insert(key.clone(), entry.clone());

            if let Err(e) = self.write_entry(&key, &entry) {
                warn!(url = %key, error = %e, "Failed to persist cache entry");
                first_error.get_or_insert(e);
            }
        }

        // Size evictions run here, deleting the evicted files
        self.memory.run_pending_tasks();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn remove(&self, url: &Url) -> Option<Arc<CachedResponse>> {
        let key = cache_key(url);
        let _batch = self.write_batch();
        let removed = self.memory.remove(&key);
        if let Some(directory) = &self.directory {
            remove_entry_file(&entry_path(directory, &key));
        }
        removed
    }

    /// Drops every entry from both tiers.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _batch = self.write_batch();
        let keys: Vec<Arc<String>> = self.memory.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.memory.invalidate(key.as_str());
        }
        self.memory.run_pending_tasks();

        if let Some(directory) = &self.directory {
            for path in entry_files(directory)? {
                std::fs::remove_file(&path).map_err(|source| CacheError::Io { path, source })?;
            }
        }

        info!("Response cache cleared");
        Ok(())
    }

    fn write_entry(&self, key: &str, entry: &CachedResponse) -> Result<(), CacheError> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        let path = entry_path(directory, key);

        let json = serde_json::to_vec(&DiskEntry::from_cached(entry)).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;

        let temp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&temp, json).map_err(|source| CacheError::Io {
            path: temp.clone(),
            source,
        })?;
        std::fs::rename(&temp, &path).map_err(|source| {
            let _ = std::fs::remove_file(&temp);
            CacheError::Io {
                path: path.clone(),
                source,
            }
        })
    }

    fn load_from_disk(&self) -> Result<(), CacheError> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };

        let mut loaded = Vec::new();
        for path in entry_files(directory)? {
            match read_entry(&path) {
                Ok(entry) => loaded.push(entry),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Removing corrupt cache entry");
                    remove_entry_file(&path);
                }
            }
        }

        loaded.sort_by_key(|entry| entry.stored_at);
        let count = loaded.len();

        for entry in loaded {
            if entry.size() <= self.capacity_bytes {
                self.memory.insert(entry.url.clone(), Arc::new(entry));
            }
        }
        self.memory.run_pending_tasks();

        debug!(
            directory = %directory.display(),
            entries = count,
            bytes = self.memory.weighted_size(),
            "Loaded response cache"
        );
        Ok(())
    }
}

/// Runs blocking cache work on tokio's blocking pool.
pub(crate) async fn run_blocking<F, T>(cache: &Arc<ResponseCache>, work: F) -> Result<T, CacheError>
where
    F: FnOnce(&ResponseCache) -> T + Send + 'static,
    T: Send + 'static,
{
    let cache = cache.clone();
    tokio::task::spawn_blocking(move || work(&cache))
        .await
        .map_err(|e| CacheError::Task {
            reason: e.to_string(),
        })
}

fn entry_path(directory: &Path, key: &str) -> PathBuf {
    let name = format!(
        "{}.{}",
        hex::encode(blake3::hash(key.as_bytes()).as_bytes()),
        ENTRY_EXTENSION
    );
    directory.join(name)
}

fn remove_entry_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
    }
}

fn entry_files(directory: &Path) -> Result<Vec<PathBuf>, CacheError> {
    let entries = std::fs::read_dir(directory).map_err(|source| CacheError::Io {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CacheError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_entry(path: &Path) -> Result<CachedResponse, CacheError> {
    let bytes = std::fs::read(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let disk: DiskEntry =
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    disk.into_cached()
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
