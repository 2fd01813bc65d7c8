//! A generic TTL cache persisted as one JSON file per key.
//!
//! The cache is an optimization only: read failures behave like misses and
//! write-through failures are logged and swallowed, so callers always get
//! a correct value even when the cache directory is unusable.

use std::{
    future::Future,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, RwLock},
    time::{Duration, SystemTime},
};

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// File extension of persisted cache entries.
pub const CACHE_EXTENSION: &str = "cache";

/// Encoded keys longer than this are stored under their hash instead.
const MAX_ENCODED_KEY_LEN: usize = 180;

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Default time-to-live of new entries, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Hit/miss bookkeeping for one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    /// `hits / (hits + misses)`, recomputed after every access.
    pub hit_rate: f64,
}

impl CacheStats {
    fn record_access(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.hit_rate = self.hits as f64 / (self.hits + self.misses) as f64;
    }
}

/// On-disk representation of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord<T> {
    data: T,
    /// Creation time in milliseconds since the Unix epoch.
    timestamp: u64,
    /// Time-to-live in milliseconds.
    ttl: u64,
    key: String,
    /// Size of the serialized payload in bytes.
    size: u64,
}

impl<T> CacheRecord<T> {
    fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp) < self.ttl
    }
}

#[derive(Debug, Deserialize)]
struct RecordHeader {
    timestamp: u64,
    ttl: u64,
}

/// A disk-backed cache of `T` values keyed by string.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use vaultctx::cache::DiskCache;
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache: DiskCache<String> =
///     DiskCache::open(dir.path(), Duration::from_secs(60)).unwrap();
///
/// cache.set("greeting", &"hello".to_string());
/// let value = cache
///     .get_or_insert_with("greeting", || unreachable!("cached"))
///     .unwrap();
/// assert_eq!(value, "hello");
/// ```
pub struct DiskCache<T> {
    dir: PathBuf,
    ttl: Duration,
    /// Serializes every mutation of the entry files.
    write_lock: Mutex<()>,
    stats: RwLock<CacheStats>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for DiskCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Remove `path`, treating a file that is already gone as not removed.
fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Map a cache key to a safe file name.
pub fn key_file_name(key: &str) -> String {
    let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
    if encoded.len() <= MAX_ENCODED_KEY_LEN {
        format!("{encoded}.{CACHE_EXTENSION}")
    } else {
        let hash = blake3::hash(key.as_bytes()).to_hex();
        format!("h-{hash}.{CACHE_EXTENSION}")
    }
}

impl<T> DiskCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: &Path, ttl: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|_| Error::DataDir(dir.to_path_buf()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            ttl,
            write_lock: Mutex::new(()),
            stats: RwLock::new(CacheStats::default()),
            _marker: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key_file_name(key))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no state.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_access(&self, hit: bool) {
        let mut stats = self
            .stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.record_access(hit);
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self
            .stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }

    fn read_valid(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return None;
            }
            Err(err) => {
                debug!(key, error = %err, "unreadable cache entry");
                return None;
            }
        };
        match serde_json::from_slice::<CacheRecord<T>>(&bytes) {
            Ok(record) if record.key == key => {
                record.is_valid_at(unix_millis()).then_some(record.data)
            }
            Ok(_) => None,
            Err(err) => {
                debug!(key, error = %err, "corrupted cache entry");
                None
            }
        }
    }

    /// Look up a non-expired entry, counting a hit or a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let value = self.read_valid(key);
        self.record_access(value.is_some());
        value
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Errors from `compute` propagate; a failed write-through does not.
    pub fn get_or_insert_with<F>(&self, key: &str, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        self.write_through(key, &value);
        Ok(value)
    }

    /// Async flavour of [`DiskCache::get_or_insert_with`].
    pub async fn get_or_insert_with_async<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.write_through(key, &value);
        Ok(value)
    }

    /// Store `value` with the default TTL, logging any failure.
    pub fn set(&self, key: &str, value: &T) {
        self.write_through(key, value);
    }

    /// Store `value` with an explicit TTL.
    pub fn set_with_ttl(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        let record = CacheRecord {
            data: value,
            timestamp: unix_millis(),
            ttl: ttl.as_millis() as u64,
            key: key.to_string(),
            size: payload.len() as u64,
        };
        let bytes = serde_json::to_vec(&record)?;

        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");
        {
            let _guard = self.lock();
            std::fs::write(&tmp, &bytes)?;
            std::fs::rename(&tmp, &path)?;
        }
        self.bump(|s| s.writes += 1);
        Ok(())
    }

    fn write_through(&self, key: &str, value: &T) {
        if let Err(err) = self.set_with_ttl(key, value, self.ttl) {
            warn!(key, error = %err, "cache write-through failed");
        }
    }

    /// Remove one entry. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key);
        let _guard = self.lock();
        remove_if_present(&path)
    }

    /// Remove every persisted entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock();
        let mut removed = 0;
        for path in self.entry_files()? {
            if remove_if_present(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Evict expired and unreadable entries. Returns the number evicted.
    pub fn cleanup(&self) -> Result<usize> {
        let _guard = self.lock();
        let now = unix_millis();
        let mut evicted = 0;

        for path in self.entry_files()? {
            let keep = std::fs::read(&path)
                .ok()
                .and_then(|bytes| {
                    serde_json::from_slice::<RecordHeader>(&bytes).ok()
                })
                .is_some_and(|h| now.saturating_sub(h.timestamp) < h.ttl);
            if !keep && remove_if_present(&path)? {
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, dir = %self.dir.display(), "cache cleanup");
        }
        self.bump(|s| s.evictions += evicted as u64);
        Ok(evicted)
    }

    /// Number of entry files currently on disk (expired ones included).
    pub fn len(&self) -> Result<usize> {
        Ok(self.entry_files()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        *self
            .stats
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path
                .extension()
                .is_some_and(|ext| ext == CACHE_EXTENSION)
            {
                files.push(path);
            }
        }
        Ok(files)
    }
}
