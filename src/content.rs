use std::{collections::HashMap, sync::Arc};

use tokio::time::Instant;
use tracing::debug;

use crate::{
    cache::DiskCache,
    fetcher::{BatchFetcher, ProgressFn},
    store::{FileRef, FileStore},
};

/// Counters from one [`ContentLoader::load`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub fetch_failures: usize,
}

impl LoadStats {
    pub fn merge(&mut self, other: LoadStats) {
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.fetch_failures += other.fetch_failures;
    }
}

/// Reads file contents through the disk cache, fetching misses in batches.
pub struct ContentLoader<S> {
    fetcher: BatchFetcher<S>,
    cache: Option<Arc<DiskCache<String>>>,
}

impl<S> Clone for ContentLoader<S> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            cache: self.cache.clone(),
        }
    }
}

/// Cache key for a file's content at a given modification time.
pub fn content_key(file: &FileRef) -> String {
    format!("content:{}:{}", file.path, file.modified_at)
}

impl<S: FileStore> ContentLoader<S> {
    pub fn new(
        fetcher: BatchFetcher<S>,
        cache: Option<Arc<DiskCache<String>>>,
    ) -> Self {
        Self { fetcher, cache }
    }

    /// The same loader without its cache.
    pub fn uncached(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            cache: None,
        }
    }

    pub async fn load(
        &self,
        files: &[FileRef],
    ) -> (HashMap<String, String>, LoadStats) {
        self.load_with_progress(files, None).await
    }

    /// [`load`](Self::load) abandoned at `deadline`. Returns `None` when the
    /// deadline passed before every file was loaded.
    pub async fn load_until(
        &self,
        files: &[FileRef],
        deadline: Option<Instant>,
    ) -> Option<(HashMap<String, String>, LoadStats)> {
        match deadline {
            Some(deadline) => {
                tokio::time::timeout_at(deadline, self.load(files)).await.ok()
            }
            None => Some(self.load(files).await),
        }
    }

    /// Load the content of every file; failed fetches are simply absent.
    pub async fn load_with_progress(
        &self,
        files: &[FileRef],
        progress: Option<ProgressFn>,
    ) -> (HashMap<String, String>, LoadStats) {
        let mut contents = HashMap::with_capacity(files.len());
        let mut stats = LoadStats::default();
        let mut missing = Vec::new();

        for file in files {
            match self.cache.as_ref().and_then(|c| c.get(&content_key(file))) {
                Some(content) => {
                    stats.cache_hits += 1;
                    contents.insert(file.path.clone(), content);
                }
                None => {
                    if self.cache.is_some() {
                        stats.cache_misses += 1;
                    }
                    missing.push(file);
                }
            }
        }

        if missing.is_empty() {
            return (contents, stats);
        }

        let paths: Vec<String> = missing.iter().map(|f| f.path.clone()).collect();
        let report = self.fetcher.fetch_all_with_progress(&paths, progress).await;
        stats.fetch_failures = report.stats.failed;

        let mut fetched = report.into_contents();
        for file in missing {
            if let Some(content) = fetched.remove(&file.path) {
                if let Some(cache) = &self.cache {
                    cache.set(&content_key(file), &content);
                }
                contents.insert(file.path.clone(), content);
            }
        }

        debug!(
            loaded = contents.len(),
            hits = stats.cache_hits,
            failures = stats.fetch_failures,
            "loaded file contents"
        );
        (contents, stats)
    }
}
