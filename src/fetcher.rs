//! Batched concurrent fetching of file contents.
//!
//! Paths are split into fixed-size batches. Every batch runs as its own
//! task, while the fetches inside a batch run one after another, so peak
//! concurrency is bounded by the number of batches rather than the number
//! of paths. A failing path never aborts its siblings.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    store::FileStore,
};

/// Progress callback receiving `(completed, total)` after every fetch.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Number of paths fetched sequentially by one task.
    pub batch_size: usize,
    /// Maximum number of attempts per path.
    pub max_retries: u32,
    /// Base delay between attempts; attempt `k` waits `k × retry_delay`.
    pub retry_delay_ms: u64,
    /// Timeout of a single fetch attempt.
    pub fetch_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            retry_delay_ms: 250,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl FetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Outcome of fetching one path.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// Failed attempts before the final one.
    pub retries: u32,
    pub duration: Duration,
}

impl FetchResult {
    fn failed(error: String, retries: u32, duration: Duration) -> Self {
        Self {
            content: None,
            success: false,
            error: Some(error),
            retries,
            duration,
        }
    }
}

/// Aggregate numbers over one [`BatchFetcher::fetch_all`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FetchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub average_latency: Duration,
}

impl FetchStats {
    fn from_results(results: &HashMap<String, FetchResult>) -> Self {
        let total = results.len();
        let succeeded = results.values().filter(|r| r.success).count();
        let elapsed: Duration = results.values().map(|r| r.duration).sum();
        let average_latency = if total == 0 {
            Duration::ZERO
        } else {
            elapsed / total as u32
        };
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            average_latency,
        }
    }
}

/// Results keyed by path plus their aggregate statistics.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub results: HashMap<String, FetchResult>,
    pub stats: FetchStats,
}

impl FetchReport {
    /// Successfully fetched contents, keyed by path.
    pub fn into_contents(self) -> HashMap<String, String> {
        self.results
            .into_iter()
            .filter_map(|(path, r)| r.content.map(|c| (path, c)))
            .collect()
    }
}

/// Fetches many paths from a [`FileStore`] in bounded concurrent batches.
pub struct BatchFetcher<S> {
    store: Arc<S>,
    config: FetchConfig,
}

impl<S> Clone for BatchFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: FileStore> BatchFetcher<S> {
    pub fn new(store: Arc<S>, config: FetchConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every path, returning one result per distinct path.
    pub async fn fetch_all(&self, paths: &[String]) -> FetchReport {
        self.fetch_all_with_progress(paths, None).await
    }

    /// Like [`BatchFetcher::fetch_all`], reporting progress after each fetch.
    ///
    /// Callbacks from different batches may interleave, but the last
    /// reported `completed` always equals `total`.
    pub async fn fetch_all_with_progress(
        &self,
        paths: &[String],
        progress: Option<ProgressFn>,
    ) -> FetchReport {
        let mut unique = paths.to_vec();
        unique.sort();
        unique.dedup();

        let total = unique.len();
        let results = Arc::new(Mutex::new(HashMap::with_capacity(total)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for batch in unique.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let results = Arc::clone(&results);
            let completed = Arc::clone(&completed);
            let progress = progress.clone();

            tasks.spawn(async move {
                for path in batch {
                    let result = fetch_with_retry(&*store, &path, &config).await;
                    results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(path, result);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = &progress {
                        progress(done, total);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "fetch batch task failed");
            }
        }

        let mut results = std::mem::take(
            &mut *results
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        // A panicked batch leaves holes; every path still gets a result.
        for path in &unique {
            results.entry(path.clone()).or_insert_with(|| {
                FetchResult::failed(
                    "fetch task aborted".to_string(),
                    0,
                    Duration::ZERO,
                )
            });
        }

        let stats = FetchStats::from_results(&results);
        debug!(
            total = stats.total,
            failed = stats.failed,
            avg_ms = stats.average_latency.as_millis() as u64,
            "batched fetch finished"
        );
        FetchReport { results, stats }
    }
}

async fn fetch_with_retry<S: FileStore>(
    store: &S,
    path: &str,
    config: &FetchConfig,
) -> FetchResult {
    let started = Instant::now();
    let attempts = config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let outcome =
            match tokio::time::timeout(config.fetch_timeout(), store.fetch(path))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(config.fetch_timeout())),
            };

        match outcome {
            Ok(content) => {
                return FetchResult {
                    content: Some(content),
                    success: true,
                    error: None,
                    retries: attempt - 1,
                    duration: started.elapsed(),
                };
            }
            Err(err) => {
                debug!(path, attempt, error = %err, "fetch attempt failed");
                last_error = err.to_string();
                if !err.is_retryable() {
                    return FetchResult::failed(
                        last_error,
                        attempt - 1,
                        started.elapsed(),
                    );
                }
                if attempt < attempts {
                    tokio::time::sleep(config.retry_delay() * attempt).await;
                }
            }
        }
    }

    FetchResult::failed(last_error, attempts - 1, started.elapsed())
}
