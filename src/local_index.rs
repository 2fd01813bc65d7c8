//! Persistent inverted index plus autocomplete trie over the vault.
//!
//! Both structures are rebuilt wholesale when stale rather than updated
//! incrementally. The inverted index and the list of indexed files are
//! persisted as one JSON file stamped with the vault it was built from; the
//! trie is cheap to derive and lives in memory only.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    candidate::{Candidate, MatchKind, TAGS_KEY, TITLE_KEY, sort_by_relevance},
    content::ContentLoader,
    error::{Error, Result},
    fetcher::ProgressFn,
    inverted_index::{IndexHit, InvertedIndex, extract_tags},
    store::{FileRef, FileStore, unix_now},
    trie::{Suggestion, Trie},
    walker::{discover_files, markdown_extensions},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub enabled: bool,
    /// Age after which the index and the trie are rebuilt.
    pub ttl_secs: u64,
    pub rebuild_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 15 * 60,
            rebuild_timeout_secs: 120,
        }
    }
}

impl IndexConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_secs(self.rebuild_timeout_secs)
    }
}

/// What a [`LocalIndex::refresh`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub index_rebuilt: bool,
    pub trie_rebuilt: bool,
    pub documents: usize,
    pub terms: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStatus {
    pub path: PathBuf,
    pub documents: usize,
    pub terms: usize,
    pub trie_terms: usize,
    pub index_built_at: Option<u64>,
    pub trie_built_at: Option<u64>,
}

/// A discovered file that was fetched while building the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub file: FileRef,
    pub tags: Vec<String>,
}

/// On-disk layout of the index file.
#[derive(Debug, Deserialize)]
struct PersistedIndex {
    vault: String,
    root: String,
    files: Vec<IndexedFile>,
    index: InvertedIndex,
}

#[derive(Debug, Default)]
struct State {
    index: InvertedIndex,
    files: Vec<IndexedFile>,
    index_built_at: Option<u64>,
    trie: Trie,
    trie_built_at: Option<u64>,
    load_attempted: bool,
}

fn is_fresh(built_at: Option<u64>, non_empty: bool, ttl: u64, now: u64) -> bool {
    non_empty && built_at.is_some_and(|t| now.saturating_sub(t) < ttl)
}

fn file_mtime_secs(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

pub struct LocalIndex {
    path: PathBuf,
    vault: String,
    root: String,
    config: IndexConfig,
    state: RwLock<State>,
    /// Serializes writes of the index file.
    save_lock: Mutex<()>,
}

impl std::fmt::Debug for LocalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIndex")
            .field("path", &self.path)
            .field("vault", &self.vault)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl LocalIndex {
    /// An index persisted at `path`, covering the directory `root` of the
    /// vault identified by `vault` (see [`FileStore::vault_id`]).
    pub fn new(
        path: impl Into<PathBuf>,
        vault: impl Into<String>,
        root: impl Into<String>,
        config: IndexConfig,
    ) -> Self {
        Self {
            path: path.into(),
            vault: vault.into(),
            root: root.into(),
            config,
            state: RwLock::new(State::default()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Load the persisted index once. A missing or malformed file, or one
    /// built from another vault or root, leaves the index empty so the next
    /// refresh rebuilds it.
    fn ensure_loaded(&self) {
        if self.read().load_attempted {
            return;
        }
        let loaded = match std::fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedIndex>(&bytes) {
                Ok(p) if p.vault == self.vault && p.root == self.root => Some(p),
                Ok(p) => {
                    warn!(
                        path = %self.path.display(),
                        vault = %p.vault,
                        root = %p.root,
                        "index file belongs to another vault, rebuilding"
                    );
                    None
                }
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "index file is malformed, rebuilding"
                    );
                    None
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "could not read index file, rebuilding"
                );
                None
            }
        };

        let mut state = self.write();
        if state.load_attempted {
            return;
        }
        state.load_attempted = true;
        if let Some(persisted) = loaded {
            debug!(
                terms = persisted.index.len(),
                files = persisted.files.len(),
                "loaded persisted index"
            );
            state.index = persisted.index;
            state.files = persisted.files;
            state.index_built_at = file_mtime_secs(&self.path);
        }
    }

    fn save(&self, files: &[IndexedFile], index: &InvertedIndex) -> Result<()> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            vault: &'a str,
            root: &'a str,
            files: &'a [IndexedFile],
            index: &'a InvertedIndex,
        }

        let _guard = self.save_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|_| Error::DataDir(parent.to_path_buf()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let persisted = Borrowed {
            vault: &self.vault,
            root: &self.root,
            files,
            index,
        };
        std::fs::write(&tmp, serde_json::to_vec(&persisted)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Rebuild whichever of the index and the trie is stale.
    pub async fn refresh<S: FileStore>(
        &self,
        store: &S,
        loader: &ContentLoader<S>,
        force: bool,
    ) -> Result<RefreshOutcome> {
        self.refresh_with_progress(store, loader, force, None).await
    }

    /// [`refresh`](Self::refresh) reporting content fetch progress.
    ///
    /// Fails with [`Error::Timeout`] when a rebuild exceeds the configured
    /// timeout; the previous index stays in place.
    pub async fn refresh_with_progress<S: FileStore>(
        &self,
        store: &S,
        loader: &ContentLoader<S>,
        force: bool,
        progress: Option<ProgressFn>,
    ) -> Result<RefreshOutcome> {
        self.ensure_loaded();
        let ttl = self.config.ttl_secs;
        let now = unix_now();
        let mut outcome = RefreshOutcome::default();

        let index_fresh = {
            let state = self.read();
            is_fresh(state.index_built_at, !state.files.is_empty(), ttl, now)
        };
        if force || !index_fresh {
            let timeout = self.config.rebuild_timeout();
            let (files, index) = tokio::time::timeout(
                timeout,
                self.build_index(store, loader, progress),
            )
            .await
            .map_err(|_| {
                warn!(?timeout, "index rebuild timed out, keeping previous index");
                Error::Timeout(timeout)
            })??;

            if let Err(err) = self.save(&files, &index) {
                warn!(error = %err, "failed to persist index");
            }
            let mut state = self.write();
            state.index = index;
            state.files = files;
            state.index_built_at = Some(unix_now());
            outcome.index_rebuilt = true;
        }

        let mut state = self.write();
        let trie_fresh =
            is_fresh(state.trie_built_at, !state.trie.is_empty(), ttl, now);
        if force || outcome.index_rebuilt || !trie_fresh {
            let touched_at = unix_now();
            let mut trie = Trie::new();
            for indexed in &state.files {
                trie.insert_file(&indexed.file, &indexed.tags, touched_at);
            }
            state.trie = trie;
            state.trie_built_at = Some(touched_at);
            outcome.trie_rebuilt = true;
        }

        outcome.documents = state.files.len();
        outcome.terms = state.index.len();
        info!(
            index_rebuilt = outcome.index_rebuilt,
            trie_rebuilt = outcome.trie_rebuilt,
            documents = outcome.documents,
            terms = outcome.terms,
            "local index refreshed"
        );
        Ok(outcome)
    }

    async fn build_index<S: FileStore>(
        &self,
        store: &S,
        loader: &ContentLoader<S>,
        progress: Option<ProgressFn>,
    ) -> Result<(Vec<IndexedFile>, InvertedIndex)> {
        let files =
            discover_files(store, &self.root, &markdown_extensions()).await?;

        let (mut contents, stats) =
            loader.load_with_progress(&files, progress).await;
        if stats.fetch_failures > 0 {
            warn!(failed = stats.fetch_failures, "some files were not indexed");
        }

        let documents: Vec<(FileRef, String)> = files
            .into_iter()
            .filter_map(|f| contents.remove(&f.path).map(|c| (f, c)))
            .collect();

        tokio::task::spawn_blocking(move || {
            let index = InvertedIndex::build(&documents);
            let files = documents
                .into_iter()
                .map(|(file, content)| IndexedFile {
                    tags: extract_tags(&content),
                    file,
                })
                .collect();
            (files, index)
        })
        .await
        .map_err(|e| Error::Config(format!("index build task failed: {e}")))
    }

    /// Postings for the query terms, or nothing if the index is empty.
    pub fn lookup(&self, query: &str) -> Vec<IndexHit> {
        self.ensure_loaded();
        self.read().index.query(query)
    }

    /// Autocomplete suggestions for `prefix`.
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        self.read().trie.suggest(prefix, limit, unix_now())
    }

    /// Drop both structures and the persisted file.
    pub fn invalidate(&self) -> Result<()> {
        {
            let _guard = self.save_lock.lock().unwrap_or_else(|p| p.into_inner());
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        *self.write() = State {
            load_attempted: true,
            ..Default::default()
        };
        Ok(())
    }

    pub fn status(&self) -> IndexStatus {
        self.ensure_loaded();
        let state = self.read();
        IndexStatus {
            path: self.path.clone(),
            documents: state.files.len(),
            terms: state.index.len(),
            trie_terms: state.trie.len(),
            index_built_at: state.index_built_at,
            trie_built_at: state.trie_built_at,
        }
    }
}

/// Group postings by file into candidates.
///
/// `match_score` is the share of query terms found in the file and
/// `relevance_score` the total number of term occurrences.
pub fn hits_to_candidates(hits: &[IndexHit], query_terms: usize) -> Vec<Candidate> {
    let mut by_path: BTreeMap<&str, (Candidate, usize)> = BTreeMap::new();
    let mut order = Vec::new();

    for hit in hits {
        let entry = &hit.entry;
        let (candidate, terms) =
            by_path.entry(entry.path.as_str()).or_insert_with(|| {
                order.push(entry.path.as_str());
                let file =
                    FileRef::new(entry.path.clone(), entry.size, entry.modified_at);
                let mut c = Candidate::new(file, MatchKind::Content);
                c.set_meta(TITLE_KEY, entry.title.clone());
                c.set_meta(TAGS_KEY, entry.tags.clone());
                (c, 0)
            });
        *terms += 1;
        candidate.relevance_score += entry.positions.len() as f64;
    }

    let denom = query_terms.max(1) as f64;
    let mut candidates: Vec<Candidate> = order
        .into_iter()
        .filter_map(|path| by_path.remove(path))
        .map(|(mut c, terms)| {
            c.match_score = (terms as f64 / denom).min(1.0);
            c
        })
        .collect();
    sort_by_relevance(&mut candidates);
    candidates
}
