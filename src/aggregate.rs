//! Turns the vault listing into scored candidates for a query.
//!
//! Small vaults are fetched and scored file by file. Large vaults use a
//! three-phase search: cheap and exhaustive filename and path matching
//! first, then content matching over a capped number of remaining files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    candidate::{Candidate, MatchKind, sort_by_relevance},
    content::{ContentLoader, LoadStats},
    error::{Error, Result},
    store::{FileRef, FileStore},
    text_util::count_occurrences,
    walker::{default_extensions, discover_files},
};

pub const FILENAME_MATCH_SCORE: f64 = 1.0;
pub const FILENAME_RELEVANCE: f64 = 2.0;
pub const PATH_MATCH_SCORE: f64 = 0.8;
pub const PATH_RELEVANCE: f64 = 1.5;
pub const CONTENT_RELEVANCE: f64 = 1.0;
/// Match and relevance score of every file in browse-all mode.
pub const BROWSE_SCORE: f64 = 1.0;
/// Content hits at which the content match score saturates.
const CONTENT_HITS_SATURATION: f64 = 10.0;
/// Minimum normalized length for the token-containment branch.
const LONG_QUERY_CHARS: usize = 4;
/// Paths fetched together under one deadline check.
pub const CONTENT_WINDOW: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Vault-relative directory to search under ("" is the vault root).
    pub root: String,
    /// File extensions treated as content-bearing.
    pub extensions: Vec<String>,
    /// Corpus size from which the three-phase search is used.
    pub large_corpus_threshold: usize,
    /// Content search covers at most `limit × content_search_factor` files.
    pub content_search_factor: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            extensions: default_extensions(),
            large_corpus_threshold: 500,
            content_search_factor: 10,
        }
    }
}

/// Candidates plus what it took to find them.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub candidates: Vec<Candidate>,
    pub files_scanned: usize,
    pub load: LoadStats,
    /// The deadline passed before every file was considered.
    pub timed_out: bool,
}

pub struct Aggregator<S> {
    loader: ContentLoader<S>,
    config: AggregateConfig,
    deadline: Option<Instant>,
}

impl<S: FileStore> Aggregator<S> {
    pub fn new(loader: ContentLoader<S>, config: AggregateConfig) -> Self {
        Self {
            loader,
            config,
            deadline: None,
        }
    }

    /// Stop scanning once `deadline` passes, abandoning a window that is
    /// still loading.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Discover the vault and build up to `limit` candidates for `query`.
    ///
    /// Fails only when the vault root cannot be listed or holds no
    /// content-bearing files.
    pub async fn aggregate(
        &self,
        store: &S,
        query: &str,
        limit: usize,
    ) -> Result<Aggregation> {
        let files =
            discover_files(store, &self.config.root, &self.config.extensions)
                .await?;
        if files.is_empty() {
            return Err(Error::EmptyVault(self.config.root.clone()));
        }
        self.aggregate_files(files, query, limit).await
    }

    /// Score an already discovered file list.
    pub async fn aggregate_files(
        &self,
        files: Vec<FileRef>,
        query: &str,
        limit: usize,
    ) -> Result<Aggregation> {
        let query = query.trim();
        let mut aggregation = if files.len() < self.config.large_corpus_threshold
        {
            self.search_small(files, query).await
        } else {
            self.search_large(files, query, limit).await
        };

        sort_by_relevance(&mut aggregation.candidates);
        aggregation.candidates.truncate(limit);
        info!(
            query,
            scanned = aggregation.files_scanned,
            found = aggregation.candidates.len(),
            timed_out = aggregation.timed_out,
            "aggregated candidates"
        );
        Ok(aggregation)
    }

    async fn search_small(&self, files: Vec<FileRef>, query: &str) -> Aggregation {
        let mut aggregation = Aggregation::default();
        let mut contents = HashMap::new();

        for window in files.chunks(CONTENT_WINDOW) {
            let loaded = if self.expired() {
                None
            } else {
                self.loader.load_until(window, self.deadline).await
            };
            let Some((loaded, stats)) = loaded else {
                aggregation.timed_out = true;
                break;
            };
            aggregation.load.merge(stats);
            contents.extend(loaded);
            aggregation.files_scanned += window.len();
        }

        for file in files.into_iter().take(aggregation.files_scanned) {
            let content = contents.remove(&file.path);
            let candidate = if query.is_empty() {
                Some(browse_candidate(file))
            } else {
                score_file(file, content.as_deref(), query)
            };
            if let Some(mut candidate) = candidate {
                candidate.content = candidate.content.or(content);
                aggregation.candidates.push(candidate);
            }
        }
        aggregation
    }

    async fn search_large(
        &self,
        files: Vec<FileRef>,
        query: &str,
        limit: usize,
    ) -> Aggregation {
        let mut aggregation = Aggregation {
            files_scanned: files.len(),
            ..Default::default()
        };

        if query.is_empty() {
            aggregation.candidates =
                files.into_iter().take(limit).map(browse_candidate).collect();
            return aggregation;
        }

        let mut remaining = Vec::new();
        for file in files {
            if query_matches(&file.display_name, query) {
                aggregation.candidates.push(
                    Candidate::new(file, MatchKind::Filename)
                        .with_scores(FILENAME_MATCH_SCORE, FILENAME_RELEVANCE),
                );
            } else {
                remaining.push(file);
            }
        }
        debug!(matches = aggregation.candidates.len(), "filename phase");

        let mut unmatched = Vec::new();
        for file in remaining {
            if query_matches(&file.path, query) {
                aggregation.candidates.push(
                    Candidate::new(file, MatchKind::Path)
                        .with_scores(PATH_MATCH_SCORE, PATH_RELEVANCE),
                );
            } else {
                unmatched.push(file);
            }
        }
        debug!(matches = aggregation.candidates.len(), "path phase");

        let cap = limit.saturating_mul(self.config.content_search_factor);
        unmatched.truncate(cap);
        for window in unmatched.chunks(CONTENT_WINDOW) {
            let loaded = if self.expired() {
                None
            } else {
                self.loader.load_until(window, self.deadline).await
            };
            let Some((mut loaded, stats)) = loaded else {
                aggregation.timed_out = true;
                break;
            };
            aggregation.load.merge(stats);
            for file in window {
                let Some(content) = loaded.remove(&file.path) else {
                    continue;
                };
                if let Some(score) = content_match_score(&content, query) {
                    aggregation.candidates.push(
                        Candidate::new(file.clone(), MatchKind::Content)
                            .with_scores(score, CONTENT_RELEVANCE)
                            .with_content(content),
                    );
                }
            }
        }
        debug!(matches = aggregation.candidates.len(), "content phase");
        aggregation
    }
}

fn browse_candidate(file: FileRef) -> Candidate {
    Candidate::new(file, MatchKind::All).with_scores(BROWSE_SCORE, BROWSE_SCORE)
}

/// Filename, then path, then content precedence for one file.
fn score_file(
    file: FileRef,
    content: Option<&str>,
    query: &str,
) -> Option<Candidate> {
    if query_matches(&file.display_name, query) {
        return Some(
            Candidate::new(file, MatchKind::Filename)
                .with_scores(FILENAME_MATCH_SCORE, FILENAME_RELEVANCE),
        );
    }
    if query_matches(&file.path, query) {
        return Some(
            Candidate::new(file, MatchKind::Path)
                .with_scores(PATH_MATCH_SCORE, PATH_RELEVANCE),
        );
    }
    let score = content_match_score(content?, query)?;
    Some(
        Candidate::new(file, MatchKind::Content)
            .with_scores(score, CONTENT_RELEVANCE),
    )
}

/// Significant words of a multi-word query (longer than 2 characters).
fn significant_words(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn alphanumeric_lower(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Case-insensitive query match against `text`.
///
/// Accepts exact containment; for multi-word queries, containment of every
/// word longer than 2 characters; for single long queries, containment in
/// some whitespace token once punctuation is ignored on both sides.
pub fn query_matches(text: &str, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let text_lower = text.to_lowercase();
    let query_lower = query.to_lowercase();
    if text_lower.contains(&query_lower) {
        return true;
    }

    if query.split_whitespace().count() > 1 {
        let words = significant_words(query);
        return !words.is_empty()
            && words.iter().all(|w| text_lower.contains(w.as_str()));
    }

    let needle = alphanumeric_lower(query);
    needle.chars().count() >= LONG_QUERY_CHARS
        && text
            .split_whitespace()
            .any(|token| alphanumeric_lower(token).contains(&needle))
}

/// Frequency-normalized content score, or `None` if the content misses.
pub fn content_match_score(content: &str, query: &str) -> Option<f64> {
    if !query_matches(content, query) {
        return None;
    }
    let mut hits = count_occurrences(content, query);
    if hits == 0 {
        hits = significant_words(query)
            .iter()
            .map(|w| count_occurrences(content, w))
            .sum();
    }
    Some((hits.max(1) as f64 / CONTENT_HITS_SATURATION).min(1.0))
}
