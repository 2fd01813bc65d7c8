//! The end-to-end query pipeline.
//!
//! `run` goes from a raw query to an assembled, token-budgeted context:
//!
//! 1. compose (correct, expand) the query
//! 2. look candidates up in the local index, else aggregate them from the
//!    file store
//! 3. apply the composed filters
//! 4. hydrate missing content through the batched fetcher
//! 5. rank, proximity-boost, metadata-boost, deduplicate
//! 6. truncate and assemble
//!
//! `search` is the plain grep-like entrypoint: it matches a pattern against
//! file names, paths and contents without ranking or assembly.

use std::{collections::HashMap, sync::Arc, time::Duration};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    aggregate::{Aggregator, CONTENT_WINDOW},
    assemble::{AssembledContext, ContextAssembler},
    boost::MetadataBooster,
    cache::DiskCache,
    candidate::{Candidate, MatchKind, sort_by_relevance},
    config::Config,
    content::{ContentLoader, LoadStats},
    data_dir::DataDir,
    dedup::Deduplicator,
    error::{Error, Result},
    fetcher::{BatchFetcher, ProgressFn},
    local_index::{LocalIndex, RefreshOutcome, hits_to_candidates},
    proximity::ProximityMatcher,
    query::{ComposedQuery, QueryComposer},
    ranking::RankingEngine,
    store::{FileRef, FileStore, unix_now},
    text_util::{add_line_numbers, extract_snippet, similarity, words},
    trie::Suggestion,
    walker::discover_files,
};

/// Candidates retrieved per requested result, before ranking narrows
/// them down.
const CANDIDATE_POOL_FACTOR: usize = 5;
const FILENAME_HIT_SCORE: f64 = 1.0;
const PATH_HIT_SCORE: f64 = 0.8;
const CONTENT_HITS_SATURATION: f64 = 10.0;

/// Per-call switches of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_results: usize,
    pub token_budget: usize,
    pub use_cache: bool,
    pub use_index: bool,
    pub use_ranking: bool,
    pub use_deduplication: bool,
    /// Stop scanning files after this long and return what was found.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        let search = &config.search;
        Self {
            max_results: search.max_results,
            token_budget: search.token_budget,
            use_cache: config.cache.enabled,
            use_index: config.index.enabled,
            use_ranking: config.stages.ranking,
            use_deduplication: config.stages.dedup,
            timeout: search.timeout(),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub millis: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub candidates: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub fetch_failures: usize,
    pub duplicates_removed: usize,
    pub used_index: bool,
    /// The deadline passed; results are partial.
    pub timed_out: bool,
}

/// One ranked file in a run's result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedFile {
    pub path: String,
    pub score: f64,
    pub match_kind: MatchKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub composed_query: ComposedQuery,
    pub files_scanned: usize,
    pub results_found: usize,
    pub results: Vec<RankedFile>,
    pub assembled_context: AssembledContext,
    pub performance: Vec<StageTiming>,
    pub stats: RunStats,
}

/// Matching switches of [`Pipeline::search`].
#[derive(Debug, Clone, Copy)]
pub struct SearchFlags {
    pub case_sensitive: bool,
    pub whole_word: bool,
    pub regex: bool,
    pub fuzzy: bool,
    pub max_results: usize,
    /// Stop reading contents after this long. Falls back to the configured
    /// search timeout.
    pub timeout: Option<Duration>,
}

impl Default for SearchFlags {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            whole_word: false,
            regex: false,
            fuzzy: false,
            max_results: 20,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub file: FileRef,
    pub score: f64,
    pub match_type: MatchKind,
    pub match_text: String,
    /// Line-numbered excerpt around the first match.
    pub snippet: String,
}

/// Hits of a [`Pipeline::search`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchReport {
    pub hits: Vec<SearchHit>,
    /// Files whose contents were searched.
    pub files_scanned: usize,
    /// The deadline passed; contents of the remaining files were skipped.
    pub timed_out: bool,
}

struct Timer {
    timings: Vec<StageTiming>,
    last: Instant,
}

impl Timer {
    fn new() -> Self {
        Self {
            timings: Vec::new(),
            last: Instant::now(),
        }
    }

    fn lap(&mut self, stage: &'static str) {
        let now = Instant::now();
        self.timings.push(StageTiming {
            stage,
            millis: (now - self.last).as_secs_f64() * 1000.0,
        });
        self.last = now;
    }
}

/// Retrieved candidates and what retrieving them cost.
struct Retrieval {
    candidates: Vec<Candidate>,
    files_scanned: usize,
    load: LoadStats,
    used_index: bool,
    timed_out: bool,
}

pub struct Pipeline<S> {
    store: Arc<S>,
    config: Config,
    loader: ContentLoader<S>,
    cache: Option<Arc<DiskCache<String>>>,
    index: Option<Arc<LocalIndex>>,
    composer: QueryComposer,
    ranking: RankingEngine,
    proximity: ProximityMatcher,
    booster: MetadataBooster,
    dedup: Deduplicator,
    assembler: ContextAssembler,
}

impl<S: FileStore> Pipeline<S> {
    /// A pipeline without a content cache or local index.
    pub fn new(store: Arc<S>, config: Config) -> Self {
        let fetcher = BatchFetcher::new(Arc::clone(&store), config.fetch.clone());
        Self {
            loader: ContentLoader::new(fetcher, None),
            cache: None,
            index: None,
            composer: QueryComposer::new(config.query.clone()),
            ranking: RankingEngine::new(config.ranking),
            proximity: ProximityMatcher::new(config.proximity),
            booster: MetadataBooster::new(config.boost.clone()),
            dedup: Deduplicator::new(config.dedup),
            assembler: ContextAssembler::new(config.assembler.clone()),
            store,
            config,
        }
    }

    /// A pipeline keeping its cache and index under `data_dir`, as enabled
    /// in the configuration.
    pub fn open(store: Arc<S>, config: Config, data_dir: &DataDir) -> Result<Self> {
        let cache = if config.cache.enabled {
            Some(Arc::new(DiskCache::open(
                &data_dir.cache_dir()?,
                config.cache.ttl(),
            )?))
        } else {
            None
        };
        let index = config.index.enabled.then(|| {
            let vault = store.vault_id();
            let root = config.aggregate.root.clone();
            let path = data_dir.index_file(&format!("{vault}\n{root}"));
            Arc::new(LocalIndex::new(path, vault, root, config.index.clone()))
        });

        let mut pipeline = Self::new(store, config);
        if let Some(cache) = cache {
            pipeline = pipeline.with_cache(cache);
        }
        if let Some(index) = index {
            pipeline = pipeline.with_index(index);
        }
        Ok(pipeline)
    }

    pub fn with_cache(mut self, cache: Arc<DiskCache<String>>) -> Self {
        let fetcher =
            BatchFetcher::new(Arc::clone(&self.store), self.config.fetch.clone());
        self.loader = ContentLoader::new(fetcher, Some(Arc::clone(&cache)));
        self.cache = Some(cache);
        self
    }

    pub fn with_index(mut self, index: Arc<LocalIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> Option<&DiskCache<String>> {
        self.cache.as_deref()
    }

    pub fn index(&self) -> Option<&LocalIndex> {
        self.index.as_deref()
    }

    fn loader(&self, use_cache: bool) -> ContentLoader<S> {
        if use_cache {
            self.loader.clone()
        } else {
            self.loader.uncached()
        }
    }

    /// Rebuild the local index if stale (or always, with `force`).
    pub async fn refresh_index(
        &self,
        force: bool,
        progress: Option<ProgressFn>,
    ) -> Result<RefreshOutcome> {
        let index = self.index.as_ref().ok_or_else(|| {
            Error::Config("the local index is disabled".into())
        })?;
        index
            .refresh_with_progress(&*self.store, &self.loader, force, progress)
            .await
    }

    /// Autocomplete `prefix` from the local index's trie.
    pub async fn complete(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Suggestion>> {
        let index = self.index.as_ref().ok_or_else(|| {
            Error::Config("the local index is disabled".into())
        })?;
        if let Err(err) = index.refresh(&*self.store, &self.loader, false).await {
            warn!(error = %err, "index refresh failed, completing from stale data");
        }
        Ok(index.suggest(prefix, limit))
    }

    async fn retrieve_from_index(
        &self,
        composed: &ComposedQuery,
        loader: &ContentLoader<S>,
        pool: usize,
    ) -> Option<Retrieval> {
        let index = self.index.as_ref()?;
        if composed.is_empty() {
            return None;
        }
        if let Err(err) = index.refresh(&*self.store, loader, false).await {
            warn!(error = %err, "index unavailable, falling back to aggregation");
            return None;
        }

        let hits = index.lookup(&composed.text);
        let mut candidates = hits_to_candidates(&hits, composed.terms.len());
        if candidates.is_empty() {
            return None;
        }
        candidates.truncate(pool);
        Some(Retrieval {
            candidates,
            files_scanned: index.status().documents,
            load: LoadStats::default(),
            used_index: true,
            timed_out: false,
        })
    }

    async fn retrieve(
        &self,
        composed: &ComposedQuery,
        options: &RunOptions,
        loader: &ContentLoader<S>,
        deadline: Option<Instant>,
    ) -> Result<Retrieval> {
        let pool = options.max_results.saturating_mul(CANDIDATE_POOL_FACTOR);
        if options.use_index
            && let Some(retrieval) =
                self.retrieve_from_index(composed, loader, pool).await
        {
            return Ok(retrieval);
        }

        let aggregation =
            Aggregator::new(loader.clone(), self.config.aggregate.clone())
                .with_deadline(deadline)
                .aggregate(&*self.store, &composed.corrected, pool)
                .await?;
        Ok(Retrieval {
            candidates: aggregation.candidates,
            files_scanned: aggregation.files_scanned,
            load: aggregation.load,
            used_index: false,
            timed_out: aggregation.timed_out,
        })
    }

    /// Fill in missing contents. Returns false if `deadline` passed first.
    async fn hydrate(
        &self,
        candidates: &mut [Candidate],
        loader: &ContentLoader<S>,
        load: &mut LoadStats,
        deadline: Option<Instant>,
    ) -> bool {
        let missing: Vec<FileRef> = candidates
            .iter()
            .filter(|c| c.content.is_none())
            .map(|c| c.file.clone())
            .collect();
        if missing.is_empty() {
            return true;
        }

        let Some((mut contents, stats)) =
            loader.load_until(&missing, deadline).await
        else {
            return false;
        };
        load.merge(stats);
        for candidate in candidates.iter_mut() {
            if candidate.content.is_none() {
                candidate.content = contents.remove(candidate.path());
            }
        }
        true
    }

    /// Turn `query` into an assembled, budgeted context.
    ///
    /// Fails only if the vault cannot be listed or holds no content files;
    /// per-file failures and a passed deadline degrade the result instead.
    pub async fn run(&self, query: &str, options: RunOptions) -> Result<RunOutput> {
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let expired = || deadline.is_some_and(|d| Instant::now() >= d);
        let stages = self.config.stages;
        let loader = self.loader(options.use_cache);
        let mut timer = Timer::new();
        let mut stats = RunStats::default();

        let composed = self.composer.compose(query);
        timer.lap("compose");

        let retrieval = self.retrieve(&composed, &options, &loader, deadline).await?;
        let mut load = retrieval.load;
        let mut candidates = retrieval.candidates;
        stats.used_index = retrieval.used_index;
        stats.timed_out = retrieval.timed_out;
        timer.lap("retrieve");

        if !composed.filters.is_empty() {
            let filter = composed.filters.compile()?;
            candidates = filter.apply(candidates, unix_now());
            timer.lap("filter");
        }
        stats.candidates = candidates.len();

        if stages.hydrate {
            let hydrated = !expired()
                && self
                    .hydrate(&mut candidates, &loader, &mut load, deadline)
                    .await;
            stats.timed_out |= !hydrated;
            timer.lap("hydrate");
        }

        if options.use_ranking && stages.ranking {
            candidates = self.ranking.rank(candidates, &composed.terms);
            timer.lap("rank");
        }
        if stages.proximity {
            candidates = self.proximity.apply(candidates, &composed.corrected);
            timer.lap("proximity");
        }
        if stages.boost {
            candidates = self.booster.apply(candidates, &composed.text);
            timer.lap("boost");
        }
        if options.use_deduplication && stages.dedup {
            let before = candidates.len();
            candidates = self.dedup.dedup(candidates);
            stats.duplicates_removed = before - candidates.len();
            timer.lap("dedup");
        }

        sort_by_relevance(&mut candidates);
        candidates.truncate(options.max_results);
        let assembled_context =
            self.assembler
                .assemble(&candidates, &composed.original, options.token_budget);
        timer.lap("assemble");

        stats.cache_hits = load.cache_hits;
        stats.cache_misses = load.cache_misses;
        stats.fetch_failures = load.fetch_failures;
        let results: Vec<RankedFile> = candidates
            .iter()
            .map(|c| RankedFile {
                path: c.path().to_string(),
                score: c.relevance_score,
                match_kind: c.match_kind,
            })
            .collect();

        info!(
            query = %composed.original,
            scanned = retrieval.files_scanned,
            results = results.len(),
            tokens = assembled_context.total_tokens,
            timed_out = stats.timed_out,
            "run complete"
        );
        Ok(RunOutput {
            composed_query: composed,
            files_scanned: retrieval.files_scanned,
            results_found: results.len(),
            results,
            assembled_context,
            performance: timer.timings,
            stats,
        })
    }

    /// Match `query` against the names, paths and contents of vault files.
    ///
    /// Names and paths of every file are matched. Contents are read in
    /// windows until the deadline passes; later files can then only hit by
    /// name or path.
    pub async fn search(
        &self,
        query: &str,
        flags: SearchFlags,
    ) -> Result<SearchReport> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchReport::default());
        }
        let matcher = build_matcher(query, &flags)?;
        let aggregate = &self.config.aggregate;
        let deadline = flags
            .timeout
            .or_else(|| self.config.search.timeout())
            .map(|t| Instant::now() + t);

        let files =
            discover_files(&*self.store, &aggregate.root, &aggregate.extensions)
                .await?;
        if files.is_empty() {
            return Err(Error::EmptyVault(aggregate.root.clone()));
        }

        let mut contents = HashMap::new();
        let mut report = SearchReport::default();
        for window in files.chunks(CONTENT_WINDOW) {
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            let loaded = if expired {
                None
            } else {
                self.loader.load_until(window, deadline).await
            };
            let Some((loaded, _)) = loaded else {
                warn!(query, scanned = report.files_scanned, "search timed out");
                report.timed_out = true;
                break;
            };
            contents.extend(loaded);
            report.files_scanned += window.len();
        }

        let fuzzy_words = flags.fuzzy.then(|| words(query));
        let threshold = self.config.search.fuzzy_threshold;

        let mut hits = Vec::new();
        for file in files {
            let content = contents.get(&file.path).map(String::as_str);
            let hit = if let Some(m) = matcher.find(&file.display_name) {
                let text = m.as_str().to_string();
                Some((MatchKind::Filename, FILENAME_HIT_SCORE, text, None))
            } else if let Some(m) = matcher.find(&file.path) {
                let text = m.as_str().to_string();
                Some((MatchKind::Path, PATH_HIT_SCORE, text, None))
            } else {
                content.and_then(|text| {
                    content_hit(text, &matcher, fuzzy_words.as_deref(), threshold)
                })
            };

            let Some((match_type, score, match_text, offset)) = hit else {
                continue;
            };
            let snippet = content
                .and_then(|text| extract_snippet(text, offset))
                .map(|(text, start)| add_line_numbers(&text, start))
                .unwrap_or_default();
            hits.push(SearchHit {
                file,
                score,
                match_type,
                match_text,
                snippet,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(flags.max_results);
        info!(
            query,
            hits = hits.len(),
            scanned = report.files_scanned,
            timed_out = report.timed_out,
            "search complete"
        );
        report.hits = hits;
        Ok(report)
    }
}

fn build_matcher(query: &str, flags: &SearchFlags) -> Result<Regex> {
    let pattern = if flags.regex {
        query.to_string()
    } else {
        regex::escape(query)
    };
    let pattern = if flags.whole_word {
        format!(r"\b(?:{pattern})\b")
    } else {
        pattern
    };
    Ok(RegexBuilder::new(&pattern)
        .case_insensitive(!flags.case_sensitive)
        .build()?)
}

/// Alphanumeric words of `text` with their byte offsets.
fn word_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut found = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                found.push((s, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        found.push((s, &text[s..]));
    }
    found
}

/// Score, first matched text and its offset for a content match.
fn content_hit(
    text: &str,
    matcher: &Regex,
    fuzzy_words: Option<&[String]>,
    threshold: f64,
) -> Option<(MatchKind, f64, String, Option<usize>)> {
    let mut occurrences = 0;
    let mut first: Option<(usize, String)> = None;
    for m in matcher.find_iter(text) {
        occurrences += 1;
        first.get_or_insert_with(|| (m.start(), m.as_str().to_string()));
    }

    if let Some(query_words) = fuzzy_words {
        for (offset, word) in word_offsets(text) {
            let close = query_words
                .iter()
                .any(|q| similarity(word, q) >= threshold);
            if close && !matcher.is_match(word) {
                occurrences += 1;
                first.get_or_insert_with(|| (offset, word.to_string()));
            }
        }
    }

    let (offset, match_text) = first?;
    let score = (occurrences as f64 / CONTENT_HITS_SATURATION).min(1.0);
    Some((MatchKind::Content, score, match_text, Some(offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryFileStore, testing::SlowStore};

    fn store() -> Arc<MemoryFileStore> {
        Arc::new(
            MemoryFileStore::new()
                .with_file(
                    "guides/setup.md",
                    "Install the tool.\nThen configure it.",
                    10,
                )
                .with_file(
                    "notes/ideas.md",
                    "line one\nline two\nReceive mail\nline four",
                    20,
                )
                .with_file("setup/extra.md", "nothing here", 30),
        )
    }

    fn pipeline() -> Pipeline<MemoryFileStore> {
        Pipeline::new(store(), Config::default())
    }

    #[test]
    fn matcher_flags() {
        let literal = build_matcher("a.b", &SearchFlags::default()).unwrap();
        assert!(literal.is_match("A.B"));
        assert!(!literal.is_match("axb"));

        let flags = SearchFlags {
            regex: true,
            case_sensitive: true,
            whole_word: true,
            ..Default::default()
        };
        let re = build_matcher("ca.", &flags).unwrap();
        assert!(re.is_match("a cat sat"));
        assert!(!re.is_match("a Cat sat"));
        assert!(!re.is_match("catalog"));

        let bad = SearchFlags {
            regex: true,
            ..Default::default()
        };
        assert!(matches!(build_matcher("(", &bad), Err(Error::Regex(_))));
    }

    #[tokio::test]
    async fn search_ranks_name_path_then_content() {
        let hits = pipeline()
            .search("setup", SearchFlags::default())
            .await
            .unwrap()
            .hits;
        let found: Vec<_> = hits
            .iter()
            .map(|h| (h.file.path.as_str(), h.match_type))
            .collect();
        assert_eq!(
            found,
            vec![
                ("guides/setup.md", MatchKind::Filename),
                ("setup/extra.md", MatchKind::Path),
            ]
        );
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 0.8);
        assert!(hits[0].snippet.starts_with("1: Install the tool."));
    }

    #[tokio::test]
    async fn content_hit_has_numbered_snippet() {
        let hits = pipeline()
            .search("receive", SearchFlags::default())
            .await
            .unwrap()
            .hits;
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.match_type, MatchKind::Content);
        assert_eq!(hit.match_text, "Receive");
        assert!((hit.score - 0.1).abs() < 1e-9);
        assert!(hit.snippet.starts_with("1: line one"));
        assert!(hit.snippet.contains("3: Receive mail"));
    }

    #[tokio::test]
    async fn fuzzy_search_accepts_near_misses() {
        let p = pipeline();
        let exact = p.search("recive", SearchFlags::default()).await.unwrap();
        assert!(exact.hits.is_empty());

        let flags = SearchFlags {
            fuzzy: true,
            ..Default::default()
        };
        let fuzzy = p.search("recive", flags).await.unwrap().hits;
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].match_text, "Receive");
    }

    #[tokio::test]
    async fn search_respects_max_results() {
        let flags = SearchFlags {
            max_results: 1,
            ..Default::default()
        };
        let report = pipeline().search("md", flags).await.unwrap();
        assert_eq!(report.hits.len(), 1);
        assert_eq!(report.files_scanned, 3);
    }

    #[tokio::test]
    async fn run_reports_stages_and_stats() {
        let output = pipeline()
            .run("configure", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(output.files_scanned, 3);
        assert_eq!(output.results_found, 1);
        assert_eq!(output.results[0].path, "guides/setup.md");
        assert_eq!(output.results[0].match_kind, MatchKind::Deduplicated);
        let stages: Vec<_> = output.performance.iter().map(|t| t.stage).collect();
        assert_eq!(
            stages,
            vec![
                "compose", "retrieve", "hydrate", "rank", "proximity", "boost",
                "dedup", "assemble"
            ]
        );
        assert!(!output.stats.used_index);
        assert!(output.assembled_context.rendered.contains("Then configure it."));
    }

    #[tokio::test]
    async fn disabled_stages_pass_through() {
        let options = RunOptions {
            use_ranking: false,
            use_deduplication: false,
            ..Default::default()
        };
        let output = pipeline().run("configure", options).await.unwrap();
        assert_eq!(output.results[0].match_kind, MatchKind::Content);
        assert!(output.results[0].score > 0.0);
    }

    #[tokio::test]
    async fn filters_narrow_candidates() {
        let mut config = Config::default();
        config.query.filters.pattern = Some("notes/**".into());
        let p = Pipeline::new(store(), config);
        let output = p.run("", RunOptions::default()).await.unwrap();
        let paths: Vec<_> = output.results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["notes/ideas.md"]);
    }

    #[tokio::test]
    async fn index_path_is_used_when_available() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let p = Pipeline::open(store(), Config::default(), &data_dir).unwrap();

        let output = p.run("receive", RunOptions::default()).await.unwrap();
        assert!(output.stats.used_index);
        assert_eq!(output.results[0].path, "notes/ideas.md");
        let index_file = p.index().unwrap().path();
        assert!(index_file.starts_with(tmp.path()));
        assert!(index_file.exists());

        let suggestions = p.complete("gui", 5).await.unwrap();
        assert_eq!(suggestions[0].term, "guides");
    }

    #[tokio::test]
    async fn unknown_terms_fall_back_to_aggregation() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let p = Pipeline::open(store(), Config::default(), &data_dir).unwrap();

        let output = p.run("extra", RunOptions::default()).await.unwrap();
        assert!(!output.stats.used_index);
        assert_eq!(output.results[0].path, "setup/extra.md");
    }

    #[tokio::test]
    async fn passed_deadline_returns_partial_results() {
        let options = RunOptions {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let output = pipeline().run("configure", options).await.unwrap();
        assert!(output.stats.timed_out);
        assert!(output.results.is_empty());
    }

    /// Fifty quick files followed by slow ones under `z/`.
    fn slow_tail_vault() -> Arc<SlowStore> {
        let mut vault = MemoryFileStore::new();
        for i in 0..50 {
            vault.insert(format!("a{i:02}.md"), format!("needle number {i}"), 1);
        }
        vault.insert("z/needle.md", "needle at the end", 1);
        vault.insert("z/tail.md", "one more needle", 1);
        Arc::new(SlowStore::new(vault, "z/", Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn run_deadline_interrupts_a_slow_scan() {
        tokio::time::pause();
        let started = Instant::now();
        let p = Pipeline::new(slow_tail_vault(), Config::default());
        let options = RunOptions {
            timeout: Some(Duration::from_secs(5)),
            use_deduplication: false,
            ..Default::default()
        };

        let output = p.run("needle", options).await.unwrap();
        assert!(output.stats.timed_out);
        assert_eq!(output.files_scanned, 50);
        assert_eq!(output.results.len(), 10);
        assert!(output.results.iter().all(|r| r.path.starts_with('a')));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn search_deadline_skips_slow_contents() {
        tokio::time::pause();
        let started = Instant::now();
        let p = Pipeline::new(slow_tail_vault(), Config::default());
        let flags = SearchFlags {
            max_results: 100,
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        let report = p.search("needle", flags).await.unwrap();
        assert!(report.timed_out);
        assert_eq!(report.files_scanned, 50);
        assert_eq!(report.hits.len(), 51);
        assert_eq!(report.hits[0].file.path, "z/needle.md");
        assert_eq!(report.hits[0].match_type, MatchKind::Filename);
        assert!(report.hits.iter().all(|h| h.file.path != "z/tail.md"));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn search_falls_back_to_configured_timeout() {
        tokio::time::pause();
        let mut config = Config::default();
        config.search.timeout_secs = 2;
        let p = Pipeline::new(slow_tail_vault(), config);

        let report = p.search("needle", SearchFlags::default()).await.unwrap();
        assert!(report.timed_out);
        assert_eq!(report.files_scanned, 50);
    }

    #[test]
    fn word_offsets_are_byte_offsets() {
        let text = "héllo, wörld 42!";
        let found = word_offsets(text);
        assert_eq!(found, vec![(0, "héllo"), (8, "wörld"), (15, "42")]);
        for (offset, word) in found {
            assert_eq!(&text[offset..offset + word.len()], word);
        }
        assert!(word_offsets("  ...  ").is_empty());
        assert_eq!(word_offsets("end"), vec![(0, "end")]);
    }

    #[tokio::test]
    async fn empty_vault_is_an_error() {
        let p = Pipeline::new(Arc::new(MemoryFileStore::new()), Config::default());
        assert!(matches!(
            p.run("x", RunOptions::default()).await,
            Err(Error::EmptyVault(_))
        ));
        assert!(matches!(
            p.search("x", SearchFlags::default()).await,
            Err(Error::EmptyVault(_))
        ));
    }
}
