//! Query rewriting: spelling correction, synonym and term expansion, plus
//! the field boosts and filters carried alongside the rewritten terms.
//!
//! Every table is configuration; nothing here learns or computes
//! linguistic data.

use std::collections::BTreeMap;

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{candidate::Candidate, error::Result, store::FileRef, text_util::tokenize};

/// Confidence lost per applied rewrite stage.
const CONFIDENCE_STEP: f64 = 0.1;
const SECS_PER_DAY: u64 = 86_400;

/// Relative weight of each field, for consumers that score fields apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBoosts {
    pub filename: f64,
    pub path: f64,
    pub content: f64,
    pub tags: f64,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self {
            filename: 2.0,
            path: 1.5,
            content: 1.0,
            tags: 1.2,
        }
    }
}

/// Static filters a caller may push down to retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilters {
    /// Glob over vault-relative paths, e.g. `projects/**`.
    pub pattern: Option<String>,
    /// Keep only files modified within this many days.
    pub recent_days: Option<u64>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.recent_days.is_none()
    }

    pub fn compile(&self) -> Result<CandidateFilter> {
        let matcher = match &self.pattern {
            Some(pattern) => Some(Glob::new(pattern)?.compile_matcher()),
            None => None,
        };
        Ok(CandidateFilter {
            matcher,
            recent_days: self.recent_days,
        })
    }
}

/// Compiled [`QueryFilters`].
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    matcher: Option<GlobMatcher>,
    recent_days: Option<u64>,
}

impl CandidateFilter {
    pub fn matches(&self, file: &FileRef, now: u64) -> bool {
        if let Some(matcher) = &self.matcher
            && !matcher.is_match(&file.path)
        {
            return false;
        }
        if let Some(days) = self.recent_days {
            let cutoff = now.saturating_sub(days.saturating_mul(SECS_PER_DAY));
            return file.modified_at >= cutoff && file.modified_at > 0;
        }
        true
    }

    pub fn apply(&self, candidates: Vec<Candidate>, now: u64) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| self.matches(&c.file, now))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Misspelling → canonical spelling.
    pub corrections: BTreeMap<String, String>,
    /// Term → synonyms; at most `max_synonyms` are appended per term.
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// Term → expansions; only the first is appended.
    pub expansions: BTreeMap<String, Vec<String>>,
    pub max_synonyms: usize,
    pub field_boosts: FieldBoosts,
    pub filters: QueryFilters,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            corrections: BTreeMap::new(),
            synonyms: BTreeMap::new(),
            expansions: BTreeMap::new(),
            max_synonyms: 2,
            field_boosts: FieldBoosts::default(),
            filters: QueryFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteStage {
    Correction,
    Synonyms,
    Expansion,
}

/// A query after rewriting.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedQuery {
    pub original: String,
    /// The query after spelling correction only.
    pub corrected: String,
    /// Every term after all stages, in order.
    pub terms: Vec<String>,
    /// `terms` joined by spaces.
    pub text: String,
    /// 1.0, minus 0.1 per applied stage.
    pub confidence: f64,
    pub stages: Vec<RewriteStage>,
    pub field_boosts: FieldBoosts,
    pub filters: QueryFilters,
}

impl ComposedQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

fn push_unique(terms: &mut Vec<String>, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() || terms.contains(&term) {
        return false;
    }
    terms.push(term);
    true
}

#[derive(Debug, Clone, Default)]
pub struct QueryComposer {
    config: QueryConfig,
}

impl QueryComposer {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn lookup<'a, V>(table: &'a BTreeMap<String, V>, term: &str) -> Option<&'a V> {
        table.get(term).or_else(|| {
            table
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(term))
                .map(|(_, v)| v)
        })
    }

    /// Rewrite `query` through correction, synonyms and expansion.
    ///
    /// # Examples
    ///
    /// ```
    /// use vaultctx::query::{QueryComposer, QueryConfig};
    ///
    /// let mut config = QueryConfig::default();
    /// config.corrections.insert("recieve".into(), "receive".into());
    /// let composed = QueryComposer::new(config).compose("recieve mail");
    ///
    /// assert_eq!(composed.corrected, "receive mail");
    /// assert_eq!(composed.terms, vec!["receive", "mail"]);
    /// assert_eq!(composed.confidence, 0.9);
    /// ```
    pub fn compose(&self, query: &str) -> ComposedQuery {
        let original = query.trim().to_string();
        let tokens = tokenize(&original);
        let mut stages = Vec::new();

        let corrected_tokens: Vec<String> = tokens
            .iter()
            .map(|t| match Self::lookup(&self.config.corrections, t) {
                Some(fix) => fix.trim().to_lowercase(),
                None => t.clone(),
            })
            .filter(|t| !t.is_empty())
            .collect();
        let corrected = if corrected_tokens != tokens {
            stages.push(RewriteStage::Correction);
            corrected_tokens.join(" ")
        } else {
            original.clone()
        };

        let mut terms: Vec<String> = Vec::new();
        for token in &corrected_tokens {
            push_unique(&mut terms, token);
        }

        let mut added = false;
        for token in &corrected_tokens {
            if let Some(synonyms) = Self::lookup(&self.config.synonyms, token) {
                for synonym in synonyms.iter().take(self.config.max_synonyms) {
                    added |= push_unique(&mut terms, synonym);
                }
            }
        }
        if added {
            stages.push(RewriteStage::Synonyms);
        }

        let mut added = false;
        for term in terms.clone() {
            if let Some(first) = Self::lookup(&self.config.expansions, &term)
                .and_then(|e| e.first())
            {
                added |= push_unique(&mut terms, first);
            }
        }
        if added {
            stages.push(RewriteStage::Expansion);
        }

        let confidence = 1.0 - CONFIDENCE_STEP * stages.len() as f64;
        let composed = ComposedQuery {
            original,
            corrected,
            text: terms.join(" "),
            terms,
            confidence: (confidence * 10.0).round() / 10.0,
            stages,
            field_boosts: self.config.field_boosts,
            filters: self.config.filters.clone(),
        };
        debug!(
            original = %composed.original,
            rewritten = %composed.text,
            stages = composed.stages.len(),
            "composed query"
        );
        composed
    }
}
