//! Lexical relevance scoring over a candidate set.
//!
//! Statistics are computed per call from the candidates at hand: there is
//! no global corpus. Term frequency is a case-insensitive substring count
//! over `name + " " + content`, so `rank` also matches inside longer words.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{Candidate, MatchKind, sort_by_relevance};

/// Lower bound on inverse document frequency.
///
/// Raw BM25 idf turns negative once a term appears in more than half of the
/// candidates; the floor keeps every matching term a positive contribution.
pub const IDF_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Per-call statistics over a candidate set.
struct Corpus {
    texts: Vec<String>,
    lengths: Vec<f64>,
    avg_len: f64,
    /// term → indices of candidates whose text contains it
    postings: HashMap<String, BTreeSet<usize>>,
}

impl Corpus {
    fn build(candidates: &[Candidate], terms: &[String]) -> Self {
        let texts: Vec<String> = candidates
            .iter()
            .map(|c| c.combined_text().to_lowercase())
            .collect();
        let lengths: Vec<f64> =
            texts.iter().map(|t| t.chars().count() as f64).collect();
        let avg_len = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<f64>() / lengths.len() as f64
        };

        let mut postings: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for term in terms {
            let docs = postings.entry(term.clone()).or_default();
            for (i, text) in texts.iter().enumerate() {
                if text.contains(term.as_str()) {
                    docs.insert(i);
                }
            }
        }

        Self {
            texts,
            lengths,
            avg_len,
            postings,
        }
    }

    fn len(&self) -> usize {
        self.texts.len()
    }

    fn tf(&self, term: &str, doc: usize) -> f64 {
        self.texts[doc].matches(term).count() as f64
    }

    fn df(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, BTreeSet::len)
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.len() as f64;
        let df = self.df(term) as f64;
        ((n - df + 0.5) / (df + 0.5)).ln().max(IDF_FLOOR)
    }

    fn length_ratio(&self, doc: usize) -> f64 {
        if self.avg_len > 0.0 {
            self.lengths[doc] / self.avg_len
        } else {
            1.0
        }
    }
}

/// Lowercased query terms with duplicates removed, order kept.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    params: Bm25Params,
}

impl RankingEngine {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// BM25 score of every candidate, in input order.
    pub fn bm25_scores(
        &self,
        candidates: &[Candidate],
        terms: &[String],
    ) -> Vec<f64> {
        let terms = normalize_terms(terms);
        let corpus = Corpus::build(candidates, &terms);
        let Bm25Params { k1, b } = self.params;

        (0..corpus.len())
            .map(|doc| {
                terms
                    .iter()
                    .map(|term| {
                        let tf = corpus.tf(term, doc);
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let norm = k1 * (1.0 - b + b * corpus.length_ratio(doc));
                        corpus.idf(term) * tf * (k1 + 1.0) / (tf + norm)
                    })
                    .sum()
            })
            .collect()
    }

    /// Unsaturated `tf · idf` score of every candidate, in input order.
    pub fn tfidf_scores(
        &self,
        candidates: &[Candidate],
        terms: &[String],
    ) -> Vec<f64> {
        let terms = normalize_terms(terms);
        let corpus = Corpus::build(candidates, &terms);
        (0..corpus.len())
            .map(|doc| {
                terms
                    .iter()
                    .map(|term| corpus.tf(term, doc) * corpus.idf(term))
                    .sum()
            })
            .collect()
    }

    /// Overwrite relevance with BM25 and sort, highest first.
    ///
    /// With no usable terms the candidates are returned untouched, keeping
    /// whatever scores aggregation gave them.
    pub fn rank(
        &self,
        mut candidates: Vec<Candidate>,
        terms: &[String],
    ) -> Vec<Candidate> {
        if normalize_terms(terms).is_empty() || candidates.is_empty() {
            return candidates;
        }

        let scores = self.bm25_scores(&candidates, terms);
        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.relevance_score = score;
            candidate.match_kind = MatchKind::Ranked;
        }
        sort_by_relevance(&mut candidates);
        debug!(
            candidates = candidates.len(),
            top = candidates.first().map(|c| c.relevance_score),
            "ranked candidates"
        );
        candidates
    }
}
