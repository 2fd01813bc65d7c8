//! Rewards candidates whose query terms occur close together.

use serde::{Deserialize, Serialize};

use crate::{
    candidate::{Candidate, sort_by_relevance},
    text_util::{levenshtein, tokenize, words},
};

/// Shortest word or term length for fuzzy and prefix matching.
const MIN_FUZZY_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Average word distance below which a match counts as close.
    pub threshold: f64,
    /// Score of a perfect (distance 0) match.
    pub boost: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            boost: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProximityScore {
    pub score: f64,
    /// Mean of the minimal distances between adjacent query terms.
    pub avg_distance: f64,
    pub has_proximity: bool,
    pub term_count: usize,
}

/// Whether content `word` stands for query `term`.
///
/// Both are expected lowercase.
pub fn word_matches(word: &str, term: &str) -> bool {
    if word == term {
        return true;
    }
    let word_len = word.chars().count();
    if word_len < MIN_FUZZY_CHARS {
        return false;
    }
    levenshtein(word, term) <= 1
        || (term.chars().count() >= MIN_FUZZY_CHARS && word.starts_with(term))
}

/// Smallest `|a - b|` over two sorted position lists.
fn min_distance(a: &[usize], b: &[usize]) -> usize {
    let (mut i, mut j) = (0, 0);
    let mut best = usize::MAX;
    while i < a.len() && j < b.len() {
        best = best.min(a[i].abs_diff(b[j]));
        if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    best
}

#[derive(Debug, Clone, Default)]
pub struct ProximityMatcher {
    config: ProximityConfig,
}

impl ProximityMatcher {
    pub fn new(config: ProximityConfig) -> Self {
        Self { config }
    }

    /// Query terms in order, without repeats.
    pub fn query_terms(query: &str) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in tokenize(query) {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }

    pub fn score(&self, query: &str, content: &str) -> ProximityScore {
        self.score_terms(&Self::query_terms(query), content)
    }

    pub fn score_terms(&self, terms: &[String], content: &str) -> ProximityScore {
        let term_count = terms.len();
        let none = ProximityScore {
            term_count,
            ..Default::default()
        };
        if terms.is_empty() {
            return none;
        }

        let content_words = words(content);
        let mut positions: Vec<Vec<usize>> = vec![Vec::new(); term_count];
        for (pos, word) in content_words.iter().enumerate() {
            for (t, term) in terms.iter().enumerate() {
                if word_matches(word, term) {
                    positions[t].push(pos);
                }
            }
        }
        if positions.iter().any(Vec::is_empty) {
            return none;
        }

        let pairs: Vec<usize> = positions
            .windows(2)
            .map(|pair| min_distance(&pair[0], &pair[1]))
            .collect();
        let avg_distance = if pairs.is_empty() {
            0.0
        } else {
            pairs.iter().sum::<usize>() as f64 / pairs.len() as f64
        };

        let ProximityConfig { threshold, boost } = self.config;
        let score = if avg_distance <= threshold {
            boost / (1.0 + avg_distance)
        } else {
            boost / (1.0 + 2.0 * avg_distance)
        };

        ProximityScore {
            score,
            avg_distance,
            has_proximity: avg_distance < threshold,
            term_count,
        }
    }

    /// Score every candidate and add close matches to their relevance.
    ///
    /// Single-term queries pass through untouched.
    pub fn apply(&self, mut candidates: Vec<Candidate>, query: &str) -> Vec<Candidate> {
        let terms = Self::query_terms(query);
        if terms.len() < 2 {
            return candidates;
        }

        for candidate in &mut candidates {
            let result = self.score_terms(&terms, candidate.searchable_text());
            candidate.set_meta("proximity_score", result.score);
            candidate.set_meta("proximity_distance", result.avg_distance);
            candidate.set_meta("proximity_terms", result.term_count);
            if result.has_proximity {
                candidate.relevance_score += result.score;
            }
        }
        sort_by_relevance(&mut candidates);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::{candidate::MatchKind, store::FileRef};

    #[test]
    fn match_rules() {
        assert!(word_matches("rust", "rust"));
        assert!(word_matches("rusty", "rust"));
        assert!(word_matches("rast", "rust"));
        assert!(word_matches("ranking", "rank"));
        assert!(!word_matches("ab", "ac"));
        assert!(!word_matches("go", "gopher"));
        assert!(!word_matches("rustacean", "ru"));
    }

    #[test]
    fn adjacent_terms_score_full_boost_over_one() {
        let matcher = ProximityMatcher::default();
        let s = matcher.score("bm25 ranking", "bm25 ranking explained");
        assert_eq!(s.avg_distance, 1.0);
        assert!(s.has_proximity);
        assert!((s.score - 1.0).abs() < 1e-9);
        assert_eq!(s.term_count, 2);
    }

    #[test]
    fn distant_terms_are_penalized() {
        let matcher = ProximityMatcher::default();
        let content = format!("alpha {} beta", "filler ".repeat(9));
        let s = matcher.score("alpha beta", &content);
        assert_eq!(s.avg_distance, 10.0);
        assert!(!s.has_proximity);
        assert!((s.score - 2.0 / 21.0).abs() < 1e-9);
    }

    #[test]
    fn missing_term_scores_zero() {
        let matcher = ProximityMatcher::default();
        let s = matcher.score("alpha gamma", "alpha beta");
        assert_eq!(s.score, 0.0);
        assert!(!s.has_proximity);
    }

    #[test]
    fn uses_closest_occurrences() {
        let matcher = ProximityMatcher::default();
        let s = matcher.score(
            "cache ttl",
            "cache one two three four five six ttl cache ttl",
        );
        assert_eq!(s.avg_distance, 1.0);
    }

    #[test]
    fn apply_records_metadata_and_boosts_close_matches() {
        let matcher = ProximityMatcher::default();
        let close = Candidate::new(FileRef::new("a.md", 0, 0), MatchKind::Ranked)
            .with_content("disk cache ttl")
            .with_scores(0.0, 1.0);
        let far = Candidate::new(FileRef::new("b.md", 0, 0), MatchKind::Ranked)
            .with_content(format!("cache {} ttl", "x ".repeat(20)))
            .with_scores(0.0, 1.5);

        let out = matcher.apply(vec![far, close], "cache ttl");
        assert_eq!(out[0].path(), "a.md");
        assert!((out[0].relevance_score - 2.0).abs() < 1e-9);
        assert_eq!(out[1].relevance_score, 1.5);
        assert_eq!(out[1].metadata["proximity_terms"], json!(2));
    }

    #[test]
    fn apply_ignores_single_term_queries() {
        let matcher = ProximityMatcher::default();
        let c = Candidate::new(FileRef::new("a.md", 0, 0), MatchKind::Ranked)
            .with_content("cache");
        let out = matcher.apply(vec![c], "cache");
        assert!(out[0].metadata.is_empty());
    }

    proptest! {
        #[test]
        fn single_term_has_zero_distance(
            term in "[a-z]{2,8}",
            content in "[a-z ]{0,200}",
        ) {
            let s = ProximityMatcher::default().score(&term, &content);
            prop_assert_eq!(s.avg_distance, 0.0);
            prop_assert!(s.score == 0.0 || s.has_proximity);
        }
    }
}
