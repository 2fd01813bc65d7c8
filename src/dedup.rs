//! Near-duplicate removal.
//!
//! A sweep in canonical order keeps each candidate unless it repeats the
//! signature of an earlier one or is too similar to one already kept, so
//! the first member of every duplicate cluster in that order survives.

use std::{cmp::Reverse, collections::HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    candidate::{Candidate, MatchKind},
    text_util::{similarity, similarity_upper_bound},
};

const NAME_WEIGHT: f64 = 0.3;
const PATH_WEIGHT: f64 = 0.2;
const CONTENT_WEIGHT: f64 = 0.5;

/// Which member of a duplicate cluster survives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStrategy {
    /// Most recently modified.
    #[default]
    Freshest,
    ShortestPath,
    LongestPath,
    HighestScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Weighted similarity at or above which two candidates are duplicates.
    pub threshold: f64,
    pub strategy: CanonicalStrategy,
    /// Characters of content folded into the signature.
    pub signature_chars: usize,
    /// Characters of content compared by edit distance.
    pub comparison_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            strategy: CanonicalStrategy::Freshest,
            signature_chars: 100,
            comparison_chars: 300,
        }
    }
}

fn prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Hex digest of name, path and the head of the content.
    pub fn signature(&self, candidate: &Candidate) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(candidate.name().as_bytes());
        hasher.update(b"\0");
        hasher.update(candidate.path().as_bytes());
        hasher.update(b"\0");
        hasher.update(
            prefix(candidate.content(), self.config.signature_chars).as_bytes(),
        );
        hasher.finalize().to_hex().to_string()
    }

    /// Weighted name, path and content similarity in `[0, 1]`.
    ///
    /// When either side has no content loaded, name and path similarity
    /// are reweighted to cover the whole range.
    pub fn similarity(&self, a: &Candidate, b: &Candidate) -> f64 {
        let name = similarity(a.name(), b.name());
        let path = similarity(a.path(), b.path());
        match (&a.content, &b.content) {
            (Some(ca), Some(cb)) => {
                let window = self.config.comparison_chars;
                let content = similarity(prefix(ca, window), prefix(cb, window));
                NAME_WEIGHT * name + PATH_WEIGHT * path + CONTENT_WEIGHT * content
            }
            _ => (NAME_WEIGHT * name + PATH_WEIGHT * path)
                / (NAME_WEIGHT + PATH_WEIGHT),
        }
    }

    /// Whether `a` and `b` are near-duplicates, i.e. their
    /// [`similarity`](Self::similarity) reaches the threshold.
    ///
    /// Name and path are compared first; the content edit distance is only
    /// computed when content lengths still allow reaching the threshold.
    pub fn is_duplicate(&self, a: &Candidate, b: &Candidate) -> bool {
        let threshold = self.config.threshold;
        let name = similarity(a.name(), b.name());
        let path = similarity(a.path(), b.path());
        let meta = NAME_WEIGHT * name + PATH_WEIGHT * path;
        let (Some(ca), Some(cb)) = (&a.content, &b.content) else {
            return meta / (NAME_WEIGHT + PATH_WEIGHT) >= threshold;
        };

        let window = self.config.comparison_chars;
        let (ca, cb) = (prefix(ca, window), prefix(cb, window));
        if meta + CONTENT_WEIGHT * similarity_upper_bound(ca, cb) < threshold {
            return false;
        }
        meta + CONTENT_WEIGHT * similarity(ca, cb) >= threshold
    }

    /// Indices of `candidates` in sweep order.
    fn sweep_order(&self, candidates: &[Candidate]) -> Vec<usize> {
        let c = candidates;
        let mut order: Vec<usize> = (0..c.len()).collect();
        match self.config.strategy {
            CanonicalStrategy::Freshest => order.sort_by(|&a, &b| {
                c[b].file.modified_at.cmp(&c[a].file.modified_at)
            }),
            CanonicalStrategy::ShortestPath => {
                order.sort_by_key(|&i| c[i].path().chars().count())
            }
            CanonicalStrategy::LongestPath => {
                order.sort_by_key(|&i| Reverse(c[i].path().chars().count()))
            }
            CanonicalStrategy::HighestScore => order.sort_by(|&a, &b| {
                c[b].relevance_score.total_cmp(&c[a].relevance_score)
            }),
        }
        order
    }

    /// Drop near-duplicates, returning survivors in their input order.
    pub fn dedup(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let total = candidates.len();
        let mut seen = HashSet::new();
        let mut kept: Vec<usize> = Vec::new();

        for i in self.sweep_order(&candidates) {
            let candidate = &candidates[i];
            if !seen.insert(self.signature(candidate)) {
                continue;
            }
            let duplicate = kept
                .iter()
                .any(|&k| self.is_duplicate(candidate, &candidates[k]));
            if !duplicate {
                kept.push(i);
            }
        }

        let kept: HashSet<usize> = kept.into_iter().collect();
        let survivors: Vec<Candidate> = candidates
            .into_iter()
            .enumerate()
            .filter(|(i, _)| kept.contains(i))
            .map(|(_, mut c)| {
                c.match_kind = MatchKind::Deduplicated;
                c
            })
            .collect();
        debug!(
            before = total,
            after = survivors.len(),
            "removed near-duplicates"
        );
        survivors
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::store::FileRef;

    fn doc(path: &str, modified_at: u64, content: &str) -> Candidate {
        Candidate::new(FileRef::new(path, 0, modified_at), MatchKind::Ranked)
            .with_content(content)
    }

    fn paths(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.path()).collect()
    }

    #[test]
    fn freshest_duplicate_survives() {
        let d = Deduplicator::default();
        let out = d.dedup(vec![
            doc("docs/readme.md", 10, "BM25 ranking explained"),
            doc("notes/readme.md", 20, "BM25 ranking explained"),
            doc("misc/other.md", 5, "something else entirely"),
        ]);
        assert_eq!(paths(&out), vec!["notes/readme.md", "misc/other.md"]);
        assert!(out.iter().all(|c| c.match_kind == MatchKind::Deduplicated));
    }

    #[test]
    fn distinct_enough_content_is_kept() {
        let d = Deduplicator::default();
        let out = d.dedup(vec![
            doc("docs/readme.md", 10, "BM25 ranking explained"),
            doc("notes/readme.md", 20, "BM25 ranking explained in detail"),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn strategies_pick_different_survivors() {
        let input = || {
            vec![
                doc("a/x.md", 1, "same words here").with_scores(0.0, 5.0),
                doc("ab/x.md", 2, "same words here").with_scores(0.0, 1.0),
            ]
        };
        let run = |strategy| {
            Deduplicator::new(DedupConfig {
                strategy,
                ..Default::default()
            })
            .dedup(input())
        };
        assert_eq!(paths(&run(CanonicalStrategy::Freshest)), vec!["ab/x.md"]);
        assert_eq!(paths(&run(CanonicalStrategy::ShortestPath)), vec!["a/x.md"]);
        assert_eq!(paths(&run(CanonicalStrategy::LongestPath)), vec!["ab/x.md"]);
        assert_eq!(paths(&run(CanonicalStrategy::HighestScore)), vec!["a/x.md"]);
    }

    #[test]
    fn signature_depends_on_content_prefix_only() {
        let d = Deduplicator::default();
        let head = "x".repeat(100);
        let a = doc("a.md", 1, &format!("{head}tail one"));
        let b = doc("a.md", 2, &format!("{head}tail two"));
        assert_eq!(d.signature(&a), d.signature(&b));
        assert_ne!(d.signature(&a), d.signature(&doc("b.md", 1, &head)));
    }

    #[test]
    fn name_only_candidates_use_name_and_path() {
        let d = Deduplicator::default();
        let a = Candidate::new(FileRef::new("notes/a.md", 0, 1), MatchKind::Path);
        let b = Candidate::new(FileRef::new("notes/b.md", 0, 2), MatchKind::Path);
        assert!(d.similarity(&a, &b) < 0.9);
        assert_eq!(d.dedup(vec![a, b]).len(), 2);
    }

    #[test]
    fn content_window_bounds_the_comparison() {
        let d = Deduplicator::default();
        let head = "shared opening paragraph ".repeat(20);
        let a = doc("a/notes.md", 1, &format!("{head}and one ending"));
        let b = doc("b/notes.md", 2, &format!("{head}{}", "x".repeat(5_000)));
        assert!(d.is_duplicate(&a, &b));
        assert_eq!(d.dedup(vec![a, b]).len(), 1);
    }

    #[test]
    fn length_gap_rules_out_duplicates() {
        let d = Deduplicator::default();
        let a = doc("notes/a.md", 1, "short");
        let b = doc("notes/a.md", 2, &"short and then much longer ".repeat(10));
        assert!(!d.is_duplicate(&a, &b));
        assert!(d.similarity(&a, &b) < 0.9);
    }

    proptest! {
        #[test]
        fn is_duplicate_agrees_with_similarity(
            a in ("[ab]{1,3}", "[a-c ]{0,20}"),
            b in ("[ab]{1,3}", "[a-c ]{0,20}"),
            threshold in 0.0f64..1.0,
        ) {
            let d = Deduplicator::new(DedupConfig {
                threshold,
                comparison_chars: 12,
                ..Default::default()
            });
            let a = doc(&format!("{}/x.md", a.0), 1, &a.1);
            let b = doc(&format!("{}/x.md", b.0), 2, &b.1);
            prop_assert_eq!(
                d.is_duplicate(&a, &b),
                d.similarity(&a, &b) >= threshold
            );
        }

        #[test]
        fn dedup_is_idempotent(
            docs in prop::collection::vec(
                ("[ab]{1,3}", 0u64..5, "[xy ]{0,12}"),
                0..8,
            ),
        ) {
            let d = Deduplicator::default();
            let input: Vec<Candidate> = docs
                .iter()
                .enumerate()
                .map(|(i, (dir, mtime, body))| {
                    doc(&format!("{dir}/{i}.md"), *mtime, body)
                })
                .collect();

            let once = d.dedup(input);
            let twice = d.dedup(once.clone());
            prop_assert_eq!(paths(&once), paths(&twice));
        }
    }
}
