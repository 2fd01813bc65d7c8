//! Additive relevance boost from file metadata: where a file lives, how it
//! is tagged, and how recently it changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    candidate::{Candidate, sort_by_relevance},
    store::unix_now,
};

const SECS_PER_DAY: f64 = 86_400.0;

/// Path fragment and the multiplier applied when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub pattern: String,
    pub weight: f64,
}

impl PathRule {
    pub fn new(pattern: impl Into<String>, weight: f64) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
        }
    }

    fn matches(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.pattern.to_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    /// Checked in order; the first match wins.
    pub path_rules: Vec<PathRule>,
    pub tag_weights: BTreeMap<String, f64>,
    pub path_weight: f64,
    pub tag_weight: f64,
    pub freshness_weight: f64,
    /// Decay scale of the freshness curve, in days.
    pub freshness_scale_days: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        let path_rules = vec![
            PathRule::new("README", 2.0),
            PathRule::new("guides/", 1.8),
            PathRule::new("docs/", 1.5),
            PathRule::new("index", 1.3),
            PathRule::new("archive/", 0.7),
            PathRule::new("test", 0.8),
            PathRule::new("LICENSE", 0.5),
            PathRule::new("tmp/", 0.6),
        ];
        let tag_weights = [
            ("important", 1.5),
            ("reference", 1.3),
            ("project", 1.2),
            ("draft", 0.6),
            ("archive", 0.5),
        ]
        .into_iter()
        .map(|(tag, w)| (tag.to_string(), w))
        .collect();

        Self {
            path_rules,
            tag_weights,
            path_weight: 1.0,
            tag_weight: 1.0,
            freshness_weight: 1.0,
            freshness_scale_days: 365.0,
        }
    }
}

/// The three boost components before weighting, plus the weighted total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BoostBreakdown {
    pub path: f64,
    pub tag: f64,
    pub freshness: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBooster {
    config: BoostConfig,
}

impl MetadataBooster {
    pub fn new(config: BoostConfig) -> Self {
        Self { config }
    }

    /// Multiplier of the first rule matching the path, then the file name.
    pub fn path_boost(&self, candidate: &Candidate) -> f64 {
        let rules = &self.config.path_rules;
        rules
            .iter()
            .find(|r| r.matches(candidate.path()))
            .or_else(|| rules.iter().find(|r| r.matches(candidate.name())))
            .map_or(1.0, |r| r.weight)
    }

    /// Weights of the candidate's own tags, plus half credit for table tags
    /// named in the query.
    pub fn tag_boost(&self, candidate: &Candidate, query: &str) -> f64 {
        let weights = &self.config.tag_weights;
        let from_tags: f64 = candidate
            .tags()
            .iter()
            .filter_map(|tag| weights.get(tag))
            .sum();

        let query = query.to_lowercase();
        let from_query: f64 = weights
            .iter()
            .filter(|(tag, _)| query.contains(tag.to_lowercase().as_str()))
            .map(|(_, w)| w * 0.5)
            .sum();

        from_tags + from_query
    }

    /// `e^(-age / scale)` capped at 1; 0 when the modification time is
    /// unknown.
    pub fn freshness_boost(&self, modified_at: u64, now: u64) -> f64 {
        if modified_at == 0 {
            return 0.0;
        }
        let age_days = now.saturating_sub(modified_at) as f64 / SECS_PER_DAY;
        let scale = self.config.freshness_scale_days.max(f64::EPSILON);
        (-age_days / scale).exp().min(1.0)
    }

    pub fn breakdown(
        &self,
        candidate: &Candidate,
        query: &str,
        now: u64,
    ) -> BoostBreakdown {
        let path = self.path_boost(candidate);
        let tag = self.tag_boost(candidate, query);
        let freshness = self.freshness_boost(candidate.file.modified_at, now);
        let total = self.config.path_weight * path
            + self.config.tag_weight * tag
            + self.config.freshness_weight * freshness;
        BoostBreakdown {
            path,
            tag,
            freshness,
            total,
        }
    }

    pub fn apply(&self, candidates: Vec<Candidate>, query: &str) -> Vec<Candidate> {
        self.apply_at(candidates, query, unix_now())
    }

    /// Add each candidate's boost to its relevance and re-sort.
    pub fn apply_at(
        &self,
        mut candidates: Vec<Candidate>,
        query: &str,
        now: u64,
    ) -> Vec<Candidate> {
        for candidate in &mut candidates {
            let boost = self.breakdown(candidate, query, now);
            candidate.relevance_score += boost.total;
            candidate.set_meta("boost_path", boost.path);
            candidate.set_meta("boost_tag", boost.tag);
            candidate.set_meta("boost_freshness", boost.freshness);
            candidate.set_meta("boost_total", boost.total);
        }
        sort_by_relevance(&mut candidates);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        candidate::{MatchKind, TAGS_KEY},
        store::FileRef,
    };

    const NOW: u64 = 1_700_000_000;

    fn candidate(path: &str, modified_at: u64) -> Candidate {
        Candidate::new(FileRef::new(path, 0, modified_at), MatchKind::Ranked)
    }

    #[test]
    fn first_matching_path_rule_wins() {
        let booster = MetadataBooster::default();
        assert_eq!(booster.path_boost(&candidate("docs/README.md", 1)), 2.0);
        assert_eq!(booster.path_boost(&candidate("docs/setup.md", 1)), 1.5);
        assert_eq!(booster.path_boost(&candidate("guides/docs/a.md", 1)), 1.8);
        assert_eq!(booster.path_boost(&candidate("notes/plan.md", 1)), 1.0);
        assert_eq!(booster.path_boost(&candidate("readme.md", 1)), 2.0);
    }

    #[test]
    fn tag_boost_sums_tags_and_query_overlap() {
        let booster = MetadataBooster::default();
        let mut c = candidate("a.md", 1);
        c.set_meta(TAGS_KEY, json!(["important", "unknown", "#draft"]));
        assert!((booster.tag_boost(&c, "") - 2.1).abs() < 1e-9);

        let plain = candidate("b.md", 1);
        assert!((booster.tag_boost(&plain, "project plan") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn freshness_decays_over_a_year() {
        let booster = MetadataBooster::default();
        assert_eq!(booster.freshness_boost(NOW, NOW), 1.0);
        assert_eq!(booster.freshness_boost(0, NOW), 0.0);
        assert_eq!(booster.freshness_boost(NOW + 100, NOW), 1.0);

        let year_old = NOW - 365 * 86_400;
        let f = booster.freshness_boost(year_old, NOW);
        assert!((f - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn apply_adds_and_resorts() {
        let booster = MetadataBooster::default();
        let input = vec![
            candidate("notes/a.md", 0).with_scores(0.0, 1.0),
            candidate("README.md", NOW).with_scores(0.0, 0.5),
        ];
        let out = booster.apply_at(input, "", NOW);

        assert_eq!(out[0].path(), "README.md");
        assert!((out[0].relevance_score - 3.5).abs() < 1e-9);
        assert!((out[1].relevance_score - 2.0).abs() < 1e-9);
        assert_eq!(out[0].metadata["boost_path"], json!(2.0));
    }

    #[test]
    fn weights_scale_components() {
        let booster = MetadataBooster::new(BoostConfig {
            path_weight: 0.0,
            freshness_weight: 2.0,
            ..Default::default()
        });
        let b = booster.breakdown(&candidate("README.md", NOW), "", NOW);
        assert_eq!(b.path, 2.0);
        assert!((b.total - 2.0).abs() < 1e-9);
    }
}
