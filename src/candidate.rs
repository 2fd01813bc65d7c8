use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::store::FileRef;

/// Metadata key holding a candidate's tags (array or comma-separated string).
pub const TAGS_KEY: &str = "tags";
/// Metadata key holding an extracted title.
pub const TITLE_KEY: &str = "title";

/// How a candidate came to be considered for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Filename,
    Path,
    Content,
    /// Browse-all mode: every file matches an empty query.
    All,
    /// Scored by the ranking engine.
    Ranked,
    /// Survived deduplication.
    Deduplicated,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Filename => "filename",
            MatchKind::Path => "path",
            MatchKind::Content => "content",
            MatchKind::All => "all",
            MatchKind::Ranked => "ranked",
            MatchKind::Deduplicated => "deduplicated",
        }
    }

    /// Whether the match was made on the file's name or location alone.
    pub fn is_locational(self) -> bool {
        matches!(self, MatchKind::Filename | MatchKind::Path)
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file under consideration for a query.
///
/// Each pipeline stage writes a fixed set of fields:
/// aggregation sets everything; ranking overwrites `relevance_score` and
/// `match_kind`; proximity and boosting add to `relevance_score` and write
/// their own `metadata` keys; deduplication only sets `match_kind`.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub file: FileRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub match_kind: MatchKind,
    pub match_score: f64,
    pub relevance_score: f64,
    pub metadata: BTreeMap<String, Value>,
}

impl Candidate {
    pub fn new(file: FileRef, match_kind: MatchKind) -> Self {
        Self {
            file,
            content: None,
            match_kind,
            match_score: 0.0,
            relevance_score: 0.0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_scores(mut self, match_score: f64, relevance: f64) -> Self {
        self.match_score = match_score;
        self.relevance_score = relevance;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.file.display_name
    }

    pub fn path(&self) -> &str {
        &self.file.path
    }

    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// `name + " " + content`, the text scored by the ranking engine.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.name(), self.content())
    }

    /// Content when loaded, else the file name.
    pub fn searchable_text(&self) -> &str {
        match &self.content {
            Some(content) => content,
            None => self.name(),
        }
    }

    /// Tags recorded in metadata, lowercased and without a leading `#`.
    pub fn tags(&self) -> Vec<String> {
        let raw: Vec<String> = match self.metadata.get(TAGS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        };
        raw.iter()
            .map(|t| t.trim().trim_start_matches('#').to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// Stable sort by `relevance_score`, highest first.
pub fn sort_by_relevance(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn candidate(path: &str, score: f64) -> Candidate {
        Candidate::new(FileRef::new(path, 0, 0), MatchKind::Content)
            .with_scores(0.0, score)
    }

    #[test]
    fn sort_is_stable_and_descending() {
        let mut cands = vec![
            candidate("a.md", 1.0),
            candidate("b.md", 2.0),
            candidate("c.md", 1.0),
            candidate("d.md", 2.0),
        ];
        sort_by_relevance(&mut cands);
        let order: Vec<_> = cands.iter().map(|c| c.path()).collect();
        assert_eq!(order, vec!["b.md", "d.md", "a.md", "c.md"]);
    }

    #[test]
    fn tags_from_array_and_string() {
        let mut c = candidate("a.md", 0.0);
        c.set_meta(TAGS_KEY, json!(["#Project", " draft "]));
        assert_eq!(c.tags(), vec!["project", "draft"]);

        c.set_meta(TAGS_KEY, "important, ,reference");
        assert_eq!(c.tags(), vec!["important", "reference"]);
    }

    #[test]
    fn combined_text_without_content() {
        let c = candidate("notes/plan.md", 0.0);
        assert_eq!(c.combined_text(), "plan.md ");
        assert_eq!(c.searchable_text(), "plan.md");
    }

    #[test]
    fn locational_kinds() {
        assert!(MatchKind::Filename.is_locational());
        assert!(MatchKind::Path.is_locational());
        assert!(!MatchKind::Ranked.is_locational());
        assert_eq!(MatchKind::Deduplicated.to_string(), "deduplicated");
    }
}
