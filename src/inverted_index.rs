//! Term → posting list index over markdown files.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{store::FileRef, text_util::tokenize};

/// One posting: where a term occurs in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    /// Token positions of the term, ascending.
    pub positions: Vec<usize>,
    pub modified_at: u64,
    pub size: u64,
    pub title: String,
    pub tags: Vec<String>,
}

/// A posting returned from [`InvertedIndex::query`], with its term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHit {
    pub term: String,
    pub entry: IndexEntry,
}

/// First `# ` heading of a document, else the file name without extension.
pub fn extract_title(content: &str, file: &FileRef) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    let stem = file.stem();
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// Tag lines: lines starting with `#` that are not markdown headings.
///
/// ```
/// use vaultctx::inverted_index::extract_tags;
///
/// let tags = extract_tags("# Title\n#project\n## Section\n  #draft  \n");
/// assert_eq!(tags, vec!["project", "draft"]);
/// ```
pub fn extract_tags(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for line in content.lines() {
        let Some(rest) = line.trim().strip_prefix('#') else {
            continue;
        };
        let is_heading = rest.is_empty()
            || rest.starts_with('#')
            || rest.starts_with(char::is_whitespace);
        if is_heading {
            continue;
        }
        let tag = rest.trim().to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Postings of a single document, keyed by term.
fn document_postings(file: &FileRef, content: &str) -> Vec<(String, IndexEntry)> {
    let title = extract_title(content, file);
    let tags = extract_tags(content);

    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    for (pos, term) in tokenize(content).into_iter().enumerate() {
        positions.entry(term).or_default().push(pos);
    }

    positions
        .into_iter()
        .map(|(term, positions)| {
            let entry = IndexEntry {
                path: file.path.clone(),
                positions,
                modified_at: file.modified_at,
                size: file.size,
                title: title.clone(),
                tags: tags.clone(),
            };
            (term, entry)
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvertedIndex {
    terms: BTreeMap<String, Vec<IndexEntry>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a set of documents, tokenizing them in parallel.
    pub fn build(documents: &[(FileRef, String)]) -> Self {
        let per_doc: Vec<Vec<(String, IndexEntry)>> = documents
            .par_iter()
            .map(|(file, content)| document_postings(file, content))
            .collect();

        let mut index = Self::new();
        for postings in per_doc {
            for (term, entry) in postings {
                index.terms.entry(term).or_default().push(entry);
            }
        }
        for entries in index.terms.values_mut() {
            entries.sort_by(|a, b| a.path.cmp(&b.path));
        }
        index
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn entries(&self, term: &str) -> &[IndexEntry] {
        self.terms.get(term).map(Vec::as_slice).unwrap_or_default()
    }

    /// One representative entry per indexed file.
    pub fn documents(&self) -> BTreeMap<&str, &IndexEntry> {
        let mut docs = BTreeMap::new();
        for entries in self.terms.values() {
            for entry in entries {
                docs.entry(entry.path.as_str()).or_insert(entry);
            }
        }
        docs
    }

    /// Union of the postings of every query term, one per (path, term).
    pub fn query(&self, query: &str) -> Vec<IndexHit> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for term in tokenize(query) {
            for entry in self.entries(&term) {
                if seen.insert((entry.path.clone(), term.clone())) {
                    hits.push(IndexHit {
                        term: term.clone(),
                        entry: entry.clone(),
                    });
                }
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileRef {
        FileRef::new(path, 42, 7)
    }

    fn sample() -> InvertedIndex {
        InvertedIndex::build(&[
            (
                file("notes/rust.md"),
                "# Rust Notes\n#project\nrust ownership and rust lifetimes"
                    .to_string(),
            ),
            (file("notes/go.md"), "goroutines and channels".to_string()),
        ])
    }

    #[test]
    fn extract_title_from_heading() {
        let content = "# My Document\n\nSome body text.";
        assert_eq!(extract_title(content, &file("file.md")), "My Document");
    }

    #[test]
    fn extract_title_skips_empty_heading() {
        let content = "# \n\nSome text with no real heading.";
        assert_eq!(extract_title(content, &file("notes.md")), "notes");
    }

    #[test]
    fn extract_title_fallback_to_filename() {
        let content = "No heading here, just plain text.";
        assert_eq!(extract_title(content, &file("a/my-notes.md")), "my-notes");
    }

    #[test]
    fn tags_skip_headings_and_bare_hashes() {
        let tags = extract_tags("#\n# Title\n###Deep\n#ideas\n#ideas\nbody #inline");
        assert_eq!(tags, vec!["ideas"]);
    }

    #[test]
    fn postings_carry_positions_and_metadata() {
        let index = sample();
        let rust = index.entries("rust");
        assert_eq!(rust.len(), 1);
        let entry = &rust[0];
        assert_eq!(entry.path, "notes/rust.md");
        assert_eq!(entry.title, "Rust Notes");
        assert_eq!(entry.tags, vec!["project"]);
        assert_eq!(entry.size, 42);
        assert_eq!(entry.positions, vec![0, 3, 6]);
    }

    #[test]
    fn query_unions_terms_without_repeats() {
        let index = sample();
        let hits = index.query("rust channels rust");
        let found: Vec<_> = hits
            .iter()
            .map(|h| (h.entry.path.as_str(), h.term.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![("notes/rust.md", "rust"), ("notes/go.md", "channels")]
        );
        assert!(index.query("python").is_empty());
    }

    #[test]
    fn serializes_as_term_map() {
        let index = sample();
        let json = serde_json::to_value(&index).unwrap();
        assert!(json["rust"].is_array());
        let back: InvertedIndex = serde_json::from_value(json).unwrap();
        assert_eq!(back, index);
    }
}
