//! Prefix tree for autocomplete over file names, path segments and tags.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::store::FileRef;

const SECS_PER_HOUR: f64 = 3_600.0;

#[derive(Debug, Clone, Default)]
pub struct TrieNode {
    pub children: BTreeMap<char, TrieNode>,
    pub is_terminal: bool,
    pub frequency: u64,
    /// When the term was last inserted (Unix seconds).
    pub last_touched: u64,
    pub paths: BTreeSet<String>,
}

/// A completion for a prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub term: String,
    pub frequency: u64,
    pub score: f64,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Trie {
    root: TrieNode,
    terms: usize,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms == 0
    }

    /// Record one occurrence of `term` in `path`, touched at `touched_at`.
    pub fn insert(&mut self, term: &str, path: &str, touched_at: u64) {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return;
        }

        let mut node = &mut self.root;
        for c in term.chars() {
            node = node.children.entry(c).or_default();
        }
        if !node.is_terminal {
            node.is_terminal = true;
            self.terms += 1;
        }
        node.frequency += 1;
        node.last_touched = node.last_touched.max(touched_at);
        node.paths.insert(path.to_string());
    }

    /// Index a file's name, directory segments and tags.
    pub fn insert_file(&mut self, file: &FileRef, tags: &[String], touched_at: u64) {
        let dirs = file.path.split('/').rev().skip(1);
        for term in std::iter::once(file.display_name.as_str())
            .chain(dirs)
            .chain(tags.iter().map(String::as_str))
        {
            self.insert(term, &file.path, touched_at);
        }
    }

    fn find(&self, prefix: &str) -> Option<&TrieNode> {
        let mut node = &self.root;
        for c in prefix.chars() {
            node = node.children.get(&c)?;
        }
        Some(node)
    }

    /// Completions of `prefix` by `frequency / (1 + hours_since_touch / 24)`.
    pub fn suggest(&self, prefix: &str, limit: usize, now: u64) -> Vec<Suggestion> {
        let prefix = prefix.trim().to_lowercase();
        let Some(start) = self.find(&prefix) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut stack = vec![(start, prefix)];
        while let Some((node, term)) = stack.pop() {
            if node.is_terminal {
                let hours =
                    now.saturating_sub(node.last_touched) as f64 / SECS_PER_HOUR;
                found.push(Suggestion {
                    term: term.clone(),
                    frequency: node.frequency,
                    score: node.frequency as f64 / (1.0 + hours / 24.0),
                    paths: node.paths.iter().cloned().collect(),
                });
            }
            for (c, child) in &node.children {
                let mut next = term.clone();
                next.push(*c);
                stack.push((child, next));
            }
        }

        found.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| a.term.cmp(&b.term))
        });
        found.truncate(limit);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;
    const DAY: u64 = 86_400;

    #[test]
    fn unknown_prefix_has_no_suggestions() {
        let mut trie = Trie::new();
        trie.insert("rust", "a.md", NOW);
        assert!(trie.suggest("py", 10, NOW).is_empty());
    }

    #[test]
    fn frequency_and_freshness_order() {
        let mut trie = Trie::new();
        trie.insert("rust", "a.md", NOW);
        trie.insert("rust", "b.md", NOW);
        trie.insert("ruby", "c.md", NOW);
        trie.insert("runtime", "d.md", NOW - 30 * DAY);
        trie.insert("runtime", "e.md", NOW - 30 * DAY);

        let s = trie.suggest("ru", 10, NOW);
        let terms: Vec<_> = s.iter().map(|s| s.term.as_str()).collect();
        assert_eq!(terms, vec!["rust", "ruby", "runtime"]);
        assert_eq!(s[0].frequency, 2);
        assert_eq!(s[0].paths, vec!["a.md", "b.md"]);
        assert!((s[2].score - 2.0 / 31.0).abs() < 1e-9);
    }

    #[test]
    fn exact_term_is_its_own_completion() {
        let mut trie = Trie::new();
        trie.insert("Go", "a.md", NOW);
        trie.insert("gopher", "b.md", NOW);
        let s = trie.suggest("go", 1, NOW);
        assert_eq!(s.len(), 1);
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn insert_file_indexes_name_segments_and_tags() {
        let mut trie = Trie::new();
        let file = FileRef::new("projects/alpha/Plan.md", 1, 0);
        trie.insert_file(&file, &["roadmap".to_string()], NOW);

        for term in ["plan.md", "alpha", "projects", "roadmap"] {
            let s = trie.suggest(term, 5, NOW);
            assert_eq!(s[0].term, term);
            assert_eq!(s[0].paths, vec!["projects/alpha/Plan.md"]);
        }
        assert_eq!(trie.suggest("pla", 5, NOW)[0].term, "plan.md");
        assert_eq!(trie.len(), 4);
    }

    #[test]
    fn score_decays_from_touch_time_not_file_mtime() {
        let mut trie = Trie::new();
        let old = FileRef::new("archive.md", 1, NOW - 365 * DAY);
        trie.insert_file(&old, &[], NOW);

        let s = trie.suggest("arch", 5, NOW);
        assert_eq!(s[0].score, 1.0);
        let s = trie.suggest("arch", 5, NOW + DAY);
        assert!((s[0].score - 0.5).abs() < 1e-9);
    }
}
