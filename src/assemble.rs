//! Token-budgeted context assembly.
//!
//! Candidates are turned into chunks no larger than the configured chunk
//! size (in estimated tokens), then accepted in order until the next chunk
//! would overflow the budget. The result never exceeds the budget.

use std::fmt::Write;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{candidate::Candidate, text_util::word_tokens};

/// Default chunk size in estimated tokens.
pub const DEFAULT_CHUNK_TOKENS: usize = 512;

/// Default per-chunk template.
///
/// Placeholders: `{source}`, `{modified}`, `{score}`, `{chunk}`, `{total}`,
/// `{tokens}` and `{content}`.
pub const DEFAULT_TEMPLATE: &str =
    "--- {source} (modified {modified}, score {score}) [{chunk}/{total}]\n{content}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub chunk_tokens: usize,
    pub template: String,
    /// `chrono` format string for modification times.
    pub time_format: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: DEFAULT_CHUNK_TOKENS,
            template: DEFAULT_TEMPLATE.to_string(),
            time_format: "%Y-%m-%d %H:%M UTC".to_string(),
        }
    }
}

/// One accepted unit of context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextChunk {
    pub content: String,
    pub source: String,
    pub modified_at: u64,
    pub score: f64,
    pub token_count: usize,
    /// Zero-based index of this chunk within its source.
    pub chunk_index: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub chunks: Vec<ContextChunk>,
    pub total_tokens: usize,
    pub token_budget: usize,
    /// A chunk was turned away because it would not fit.
    pub budget_exhausted: bool,
    pub rendered: String,
}

impl AssembledContext {
    pub fn budget_used_percent(&self) -> f64 {
        if self.token_budget == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.token_budget as f64 * 100.0
    }

    pub fn budget_remaining(&self) -> usize {
        self.token_budget.saturating_sub(self.total_tokens)
    }

    /// Distinct sources in chunk order.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for chunk in &self.chunks {
            if !sources.contains(&chunk.source.as_str()) {
                sources.push(&chunk.source);
            }
        }
        sources
    }
}

/// Byte spans of the whitespace-separated words of `text`.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Split `text` into pieces of at most `max_tokens` estimated tokens.
///
/// Words are appended until the next one would overflow; a single word
/// larger than the limit becomes a piece of its own. Whitespace inside a
/// piece is kept as written.
///
/// # Examples
///
/// ```
/// use vaultctx::assemble::split_by_tokens;
///
/// let pieces = split_by_tokens("aaaa bbbb cccc", 2);
/// assert_eq!(pieces, vec![("aaaa bbbb".to_string(), 2), ("cccc".to_string(), 1)]);
/// ```
pub fn split_by_tokens(text: &str, max_tokens: usize) -> Vec<(String, usize)> {
    let max_tokens = max_tokens.max(1);
    let mut pieces = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut tokens = 0;

    for (start, end) in word_spans(text) {
        let cost = word_tokens(&text[start..end]);
        match current {
            Some((s, e)) if tokens + cost > max_tokens => {
                pieces.push((text[s..e].to_string(), tokens));
                current = Some((start, end));
                tokens = cost;
            }
            Some((s, _)) => {
                current = Some((s, end));
                tokens += cost;
            }
            None => {
                current = Some((start, end));
                tokens = cost;
            }
        }
    }
    if let Some((s, e)) = current {
        pieces.push((text[s..e].to_string(), tokens));
    }
    pieces
}

#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Text a candidate contributes: its content, unless it matched on name
    /// or path alone or has none loaded.
    fn candidate_text(candidate: &Candidate) -> String {
        match candidate.content.as_deref() {
            Some(content)
                if !candidate.match_kind.is_locational()
                    && !content.trim().is_empty() =>
            {
                content.to_string()
            }
            _ => format!("File: {}\nPath: {}", candidate.name(), candidate.path()),
        }
    }

    fn format_time(&self, secs: u64) -> String {
        if secs == 0 {
            return "unknown".to_string();
        }
        let Some(time) =
            i64::try_from(secs).ok().and_then(|s| DateTime::from_timestamp(s, 0))
        else {
            return "unknown".to_string();
        };
        // An invalid user format string fails here rather than panicking.
        let mut out = String::new();
        match write!(out, "{}", time.format(&self.config.time_format)) {
            Ok(()) => out,
            Err(_) => time.to_rfc3339(),
        }
    }

    fn render_chunk(&self, chunk: &ContextChunk) -> String {
        self.config
            .template
            .replace("{source}", &chunk.source)
            .replace("{modified}", &self.format_time(chunk.modified_at))
            .replace("{score}", &format!("{:.3}", chunk.score))
            .replace("{chunk}", &(chunk.chunk_index + 1).to_string())
            .replace("{total}", &chunk.total_chunks.to_string())
            .replace("{tokens}", &chunk.token_count.to_string())
            .replace("{content}", &chunk.content)
    }

    /// Accept chunks in candidate order until `token_budget` would be
    /// exceeded.
    pub fn assemble(
        &self,
        candidates: &[Candidate],
        query: &str,
        token_budget: usize,
    ) -> AssembledContext {
        let mut context = AssembledContext {
            token_budget,
            ..Default::default()
        };

        'candidates: for candidate in candidates {
            let text = Self::candidate_text(candidate);
            let pieces = split_by_tokens(&text, self.config.chunk_tokens);
            let total_chunks = pieces.len();
            for (chunk_index, (content, token_count)) in
                pieces.into_iter().enumerate()
            {
                if context.total_tokens + token_count > token_budget {
                    context.budget_exhausted = true;
                    break 'candidates;
                }
                context.total_tokens += token_count;
                context.chunks.push(ContextChunk {
                    content,
                    source: candidate.path().to_string(),
                    modified_at: candidate.file.modified_at,
                    score: candidate.relevance_score,
                    token_count,
                    chunk_index,
                    total_chunks,
                });
            }
        }

        context.rendered = self.render(&context, query);
        debug!(
            chunks = context.chunks.len(),
            tokens = context.total_tokens,
            budget = token_budget,
            exhausted = context.budget_exhausted,
            "assembled context"
        );
        context
    }

    fn render(&self, context: &AssembledContext, query: &str) -> String {
        let mut out = String::new();
        if !query.trim().is_empty() {
            out.push_str(&format!("# Context for: {}\n\n", query.trim()));
        }
        for chunk in &context.chunks {
            out.push_str(&self.render_chunk(chunk));
            out.push_str("\n\n");
        }
        out.push_str(&format!(
            "Chunks: {} from {} sources | Tokens: {}/{} ({:.1}%)",
            context.chunks.len(),
            context.sources().len(),
            context.total_tokens,
            context.token_budget,
            context.budget_used_percent(),
        ));
        out
    }
}
