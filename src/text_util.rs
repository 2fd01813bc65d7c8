/// Approximate characters per language-model token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Tokens shorter than this many characters are dropped by [`tokenize`].
pub const MIN_TERM_CHARS: usize = 2;

/// Number of context lines kept on either side of a snippet match.
pub const SNIPPET_CONTEXT_LINES: usize = 2;

/// Default number of lines in a snippet when no match offset is known.
pub const DEFAULT_SNIPPET_LINES: usize = 6;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 400;

/// Split text into lowercase alphanumeric terms.
///
/// Any non-alphanumeric character separates terms; terms shorter than
/// [`MIN_TERM_CHARS`] characters are dropped.
///
/// # Examples
///
/// ```
/// use vaultctx::text_util::tokenize;
///
/// assert_eq!(tokenize("BM25 ranking, a primer"), vec!["bm25", "ranking", "primer"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
        .collect()
}

/// Split text into lowercase runs of letters and digits, keeping every run.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Case-insensitive Levenshtein distance over Unicode code points.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Edit-distance similarity in `[0, 1]`.
///
/// `1 - distance / max(len)`; identical strings score 1 and any comparison
/// against an empty string scores 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.to_lowercase() == b.to_lowercase() {
        return 1.0;
    }
    let longest = a.chars().count().max(b.chars().count());
    if a.is_empty() || b.is_empty() || longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Upper bound of [`similarity`] from character counts alone.
///
/// The edit distance is at least the length difference, so pairs whose
/// bound is below a threshold can skip [`levenshtein`].
pub fn similarity_upper_bound(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let la = a.chars().flat_map(char::to_lowercase).count();
    let lb = b.chars().flat_map(char::to_lowercase).count();
    1.0 - la.abs_diff(lb) as f64 / longest as f64
}

/// Estimated token count of a single word (at least 1).
pub fn word_tokens(word: &str) -> usize {
    word.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Estimated token count of free text, summing [`word_tokens`] per word.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().map(word_tokens).sum()
}

/// Count non-overlapping case-insensitive occurrences of `needle`.
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack
        .to_lowercase()
        .matches(&needle.to_lowercase())
        .count()
}

/// Prepend line numbers to each line of text.
///
/// `start_line` is the number to assign to the first line (1-indexed).
pub fn add_line_numbers(text: &str, start_line: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", start_line + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract a snippet around the line containing byte `offset` of `text`.
///
/// Returns `(snippet_text, start_line_number)` where start_line_number is
/// 1-indexed. Without an offset the first few lines are returned.
/// Returns `None` if the text is empty.
pub fn extract_snippet(
    text: &str,
    offset: Option<usize>,
) -> Option<(String, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return None;
    }

    let (start, end) = match offset {
        Some(offset) => {
            let prefix = &text[..floor_char_boundary(text, offset)];
            let idx = prefix.matches('\n').count().min(lines.len() - 1);
            let start = idx.saturating_sub(SNIPPET_CONTEXT_LINES);
            let end = (idx + SNIPPET_CONTEXT_LINES + 1).min(lines.len());
            (start, end)
        }
        None => (0, DEFAULT_SNIPPET_LINES.min(lines.len())),
    };

    let mut snippet = lines[start..end].join("\n");
    if snippet.len() > DEFAULT_SNIPPET_MAX_CHARS {
        snippet.truncate(floor_char_boundary(
            &snippet,
            DEFAULT_SNIPPET_MAX_CHARS,
        ));
        snippet.push_str("...");
    }

    Some((snippet, start + 1))
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
