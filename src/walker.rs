use tracing::{debug, warn};

use crate::{
    error::Result,
    store::{EntryKind, FileRef, FileStore, file_name},
};

/// Default extensions treated as content-bearing files.
pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Extensions whose content is indexed as markdown.
pub const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx"];

/// Recursively discover content-bearing files under `root`.
///
/// The store may only list one directory level at a time, so directories
/// are walked client-side. Hidden entries (names starting with `.`) are
/// skipped and only files with one of `extensions` are returned, sorted by
/// path. Failing to list `root` itself is an error; failures below it are
/// logged and the affected subtree is skipped.
pub async fn discover_files<S: FileStore>(
    store: &S,
    root: &str,
    extensions: &[String],
) -> Result<Vec<FileRef>> {
    let mut results = Vec::new();
    let mut pending = vec![root.to_string()];
    let mut is_root = true;

    while let Some(dir) = pending.pop() {
        let entries = match store.list(&dir).await {
            Ok(entries) => entries,
            Err(err) if !is_root => {
                warn!(dir = %dir, error = %err, "skipping unlistable directory");
                continue;
            }
            Err(err) => return Err(err),
        };
        is_root = false;

        for entry in entries {
            if file_name(&entry.path).starts_with('.') {
                continue;
            }
            match entry.kind {
                EntryKind::Directory => pending.push(entry.path),
                EntryKind::File => {
                    let file = FileRef::from(&entry);
                    if is_supported(&file, extensions) {
                        results.push(file);
                    }
                }
            }
        }
    }

    results.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root, files = results.len(), "discovered vault files");
    Ok(results)
}

/// Whether `file` carries one of the given extensions (case-insensitive).
pub fn is_supported(file: &FileRef, extensions: &[String]) -> bool {
    file.extension()
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
}

pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

pub fn markdown_extensions() -> Vec<String> {
    MARKDOWN_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}
