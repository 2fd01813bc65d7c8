//! The File Store boundary: listing and fetching vault files.
//!
//! The engine never writes to the vault. Everything it knows about files
//! comes through the [`FileStore`] capability, which is injected into every
//! component that needs to cross that boundary.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether a listed entry is a file or a directory to recurse into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry returned by [`FileStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Vault-relative path using `/` separators.
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Last modification time as seconds since the Unix epoch (0 if unknown).
    pub modified_at: u64,
}

/// Identity of a vault file as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub display_name: String,
    pub size: u64,
    pub modified_at: u64,
}

impl FileRef {
    pub fn new(path: impl Into<String>, size: u64, modified_at: u64) -> Self {
        let path = path.into();
        let display_name = file_name(&path).to_string();
        Self {
            path,
            display_name,
            size,
            modified_at,
        }
    }

    /// Lowercase extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        self.display_name
            .rsplit_once('.')
            .filter(|(stem, _)| !stem.is_empty())
            .map(|(_, ext)| ext.to_lowercase())
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.display_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.display_name,
        }
    }
}

impl From<&StoreEntry> for FileRef {
    fn from(entry: &StoreEntry) -> Self {
        FileRef::new(entry.path.clone(), entry.size, entry.modified_at)
    }
}

/// Last path segment of a `/`-separated vault path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a directory and a child name into a vault-relative path.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    system_time_secs(SystemTime::now())
}

fn system_time_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Read-only access to the files of a vault.
///
/// `list` may return a single directory level; callers recurse into
/// [`EntryKind::Directory`] entries themselves. `fetch` fails with
/// [`Error::NotFound`] when the path is absent and with
/// [`Error::Transport`] for anything else.
pub trait FileStore: Send + Sync + 'static {
    /// Stable identity of the vault behind this store. Persisted state
    /// built from one vault is never reused for another.
    fn vault_id(&self) -> String;

    fn list(
        &self,
        dir: &str,
    ) -> impl Future<Output = Result<Vec<StoreEntry>>> + Send;

    fn fetch(&self, path: &str) -> impl Future<Output = Result<String>> + Send;
}

/// A [`FileStore`] over a directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::NotFound {
                kind: "file",
                name: relative.display().to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn map_io_error(err: std::io::Error, path: &str) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound {
            kind: "file",
            name: path.to_string(),
        },
        ErrorKind::InvalidData => {
            Error::Decode(format!("{path} is not valid UTF-8"))
        }
        _ => Error::Transport(format!("{path}: {err}")),
    }
}

impl FileStore for LocalFileStore {
    fn vault_id(&self) -> String {
        let root = std::fs::canonicalize(&self.root)
            .unwrap_or_else(|_| self.root.clone());
        format!("local:{}", root.display())
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        let abs = self.resolve(dir)?;
        let mut reader = tokio::fs::read_dir(&abs)
            .await
            .map_err(|e| map_io_error(e, dir))?;

        let mut entries = Vec::new();
        while let Some(entry) =
            reader.next_entry().await.map_err(|e| map_io_error(e, dir))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            // Follows symlinks; broken links are skipped.
            let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
                continue;
            };
            let kind = if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(StoreEntry {
                path: join_path(dir, &name),
                kind,
                size: meta.len(),
                modified_at: meta
                    .modified()
                    .map(system_time_secs)
                    .unwrap_or_default(),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let abs = self.resolve(path)?;
        tokio::fs::read_to_string(&abs)
            .await
            .map_err(|e| map_io_error(e, path))
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    modified_at: u64,
}

/// An in-memory [`FileStore`], handy for embedding and tests.
///
/// Directories are implied by the `/`-separated paths of the files. Every
/// new store gets its own vault id; clones share it.
#[derive(Debug, Clone)]
pub struct MemoryFileStore {
    id: String,
    files: BTreeMap<String, MemoryFile>,
}

static NEXT_MEMORY_ID: AtomicUsize = AtomicUsize::new(0);

impl Default for MemoryFileStore {
    fn default() -> Self {
        let n = NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("memory:{n}"),
            files: BTreeMap::new(),
        }
    }
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `id` as the vault id, e.g. to stand in for a known vault.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn insert(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
        modified_at: u64,
    ) {
        let path = path.into().trim_matches('/').to_string();
        self.files.insert(
            path,
            MemoryFile {
                content: content.into(),
                modified_at,
            },
        );
    }

    pub fn with_file(
        mut self,
        path: impl Into<String>,
        content: impl Into<String>,
        modified_at: u64,
    ) -> Self {
        self.insert(path, content, modified_at);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn list_sync(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        let dir = dir.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut entries = Vec::new();
        let mut seen_dirs = BTreeSet::new();
        for (path, file) in self.files.range(prefix.clone()..) {
            let Some(rest) = path.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    if seen_dirs.insert(child.to_string()) {
                        entries.push(StoreEntry {
                            path: join_path(dir, child),
                            kind: EntryKind::Directory,
                            size: 0,
                            modified_at: 0,
                        });
                    }
                }
                None => entries.push(StoreEntry {
                    path: path.clone(),
                    kind: EntryKind::File,
                    size: file.content.len() as u64,
                    modified_at: file.modified_at,
                }),
            }
        }

        if entries.is_empty() && !dir.is_empty() {
            return Err(Error::NotFound {
                kind: "directory",
                name: dir.to_string(),
            });
        }
        Ok(entries)
    }
}

impl FileStore for MemoryFileStore {
    fn vault_id(&self) -> String {
        self.id.clone()
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        self.list_sync(dir)
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        self.files
            .get(path.trim_matches('/'))
            .map(|f| f.content.clone())
            .ok_or_else(|| Error::NotFound {
                kind: "file",
                name: path.to_string(),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ref_names() {
        let f = FileRef::new("notes/deep/Plan.v2.md", 10, 5);
        assert_eq!(f.display_name, "Plan.v2.md");
        assert_eq!(f.extension().as_deref(), Some("md"));
        assert_eq!(f.stem(), "Plan.v2");

        let dotfile = FileRef::new(".hidden", 1, 1);
        assert_eq!(dotfile.extension(), None);
        assert_eq!(dotfile.stem(), ".hidden");
    }

    #[test]
    fn join_path_handles_root() {
        assert_eq!(join_path("", "a.md"), "a.md");
        assert_eq!(join_path("docs/", "a.md"), "docs/a.md");
    }

    #[tokio::test]
    async fn memory_store_lists_one_level() {
        let store = MemoryFileStore::new()
            .with_file("top.md", "t", 1)
            .with_file("docs/a.md", "a", 2)
            .with_file("docs/deep/b.md", "b", 3);

        let root = store.list("").await.unwrap();
        let paths: Vec<_> = root.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["docs", "top.md"]);
        assert_eq!(root[0].kind, EntryKind::Directory);

        let docs = store.list("docs").await.unwrap();
        let paths: Vec<_> = docs.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/a.md", "docs/deep"]);
    }

    #[test]
    fn vault_ids_tell_stores_apart() {
        let a = MemoryFileStore::new();
        let b = MemoryFileStore::new();
        assert_ne!(a.vault_id(), b.vault_id());
        assert_eq!(a.clone().vault_id(), a.vault_id());
        assert_eq!(b.with_id("notes").vault_id(), "notes");

        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("x")).unwrap();
        let local = LocalFileStore::new(tmp.path().join("x"));
        let via_dot = LocalFileStore::new(tmp.path().join("x/."));
        assert_eq!(local.vault_id(), via_dot.vault_id());
        assert_ne!(
            local.vault_id(),
            LocalFileStore::new(tmp.path()).vault_id()
        );
    }

    #[tokio::test]
    async fn memory_store_fetch_missing_is_not_found() {
        let store = MemoryFileStore::new();
        let err = store.fetch("nope.md").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_store_lists_and_fetches() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/note.md"), "# Hi").unwrap();
        std::fs::write(tmp.path().join("top.txt"), "top").unwrap();

        let store = LocalFileStore::new(tmp.path());
        let root = store.list("").await.unwrap();
        assert_eq!(root.len(), 2);
        assert_eq!(root[0].path, "sub");
        assert_eq!(root[0].kind, EntryKind::Directory);
        assert_eq!(root[1].path, "top.txt");
        assert!(root[1].modified_at > 0);

        let sub = store.list("sub").await.unwrap();
        assert_eq!(sub[0].path, "sub/note.md");
        assert_eq!(store.fetch("sub/note.md").await.unwrap(), "# Hi");
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(tmp.path());
        let err = store.fetch("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_store_missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(tmp.path());
        let err = store.fetch("missing.md").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
