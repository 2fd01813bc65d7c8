//! vaultctx - local search and context assembly for personal text vaults.
//!
//! vaultctx finds the files of a vault that matter for a query and packs
//! them into a token-budgeted context: candidates are aggregated from file
//! names, paths and contents (or looked up in a persistent inverted index),
//! ranked with BM25, boosted by term proximity and file metadata,
//! deduplicated, then split into chunks.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vaultctx::{Config, DataDir, LocalFileStore, Pipeline, RunOptions};
//!
//! # async fn demo() -> vaultctx::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config = vaultctx::Config::load(&data_dir.config_file())?;
//! let store = Arc::new(LocalFileStore::new("/home/me/notes"));
//! let pipeline = Pipeline::open(store, config, &data_dir)?;
//!
//! let output = pipeline
//!     .run("rust ownership", RunOptions::default())
//!     .await?;
//! println!("{}", output.assembled_context.rendered);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod assemble;
pub mod boost;
pub mod cache;
pub mod candidate;
pub mod config;
pub mod content;
pub mod data_dir;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod inverted_index;
pub mod local_index;
pub mod pipeline;
pub mod proximity;
pub mod query;
pub mod ranking;
pub mod store;
pub mod text_util;
pub mod trie;
pub mod walker;

pub use cache::DiskCache;
pub use candidate::{Candidate, MatchKind};
pub use config::Config;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use local_index::LocalIndex;
pub use pipeline::{
    Pipeline,
    RunOptions,
    RunOutput,
    SearchFlags,
    SearchHit,
    SearchReport,
};
pub use store::{FileRef, FileStore, LocalFileStore, MemoryFileStore};
