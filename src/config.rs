//! The configuration file.
//!
//! Every section is optional; missing fields take the defaults of the
//! component that owns them.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    aggregate::AggregateConfig,
    assemble::AssemblerConfig,
    boost::BoostConfig,
    cache::CacheConfig,
    dedup::DedupConfig,
    error::{Error, Result},
    fetcher::FetchConfig,
    local_index::IndexConfig,
    proximity::ProximityConfig,
    query::QueryConfig,
    ranking::Bm25Params,
};

/// Defaults for the `run` and `search` entrypoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum similarity for a fuzzy word match.
    pub fuzzy_threshold: f64,
    pub max_results: usize,
    pub token_budget: usize,
    /// Wall-clock deadline of one run or search, in seconds (0 disables it).
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.8,
            max_results: 10,
            token_budget: 4000,
            timeout_secs: 30,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Pipeline stages that can be switched off; a disabled stage passes its
/// input through unchanged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub hydrate: bool,
    pub ranking: bool,
    pub proximity: bool,
    pub boost: bool,
    pub dedup: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            hydrate: true,
            ranking: true,
            proximity: true,
            boost: true,
            dedup: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aggregate: AggregateConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub index: IndexConfig,
    pub ranking: Bm25Params,
    pub boost: BoostConfig,
    pub proximity: ProximityConfig,
    pub dedup: DedupConfig,
    pub query: QueryConfig,
    pub assembler: AssemblerConfig,
    pub search: SearchConfig,
    pub stages: StageConfig,
}

impl Config {
    /// Read a JSON config file, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.batch_size == 0 {
            return Err(Error::Config("fetch.batch_size must be at least 1".into()));
        }
        if self.assembler.chunk_tokens == 0 {
            return Err(Error::Config(
                "assembler.chunk_tokens must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return Err(Error::Config(
                "dedup.threshold must lie between 0 and 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.search.fuzzy_threshold) {
            return Err(Error::Config(
                "search.fuzzy_threshold must lie between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}
