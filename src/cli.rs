use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "vaultctx",
    about = "Search a text vault and assemble context for a query"
)]
pub struct Cli {
    /// Vault directory to search (defaults to the current directory)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the data directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Match a pattern against file names, paths and contents
    Search(SearchArgs),
    /// Assemble ranked, token-budgeted context for a query
    Context(ContextArgs),
    /// Suggest completions for a prefix from the local index
    Complete(CompleteArgs),
    /// Rebuild the local index
    Index(IndexArgs),
    /// Inspect or prune the content cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "20")]
    pub count: usize,

    /// Match case exactly
    #[arg(long)]
    pub case_sensitive: bool,

    /// Only match whole words
    #[arg(long)]
    pub whole_word: bool,

    /// Treat the query as a regular expression
    #[arg(long)]
    pub regex: bool,

    /// Also accept content words similar to the query words
    #[arg(long)]
    pub fuzzy: bool,

    /// Stop reading file contents after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Context --

#[derive(Debug, Parser)]
pub struct ContextArgs {
    /// The query
    pub query: String,

    /// Token budget of the assembled context
    #[arg(long)]
    pub budget: Option<usize>,

    /// Maximum number of files to include
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Bypass the content cache
    #[arg(long)]
    pub no_cache: bool,

    /// Skip the local index and scan the vault
    #[arg(long)]
    pub no_index: bool,

    /// Skip BM25 ranking
    #[arg(long)]
    pub no_ranking: bool,

    /// Skip near-duplicate removal
    #[arg(long)]
    pub no_dedup: bool,

    /// Stop scanning after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output the full run report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Complete --

#[derive(Debug, Parser)]
pub struct CompleteArgs {
    /// The prefix to complete
    pub prefix: String,

    /// Number of suggestions to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Rebuild even if the index is still fresh
    #[arg(long)]
    pub force: bool,
}

// -- Cache --

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove expired entries
    Cleanup,
    /// Remove every entry
    Clear,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "vaultctx",
            &mut std::io::stdout(),
        );
    }
}
