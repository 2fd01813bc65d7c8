use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use kdam::{BarExt, tqdm};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use vaultctx::{
    Config,
    DataDir,
    DiskCache,
    LocalFileStore,
    Pipeline,
    RunOptions,
    SearchFlags,
    error::{self, Error},
    fetcher::ProgressFn,
};

mod cli;

use cli::{CacheAction, Cli, Command};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("VAULTCTX_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn vault_root(vault: Option<PathBuf>) -> error::Result<PathBuf> {
    let path = match vault {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    if !path.is_dir() {
        return Err(Error::Config(format!(
            "vault is not a directory: {}",
            path.display()
        )));
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_path = cli.config.unwrap_or_else(|| data_dir.config_file());
    let config = Config::load(&config_path)?;

    if let Command::Cache { action } = &cli.command {
        return cmd_cache(&data_dir, &config, action);
    }

    let store = Arc::new(LocalFileStore::new(vault_root(cli.vault)?));
    let pipeline = Pipeline::open(store, config, &data_dir)?;

    match cli.command {
        Command::Search(args) => cmd_search(&pipeline, &args).await?,
        Command::Context(args) => cmd_context(&pipeline, &args).await?,
        Command::Complete(args) => {
            let suggestions = pipeline.complete(&args.prefix, args.count).await?;
            if args.json {
                print_json(&suggestions)?;
            } else {
                for s in &suggestions {
                    println!("{}\t{:.3}", s.term, s.score);
                }
            }
        }
        Command::Index(args) => cmd_index(&pipeline, args.force).await?,
        Command::Cache { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

async fn cmd_search(
    pipeline: &Pipeline<LocalFileStore>,
    args: &cli::SearchArgs,
) -> error::Result<()> {
    let flags = SearchFlags {
        case_sensitive: args.case_sensitive,
        whole_word: args.whole_word,
        regex: args.regex,
        fuzzy: args.fuzzy,
        max_results: args.count,
        timeout: args.timeout.map(Duration::from_secs),
    };
    let report = pipeline.search(&args.query, flags).await?;

    if args.json {
        return print_json(&report);
    }
    if report.timed_out {
        eprintln!(
            "Warning: timed out after reading {} files, results are partial",
            report.files_scanned
        );
    }
    if report.hits.is_empty() {
        println!("No matches for '{}'", args.query);
        return Ok(());
    }
    for hit in &report.hits {
        println!(
            "{} [{:?}, {:.2}] {}",
            hit.file.path, hit.match_type, hit.score, hit.match_text
        );
        if !hit.snippet.is_empty() {
            for line in hit.snippet.lines() {
                println!("    {line}");
            }
        }
    }
    Ok(())
}

async fn cmd_context(
    pipeline: &Pipeline<LocalFileStore>,
    args: &cli::ContextArgs,
) -> error::Result<()> {
    let mut options = RunOptions::from_config(pipeline.config());
    if let Some(budget) = args.budget {
        options.token_budget = budget;
    }
    if let Some(count) = args.count {
        options.max_results = count;
    }
    if let Some(secs) = args.timeout {
        options.timeout = Some(Duration::from_secs(secs));
    }
    options.use_cache &= !args.no_cache;
    options.use_index &= !args.no_index;
    options.use_ranking &= !args.no_ranking;
    options.use_deduplication &= !args.no_dedup;

    let output = pipeline.run(&args.query, options).await?;
    if args.json {
        return print_json(&output);
    }

    print!("{}", output.assembled_context.rendered);
    if output.stats.timed_out {
        eprintln!("Warning: timed out, results are partial");
    }
    Ok(())
}

async fn cmd_index(
    pipeline: &Pipeline<LocalFileStore>,
    force: bool,
) -> error::Result<()> {
    let bar = Arc::new(Mutex::new(tqdm!(desc = "Indexing", unit = " files")));
    let progress: ProgressFn = {
        let bar = Arc::clone(&bar);
        let warned = AtomicBool::new(false);
        Arc::new(move |done, total| {
            let mut bar = bar.lock().unwrap_or_else(|p| p.into_inner());
            bar.total = total;
            log_first_draw_error(bar.update_to(done), &warned);
        })
    };

    let outcome = pipeline.refresh_index(force, Some(progress)).await?;
    eprintln!();
    if outcome.index_rebuilt {
        eprintln!(
            "Indexed {} documents ({} terms)",
            outcome.documents, outcome.terms
        );
    } else {
        eprintln!(
            "Index is fresh: {} documents ({} terms); use --force to rebuild",
            outcome.documents, outcome.terms
        );
    }
    Ok(())
}

/// Warn about the first failed progress redraw only. Returns whether this
/// call logged.
fn log_first_draw_error<T>(result: std::io::Result<T>, warned: &AtomicBool) -> bool {
    let Err(err) = result else {
        return false;
    };
    if warned.swap(true, Ordering::Relaxed) {
        return false;
    }
    warn!(error = %err, "could not draw indexing progress");
    true
}

fn cmd_cache(
    data_dir: &DataDir,
    config: &Config,
    action: &CacheAction,
) -> error::Result<()> {
    let dir = data_dir.cache_dir()?;
    let cache: DiskCache<String> = DiskCache::open(&dir, config.cache.ttl())?;

    match action {
        CacheAction::Stats { json } => {
            let entries = cache.len()?;
            if *json {
                print_json(&serde_json::json!({
                    "dir": dir,
                    "entries": entries,
                    "ttl_secs": config.cache.ttl_secs,
                }))?;
            } else {
                print_cache_stats(&dir, entries, config.cache.ttl_secs);
            }
        }
        CacheAction::Cleanup => {
            let removed = cache.cleanup()?;
            println!("Removed {removed} expired entries");
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("Removed {removed} entries");
        }
    }
    Ok(())
}

fn print_cache_stats(dir: &Path, entries: usize, ttl_secs: u64) {
    println!("Cache directory: {}", dir.display());
    println!("Entries: {entries}");
    println!("TTL: {ttl_secs}s");
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn only_the_first_draw_error_is_logged() {
        let warned = AtomicBool::new(false);
        let broken = || Err::<bool, _>(io::Error::from(io::ErrorKind::BrokenPipe));

        assert!(!log_first_draw_error(Ok(true), &warned));
        assert!(log_first_draw_error(broken(), &warned));
        assert!(!log_first_draw_error(broken(), &warned));
        assert!(warned.load(Ordering::Relaxed));
    }
}
