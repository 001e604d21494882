//! cowtree - command-line access to a cowtree store
//!
//! Keys are taken as UTF-8 strings; values are read and printed as JSON.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cowtree_engine::{Store, Value};

mod config;

use config::CliConfig;

/// cowtree - append-only copy-on-write B+tree store
#[derive(Parser, Debug)]
#[command(name = "cowtree")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Store file to open (created if missing)
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY
    Get { key: String },
    /// Store a JSON value under KEY
    Set { key: String, value: String },
    /// Remove KEY
    Delete { key: String },
    /// Print every pair with START <= key < END
    Range { start: String, end: String },
    /// Print each leaf's first key and pointer
    Leaves,
    /// Rewrite the live tree into a fresh file
    Compact,
    /// Print file and cache statistics
    Stats,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

fn run(store: &Store, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Get { key } => match store.get(key.as_bytes())? {
            Some(value) => writeln!(out, "{}", serde_json::to_string(&value)?)?,
            None => writeln!(out, "(not found)")?,
        },
        Command::Set { key, value } => {
            let value: Value = serde_json::from_str(&value)
                .with_context(|| format!("value for {:?} is not valid JSON", key))?;
            store.set(key.as_bytes(), value)?;
        }
        Command::Delete { key } => store.delete(key.as_bytes())?,
        Command::Range { start, end } => {
            for (key, value) in store.range(start.as_bytes(), end.as_bytes())? {
                writeln!(
                    out,
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    serde_json::to_string(&value)?
                )?;
            }
        }
        Command::Leaves => {
            for (first, pointer) in store.leaves()? {
                writeln!(out, "{}\t{}", String::from_utf8_lossy(&first), pointer)?;
            }
        }
        Command::Compact => {
            let report = store.compact()?;
            writeln!(
                out,
                "compacted: {} -> {} bytes ({} nodes written)",
                report.bytes_before, report.bytes_after, report.nodes_written
            )?;
        }
        Command::Stats => {
            let leaves = store.leaves()?;
            let cache = store.cache_stats();
            writeln!(out, "file:        {}", store.path().display())?;
            writeln!(out, "size:        {} bytes", store.file_len()?)?;
            writeln!(out, "root:        {}", store.root_pointer()?)?;
            writeln!(out, "leaves:      {}", leaves.len())?;
            writeln!(
                out,
                "cache:       {} hits, {} misses, {} evictions",
                cache.hits, cache.misses, cache.evictions
            )?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };

    // Set up logging; stdout is reserved for command output
    let level = args
        .log_level
        .as_deref()
        .or(config.log_level.as_deref())
        .map(parse_level)
        .unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let store = Store::open_with(&args.store, config.store)
        .with_context(|| format!("opening store {}", args.store.display()))?;

    let stdout = io::stdout();
    run(&store, args.command, &mut stdout.lock())
}
