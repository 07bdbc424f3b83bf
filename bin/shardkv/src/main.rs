//! shardkv - Admin CLI over a shardkv data directory
//!
//! Every invocation opens the store (and, in two-phase commit mode, the
//! transaction log) under the data directory, rebuilds the transaction state
//! from the log, and runs a single command. A `prepare-put` followed by a
//! `commit` in a later invocation goes through the same restart path a server
//! takes after a crash.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::Serialize;
use shardkv_common::{Config, Key};
use shardkv_storage::{
    FileStore, FileTransactionLog, LogOptions, Request, RequestHandler, Response,
    StoreCoordinator, StoreLimits, TpcPhase, TransactionLog,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shardkv")]
#[command(about = "shardkv admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "shardkv.toml", env = "SHARDKV_CONFIG")]
    config: PathBuf,

    /// Data directory (overrides config)
    #[arg(short, long, env = "SHARDKV_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Route PUT/DEL through two-phase commit (overrides config)
    #[arg(long)]
    tpc: bool,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a key
    Get {
        key: String,
        /// Print the value hex-encoded
        #[arg(long)]
        hex: bool,
    },
    /// Write a key (a vote in two-phase commit mode)
    Put { key: String, value: String },
    /// Delete a key (a vote in two-phase commit mode)
    Del { key: String },
    /// Show server info
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Show store, log and cache statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Log a PUT intent and vote
    PreparePut { key: String, value: String },
    /// Log a DEL intent and vote
    PrepareDel { key: String },
    /// Commit the pending transaction
    Commit,
    /// Abort the pending transaction
    Abort,
    /// Replay the transaction log and report what was restored
    Recover,
    /// Wipe the store and the transaction log
    Clean {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Serialize)]
struct Stats {
    data_dir: PathBuf,
    use_tpc: bool,
    store_entries: usize,
    shard_count: usize,
    capacity_per_shard: usize,
    log_last_lsn: Option<u64>,
    log_size_bytes: Option<u64>,
    tpc_phase: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Merge CLI args with config file (CLI takes precedence)
    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(data_dir) = args.data_dir {
        config.server.data_dir = data_dir;
    }
    if args.tpc {
        config.server.use_tpc = true;
    }
    config.validate()?;

    info!(
        data_dir = %config.server.data_dir.display(),
        tpc = config.server.use_tpc,
        "opening data directory"
    );

    let store = FileStore::open(config.store_dir(), StoreLimits::from(&config.limits))?;
    if config.server.use_tpc {
        let log = FileTransactionLog::open(config.log_path(), LogOptions::from(&config.log))?;
        let coordinator = StoreCoordinator::with_tpc(&config, store, log)?;
        run(&config, coordinator, args.command, |log| {
            (Some(log.last_lsn()), Some(log.size()))
        })
    } else {
        let log_path = config.log_path();
        if has_log_history(&log_path)? {
            bail!(
                "{} holds two-phase commit history; rerun with --tpc",
                log_path.display()
            );
        }
        let coordinator = StoreCoordinator::new(&config, store)?;
        run(&config, coordinator, args.command, |_| (None, None))
    }
}

fn run<L, F>(
    config: &Config,
    coordinator: StoreCoordinator<FileStore, L>,
    command: Commands,
    log_summary: F,
) -> Result<()>
where
    L: TransactionLog,
    F: Fn(&L) -> (Option<u64>, Option<u64>),
{
    let report = coordinator
        .rebuild_state()
        .context("failed to rebuild state from the transaction log")?;
    let handler = RequestHandler::new(Arc::new(coordinator));
    let coordinator = handler.coordinator();

    match command {
        Commands::Get { key, hex } => {
            match handler.handle(Request::Get { key: Key::from(key) }) {
                Response::Value(value) if hex => println!("{}", hex::encode(&value)),
                Response::Value(value) => println!("{}", String::from_utf8_lossy(&value)),
                other => bail!("{other}"),
            }
        }
        Commands::Put { key, value } => respond(handler.handle(Request::Put {
            key: Key::from(key),
            value: Bytes::from(value),
        }))?,
        Commands::Del { key } => respond(handler.handle(Request::Del { key: Key::from(key) }))?,
        Commands::Info { json } => {
            let info = coordinator.get_info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{info}");
            }
        }
        Commands::Stats { json } => {
            let (log_last_lsn, log_size_bytes) =
                coordinator.log().map_or((None, None), &log_summary);
            let stats = Stats {
                data_dir: config.server.data_dir.clone(),
                use_tpc: coordinator.is_tpc(),
                store_entries: coordinator.store().entry_count()?,
                shard_count: coordinator.cache().shard_count(),
                capacity_per_shard: coordinator.cache().capacity_per_shard(),
                log_last_lsn,
                log_size_bytes,
                tpc_phase: describe_phase(&coordinator.tpc_phase()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::PreparePut { key, value } => {
            let lsn = coordinator.prepare_put(&Key::from(key), Bytes::from(value))?;
            println!("VOTE COMMIT (intent lsn {lsn})");
        }
        Commands::PrepareDel { key } => {
            let lsn = coordinator.prepare_delete(&Key::from(key))?;
            println!("VOTE COMMIT (intent lsn {lsn})");
        }
        Commands::Commit => match coordinator.commit()? {
            Some(lsn) => println!("committed (lsn {lsn})"),
            None => println!("nothing to log; acknowledged"),
        },
        Commands::Abort => match coordinator.abort()? {
            Some(lsn) => println!("aborted (lsn {lsn})"),
            None => println!("nothing to log; acknowledged"),
        },
        Commands::Recover => {
            println!("Recovery");
            println!("========");
            println!("Records replayed: {}", report.records_replayed);
            println!("Last LSN:         {}", report.last_lsn);
            if let Some(pending) = &report.pending {
                println!("Pending intent:   {pending:?}");
            }
            if let Some(reapplied) = &report.reapplied {
                println!("Re-applied:       {reapplied:?}");
            }
            println!("Phase:            {}", describe_phase(&coordinator.tpc_phase()));
        }
        Commands::Clean { yes } => {
            if !yes {
                bail!("refusing to wipe {} without --yes", config.server.data_dir.display());
            }
            coordinator.clean()?;
            println!("cleaned {}", config.server.data_dir.display());
        }
    }

    Ok(())
}

/// Check whether a transaction log exists and holds any records
fn has_log_history(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() > 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to inspect {}", path.display())),
    }
}

fn respond(response: Response) -> Result<()> {
    match response {
        Response::Error(msg) | Response::VoteAbort(msg) => bail!("{msg}"),
        other => {
            println!("{other}");
            Ok(())
        }
    }
}

fn describe_phase(phase: &TpcPhase) -> String {
    match phase {
        TpcPhase::Idle => "idle".to_string(),
        TpcPhase::AwaitingDecision(m) => format!("awaiting decision for {}", m.key()),
        TpcPhase::Committed(m) => format!("committed, apply pending for {}", m.key()),
    }
}

fn print_stats(stats: &Stats) {
    println!("shardkv Stats");
    println!("=============");
    println!("Data dir:        {}", stats.data_dir.display());
    println!("Two-phase mode:  {}", stats.use_tpc);
    println!("Store entries:   {}", stats.store_entries);
    println!(
        "Cache geometry:  {} shards x {} entries",
        stats.shard_count, stats.capacity_per_shard
    );
    if let (Some(lsn), Some(size)) = (stats.log_last_lsn, stats.log_size_bytes) {
        println!("Log last LSN:    {lsn}");
        println!("Log size:        {size} bytes");
    }
    println!("TPC phase:       {}", stats.tpc_phase);
}
