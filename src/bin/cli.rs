//! BlockVault CLI
//!
//! Command-line interface for a local sharded BlockVault directory.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use blockvault::repair;
use blockvault::{Config, ShardedEngine, VaultError};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// BlockVault CLI
#[derive(Parser, Debug)]
#[command(name = "blockvault-cli")]
#[command(about = "Block-based virtual disk blob storage")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./blockvault_data")]
    data_dir: String,

    /// Number of shards (must match the directory's manifest)
    #[arg(short, long, default_value = "4")]
    shards: usize,

    /// Initial container size per shard in MB
    #[arg(long, default_value = "16")]
    initial_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a file (or stdin with "-") under a URI
    Put {
        /// Blob URI
        uri: String,

        /// Source file, "-" for stdin
        file: String,
    },

    /// Fetch a blob to stdout or a file
    Get {
        /// Blob URI
        uri: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete a blob
    Del {
        /// Blob URI
        uri: String,
    },

    /// Check whether a blob exists
    Exists {
        /// Blob URI
        uri: String,
    },

    /// Compact every shard
    Vacuum,

    /// Print per-shard usage
    Stats,

    /// Report utilization of one disk directory from header + bitmap only
    Inspect {
        /// Shard directory (e.g. ./blockvault_data/shard_000)
        dir: PathBuf,
    },

    /// Reconcile every shard's bitmap against its index
    Repair,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blockvault=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> blockvault::Result<()> {
    if let Commands::Inspect { dir } = &args.command {
        let usage = repair::inspect(dir)?;
        println!("block size:   {}", usage.header.block_size);
        println!("total blocks: {}", usage.header.total_blocks);
        println!("used blocks:  {}", usage.used_blocks);
        println!("free blocks:  {}", usage.free_blocks);
        println!("container:    {} bytes", usage.container_bytes);
        println!("utilization:  {:.1}%", usage.ratio() * 100.0);
        return Ok(());
    }

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .shard_count(args.shards)
        .initial_size(args.initial_mb * 1024 * 1024)
        .build();

    tracing::info!("BlockVault v{}", blockvault::VERSION);
    let engine = ShardedEngine::open(config)?;

    match args.command {
        Commands::Put { uri, file } => {
            let data = if file == "-" {
                let mut buf = Vec::new();
                io::stdin().read_to_end(&mut buf)?;
                buf
            } else {
                fs::read(&file)?
            };
            engine.save(&uri, &data)?;
            println!("stored {} bytes on shard {}", data.len(), engine.shard_for(&uri));
        }
        Commands::Get { uri, out } => {
            let mut stream = engine.load(&uri)?;
            match out {
                Some(path) => {
                    let mut file = fs::File::create(path)?;
                    io::copy(&mut stream, &mut file)?;
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    io::copy(&mut stream, &mut stdout)?;
                    stdout.flush()?;
                }
            }
        }
        Commands::Del { uri } => {
            engine.delete(&uri)?;
        }
        Commands::Exists { uri } => {
            let found = engine.exists(&uri);
            println!("{}", found);
            if !found {
                engine.close()?;
                return Err(VaultError::NotFound(uri));
            }
        }
        Commands::Vacuum => {
            for (id, report) in engine.vacuum_all()?.iter().enumerate() {
                println!(
                    "shard {}: {} files, {} -> {} blocks",
                    id, report.files_moved, report.blocks_before, report.blocks_after
                );
            }
        }
        Commands::Stats => {
            for (id, stats) in engine.stats()?.iter().enumerate() {
                println!(
                    "shard {}: {} files, {}/{} blocks used ({} referenced), {} bytes",
                    id,
                    stats.file_count,
                    stats.used_blocks,
                    stats.total_blocks,
                    stats.referenced_blocks,
                    stats.container_bytes
                );
            }
        }
        Commands::Repair => {
            for (id, shard) in engine.shards().iter().enumerate() {
                let report = shard.repair()?;
                println!(
                    "shard {}: freed {} leaked, marked {} missing, {} out-of-range extents",
                    id,
                    report.leaked_freed,
                    report.missing_marked,
                    report.out_of_range.len()
                );
            }
        }
        Commands::Inspect { .. } => {}
    }

    engine.close()
}
