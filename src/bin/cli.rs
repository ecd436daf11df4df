//! TierKV CLI
//!
//! Command-line interface operating directly on a TierKV data directory.

use clap::{Parser, Subcommand};
use tierkv::{Config, Tree};
use tracing_subscriber::{fmt, EnvFilter};

/// TierKV CLI
#[derive(Parser, Debug)]
#[command(name = "tierkv-cli")]
#[command(about = "CLI for the TierKV storage engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tierkv_data")]
    data_dir: String,

    /// Memtable entries before a flush
    #[arg(short, long, default_value = "1024")]
    memtable_entries: usize,

    /// Block cache capacity (blocks)
    #[arg(short, long, default_value = "64")]
    cache_capacity: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Print every live pair with low <= key <= high
    Scan {
        low: String,
        high: String,
    },

    /// Flush and compact tier 1 into tier 2
    Compact,

    /// Print block counts and cache counters
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tierkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_entry_limit(args.memtable_entries)
        .cache_capacity(args.cache_capacity)
        .build();

    let tree = match Tree::open(config) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to open tree: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&tree, args.command) {
        tracing::error!("Command failed: {}", e);
        std::process::exit(1);
    }

    // Nothing is durable until flushed
    if let Err(e) = tree.close() {
        tracing::error!("Failed to close tree: {}", e);
        std::process::exit(1);
    }
}

fn run(tree: &Tree, command: Commands) -> tierkv::Result<()> {
    match command {
        Commands::Get { key } => match tree.get(&key)? {
            Some(value) => println!("{}", value),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            tree.put(&key, &value)?;
            println!("OK");
        }
        Commands::Del { key } => {
            tree.delete(&key)?;
            println!("OK");
        }
        Commands::Scan { low, high } => {
            for pair in tree.scan(&low, &high) {
                let (key, value) = pair?;
                println!("{}:{}", key, value);
            }
        }
        Commands::Compact => {
            tree.compact()?;
            println!("OK");
        }
        Commands::Stats => {
            let stats = tree.stats();
            println!("memtable entries: {}", stats.memtable_entries);
            for (idx, blocks) in stats.blocks_per_tier.iter().enumerate() {
                println!("tier {}: {} blocks", idx + 1, blocks);
            }
            println!(
                "cache: {} hits, {} misses, {} loads, {} evictions",
                stats.cache.hits, stats.cache.misses, stats.cache.loads, stats.cache.evictions
            );
        }
    }
    Ok(())
}
