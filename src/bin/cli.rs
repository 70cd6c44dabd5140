//! ttlkv CLI
//!
//! Command-line interface for operating on a ttlkv data directory.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ttlkv::{Cache, Config, Environment, Result};

/// ttlkv CLI
#[derive(Parser, Debug)]
#[command(name = "ttlkv-cli")]
#[command(about = "CLI for the ttlkv embedded TTL cache")]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./ttlkv_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// TTL in seconds (configured default when omitted)
        #[arg(short, long)]
        ttl: Option<u64>,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,

        /// Refresh the TTL to this many seconds on a hit
        #[arg(long)]
        touch: Option<u64>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Rename a key, keeping its expiry
    Rename {
        /// The current key
        old: String,

        /// The new key
        new: String,
    },

    /// List all fresh keys
    Keys {
        /// Stop after this many keys
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Remove expired entries
    Evict {
        /// Evict at most this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Verify commit-log integrity without opening the cache
    Verify,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if let Commands::Verify = args.command {
        let stats = Environment::verify(&args.data_dir)?;
        println!(
            "commit log ok: {} record(s), last lsn {}",
            stats.records_applied, stats.last_lsn
        );
        return Ok(());
    }

    let cache = Cache::open(Config::builder().data_dir(&args.data_dir).build())?;

    match args.command {
        Commands::Set { key, value, ttl } => {
            cache.set(&key, value.as_bytes(), ttl.map(Duration::from_secs))?;
            println!("ok");
        }
        Commands::Get { key, touch } => {
            let value = match touch {
                Some(secs) => cache.get_touch(&key, Some(Duration::from_secs(secs)))?,
                None => cache.get(&key)?,
            };
            match value {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(not found)"),
            }
        }
        Commands::Del { key } => {
            cache.delete(&key)?;
            println!("ok");
        }
        Commands::Rename { old, new } => {
            if cache.rename(&old, &new)? {
                println!("ok");
            } else {
                println!("(not renamed)");
            }
        }
        Commands::Keys { limit } => {
            let mut seen = 0usize;
            cache.keys(|key| {
                println!("{key}");
                seen += 1;
                Ok(limit.map_or(true, |cap| seen < cap))
            })?;
        }
        Commands::Evict { limit } => {
            let evicted = cache.evict_expired(limit)?;
            println!("evicted {evicted}");
        }
        Commands::Verify => unreachable!("handled above"),
    }

    cache.close()?;
    Ok(())
}
