use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use launcher_core::{CollectionStore, StoreConfig, StoreError};
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "launcher-store")]
#[command(author, version, about = "Admin CLI for the launcher's encrypted collection store", long_about = None)]
struct Cli {
    /// Storage directory (overrides LAUNCHER_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Shards per collection when saving (overrides LAUNCHER_SHARD_COUNT)
    #[arg(long, global = true)]
    shards: Option<NonZeroUsize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save a JSON document as a collection, replacing what was there
    Save {
        collection: String,
        /// Read the document from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Print a collection as JSON
    Load {
        collection: String,
        /// Single-line output
        #[arg(long)]
        compact: bool,
    },

    /// Delete a collection and its chunk files
    Delete { collection: String },

    /// Delete every file in the storage directory
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match cli.data_dir {
        Some(dir) => StoreConfig::from_env_in(dir)?,
        None => StoreConfig::from_env()?,
    };
    if let Some(shards) = cli.shards {
        config = config.with_shard_count(shards);
    }
    let store = CollectionStore::open(&config)
        .with_context(|| format!("open store at {}", config.storage_dir.display()))?;

    match cli.command {
        Commands::Save { collection, input } => {
            let raw = read_input(input)?;
            let document: serde_json::Value =
                serde_json::from_str(&raw).context("input is not valid JSON")?;
            store.save(&collection, &document)?;
            info!(collection = %collection, "saved");
            println!("saved {collection}");
        }
        Commands::Load {
            collection,
            compact,
        } => {
            let value = match store.load_value(&collection) {
                Ok(value) => value,
                Err(StoreError::MissingManifest(_)) => {
                    return Err(anyhow!("collection {collection} not found"));
                }
                Err(err) => return Err(err.into()),
            };
            let rendered = if compact {
                serde_json::to_string(&value)?
            } else {
                serde_json::to_string_pretty(&value)?
            };
            println!("{rendered}");
        }
        Commands::Delete { collection } => {
            store.delete_collection(&collection)?;
            println!("deleted {collection}");
        }
        Commands::Clear { yes } => {
            if !yes {
                return Err(anyhow!(
                    "refusing to clear {} without --yes",
                    config.storage_dir.display()
                ));
            }
            store.clear_all()?;
            println!("cleared {}", config.storage_dir.display());
        }
    }
    Ok(())
}

/// Logs go to stderr so stdout stays clean JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            Ok(buf)
        }
    }
}
