use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// newsdb: Development tool for newsdb databases.
///
/// Inspect, migrate, read, write, and export the reader's on-device
/// databases from the command line. Set `RUST_LOG=debug` to see every
/// migration step.
#[derive(Parser)]
#[command(name = "newsdb", version, about, long_about = None)]
struct Cli {
    /// TOML file with SQLite settings. The data directory argument always
    /// overrides its `data_dir`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database name.
    #[arg(long, global = true, default_value = newsdb_store::news::NEWS_DB_NAME)]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version, partitions, and migration history.
    Status {
        /// Directory holding the database files.
        dir: PathBuf,
    },

    /// Upgrade the database, creating it if needed.
    Migrate {
        /// Directory holding the database files.
        dir: PathBuf,

        /// Target version. Defaults to the latest known one.
        #[arg(long)]
        to: Option<u32>,
    },

    /// Print one record as JSON.
    Get {
        /// Directory holding the database files.
        dir: PathBuf,

        /// Partition to read from.
        partition: String,

        /// Record key. Integers are integer keys unless --text is given.
        key: String,

        /// Treat the key as a string even if it looks like a number.
        #[arg(long)]
        text: bool,
    },

    /// Insert or replace one record.
    Put {
        /// Directory holding the database files.
        dir: PathBuf,

        /// Partition to write to.
        partition: String,

        /// Record as JSON.
        json: String,

        /// Key for partitions without a key path.
        #[arg(short, long)]
        key: Option<String>,

        /// Treat the key as a string even if it looks like a number.
        #[arg(long)]
        text: bool,
    },

    /// Delete one record.
    Delete {
        /// Directory holding the database files.
        dir: PathBuf,

        /// Partition to delete from.
        partition: String,

        /// Record key.
        key: String,

        /// Treat the key as a string even if it looks like a number.
        #[arg(long)]
        text: bool,
    },

    /// List the records of a partition in key order.
    List {
        /// Directory holding the database files.
        dir: PathBuf,

        /// Partition to list.
        partition: String,
    },

    /// Export data as JSON for debugging.
    Export {
        /// Directory holding the database files.
        dir: PathBuf,

        /// Only export this partition.
        #[arg(short, long)]
        partition: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> commands::Result {
    let name = cli.name.as_str();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Status { dir } => commands::status(&commands::load_config(config, &dir)?, name),
        Commands::Migrate { dir, to } => {
            commands::migrate(commands::load_config(config, &dir)?, name, to).await
        }
        Commands::Get {
            dir,
            partition,
            key,
            text,
        } => {
            let key = commands::parse_key(&key, text);
            commands::get(commands::load_config(config, &dir)?, name, &partition, key).await
        }
        Commands::Put {
            dir,
            partition,
            json,
            key,
            text,
        } => {
            let key = key.map(|k| commands::parse_key(&k, text));
            commands::put(commands::load_config(config, &dir)?, name, &partition, &json, key).await
        }
        Commands::Delete {
            dir,
            partition,
            key,
            text,
        } => {
            let key = commands::parse_key(&key, text);
            commands::delete(commands::load_config(config, &dir)?, name, &partition, key).await
        }
        Commands::List { dir, partition } => {
            commands::list(commands::load_config(config, &dir)?, name, &partition).await
        }
        Commands::Export { dir, partition } => {
            commands::export(commands::load_config(config, &dir)?, name, partition.as_deref())
                .await
        }
    }
}
