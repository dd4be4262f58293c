use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod ingest;
mod table;

pub use config::Config;
pub use ingest::IngestArgs;

/// tablesink - stream events into partitioned tables
#[derive(Parser)]
#[command(name = "tablesink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table in a local Parquet store
    CreateTable {
        /// Store root directory
        #[arg(short = 'r', long, value_name = "DIR")]
        root: PathBuf,

        /// Database name
        #[arg(short = 'd', long)]
        database: String,

        /// Table name
        #[arg(short = 't', long)]
        table: String,

        /// Comma-separated column names
        #[arg(short = 'c', long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Comma-separated partition keys
        #[arg(short = 'p', long, value_delimiter = ',')]
        partition_keys: Vec<String>,

        /// Table format (text, json or parquet)
        #[arg(short = 'f', long, default_value = "text")]
        format: String,
    },

    /// Stream line-delimited events from a file or stdin into a table
    Ingest(IngestArgs),

    /// Count committed rows in a table partition
    Count {
        /// Store root directory
        #[arg(short = 'r', long, value_name = "DIR")]
        root: PathBuf,

        /// Database name
        #[arg(short = 'd', long)]
        database: String,

        /// Table name
        #[arg(short = 't', long)]
        table: String,

        /// Partition values, in partition key order
        #[arg(short = 'p', long = "partition", value_delimiter = ',')]
        partition_values: Vec<String>,

        /// Also print the first N rows
        #[arg(long, value_name = "N")]
        show: Option<usize>,
    },
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::CreateTable {
            root,
            database,
            table,
            columns,
            partition_keys,
            format,
        } => table::create(root, database, table, columns, partition_keys, format),
        Commands::Ingest(args) => ingest::run(args),
        Commands::Count {
            root,
            database,
            table,
            partition_values,
            show,
        } => table::count(root, database, table, partition_values, show),
    }
}
