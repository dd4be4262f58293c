//! # tablesink CLI
//!
//! A command-line tool for streaming line-delimited events into partitioned
//! tables of a local Parquet store.
//!
//! ## Usage
//!
//! ```bash
//! # Create a table partitioned by day
//! tablesink create-table -r warehouse -d logs -t alerts -c id,msg -p day
//!
//! # Ingest a file, committing every 500 events
//! tablesink ingest events.csv -r warehouse -d logs -t alerts -p 2024-01-01 \
//!     --fieldnames id,msg -n 500
//!
//! # Count committed rows
//! tablesink count -r warehouse -d logs -t alerts -p 2024-01-01 --show 10
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
