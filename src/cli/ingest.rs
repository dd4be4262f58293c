use anyhow::{bail, Context as _, Result};
use clap::Args;
use log::info;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tablesink::endpoint::Endpoint;
use tablesink::event::Event;
use tablesink::executor::{CallTimeoutPool, PoolConfig};
use tablesink::metrics::SinkCounter;
use tablesink::serializer::{delimited, Serializer};
use tablesink::storage::ParquetStore;
use tablesink::writer::{BatchWriter, WriterConfig};

use super::Config;

/// Flags of the ingest command; each overrides the config file
#[derive(Args, Debug, Default)]
pub struct IngestArgs {
    /// Input file with one event per line (stdin when omitted or "-")
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Load settings from a TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store root directory
    #[arg(short = 'r', long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Database name
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// Table name
    #[arg(short = 't', long)]
    table: Option<String>,

    /// Partition values, in partition key order
    #[arg(short = 'p', long = "partition", value_delimiter = ',')]
    partition_values: Vec<String>,

    /// Serializer alias (DELIMITED or JSON)
    #[arg(short = 's', long)]
    serializer: Option<String>,

    /// Comma-separated field-to-column mapping for DELIMITED
    #[arg(long)]
    fieldnames: Option<String>,

    /// Input field delimiter for DELIMITED
    #[arg(long)]
    delimiter: Option<String>,

    /// Storage-side separator for DELIMITED (one character)
    #[arg(long)]
    serde_separator: Option<String>,

    /// Transactions per batch
    #[arg(short = 'm', long)]
    max_transactions: Option<usize>,

    /// Events per committed transaction
    #[arg(short = 'n', long)]
    flush_every: Option<usize>,

    /// Per-call deadline in seconds
    #[arg(long)]
    call_timeout_secs: Option<u64>,

    /// Fail instead of creating a missing partition
    #[arg(long)]
    no_auto_create: bool,

    /// Worker threads in the call pool
    #[arg(long)]
    threads: Option<usize>,
}

/// Everything needed to run one ingest, after merging flags and config
struct IngestPlan {
    root: PathBuf,
    endpoint: Endpoint,
    serializer: Serializer,
    writer_config: WriterConfig,
    flush_every: usize,
    threads: usize,
}

impl IngestPlan {
    fn resolve(args: &IngestArgs, config: Config) -> Result<Self> {
        let sink = config.sink;

        let root = args
            .root
            .clone()
            .or(sink.storage_root)
            .context("No store root given (--root or sink.storage_root)")?;
        let database = args
            .database
            .clone()
            .or(sink.database)
            .context("No database given (--database or sink.database)")?;
        let table = args
            .table
            .clone()
            .or(sink.table)
            .context("No table given (--table or sink.table)")?;
        let partition_values = if args.partition_values.is_empty() {
            sink.partition_values.unwrap_or_default()
        } else {
            args.partition_values.clone()
        };

        let mut context = config.serializer.context();
        if let Some(fieldnames) = &args.fieldnames {
            context.put(delimited::FIELD_NAMES_KEY, fieldnames.as_str());
        }
        if let Some(delimiter) = &args.delimiter {
            context.put(delimited::DELIMITER_KEY, delimiter.as_str());
        }
        if let Some(separator) = &args.serde_separator {
            context.put(delimited::SERDE_SEPARATOR_KEY, separator.as_str());
        }
        let alias = args
            .serializer
            .clone()
            .or(config.serializer.alias)
            .unwrap_or_else(|| Serializer::DELIMITED.to_string());
        let serializer = Serializer::from_context(&alias, &context)
            .with_context(|| format!("Invalid {} serializer configuration", alias))?;

        let defaults = WriterConfig::default();
        let writer_config = WriterConfig {
            max_transactions: args
                .max_transactions
                .or(sink.max_transactions)
                .unwrap_or(defaults.max_transactions),
            auto_create_partitions: !args.no_auto_create
                && sink.auto_create_partitions.unwrap_or(defaults.auto_create_partitions),
            call_timeout: args
                .call_timeout_secs
                .or(sink.call_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            transaction_timeout: sink
                .transaction_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.transaction_timeout),
            heartbeat_interval: sink
                .heartbeat_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            agent: sink.agent.unwrap_or_else(|| "tablesink-cli".to_string()),
        };
        writer_config.validate()?;

        let flush_every = args.flush_every.or(sink.flush_every).unwrap_or(1000);
        if flush_every == 0 {
            bail!("flush_every must be greater than zero");
        }

        Ok(Self {
            endpoint: Endpoint::new(
                format!("file://{}", root.display()),
                database,
                table,
                partition_values,
            ),
            root,
            serializer,
            writer_config,
            flush_every,
            threads: args
                .threads
                .or(sink.threads)
                .unwrap_or(PoolConfig::default().threads),
        })
    }
}

fn open_input(input: Option<&PathBuf>) -> Result<Box<dyn BufRead>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Stream events into a table of a local Parquet store
pub fn run(args: IngestArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let plan = IngestPlan::resolve(&args, config)?;

    info!("Ingesting into {}", plan.endpoint);
    info!(
        "  Serializer: {}, {} events per transaction, {} transactions per batch",
        plan.serializer.alias(),
        plan.flush_every,
        plan.writer_config.max_transactions
    );

    let store = ParquetStore::open(&plan.root)
        .with_context(|| format!("Failed to open store at {}", plan.root.display()))?;
    let pool = Arc::new(
        CallTimeoutPool::with_config(PoolConfig {
            threads: plan.threads,
            ..PoolConfig::default()
        })
        .context("Failed to start call pool")?,
    );
    let counter = Arc::new(SinkCounter::new(plan.endpoint.qualified_table()));

    let mut writer = BatchWriter::new(
        plan.endpoint.clone(),
        plan.writer_config,
        Arc::clone(&pool),
        plan.serializer,
        Arc::new(store),
        Arc::clone(&counter),
    )
    .with_context(|| format!("Failed to open writer for {}", plan.endpoint))?;

    let reader = open_input(args.input.as_ref())?;
    let mut in_transaction = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.is_empty() {
            continue;
        }
        writer
            .write(&Event::new(line))
            .with_context(|| format!("Failed to write line {}", index + 1))?;
        in_transaction += 1;
        if in_transaction >= plan.flush_every {
            writer.flush(false).context("Failed to commit transaction")?;
            in_transaction = 0;
        }
    }
    writer.flush(true).context("Failed to commit final transaction")?;

    let stats = writer.stats().clone();
    writer.close().context("Failed to close writer")?;

    print_summary(&stats.to_string(), &counter.snapshot().to_string());
    Ok(())
}

fn print_summary(stats: &str, counters: &str) {
    #[cfg(feature = "colorized_output")]
    {
        use console::style;
        println!("{} {}", style("✓").green().bold(), style(stats).bold());
        println!("  {}", style(counters).dim());
    }

    #[cfg(not(feature = "colorized_output"))]
    {
        println!("{}", stats);
        println!("  {}", counters);
    }
}
