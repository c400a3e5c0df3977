//! Docflow Ingest - flat file ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docflow_common::logging::{init_logging, LogConfig, LogLevel};
use docflow_ingest::config::MalformedLinePolicy;
use docflow_ingest::{
    FixedWidthRecordParser, GeoEnrichmentClient, Geocoder, IngestConfig, IngestionRunner,
    JsonLinesSink, ParsedLine, Pipeline, RateLimiter, RecordSink,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

/// Stands for stdin or stdout in path arguments
const STDIO: &str = "-";

#[derive(Parser, Debug)]
#[command(name = "docflow-ingest")]
#[command(author, version, about = "Fixed-width flat file ingestion with geocoding enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, enrich and commit every record of a flat file
    Run {
        /// Input file, or `-` for stdin
        #[arg(short, long)]
        input: String,

        /// TOML configuration file
        #[arg(short, long, env = "DOCFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// JSON lines output file, or `-` for stdout
        #[arg(short, long, default_value = STDIO)]
        output: String,

        /// Records processed at the same time
        #[arg(long)]
        concurrency: Option<usize>,

        /// Abort on the first line of unexpected width
        #[arg(long)]
        strict: bool,
    },

    /// Parse only and print records as JSON lines (no stages, no network)
    Parse {
        /// Input file, or `-` for stdin
        #[arg(short, long)]
        input: String,

        /// TOML configuration file
        #[arg(short, long, env = "DOCFLOW_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Resolve a single address through the configured geocoding service
    Geocode {
        /// Address to look up
        #[arg(short, long)]
        address: String,

        /// TOML configuration file
        #[arg(short, long, env = "DOCFLOW_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("docflow-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            input,
            config,
            output,
            concurrency,
            strict,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(concurrency) = concurrency {
                config.runner.concurrency = concurrency;
            }
            if strict {
                config.parser.malformed_lines = MalformedLinePolicy::Fail;
            }
            run(config, &input, &output).await?;
        },
        Command::Parse { input, config } => {
            let config = load_config(config.as_deref())?;
            parse(config, &input).await?;
        },
        Command::Geocode { address, config } => {
            let config = load_config(config.as_deref())?;
            geocode(config, &address).await?;
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    IngestConfig::load(path).context("Failed to load configuration")
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == STDIO {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open input '{input}'"))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn run(config: IngestConfig, input: &str, output: &str) -> Result<()> {
    let geocoder = Arc::new(GeoEnrichmentClient::from_config(&config.geo)?);
    let limiter = Arc::new(RateLimiter::new(config.geo.min_interval()));
    let sink: Arc<dyn RecordSink> = if output == STDIO {
        Arc::new(JsonLinesSink::stdout())
    } else {
        Arc::new(JsonLinesSink::create(output).await?)
    };

    let pipeline = Pipeline::from_config(&config, geocoder, limiter, sink);
    info!(stages = ?pipeline.stage_names(), "Pipeline assembled");

    let runner = IngestionRunner::from_config(&config, pipeline);

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight records");
            token.cancel();
        }
    });

    let reader = open_input(input).await?;
    let summary = runner.run(reader).await?;

    let report = serde_json::to_string_pretty(&summary)?;
    if output == STDIO {
        eprintln!("{report}");
    } else {
        println!("{report}");
    }

    Ok(())
}

async fn parse(config: IngestConfig, input: &str) -> Result<()> {
    let parser = FixedWidthRecordParser::from_config(&config);
    let reader = open_input(input).await?;

    let lines = parser.records(reader);
    futures::pin_mut!(lines);
    let mut parsed = 0_u64;
    let mut skipped = 0_u64;

    while let Some(line) = lines.next().await {
        match line? {
            ParsedLine::Record { record, .. } => {
                println!("{}", serde_json::to_string(&record)?);
                parsed += 1;
            },
            ParsedLine::Skipped { .. } => skipped += 1,
        }
    }

    info!(parsed, skipped, "Parse complete");
    eprintln!("{parsed} records parsed, {skipped} lines skipped");
    Ok(())
}

async fn geocode(config: IngestConfig, address: &str) -> Result<()> {
    let client = GeoEnrichmentClient::from_config(&config.geo)?;

    match client.resolve("cli", address).await? {
        Some(coordinates) => println!("{coordinates}"),
        None => {
            warn!(address = %address, "No coordinates found for address");
            eprintln!("No coordinates found for '{address}'");
        },
    }

    Ok(())
}
