//! getool binary
//!
//! Offline tooling for the graphite exporter. `create-blocks` replays a
//! Whisper database through the mapping rules and writes time-partitioned
//! blocks to an output directory.

use graphite_exporter::backfill::{
    create_blocks, format_block_table, validate_block_duration, BackfillOptions, WhisperReader,
};
use graphite_exporter::clock::{Clock, SystemClock};
use graphite_exporter::config::ComponentFactory;
use graphite_exporter::mapper::CacheType;
use graphite_exporter::telemetry::{init_logging, LogFormat};
use graphite_exporter::Result;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Tooling for the Graphite exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error
    #[arg(long = "log.level", env = "GETOOL_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create Prometheus-style blocks from a Whisper database
    CreateBlocks {
        /// Root directory of the Whisper database
        whisper_path: PathBuf,

        /// Output directory for the blocks
        #[arg(default_value = "data/")]
        output_dir: PathBuf,

        /// Block duration; a power-of-two multiple of 2h
        #[arg(long = "block-duration", default_value = "2h", value_parser = humantime::parse_duration)]
        block_duration: Duration,

        /// Metric mapping configuration file name
        #[arg(long = "graphite.mapping-config")]
        mapping_config: Option<PathBuf>,

        /// Only backfill metrics that match the mapping configuration
        #[arg(long = "graphite.mapping-strict-match")]
        strict_match: bool,

        /// Print sizes and times in a human readable format
        #[arg(short = 'r', long = "human-readable")]
        human_readable: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging("getool", &args.log_level, LogFormat::Logfmt) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let result = match args.command {
        Command::CreateBlocks {
            whisper_path,
            output_dir,
            block_duration,
            mapping_config,
            strict_match,
            human_readable,
        } => {
            run_create_blocks(
                whisper_path,
                output_dir,
                block_duration,
                mapping_config,
                strict_match,
                human_readable,
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "getool failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_create_blocks(
    whisper_path: PathBuf,
    output_dir: PathBuf,
    block_duration: Duration,
    mapping_config: Option<PathBuf>,
    strict_match: bool,
    human_readable: bool,
) -> Result<()> {
    let block_duration_ms = validate_block_duration(block_duration)?;
    let store = ComponentFactory::create_block_store(&output_dir)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reader = WhisperReader::new(whisper_path, clock);
    // every metric is looked up exactly once
    let mapper = ComponentFactory::create_mapper(mapping_config.as_deref(), 1, CacheType::Lru)?;

    let options = BackfillOptions {
        block_duration_ms,
        strict_match,
        ..Default::default()
    };
    let blocks = create_blocks(&reader, mapper.as_ref(), store, &options).await?;
    info!(blocks = blocks.len(), output = %output_dir.display(), "Backfill complete");

    print!("{}", format_block_table(&blocks, human_readable));
    Ok(())
}
