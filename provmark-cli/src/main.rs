//! Provmark CLI - Watermark videos and identify watermarked copies.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod exit_codes;

use commands::analyze::AnalyzeOptions;
use commands::watermark::WatermarkOptions;
use commands::BackendArgs;
use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error (no watermark backend selected)
  65  Data error (video could not be parsed or chunked)
  66  Input error (file not found or empty)
  69  Service unavailable (watermark service or decoder)
  70  Internal error (reassembly or signing failed)
  74  I/O error (cannot write output or catalog)
  78  Configuration error (missing signing credentials)";

#[derive(Parser)]
#[command(name = "provmark")]
#[command(author, version, about = "Video watermarking and content provenance", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Watermark a video and sign a provenance manifest into it
    Watermark {
        /// Path to the video to watermark
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output path (defaults to watermarked_<name> next to FILE)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        #[command(flatten)]
        backend: BackendArgs,

        /// Target frames per chunk
        #[arg(long, default_value_t = 8, value_name = "N")]
        chunk_frames: usize,

        /// Chunks embedded concurrently
        #[arg(long, default_value_t = 1, value_name = "N")]
        concurrency: usize,

        /// Embed a distinct payload in every chunk
        #[arg(long)]
        per_chunk: bool,

        /// Producer recorded in the manifest
        #[arg(long, value_name = "NAME")]
        producer: Option<String>,

        /// Show the chunk plan without embedding or writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Identify a video: read its manifest, decode its watermark, look it up
    Analyze {
        /// Path to the video to analyze
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        backend: BackendArgs,

        /// Target frames per decode window
        #[arg(long, default_value_t = 8, value_name = "N")]
        chunk_frames: usize,

        /// Largest payload Hamming distance accepted as a match
        #[arg(long, default_value_t = 10, value_name = "BITS")]
        max_bit_errors: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "provmark=debug,provmark_core=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let quiet = cli.quiet;
    match cli.command {
        Commands::Watermark {
            file,
            output,
            backend,
            chunk_frames,
            concurrency,
            per_chunk,
            producer,
            dry_run,
        } => {
            let opts = WatermarkOptions {
                file,
                output,
                backend,
                chunk_frames,
                concurrency,
                per_chunk,
                producer,
                dry_run,
            };
            commands::watermark::execute(opts, quiet).await
        }
        Commands::Analyze {
            file,
            backend,
            chunk_frames,
            max_bit_errors,
            format,
        } => {
            let opts = AnalyzeOptions {
                file,
                backend,
                chunk_frames,
                max_bit_errors,
                format,
            };
            commands::analyze::execute(opts, quiet).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let exit = match run(cli).await {
        Ok(()) => ExitCode::success(),
        Err(e) => ExitCode::from_anyhow(&e),
    };

    if let Some(message) = &exit.message {
        eprintln!("{} {}", "Error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}
