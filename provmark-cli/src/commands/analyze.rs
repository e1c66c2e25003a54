//! Analyze command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use provmark_core::{AnalysisReport, Analyzer, AnalyzerConfig, ChunkPolicy, Chunker};
use tracing::info;

use super::{format_time, read_asset, toolkit_for, BackendArgs};
use crate::OutputFormat;

pub struct AnalyzeOptions {
    pub file: PathBuf,
    pub backend: BackendArgs,
    pub chunk_frames: usize,
    pub max_bit_errors: u32,
    pub format: OutputFormat,
}

/// Execute the analyze command.
pub async fn execute(opts: AnalyzeOptions, quiet: bool) -> Result<()> {
    let asset = read_asset(&opts.file)?;
    let watermarker = opts.backend.watermarker()?;
    let manifests = opts.backend.manifest_engine(true)?;
    let catalog = opts.backend.catalog().await?;

    let analyzer = Analyzer::new(
        Chunker::new(toolkit_for(&asset), ChunkPolicy::Frames(opts.chunk_frames.max(1))),
        watermarker.detector,
        manifests,
        catalog,
    )
    .with_config(AnalyzerConfig {
        max_bit_errors: opts.max_bit_errors,
        ..AnalyzerConfig::default()
    });

    let report = analyzer
        .analyze(&asset)
        .await
        .context("Failed to analyze video")?;
    info!(
        matched = report.is_match(),
        windows = report.windows,
        votes = report.votes,
        "Analysis complete"
    );

    match opts.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialize analysis report")?;
            println!("{json}");
        }
        OutputFormat::Text if !quiet => print_report(&report),
        OutputFormat::Text => {}
    }

    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!();
    match &report.matched {
        Some(found) => {
            println!("{}", "╔════════════════════════════════════════╗".green());
            println!(
                "{}",
                "║              MATCH FOUND               ║".green().bold()
            );
            println!("{}", "╚════════════════════════════════════════╝".green());
            println!();
            let original = &found.entry.original;
            println!("   {} {}", "Original:".dimmed(), original.title);
            println!("   {} {}", "Session:".dimmed(), original.session_id);
            println!("   {} {}", "Format:".dimmed(), original.format);
            println!("   {} {}", "Content hash:".dimmed(), &original.content_hash[..16]);
            println!(
                "   {} {}",
                "Registered:".dimmed(),
                format_time(&found.entry.registered_at)
            );
            let bit_errors = if found.bit_errors == 0 {
                "0 (exact)".green()
            } else {
                found.bit_errors.to_string().yellow()
            };
            println!("   {} {}", "Bit errors:".dimmed(), bit_errors);
        }
        None => {
            println!("{}", "╔════════════════════════════════════════╗".yellow());
            println!(
                "{}",
                "║               NO MATCH                 ║".yellow().bold()
            );
            println!("{}", "╚════════════════════════════════════════╝".yellow());
            println!();
        }
    }

    match &report.detection {
        Some(detection) => println!(
            "   {} {} ({:.0}% confidence, {}/{} windows)",
            "Watermark:".dimmed(),
            detection.payload.to_hex(),
            detection.confidence * 100.0,
            report.votes,
            report.windows
        ),
        None => println!(
            "   {} {} ({} windows decoded)",
            "Watermark:".dimmed(),
            "Not detected".yellow(),
            report.windows
        ),
    }

    match &report.manifest {
        Some(manifest) => {
            println!("   {} {}", "Manifest:".dimmed(), manifest.title);
            if let Some(generator) = &manifest.generator {
                println!("   {} {}", "Generator:".dimmed(), generator);
            }
            if let Some(producer) = &manifest.producer {
                println!("   {} {}", "Producer:".dimmed(), producer);
            }
            if let Some(issuer) = &manifest.signature_issuer {
                println!("   {} {}", "Signed by:".dimmed(), issuer);
            }
        }
        None => println!("   {} {}", "Manifest:".dimmed(), "None".yellow()),
    }
    println!();
}
