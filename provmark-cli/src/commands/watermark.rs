//! Watermark command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use provmark_core::{
    AcceleratorGate, ArtifactHandle, ChunkPolicy, Chunker, DispatchConfig, MemoryArtifactStore,
    PayloadMode, PayloadPlan, Pipeline, ProvenanceSigner, Reassembler, Session, SessionId,
    SessionManager, SessionStatus, TimeToLive, VideoAsset, WatermarkDispatcher,
};
use tracing::{debug, info, warn};

use super::{read_asset, toolkit_for, BackendArgs, SessionFailure};

pub struct WatermarkOptions {
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub backend: BackendArgs,
    pub chunk_frames: usize,
    pub concurrency: usize,
    pub per_chunk: bool,
    pub producer: Option<String>,
    pub dry_run: bool,
}

impl WatermarkOptions {
    fn payload_mode(&self) -> PayloadMode {
        if self.per_chunk {
            PayloadMode::PerChunk
        } else {
            PayloadMode::Session
        }
    }
}

/// Output path next to the input, named like a server download.
fn default_output_path(file: &Path, asset: &VideoAsset) -> PathBuf {
    let name = ArtifactHandle::file_name_for(&asset.format, &asset.title());
    file.parent()
        .map(|dir| dir.join(&name))
        .unwrap_or_else(|| PathBuf::from(&name))
}

/// Execute the watermark command.
pub async fn execute(opts: WatermarkOptions, quiet: bool) -> Result<()> {
    let asset = read_asset(&opts.file)?;
    let toolkit = toolkit_for(&asset);
    let chunker = Chunker::new(toolkit.clone(), ChunkPolicy::Frames(opts.chunk_frames.max(1)));
    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&opts.file, &asset));

    if opts.dry_run {
        let set = chunker
            .split(&asset)
            .await
            .context("Failed to plan chunks")?;
        println!("{}", "[DRY RUN] Would watermark video:".yellow().bold());
        println!("   {} {}", "Input file:".dimmed(), opts.file.display());
        println!("   {} {}", "Format:".dimmed(), asset.format);
        println!(
            "   {} {} ({} frames each)",
            "Chunks:".dimmed(),
            set.chunks.len(),
            opts.chunk_frames.max(1)
        );
        println!("   {} {}", "Payload mode:".dimmed(), opts.payload_mode().as_str());
        println!("   {} {}", "Output file:".dimmed(), output.display());
        println!();
        println!("{}", "No files were written.".dimmed());
        return Ok(());
    }

    let watermarker = opts.backend.watermarker()?;
    if opts.backend.mock && !quiet {
        eprintln!(
            "{}",
            "Using MOCK watermarker and manifests (not for production!)".yellow()
        );
    }
    let engine = opts.backend.manifest_engine(false)?;
    let catalog = opts.backend.catalog().await?;

    let mut signer = ProvenanceSigner::new(engine);
    if let Some(producer) = &opts.producer {
        signer = signer.with_producer(producer.clone());
    }
    let pipeline = Pipeline::new(
        chunker,
        WatermarkDispatcher::new(
            watermarker.embedder,
            AcceleratorGate::new(opts.concurrency.max(1)),
            DispatchConfig::default(),
        ),
        Reassembler::new(toolkit),
        signer,
        catalog,
    )
    .with_payload_mode(opts.payload_mode());
    let sessions = SessionManager::new(
        Arc::new(pipeline),
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(TimeToLive::default()),
    );

    let id = sessions.create(asset)?;
    info!(session = %id, "Session started");
    let session = follow(&sessions, id, quiet).await?;

    if session.status == SessionStatus::Failed {
        warn!(session = %id, error = ?session.error, "Session failed");
        return Err(SessionFailure {
            code: session.error_code.unwrap_or("INTERNAL_ERROR"),
            message: session
                .error
                .unwrap_or_else(|| "Session failed".to_string()),
        }
        .into());
    }

    let artifact = sessions.result(id).await?;
    std::fs::write(&output, &artifact.data)
        .with_context(|| format!("Failed to write output: {}", output.display()))?;
    info!(path = %output.display(), bytes = artifact.data.len(), "Watermarked video saved");

    if !quiet {
        let mode = opts.payload_mode();
        let payload = match mode {
            PayloadMode::Session => PayloadPlan::new(id, mode).session_payload().to_hex(),
            PayloadMode::PerChunk => "distinct per chunk".to_string(),
        };

        println!();
        println!("{}", "Video watermarked and signed!".green().bold());
        println!();
        println!("   {} {}", "Saved:".dimmed(), output.display());
        println!("   {} {}", "Session:".dimmed(), id);
        println!("   {} {} ({})", "Payload:".dimmed(), payload, mode.as_str());
        println!("   {} {}", "Chunks:".dimmed(), session.progress.total);
        println!(
            "   {} {}",
            "Manifest:".dimmed(),
            sessions.pipeline().signer().engine().name()
        );
        println!("   {} {}", "Content hash:".dimmed(), &artifact.handle.content_hash[..16]);
        println!("   {} {} bytes", "Size:".dimmed(), artifact.handle.size);
    }

    Ok(())
}

/// Wait for the session to finish, drawing chunk progress on stderr.
async fn follow(sessions: &SessionManager, id: SessionId, quiet: bool) -> Result<Session> {
    let mut updates = sessions.subscribe(id)?;
    let mut drew_progress = false;

    let session = loop {
        let snapshot = updates.borrow_and_update().clone();
        if !quiet && snapshot.progress.total > 0 {
            eprint!(
                "\r   {} {}/{}",
                "Embedding chunks:".dimmed(),
                snapshot.progress.done,
                snapshot.progress.total
            );
            drew_progress = true;
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        if updates.changed().await.is_err() {
            debug!(session = %id, "Status channel closed");
            break sessions.wait_for_terminal(id).await?;
        }
    };

    if drew_progress {
        eprintln!();
    }
    Ok(session)
}
