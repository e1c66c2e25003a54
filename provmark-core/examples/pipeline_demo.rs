//! Example running one watermark session and analyzing its result.
//!
//! Run with: cargo run -p provmark-core --example pipeline_demo

use std::sync::Arc;

use provmark_core::{
    AcceleratorGate, Analyzer, ChunkPolicy, Chunker, DispatchConfig, IvfBuilder, IvfToolkit,
    LsbWatermarker, MediaToolkit, MemoryArtifactStore, MemoryCatalog, MockManifestEngine,
    Pipeline, ProvenanceSigner, Reassembler, SessionManager, SessionStatus, TimeToLive,
    VideoAsset, WatermarkDispatcher, IVF_MIME,
};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::new("provmark_core=debug,info"))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== Provmark Pipeline Demo ===\n");

    let toolkit: Arc<dyn MediaToolkit> = Arc::new(IvfToolkit::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let pipeline = Pipeline::new(
        Chunker::new(toolkit.clone(), ChunkPolicy::default()),
        WatermarkDispatcher::new(
            Arc::new(LsbWatermarker::default()),
            AcceleratorGate::new(2),
            DispatchConfig::default(),
        ),
        Reassembler::new(toolkit.clone()),
        ProvenanceSigner::new(Arc::new(MockManifestEngine::new())).with_producer("Demo Studio"),
        catalog.clone(),
    );
    let sessions = SessionManager::new(
        Arc::new(pipeline),
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(TimeToLive::default()),
    );

    let asset = VideoAsset::new(IvfBuilder::synthetic_vp8(80, 8, 256, 1), IVF_MIME)
        .with_file_name("demo.ivf");
    println!("Input: {} bytes, 80 frames\n", asset.len());

    let id = match sessions.create(asset) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Failed to create session: {}", e);
            return;
        }
    };

    let session = match sessions.wait_for_terminal(id).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Session lost: {}", e);
            return;
        }
    };
    if session.status != SessionStatus::Completed {
        println!("\n❌ Session {}: {}", session.status, session.error.unwrap_or_default());
        return;
    }

    let artifact = match sessions.result(id).await {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("Failed to fetch result: {}", e);
            return;
        }
    };
    println!("\n✅ Session {} completed", id);
    println!("   Artifact: {} ({} bytes)", artifact.handle.file_name, artifact.data.len());

    let analyzer = Analyzer::new(
        Chunker::new(toolkit, ChunkPolicy::default()),
        Arc::new(LsbWatermarker::default()),
        Arc::new(MockManifestEngine::new()),
        catalog,
    );
    match analyzer.analyze(&VideoAsset::new(artifact.data, IVF_MIME)).await {
        Ok(report) => {
            println!("\nAnalysis:");
            println!("   Manifest: {}", report.manifest.map(|m| m.title).unwrap_or_else(|| "none".into()));
            match report.matched {
                Some(found) => println!(
                    "   Matched:  session {} ({} bit errors)",
                    found.entry.original.session_id, found.bit_errors
                ),
                None => println!("   Matched:  none"),
            }
        }
        Err(e) => println!("\n❌ Analysis failed: {}", e),
    }
}
