//! Joining embedded chunks back into one asset.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::chunker::{Chunk, ChunkState};
use crate::error::{ProvmarkError, Result};
use crate::media::{MediaLayout, MediaToolkit};

/// Orders, checks and concatenates embedded chunks, then has the toolkit
/// validate the joined stream against the source layout.
#[derive(Clone)]
pub struct Reassembler {
    toolkit: Arc<dyn MediaToolkit>,
}

impl Reassembler {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }

    #[instrument(level = "debug", skip_all, fields(chunks = chunks.len(), toolkit = self.toolkit.name()))]
    pub async fn reassemble(
        &self,
        layout: &MediaLayout,
        format: &str,
        mut chunks: Vec<Chunk>,
    ) -> Result<Vec<u8>> {
        chunks.sort_by_key(|c| c.index);
        let joined = join_chunks(layout, &chunks)?;
        let output = self
            .toolkit
            .mux(layout, format, joined)
            .await
            .map_err(|e| ProvmarkError::ReassemblyFailed(e.to_string()))?;
        debug!(bytes = output.len(), "Reassembled asset");
        Ok(output)
    }
}

/// Concatenate index-ordered chunks after checking the set is complete.
fn join_chunks(layout: &MediaLayout, chunks: &[Chunk]) -> Result<Vec<u8>> {
    if chunks.is_empty() {
        return Err(ProvmarkError::ReassemblyFailed("no chunks to join".into()));
    }
    let mut cursor = 0u64;
    let mut joined = Vec::with_capacity(layout.total_len as usize);
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.index != expected {
            return Err(ProvmarkError::ReassemblyFailed(format!(
                "chunk {expected} is missing (found chunk {})",
                chunk.index
            )));
        }
        if chunk.state != ChunkState::Done {
            return Err(ProvmarkError::ReassemblyFailed(format!(
                "chunk {} is {:?}, not done",
                chunk.index, chunk.state
            )));
        }
        if chunk.byte_range.start != cursor {
            return Err(ProvmarkError::ReassemblyFailed(format!(
                "chunk {} starts at byte {}, expected {cursor}",
                chunk.index, chunk.byte_range.start
            )));
        }
        let expected_len = chunk.byte_range.end - chunk.byte_range.start;
        if chunk.data.len() as u64 != expected_len {
            return Err(ProvmarkError::ReassemblyFailed(format!(
                "chunk {} holds {} bytes, its range spans {expected_len}",
                chunk.index,
                chunk.data.len()
            )));
        }
        joined.extend_from_slice(&chunk.data);
        cursor = chunk.byte_range.end;
    }
    if cursor != layout.total_len {
        return Err(ProvmarkError::ReassemblyFailed(format!(
            "chunks cover {cursor} of {} bytes",
            layout.total_len
        )));
    }
    Ok(joined)
}
