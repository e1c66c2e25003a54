//! Bounded-concurrency dispatch of chunks to the watermark embedder.
//!
//! All embedding calls, across every session, pass through one
//! [`AcceleratorGate`]. Chunks are admitted in index order; completion
//! order is unconstrained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{future::retry_notify, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::chunker::{Chunk, ChunkState};
use crate::error::{ProvmarkError, Result};
use crate::payload::{PayloadPlan, WatermarkPayload};
use crate::watermark::{verify_embedding, EmbedRequest, WatermarkEmbedder, WatermarkError};

/// Retry and timeout policy for embedding calls.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Timeout of a single embedding call.
    pub call_timeout: Duration,
    /// Retries after the first attempt for timeouts and transient failures.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Counting gate over the shared accelerator.
///
/// Clones share the same permits.
#[derive(Debug, Clone)]
pub struct AcceleratorGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AcceleratorGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by an in-flight call.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Number of embedded chunks out of the session total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug)]
struct ChunkFailure {
    attempts: u32,
    error: WatermarkError,
}

pub struct WatermarkDispatcher {
    embedder: Arc<dyn WatermarkEmbedder>,
    gate: AcceleratorGate,
    config: DispatchConfig,
}

impl WatermarkDispatcher {
    pub fn new(
        embedder: Arc<dyn WatermarkEmbedder>,
        gate: AcceleratorGate,
        config: DispatchConfig,
    ) -> Self {
        Self {
            embedder,
            gate,
            config,
        }
    }

    pub fn gate(&self) -> &AcceleratorGate {
        &self.gate
    }

    /// Embed every chunk, returning them `Done` in completion order.
    ///
    /// The first chunk to exhaust its retries fails the whole call; chunks
    /// not yet admitted are dropped and in-flight calls are aborted.
    ///
    /// # Arguments
    ///
    /// * `chunks` - Pending chunks from [`Chunker::split`](crate::Chunker::split).
    /// * `plan` - Decides which payload each chunk carries.
    /// * `on_progress` - Called once up front and after every finished chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ProvmarkError::EmbeddingFailed`] naming the first chunk whose
    /// retries ran out, or whose embedding task could not be joined.
    #[instrument(level = "debug", skip_all, fields(chunks = chunks.len(), embedder = self.embedder.name()))]
    pub async fn dispatch<F>(
        &self,
        chunks: Vec<Chunk>,
        plan: &PayloadPlan,
        mut on_progress: F,
    ) -> Result<Vec<Chunk>>
    where
        F: FnMut(ChunkProgress) + Send,
    {
        let total = chunks.len();
        let mut progress = ChunkProgress { done: 0, total };
        on_progress(progress);

        let semaphore = self.gate.semaphore.clone();
        let mut pending = chunks.into_iter();
        let mut next = pending.next();
        let mut acquire = Box::pin(semaphore.clone().acquire_owned());

        let mut in_flight: JoinSet<(Chunk, std::result::Result<Vec<u8>, ChunkFailure>)> =
            JoinSet::new();
        let mut task_chunks = HashMap::new();
        let mut embedded = Vec::with_capacity(total);

        while next.is_some() || !in_flight.is_empty() {
            tokio::select! {
                biased;

                Some(joined) = in_flight.join_next() => {
                    let (mut chunk, outcome) = joined.map_err(|e| {
                        let index = task_chunks.get(&e.id()).copied().unwrap_or(usize::MAX);
                        ProvmarkError::EmbeddingFailed {
                            chunk: index,
                            attempts: 1,
                            reason: format!("embedding task aborted: {e}"),
                        }
                    })?;
                    match outcome {
                        Ok(data) => {
                            chunk.data = data;
                            chunk.state = ChunkState::Done;
                            progress.done += 1;
                            on_progress(progress);
                            embedded.push(chunk);
                        }
                        Err(failure) => {
                            chunk.state = ChunkState::Failed;
                            warn!(
                                chunk = chunk.index,
                                attempts = failure.attempts,
                                error = %failure.error,
                                "Chunk embedding failed, abandoning remaining chunks"
                            );
                            return Err(ProvmarkError::EmbeddingFailed {
                                chunk: chunk.index,
                                attempts: failure.attempts,
                                reason: failure.error.to_string(),
                            });
                        }
                    }
                }

                permit = &mut acquire, if next.is_some() => {
                    let permit = permit.map_err(|_| ProvmarkError::EmbeddingFailed {
                        chunk: next.as_ref().map(|c| c.index).unwrap_or(usize::MAX),
                        attempts: 0,
                        reason: "accelerator gate closed".into(),
                    })?;
                    if let Some(mut chunk) = next.take() {
                        chunk.state = ChunkState::InFlight;
                        let index = chunk.index;
                        let payload = plan.payload_for(index);
                        let embedder = self.embedder.clone();
                        let config = self.config.clone();
                        debug!(chunk = index, available = self.gate.available(), "Chunk admitted");
                        let handle = in_flight.spawn(async move {
                            let _permit = permit;
                            let outcome =
                                embed_with_retry(embedder.as_ref(), &config, &chunk, &payload).await;
                            (chunk, outcome)
                        });
                        task_chunks.insert(handle.id(), index);
                    }
                    next = pending.next();
                    acquire = Box::pin(semaphore.clone().acquire_owned());
                }
            }
        }

        Ok(embedded)
    }
}

async fn embed_with_retry(
    embedder: &dyn WatermarkEmbedder,
    config: &DispatchConfig,
    chunk: &Chunk,
    payload: &WatermarkPayload,
) -> std::result::Result<Vec<u8>, ChunkFailure> {
    let attempts = AtomicU32::new(0);
    let backoff = ExponentialBackoff {
        initial_interval: config.initial_backoff,
        max_interval: config.max_backoff,
        max_elapsed_time: None,
        ..Default::default()
    };

    let result = retry_notify(
        backoff,
        || {
            let attempts = &attempts;
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let start = Instant::now();
                let request = EmbedRequest {
                    chunk_index: chunk.index,
                    data: &chunk.data,
                    essence: &chunk.essence,
                    payload,
                };
                let outcome = match tokio::time::timeout(config.call_timeout, embedder.embed(request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(WatermarkError::Timeout),
                };
                let outcome = outcome.and_then(|data| {
                    verify_embedding(&chunk.data, &data, &chunk.essence)?;
                    Ok(data)
                });
                match outcome {
                    Ok(data) => {
                        debug!(
                            chunk = chunk.index,
                            attempt,
                            latency_ms = start.elapsed().as_millis() as u64,
                            "Chunk embedded"
                        );
                        Ok(data)
                    }
                    Err(e) if e.is_transient() && attempt <= config.max_retries => {
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |err: WatermarkError, delay: Duration| {
            warn!(
                chunk = chunk.index,
                error = %err,
                retry_after_ms = delay.as_millis() as u64,
                "Retry scheduled"
            );
        },
    )
    .await;

    result.map_err(|error| ChunkFailure {
        attempts: attempts.load(Ordering::SeqCst),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadMode;
    use crate::session::SessionId;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|index| Chunk {
                index,
                units: index..index + 1,
                byte_range: index as u64 * 64..(index as u64 + 1) * 64,
                time_range: 0..40,
                data: vec![index as u8; 64],
                essence: vec![8..64],
                state: ChunkState::Pending,
            })
            .collect()
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            call_timeout: Duration::from_secs(5),
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        }
    }

    /// Flips the last essence byte, tracks concurrency and payloads.
    #[derive(Default)]
    struct TrackingEmbedder {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        payloads: Mutex<Vec<WatermarkPayload>>,
    }

    #[async_trait]
    impl WatermarkEmbedder for TrackingEmbedder {
        fn name(&self) -> &'static str {
            "tracking"
        }

        async fn embed(
            &self,
            request: EmbedRequest<'_>,
        ) -> std::result::Result<Vec<u8>, WatermarkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(*request.payload);
            tokio::time::sleep(Duration::from_millis(20 + request.chunk_index as u64 % 3)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let mut out = request.data.to_vec();
            let last = out.len() - 1;
            out[last] ^= 1;
            Ok(out)
        }
    }

    /// Fails `chunk` with `error` on every attempt, or only the first `times` attempts.
    struct FaultyEmbedder {
        chunk: usize,
        error: WatermarkError,
        times: usize,
        calls: AtomicUsize,
        hang: bool,
    }

    impl FaultyEmbedder {
        fn new(chunk: usize, error: WatermarkError, times: usize) -> Self {
            Self {
                chunk,
                error,
                times,
                calls: AtomicUsize::new(0),
                hang: false,
            }
        }
    }

    #[async_trait]
    impl WatermarkEmbedder for FaultyEmbedder {
        fn name(&self) -> &'static str {
            "faulty"
        }

        async fn embed(
            &self,
            request: EmbedRequest<'_>,
        ) -> std::result::Result<Vec<u8>, WatermarkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.chunk_index == self.chunk {
                if self.hang {
                    std::future::pending::<()>().await;
                }
                if self.times == usize::MAX || self.calls.load(Ordering::SeqCst) <= self.times {
                    return Err(self.error.clone());
                }
            }
            Ok(request.data.to_vec())
        }
    }

    fn plan() -> PayloadPlan {
        PayloadPlan::new(SessionId::new(), PayloadMode::Session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_embeds_every_chunk() {
        let embedder = Arc::new(TrackingEmbedder::default());
        let dispatcher =
            WatermarkDispatcher::new(embedder.clone(), AcceleratorGate::new(3), fast_config());

        let mut seen = Vec::new();
        let done = dispatcher
            .dispatch(chunks(10), &plan(), |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(done.len(), 10);
        assert!(done.iter().all(|c| c.state == ChunkState::Done));
        assert!(done.iter().all(|c| c.data[63] != c.index as u8));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 10);
        assert_eq!(seen.first(), Some(&ChunkProgress { done: 0, total: 10 }));
        assert_eq!(seen.last(), Some(&ChunkProgress { done: 10, total: 10 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_gate() {
        let embedder = Arc::new(TrackingEmbedder::default());
        let dispatcher =
            WatermarkDispatcher::new(embedder.clone(), AcceleratorGate::new(2), fast_config());
        dispatcher.dispatch(chunks(9), &plan(), |_| {}).await.unwrap();
        assert_eq!(embedder.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.gate().available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_is_shared_across_dispatchers() {
        let embedder = Arc::new(TrackingEmbedder::default());
        let gate = AcceleratorGate::new(3);
        let a = WatermarkDispatcher::new(embedder.clone(), gate.clone(), fast_config());
        let b = WatermarkDispatcher::new(embedder.clone(), gate, fast_config());

        let plan_a = plan();
        let plan_b = plan();
        let (ra, rb) = tokio::join!(
            a.dispatch(chunks(8), &plan_a, |_| {}),
            b.dispatch(chunks(8), &plan_b, |_| {})
        );
        ra.unwrap();
        rb.unwrap();
        assert!(embedder.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_payload_is_identical_across_chunks() {
        let embedder = Arc::new(TrackingEmbedder::default());
        let dispatcher =
            WatermarkDispatcher::new(embedder.clone(), AcceleratorGate::new(4), fast_config());
        let plan = plan();
        dispatcher.dispatch(chunks(6), &plan, |_| {}).await.unwrap();

        let payloads = embedder.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 6);
        assert!(payloads.iter().all(|p| *p == plan.session_payload()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let embedder = Arc::new(FaultyEmbedder::new(
            0,
            WatermarkError::Transient("busy".into()),
            2,
        ));
        let dispatcher =
            WatermarkDispatcher::new(embedder.clone(), AcceleratorGate::new(1), fast_config());
        let done = dispatcher.dispatch(chunks(1), &plan(), |_| {}).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_with_chunk_index() {
        let embedder = Arc::new(FaultyEmbedder::new(
            4,
            WatermarkError::Transient("accelerator busy".into()),
            usize::MAX,
        ));
        let dispatcher =
            WatermarkDispatcher::new(embedder, AcceleratorGate::new(2), fast_config());
        let err = dispatcher
            .dispatch(chunks(10), &plan(), |_| {})
            .await
            .unwrap_err();
        match err {
            ProvmarkError::EmbeddingFailed { chunk, attempts, .. } => {
                assert_eq!(chunk, 4);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let embedder = Arc::new(FaultyEmbedder::new(
            0,
            WatermarkError::Permanent("bad chunk".into()),
            usize::MAX,
        ));
        let dispatcher =
            WatermarkDispatcher::new(embedder.clone(), AcceleratorGate::new(1), fast_config());
        let err = dispatcher
            .dispatch(chunks(5), &plan(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvmarkError::EmbeddingFailed {
                chunk: 0,
                attempts: 1,
                ..
            }
        ));
        // chunk 0 held the only permit, so nothing else was admitted
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let mut faulty = FaultyEmbedder::new(2, WatermarkError::Timeout, usize::MAX);
        faulty.hang = true;
        let embedder = Arc::new(faulty);
        let config = DispatchConfig {
            call_timeout: Duration::from_millis(100),
            max_retries: 2,
            ..fast_config()
        };
        let dispatcher = WatermarkDispatcher::new(embedder, AcceleratorGate::new(4), config);
        let err = dispatcher
            .dispatch(chunks(4), &plan(), |_| {})
            .await
            .unwrap_err();
        match err {
            ProvmarkError::EmbeddingFailed {
                chunk,
                attempts,
                reason,
            } => {
                assert_eq!(chunk, 2);
                assert_eq!(attempts, 3);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_framing_change_is_rejected() {
        struct Clobber;

        #[async_trait]
        impl WatermarkEmbedder for Clobber {
            fn name(&self) -> &'static str {
                "clobber"
            }

            async fn embed(
                &self,
                request: EmbedRequest<'_>,
            ) -> std::result::Result<Vec<u8>, WatermarkError> {
                let mut out = request.data.to_vec();
                out[0] ^= 0xFF;
                Ok(out)
            }
        }

        let dispatcher =
            WatermarkDispatcher::new(Arc::new(Clobber), AcceleratorGate::new(1), fast_config());
        let err = dispatcher
            .dispatch(chunks(2), &plan(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvmarkError::EmbeddingFailed { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_chunk_list() {
        let dispatcher = WatermarkDispatcher::new(
            Arc::new(TrackingEmbedder::default()),
            AcceleratorGate::new(1),
            fast_config(),
        );
        let done = dispatcher.dispatch(Vec::new(), &plan(), |_| {}).await.unwrap();
        assert!(done.is_empty());
    }
}
