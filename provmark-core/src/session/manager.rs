use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::artifacts::{Artifact, ArtifactHandle, ArtifactStore, ExpiryPolicy, Retention};
use super::{Session, SessionId, SessionStatus};
use crate::asset::VideoAsset;
use crate::dispatcher::ChunkProgress;
use crate::error::{ProvmarkError, Result};
use crate::pipeline::Pipeline;

type SessionCell = Arc<watch::Sender<Session>>;

/// How long a finished session stays queryable once it has nothing left to serve.
pub const DEFAULT_SESSION_GRACE: Duration = Duration::from_secs(60 * 60);

/// Sole owner of a session's mutable fields.
///
/// Not `Clone`: whoever holds the writer is the only party that can move
/// the session through its state machine. Each change is published as one
/// snapshot, so readers never see a status without its fields.
#[derive(Debug)]
pub struct SessionWriter {
    id: SessionId,
    cell: SessionCell,
}

impl SessionWriter {
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn apply(&self, change: impl FnOnce(&mut Session) -> Result<()>) -> Result<()> {
        let mut outcome = Ok(());
        self.cell.send_if_modified(|session| match change(session) {
            Ok(()) => true,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    fn start_processing(&self) -> Result<()> {
        self.apply(|session| session.transition(SessionStatus::Processing))?;
        info!(session_id = %self.id, "Session processing");
        Ok(())
    }

    fn complete(self, handle: ArtifactHandle) -> Result<()> {
        let size = handle.size;
        self.apply(move |session| {
            session.transition(SessionStatus::Completed)?;
            session.progress.done = session.progress.total;
            session.result = Some(handle);
            Ok(())
        })?;
        info!(session_id = %self.id, bytes = size, "Session completed");
        Ok(())
    }

    fn fail(self, err: &ProvmarkError) -> Result<()> {
        let message = err.to_string();
        let code = err.code();
        self.apply(move |session| {
            session.transition(SessionStatus::Failed)?;
            session.error = Some(message);
            session.error_code = Some(code);
            Ok(())
        })?;
        warn!(session_id = %self.id, code, error = %err, "Session failed");
        Ok(())
    }

    fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter {
            cell: self.cell.clone(),
        }
    }
}

/// Publishes chunk progress while a session is processing.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    cell: SessionCell,
}

impl ProgressReporter {
    pub fn report(&self, progress: ChunkProgress) {
        self.cell.send_if_modified(|session| {
            if session.status != SessionStatus::Processing || session.progress == progress {
                return false;
            }
            session.progress = progress;
            session.updated_at = Utc::now();
            true
        });
    }
}

struct Inner {
    sessions: DashMap<SessionId, SessionCell>,
    retention: DashMap<SessionId, Retention>,
    pipeline: Arc<Pipeline>,
    store: Arc<dyn ArtifactStore>,
    expiry: Arc<dyn ExpiryPolicy>,
}

/// Creates sessions, runs their pipelines and serves their results.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
    session_grace: Duration,
}

impl SessionManager {
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<dyn ArtifactStore>,
        expiry: Arc<dyn ExpiryPolicy>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                retention: DashMap::new(),
                pipeline,
                store,
                expiry,
            }),
            session_grace: DEFAULT_SESSION_GRACE,
        }
    }

    /// Keep failed sessions, and completed ones whose artifact was evicted,
    /// queryable for `grace` before [`evict_expired`](Self::evict_expired)
    /// forgets them.
    pub fn with_session_grace(mut self, grace: Duration) -> Self {
        self.session_grace = grace;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Register a session in `uploading` while its asset is received.
    pub fn begin_upload(&self) -> SessionWriter {
        let id = SessionId::new();
        let (sender, _) = watch::channel(Session::new(id));
        let cell = Arc::new(sender);
        self.inner.sessions.insert(id, cell.clone());
        info!(session_id = %id, "Session created");
        SessionWriter { id, cell }
    }

    /// Hand a fully received asset to the pipeline.
    pub fn start(&self, writer: SessionWriter, asset: VideoAsset) -> Result<SessionId> {
        writer.start_processing()?;
        let id = writer.id();
        tokio::spawn(drive(self.inner.clone(), writer, asset));
        Ok(id)
    }

    /// Fail a session whose upload could not be completed.
    pub fn abandon(&self, writer: SessionWriter, err: &ProvmarkError) -> Result<()> {
        writer.fail(err)
    }

    pub fn create(&self, asset: VideoAsset) -> Result<SessionId> {
        let writer = self.begin_upload();
        self.start(writer, asset)
    }

    fn cell(&self, id: SessionId) -> Result<SessionCell> {
        self.inner
            .sessions
            .get(&id)
            .map(|cell| cell.value().clone())
            .ok_or(ProvmarkError::NotFound(id))
    }

    /// Current snapshot. Never waits on the pipeline.
    pub fn status(&self, id: SessionId) -> Result<Session> {
        let cell = self.cell(id)?;
        let session = cell.borrow().clone();
        Ok(session)
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self, id: SessionId) -> Result<watch::Receiver<Session>> {
        Ok(self.cell(id)?.subscribe())
    }

    pub async fn wait_for_terminal(&self, id: SessionId) -> Result<Session> {
        let mut receiver = self.subscribe(id)?;
        let session = receiver
            .wait_for(|session| session.status.is_terminal())
            .await
            .map_err(|_| ProvmarkError::NotFound(id))?
            .clone();
        Ok(session)
    }

    /// Fetch a completed session's artifact, counting the retrieval.
    ///
    /// # Arguments
    ///
    /// * `id` - A session created by this manager.
    ///
    /// # Errors
    ///
    /// * [`ProvmarkError::NotFound`] if the session is unknown or was pruned.
    /// * [`ProvmarkError::NotReady`] if the session has not completed.
    /// * [`ProvmarkError::Gone`] if the expiry policy released the artifact.
    /// * [`ProvmarkError::Storage`] if the store could not be read.
    ///
    /// A retrieval counts only once its bytes were read. While it is reading,
    /// the artifact cannot be evicted.
    pub async fn result(&self, id: SessionId) -> Result<Artifact> {
        let session = self.status(id)?;
        if session.status != SessionStatus::Completed {
            return Err(ProvmarkError::NotReady {
                status: session.status,
            });
        }
        let handle = session.result.ok_or_else(|| {
            ProvmarkError::Internal(format!("completed session {id} has no artifact"))
        })?;

        let now = Utc::now();
        let admitted = match self.inner.retention.get_mut(&id) {
            Some(mut retention)
                if !retention.is_evicted() && !self.inner.expiry.is_expired(&retention, now) =>
            {
                // Counted up front so a concurrent caller sees the claim.
                retention.retrievals += 1;
                retention.in_flight += 1;
                true
            }
            _ => false,
        };
        if !admitted {
            self.evict(id).await?;
            return Err(ProvmarkError::Gone(id));
        }

        let fetched = self.inner.store.get(id).await;
        let delivered = matches!(fetched, Ok(Some(_)));
        let expired = self.release(id, delivered);
        match fetched? {
            Some(data) => {
                if expired {
                    if let Err(e) = self.evict(id).await {
                        warn!(session_id = %id, error = %e, "Artifact eviction failed");
                    }
                }
                Ok(Artifact { handle, data })
            }
            None => {
                self.mark_evicted(id, Utc::now());
                Err(ProvmarkError::Gone(id))
            }
        }
    }

    /// Finish an admitted retrieval, returning whether the artifact expired.
    fn release(&self, id: SessionId, delivered: bool) -> bool {
        match self.inner.retention.get_mut(&id) {
            Some(mut retention) => {
                retention.in_flight = retention.in_flight.saturating_sub(1);
                if !delivered {
                    retention.retrievals = retention.retrievals.saturating_sub(1);
                }
                retention.in_flight == 0 && self.inner.expiry.is_expired(&retention, Utc::now())
            }
            None => false,
        }
    }

    /// Evict every artifact the expiry policy has released, then forget
    /// finished sessions past their grace period.
    ///
    /// Returns the number of artifacts evicted.
    pub async fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<SessionId> = self
            .inner
            .retention
            .iter()
            .filter(|r| {
                !r.is_evicted() && r.in_flight == 0 && self.inner.expiry.is_expired(r.value(), now)
            })
            .map(|r| *r.key())
            .collect();

        let mut evicted = 0;
        for id in expired {
            match self.evict(id).await {
                Ok(()) => evicted += 1,
                Err(e) => warn!(session_id = %id, error = %e, "Artifact eviction failed"),
            }
        }
        if evicted > 0 {
            info!(evicted, "Evicted expired artifacts");
        }

        let pruned = self.prune_finished(now);
        if pruned > 0 {
            info!(pruned, remaining = self.len(), "Pruned finished sessions");
        }
        evicted
    }

    /// Drop failed sessions, and completed ones whose artifact is gone,
    /// once the grace period has passed.
    fn prune_finished(&self, now: DateTime<Utc>) -> usize {
        let grace = self.session_grace;
        let finished: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value().borrow();
                match session.status {
                    SessionStatus::Failed => past_grace(session.updated_at, now, grace),
                    SessionStatus::Completed => self
                        .inner
                        .retention
                        .get(entry.key())
                        .and_then(|retention| retention.evicted_at)
                        .is_some_and(|at| past_grace(at, now, grace)),
                    _ => false,
                }
            })
            .map(|entry| *entry.key())
            .collect();

        for id in &finished {
            self.inner.sessions.remove(id);
            self.inner.retention.remove(id);
        }
        finished.len()
    }

    fn mark_evicted(&self, id: SessionId, now: DateTime<Utc>) -> bool {
        match self.inner.retention.get_mut(&id) {
            Some(mut retention) if !retention.is_evicted() && retention.in_flight == 0 => {
                retention.evicted_at = Some(now);
                true
            }
            _ => false,
        }
    }

    async fn evict(&self, id: SessionId) -> Result<()> {
        if self.mark_evicted(id, Utc::now()) {
            self.inner.store.remove(id).await?;
            info!(session_id = %id, "Artifact evicted");
        }
        Ok(())
    }
}

fn past_grace(since: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    (now - since).to_std().unwrap_or(Duration::ZERO) >= grace
}

async fn drive(inner: Arc<Inner>, writer: SessionWriter, asset: VideoAsset) {
    let id = writer.id();
    let reporter = writer.progress_reporter();
    let pipeline = inner.pipeline.clone();
    let run = tokio::spawn(async move {
        pipeline
            .run(id, asset, move |progress| reporter.report(progress))
            .await
    });

    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(join) => Err(ProvmarkError::Internal(format!("pipeline task failed: {join}"))),
    };

    let finished = match outcome {
        Ok(output) => {
            let handle = ArtifactHandle::describe(id, &output.format, &output.title, &output.data);
            match inner.store.put(id, output.data).await {
                Ok(()) => {
                    inner.retention.insert(id, Retention::new(handle.stored_at));
                    writer.complete(handle)
                }
                Err(e) => writer.fail(&e),
            }
        }
        Err(e) => writer.fail(&e),
    };
    if let Err(e) = finished {
        error!(session_id = %id, error = %e, "Session could not reach a terminal state");
    }
}
