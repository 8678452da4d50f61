//! The persistence execution context.
//!
//! Store operations touch the filesystem and must never run on the
//! hardware-event or GPS contexts. A single worker task owns the
//! [`LocationStore`]; other components hand jobs to it through a
//! [`PersistHandle`]. Jobs run one at a time on the blocking pool, in the
//! order they were submitted, so a later save can never be overtaken by an
//! earlier one.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::location::TrackerLocation;
use crate::store::{LocationStore, StoreError, StoreResult};

enum PersistJob {
    Save(TrackerLocation),
    Load(oneshot::Sender<Option<TrackerLocation>>),
    Erase(oneshot::Sender<StoreResult<bool>>),
}

/// Hand-off point into the persistence context.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    jobs: mpsc::UnboundedSender<PersistJob>,
}

impl PersistHandle {
    /// Queue a save. Returns immediately; failures are logged by the worker.
    pub fn save(&self, location: TrackerLocation) {
        if self.jobs.send(PersistJob::Save(location)).is_err() {
            warn!("Persistence worker stopped; location not saved");
        }
    }

    /// Load the stored location.
    ///
    /// A stopped worker is treated the same as an empty store.
    pub async fn load(&self) -> Option<TrackerLocation> {
        let (reply, response) = oneshot::channel();
        if self.jobs.send(PersistJob::Load(reply)).is_err() {
            warn!("Persistence worker stopped; nothing to load");
            return None;
        }
        response.await.ok().flatten()
    }

    /// Erase the stored location. Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be removed or the worker is gone.
    pub async fn erase(&self) -> StoreResult<bool> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(PersistJob::Erase(reply))
            .map_err(|_| StoreError::WorkerUnavailable("worker stopped".into()))?;
        response
            .await
            .map_err(|_| StoreError::WorkerUnavailable("worker dropped the request".into()))?
    }
}

/// Start the persistence worker on the current Tokio runtime.
///
/// The worker runs until every [`PersistHandle`] has been dropped.
pub fn spawn(store: LocationStore) -> (PersistHandle, JoinHandle<()>) {
    let (jobs, rx) = mpsc::unbounded_channel();
    let span = tracing::info_span!("persistence", account = %store.account());
    let task = tokio::spawn(run(store, rx).instrument(span));
    (PersistHandle { jobs }, task)
}

async fn run(store: LocationStore, mut jobs: mpsc::UnboundedReceiver<PersistJob>) {
    debug!("Persistence worker started");

    while let Some(job) = jobs.recv().await {
        let store = store.clone();
        match job {
            PersistJob::Save(location) => {
                match tokio::task::spawn_blocking(move || store.save(&location)).await {
                    Ok(Ok(())) => debug!("Tracker location persisted"),
                    Ok(Err(e)) => warn!(error = %e, "Failed to persist tracker location"),
                    Err(e) => warn!(error = %e, "Save task failed"),
                }
            }
            PersistJob::Load(reply) => {
                let loaded = tokio::task::spawn_blocking(move || store.load())
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Load task failed");
                        None
                    });
                let _ = reply.send(loaded);
            }
            PersistJob::Erase(reply) => {
                let result = tokio::task::spawn_blocking(move || store.erase())
                    .await
                    .unwrap_or_else(|e| Err(StoreError::WorkerUnavailable(e.to_string())));
                let _ = reply.send(result);
            }
        }
    }

    info!("Persistence worker stopped");
}
