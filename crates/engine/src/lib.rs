//! Run Engine (C7) and Worker Pool (C8): the orchestration layer that turns
//! a queued Run into a graded, reported one. Everything this crate does is
//! glue — entity persistence lives in `gradekeep-store`, grading strategy in
//! `gradekeep-graders`, LMS policy in `gradekeep-reporters`.

pub mod error;
pub mod users;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use gradekeep_graders::GraderRegistry;
use gradekeep_reporters::ReporterRegistry;
use gradekeep_sandbox::Limits;
use gradekeep_store::{RunRecord, Store};

pub use error::{EngineError, EngineResult};
pub use users::{InMemoryUserDirectory, UserDirectory};

use worker::WorkerPool;

/// Everything the worker pool needs to size itself and bound a single
/// execution, gathered once at construction time.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub sandbox: Limits,
    pub capture_bytes: usize,
    pub worker_count: usize,
    pub queue_depth: usize,
}

/// Owns the queue and worker tasks behind `create_run`/`delete_run`. Cloning
/// an `Engine` is intentionally not supported — wrap it in an `Arc` at the
/// call site the way the rest of the workspace wraps `Store`.
pub struct Engine {
    store: Arc<Store>,
    pool: WorkerPool,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        graders: Arc<GraderRegistry>,
        reporters: Arc<ReporterRegistry>,
        users: Arc<dyn UserDirectory>,
        limits: EngineLimits,
    ) -> Self {
        let pool = WorkerPool::spawn(
            store.clone(),
            graders,
            reporters,
            users,
            limits.sandbox,
            limits.capture_bytes,
            limits.worker_count,
            limits.queue_depth,
        );
        Self { store, pool }
    }

    /// Validates and persists a new Run, then hands it to the worker pool.
    /// Returns [`EngineError::Busy`] — and leaves no trace of the Run in the
    /// repository — when the queue is already full.
    pub fn create_run(&self, test: Uuid, submission: Uuid, owner: Uuid) -> EngineResult<Uuid> {
        let uuid = self.store.create_run(test, submission, owner)?;
        if let Err(e) = self.pool.enqueue(uuid) {
            self.store.delete_run(&uuid)?;
            return Err(e);
        }
        tracing::info!(run = %uuid, %test, %submission, "engine: run queued");
        Ok(uuid)
    }

    pub fn get_run(&self, uuid: &Uuid) -> EngineResult<RunRecord> {
        Ok(self.store.get_run(uuid)?)
    }

    pub fn list_runs(&self) -> EngineResult<Vec<Uuid>> {
        Ok(self.store.list_runs()?)
    }

    /// Deletes a Run. If it is currently queued or running, its worker is
    /// signalled to abandon the grading attempt before the record is
    /// removed — the worker notices the cancellation and skips writing any
    /// terminal state back for a Run it can no longer find.
    pub fn delete_run(&self, uuid: &Uuid) -> EngineResult<()> {
        self.pool.cancel(uuid);
        self.store.delete_run(uuid)?;
        tracing::info!(run = %uuid, "engine: run deleted");
        Ok(())
    }

    pub fn is_complete(&self, uuid: &Uuid) -> EngineResult<bool> {
        Ok(self.store.get_run(uuid)?.status.is_complete())
    }

    /// Stops accepting new work and waits up to `grace` for whatever the
    /// workers are mid-flight on to wind down.
    pub async fn shutdown(self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }
}
