//! Worker Pool (§4.8): a bounded FIFO queue of Run UUIDs drained by a fixed
//! number of worker tasks, each running the full grading + reporting
//! sequence (§4.7) for one Run at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gradekeep_graders::{GradeContext, GraderError, GraderRegistry};
use gradekeep_reporters::{ReportContext, ReporterRegistry};
use gradekeep_sandbox::Limits;
use gradekeep_store::{RepoError, RunStatus, Store};

use crate::error::{EngineError, EngineResult};
use crate::users::UserDirectory;

type Tokens = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;
type QueueItem = (Uuid, OwnedSemaphorePermit);

pub struct WorkerPool {
    sender: mpsc::UnboundedSender<QueueItem>,
    /// Bounds queue depth directly (§4.8), independent of the channel's own
    /// capacity — a queue depth of zero must reject every enqueue rather than
    /// panic, which `mpsc::channel(0)` would do.
    permits: Arc<Semaphore>,
    tokens: Tokens,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        store: Arc<Store>,
        graders: Arc<GraderRegistry>,
        reporters: Arc<ReporterRegistry>,
        users: Arc<dyn UserDirectory>,
        limits: Limits,
        capture_bytes: usize,
        worker_count: usize,
        queue_depth: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(queue_depth));
        let tokens: Tokens = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..worker_count.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    store.clone(),
                    graders.clone(),
                    reporters.clone(),
                    users.clone(),
                    tokens.clone(),
                    receiver.clone(),
                    limits,
                    capture_bytes,
                    shutdown.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            permits,
            tokens,
            shutdown,
            handles,
        }
    }

    /// Registers a cancellation token for `uuid` and enqueues it. Returns
    /// [`EngineError::Busy`] without registering anything when the queue is
    /// already at capacity (including a configured depth of zero).
    pub fn enqueue(&self, uuid: Uuid) -> EngineResult<()> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(EngineError::Busy),
        };
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(uuid, token);
        if self.sender.send((uuid, permit)).is_err() {
            self.tokens.lock().unwrap().remove(&uuid);
            return Err(EngineError::Busy);
        }
        Ok(())
    }

    /// Cancels an in-flight or queued run's token, if one is registered.
    /// A no-op for a run that already finished and had its token reaped.
    pub fn cancel(&self, uuid: &Uuid) {
        if let Some(token) = self.tokens.lock().unwrap().get(uuid) {
            token.cancel();
        }
    }

    /// Signals every worker to stop pulling new work and waits for whatever
    /// it is currently running to either finish or be cancelled, up to
    /// `grace`. Anything still running past that is aborted outright.
    pub async fn shutdown(self, grace: std::time::Duration) {
        self.shutdown.cancel();
        for token in self.tokens.lock().unwrap().values() {
            token.cancel();
        }
        join_within_grace(self.handles, grace).await;
    }
}

async fn join_within_grace(handles: Vec<JoinHandle<()>>, grace: std::time::Duration) {
    for handle in handles {
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("worker pool: shutdown grace period elapsed with a worker still running");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    id: usize,
    store: Arc<Store>,
    graders: Arc<GraderRegistry>,
    reporters: Arc<ReporterRegistry>,
    users: Arc<dyn UserDirectory>,
    tokens: Tokens,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
    limits: Limits,
    capture_bytes: usize,
    shutdown: CancellationToken,
) {
    loop {
        let uuid = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = receiver.recv() => match maybe {
                    // The permit drops here, freeing one unit of queue depth
                    // as soon as the item leaves the queue rather than only
                    // once the run finishes grading.
                    Some((uuid, _permit)) => uuid,
                    None => break,
                },
            }
        };

        if let Err(e) = run_one(
            &store,
            &graders,
            &reporters,
            users.as_ref(),
            &tokens,
            uuid,
            limits,
            capture_bytes,
        )
        .await
        {
            tracing::error!(worker = id, run = %uuid, error = %e, "worker: run execution failed");
        }

        tokens.lock().unwrap().remove(&uuid);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    store: &Store,
    graders: &GraderRegistry,
    reporters: &ReporterRegistry,
    users: &dyn UserDirectory,
    tokens: &Tokens,
    uuid: Uuid,
    limits: Limits,
    capture_bytes: usize,
) -> EngineResult<()> {
    let run = match store.get_run(&uuid) {
        Ok(run) => run,
        Err(RepoError::ObjectDNE { .. }) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if run.status != RunStatus::Queued {
        return Ok(());
    }

    let token = tokens
        .lock()
        .unwrap()
        .get(&uuid)
        .cloned()
        .unwrap_or_default();
    if token.is_cancelled() {
        return Ok(());
    }

    store.set_run_running(&uuid)?;

    let test = store.get_test(&run.test)?;
    let submission = store.get_submission(&run.submission)?;
    let test_files = store
        .test_files(&run.test)?
        .iter()
        .map(|uuid| store.get_file(uuid))
        .collect::<Result<Vec<_>, _>>()?;
    let submission_files = store
        .submission_files(&run.submission)?
        .iter()
        .map(|uuid| store.get_file(uuid))
        .collect::<Result<Vec<_>, _>>()?;

    let grader = graders.get(test.tester.as_str())?;
    let ctx = GradeContext {
        test: test.clone(),
        test_files,
        submission,
        submission_files,
        limits,
        capture_bytes,
        cancel: token,
    };

    let outcome = match grader.grade(&ctx).await {
        Ok(outcome) => outcome,
        Err(GraderError::Cancelled) => return Ok(()),
        Err(e) => {
            tracing::warn!(run = %uuid, error = %e, "worker: grader returned an error, recording as a run exception");
            gradekeep_graders::GradeOutcome {
                status: RunStatus::CompleteExceptionRun,
                retcode: -1,
                score: 0.0,
                output: e.to_string(),
            }
        }
    };

    let score = outcome.score.clamp(0.0, test.maxscore);

    match store.finish_run(&uuid, outcome.status, outcome.retcode, score, &outcome.output) {
        Ok(()) => {}
        Err(RepoError::ObjectDNE { .. }) => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    dispatch_reporters(store, reporters, users, &run.test, &uuid, run.owner, score, &outcome.output).await;

    Ok(())
}

/// Reporter failures are recorded as output lines, never propagated — a
/// rejected or unreachable LMS must not retroactively undo a graded Run.
async fn dispatch_reporters(
    store: &Store,
    reporters: &ReporterRegistry,
    users: &dyn UserDirectory,
    test_uuid: &Uuid,
    run_uuid: &Uuid,
    owner: Uuid,
    score: f64,
    comment: &str,
) {
    let reporter_ids = match store.test_reporters(test_uuid) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(run = %run_uuid, error = %e, "worker: failed to list test reporters");
            return;
        }
    };
    if reporter_ids.is_empty() {
        return;
    }

    let user = match users.get(&owner) {
        Some(user) => user,
        None => {
            let _ = store.append_run_output(run_uuid, &format!("reporters skipped: owner {owner} has no user record"));
            return;
        }
    };

    for reporter_uuid in reporter_ids {
        let line = report_one(store, reporters, &user, &reporter_uuid, score, comment).await;
        let _ = store.append_run_output(run_uuid, &line);
    }
}

async fn report_one(
    store: &Store,
    reporters: &ReporterRegistry,
    user: &gradekeep_store::User,
    reporter_uuid: &Uuid,
    score: f64,
    comment: &str,
) -> String {
    let reporter_record = match store.get_reporter(reporter_uuid) {
        Ok(record) => record,
        Err(e) => return format!("reporter {reporter_uuid}: err {e}"),
    };
    let reporter = match reporters.get(reporter_record.kind.as_str()) {
        Ok(reporter) => reporter,
        Err(e) => return format!("reporter {reporter_uuid}: err {e}"),
    };

    let ctx = ReportContext {
        reporter: &reporter_record,
        user,
        score,
        comment,
    };

    match reporter.report(&ctx).await {
        Ok(()) => format!("reporter {reporter_uuid}: ok"),
        Err(e) => format!("reporter {reporter_uuid}: err {e}"),
    }
}
