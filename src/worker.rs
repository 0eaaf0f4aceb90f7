//! Background job worker and cooperative cancellation.
//!
//! A worker thread polls the job store at a fixed cadence, leases the next
//! queued job, and dispatches it to a handler registered for the job's type.
//! Handlers receive a [`CancellationToken`] and must observe it at blocking
//! boundaries (PCM reads, recogniser calls) so multi-minute transcriptions
//! terminate promptly on shutdown or job deletion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{ZbError, ZbResult};
use crate::storage::{Database, JobRecord};

const MAX_RETRIES: i64 = 3;

/// Lightweight, `Send + Sync + Clone` cancellation handle.
///
/// A child token is cancelled when either it or its parent is cancelled;
/// the worker hands each job a child of its own shutdown token so a single
/// job can also be cancelled in isolation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Err(`Cancelled`) once the token has been triggered. Call at natural
    /// chunk boundaries inside long operations.
    pub fn checkpoint(&self) -> ZbResult<()> {
        if self.is_cancelled() {
            return Err(ZbError::Cancelled("operation cancelled".to_owned()));
        }
        Ok(())
    }
}

/// A job handler. Returning `Ok` completes the job; an error enters the
/// retry budget unless it is `Cancelled`.
pub type JobHandler = Arc<dyn Fn(&CancellationToken, &JobRecord) -> ZbResult<()> + Send + Sync>;

/// Polls the job store and dispatches queued jobs to registered handlers.
pub struct Worker {
    db: Arc<Database>,
    handlers: Arc<RwLock<HashMap<String, JobHandler>>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
    current_job: Arc<Mutex<Option<(String, CancellationToken)>>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            interval: Duration::from_secs(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            current_job: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn register_handler(&self, job_type: &str, handler: JobHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(job_type.to_owned(), handler);
        }
    }

    /// The worker's shutdown token; cancel it to stop in-flight handlers
    /// (e.g. from a Ctrl+C hook).
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a queued job.
    pub fn submit(
        &self,
        job_type: &str,
        source_id: Option<String>,
        priority: i64,
    ) -> ZbResult<JobRecord> {
        let job = JobRecord::new(job_type, source_id, priority);
        self.db.create_job(&job)?;
        tracing::info!(job_id = %job.id, job_type, priority, "job submitted");
        Ok(job)
    }

    /// Cancel the token of the named job if it is currently running, then
    /// delete its row.
    pub fn cancel_job(&self, id: &str) -> ZbResult<()> {
        if let Ok(current) = self.current_job.lock() {
            if let Some((running_id, token)) = current.as_ref() {
                if running_id == id {
                    token.cancel();
                }
            }
        }
        self.db.delete_job(id)
    }

    /// Start the polling thread.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let db = Arc::clone(&self.db);
        let handlers = Arc::clone(&self.handlers);
        let shutdown = Arc::clone(&self.shutdown);
        let cancel = self.cancel.clone();
        let current_job = Arc::clone(&self.current_job);
        let interval = self.interval;

        self.handle = Some(std::thread::spawn(move || {
            tracing::info!("worker started");
            while !shutdown.load(Ordering::SeqCst) {
                process_next_job(&db, &handlers, &cancel, &current_job);
                sleep_until_tick(&shutdown, interval);
            }
            tracing::info!("worker stopped");
        }));
    }

    /// Signal shutdown, cancel the in-flight handler, and join the thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sleep_until_tick(shutdown: &AtomicBool, interval: Duration) {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20).min(interval));
    }
}

fn process_next_job(
    db: &Database,
    handlers: &RwLock<HashMap<String, JobHandler>>,
    cancel: &CancellationToken,
    current_job: &Mutex<Option<(String, CancellationToken)>>,
) {
    let job = match db.get_next_queued() {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(error) => {
            tracing::error!(%error, "failed to fetch next job");
            return;
        }
    };

    let handler = handlers
        .read()
        .ok()
        .and_then(|map| map.get(&job.kind).cloned());
    let Some(handler) = handler else {
        tracing::warn!(job_id = %job.id, job_type = %job.kind, "no handler for job type");
        let _ = db.fail_job(
            &job.id,
            &format!("no handler registered for job type: {}", job.kind),
        );
        return;
    };

    // Lease. A failed guard means another worker got there first.
    if let Err(error) = db.start_job(&job.id) {
        tracing::debug!(job_id = %job.id, %error, "job lease lost");
        return;
    }

    tracing::info!(job_id = %job.id, job_type = %job.kind, "processing job");

    let token = cancel.child();
    if let Ok(mut current) = current_job.lock() {
        *current = Some((job.id.clone(), token.clone()));
    }

    let outcome = handler(&token, &job);

    if let Ok(mut current) = current_job.lock() {
        *current = None;
    }

    match outcome {
        Ok(()) => {
            if let Err(error) = db.complete_job(&job.id) {
                tracing::error!(job_id = %job.id, %error, "failed to complete job");
            } else {
                tracing::info!(job_id = %job.id, "job completed");
            }
        }
        Err(error) if error.is_cancelled() => {
            tracing::info!(job_id = %job.id, "job cancelled");
            let _ = db.fail_job(&job.id, &error.to_string());
        }
        Err(error) => {
            tracing::warn!(job_id = %job.id, %error, "job failed");
            if job.retry_count < MAX_RETRIES {
                if let Err(retry_error) = db.retry_job(&job.id) {
                    tracing::error!(job_id = %job.id, %retry_error, "failed to retry job");
                } else {
                    tracing::info!(
                        job_id = %job.id,
                        attempt = job.retry_count + 1,
                        max = MAX_RETRIES,
                        "job queued for retry"
                    );
                }
            } else {
                let _ = db.fail_job(&job.id, &error.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JobStatus, JOB_PRIORITY_NORMAL};
    use std::sync::atomic::AtomicUsize;

    fn worker_with_db() -> (Worker, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut worker = Worker::new(Arc::clone(&db));
        worker.set_interval(Duration::from_millis(10));
        (worker, db)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn token_child_sees_parent_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child();
        assert!(child.checkpoint().is_ok());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.checkpoint().unwrap_err().is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_affect_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(parent.checkpoint().is_ok());
    }

    #[test]
    fn successful_handler_completes_job() {
        let (mut worker, db) = worker_with_db();
        worker.register_handler("ok", Arc::new(|_, _| Ok(())));
        let job = worker.submit("ok", None, JOB_PRIORITY_NORMAL).unwrap();
        worker.start();

        wait_for(|| {
            db.get_job(&job.id).unwrap().unwrap().status == JobStatus::Completed
        });
        worker.stop();

        let done = db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(done.progress, 100);
    }

    #[test]
    fn failing_handler_exhausts_retry_budget() {
        let (mut worker, db) = worker_with_db();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        worker.register_handler(
            "boom",
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ZbError::Storage("broken".to_owned()))
            }),
        );
        let job = worker.submit("boom", None, JOB_PRIORITY_NORMAL).unwrap();
        worker.start();

        wait_for(|| db.get_job(&job.id).unwrap().unwrap().status == JobStatus::Failed);
        worker.stop();

        // Initial attempt + 3 retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let failed = db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(failed.retry_count, 3);
        assert!(failed.error.as_deref().unwrap().contains("broken"));
    }

    #[test]
    fn missing_handler_fails_the_job() {
        let (mut worker, db) = worker_with_db();
        let job = worker.submit("unknown", None, JOB_PRIORITY_NORMAL).unwrap();
        worker.start();

        wait_for(|| db.get_job(&job.id).unwrap().unwrap().status == JobStatus::Failed);
        worker.stop();

        let failed = db.get_job(&job.id).unwrap().unwrap();
        assert!(failed
            .error
            .as_deref()
            .unwrap()
            .contains("no handler registered"));
        assert_eq!(failed.retry_count, 0);
    }

    #[test]
    fn cancelled_handler_does_not_retry() {
        let (mut worker, db) = worker_with_db();
        worker.register_handler(
            "cancelled",
            Arc::new(|_, _| Err(ZbError::Cancelled("stop".to_owned()))),
        );
        let job = worker
            .submit("cancelled", None, JOB_PRIORITY_NORMAL)
            .unwrap();
        worker.start();

        wait_for(|| db.get_job(&job.id).unwrap().unwrap().status == JobStatus::Failed);
        worker.stop();

        let failed = db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(failed.retry_count, 0);
    }

    #[test]
    fn stop_cancels_in_flight_handler() {
        let (mut worker, db) = worker_with_db();
        worker.register_handler(
            "slow",
            Arc::new(|token, _| {
                let deadline = Instant::now() + Duration::from_secs(10);
                while Instant::now() < deadline {
                    token.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }),
        );
        let job = worker.submit("slow", None, JOB_PRIORITY_NORMAL).unwrap();
        worker.start();

        wait_for(|| db.get_job(&job.id).unwrap().unwrap().status == JobStatus::Running);
        worker.stop();

        let finished = db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert!(finished.error.as_deref().unwrap().contains("cancelled"));
    }

    #[test]
    fn cancel_job_stops_the_running_handler_and_deletes_the_row() {
        let (mut worker, db) = worker_with_db();
        let entered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&entered);
        worker.register_handler(
            "slow",
            Arc::new(move |token, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while Instant::now() < deadline {
                    token.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }),
        );
        let job = worker.submit("slow", None, JOB_PRIORITY_NORMAL).unwrap();
        worker.start();

        wait_for(|| entered.load(Ordering::SeqCst) == 1);
        worker.cancel_job(&job.id).unwrap();

        wait_for(|| db.get_job(&job.id).unwrap().is_none());
        worker.stop();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_for_different_types_are_dispatched_by_tag() {
        let (mut worker, db) = worker_with_db();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            worker.register_handler(
                tag,
                Arc::new(move |_, job| {
                    seen.lock().unwrap().push(job.kind.clone());
                    Ok(())
                }),
            );
        }
        let job_a = worker.submit("a", None, 1).unwrap();
        let job_b = worker.submit("b", None, 2).unwrap();
        worker.start();

        wait_for(|| {
            db.get_job(&job_a.id).unwrap().unwrap().status == JobStatus::Completed
                && db.get_job(&job_b.id).unwrap().unwrap().status == JobStatus::Completed
        });
        worker.stop();

        assert_eq!(&*seen.lock().unwrap(), &["a".to_owned(), "b".to_owned()]);
    }
}
