//! [`LifecycleWorker`] – background execution of non-real-time work.
//!
//! Model fitting, file I/O and clustering run on the blocking pool of a
//! private Tokio runtime.  Every submission returns a [`PendingOp`] that the
//! caller can block on ([`PendingOp::wait`]), `.await`, poll
//! ([`PendingOp::try_result`]) or cancel.  Cancellation is cooperative: jobs
//! check their [`CancelFlag`] between phases and always before splicing
//! into the live collection, so a cancelled operation never leaves a
//! partial change behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{Instrument as _, debug, info, info_span, warn};
use uuid::Uuid;
use vmech_types::MechanismError;

/// Shared cancellation flag of one operation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), MechanismError> {
        if self.is_cancelled() {
            Err(MechanismError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handle to a submitted lifecycle operation.
#[must_use = "dropping a PendingOp discards the operation's result"]
#[derive(Debug)]
pub struct PendingOp<T> {
    id: Uuid,
    kind: &'static str,
    rx: oneshot::Receiver<Result<T, MechanismError>>,
    cancel: CancelFlag,
}

impl<T> PendingOp<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Operation name, e.g. `"insert_from_file"`.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Request cancellation.  Has no effect once the operation has spliced
    /// its change into the collection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block the calling thread until the operation finishes.
    ///
    /// Must not be called from inside an async context; `.await` the
    /// operation there instead.
    pub fn wait(self) -> Result<T, MechanismError> {
        self.rx.blocking_recv().unwrap_or(Err(MechanismError::WorkerStopped))
    }

    /// Non-blocking check: `Some` once the operation has finished.
    pub fn try_result(&mut self) -> Option<Result<T, MechanismError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(MechanismError::WorkerStopped)),
        }
    }
}

impl<T> Future for PendingOp<T> {
    type Output = Result<T, MechanismError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(MechanismError::WorkerStopped)))
    }
}

/// Owns the background runtime that executes lifecycle jobs.
pub struct LifecycleWorker {
    runtime: Mutex<Option<Runtime>>,
    accepting: AtomicBool,
}

impl LifecycleWorker {
    /// Start a worker with `threads` blocking threads.  A single thread
    /// runs jobs in submission order.
    pub fn start(threads: usize) -> Result<Self, MechanismError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads.max(1))
            .thread_name("vmech-lifecycle")
            .enable_all()
            .build()
            .map_err(|e| MechanismError::WorkerStart(e.to_string()))?;
        debug!(threads, "lifecycle worker started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            accepting: AtomicBool::new(true),
        })
    }

    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Queue `job` on the blocking pool.
    ///
    /// # Errors
    ///
    /// [`MechanismError::WorkerStopped`] after [`LifecycleWorker::stop`].
    pub fn submit<T, F>(&self, kind: &'static str, job: F) -> Result<PendingOp<T>, MechanismError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelFlag) -> Result<T, MechanismError> + Send + 'static,
    {
        if !self.is_running() {
            return Err(MechanismError::WorkerStopped);
        }
        let guard = self.runtime.lock();
        let Some(runtime) = guard.as_ref() else {
            return Err(MechanismError::WorkerStopped);
        };

        let id = Uuid::new_v4();
        let cancel = CancelFlag::new();
        let (tx, rx) = oneshot::channel();
        let flag = cancel.clone();
        let span = info_span!("lifecycle", op = kind, %id);

        runtime.spawn_blocking(move || {
            let _entered = span.enter();
            let result = flag.check().and_then(|()| job(&flag));
            match &result {
                Ok(_) => info!("lifecycle operation completed"),
                Err(MechanismError::Cancelled) => info!("lifecycle operation cancelled"),
                Err(e) => warn!(error = %e, "lifecycle operation failed"),
            }
            // The caller may have dropped its PendingOp.
            let _ = tx.send(result);
        });

        Ok(PendingOp { id, kind, rx, cancel })
    }

    /// Refuse new submissions and wait up to `timeout` for queued and
    /// running jobs.  Jobs still queued at shutdown resolve to
    /// [`MechanismError::WorkerStopped`].
    ///
    /// Must not be called from inside an async context.
    pub fn stop(&self, timeout: Duration) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(timeout);
        }
        info!("lifecycle worker stopped");
    }

    /// Run an async `future` on the worker runtime and block on its result.
    ///
    /// Used by callers that want to await several [`PendingOp`]s together.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, MechanismError> {
        let guard = self.runtime.lock();
        let runtime = guard.as_ref().ok_or(MechanismError::WorkerStopped)?;
        let handle = runtime.handle().clone();
        drop(guard);
        Ok(handle.block_on(future.instrument(info_span!("lifecycle_block_on"))))
    }
}

impl Drop for LifecycleWorker {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn submitted_job_result_is_delivered() {
        let worker = LifecycleWorker::start(1).expect("worker");
        let op = worker.submit("answer", |_| Ok(42)).expect("submit");
        assert_eq!(op.kind(), "answer");
        assert_eq!(op.wait(), Ok(42));
    }

    #[test]
    fn job_errors_are_reported() {
        let worker = LifecycleWorker::start(1).expect("worker");
        let op = worker
            .submit::<(), _>("fail", |_| Err(MechanismError::UnknownMechanism("x".into())))
            .expect("submit");
        assert_eq!(op.wait(), Err(MechanismError::UnknownMechanism("x".into())));
    }

    #[test]
    fn cancellation_is_observed_by_running_job() {
        let worker = LifecycleWorker::start(1).expect("worker");
        let (started_tx, started_rx) = mpsc::channel();
        let op = worker
            .submit("spin", move |cancel| {
                started_tx.send(()).ok();
                loop {
                    cancel.check()?;
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("submit");
        started_rx.recv().expect("job started");
        op.cancel();
        let result: Result<(), _> = op.wait();
        assert_eq!(result, Err(MechanismError::Cancelled));
    }

    #[test]
    fn single_thread_runs_jobs_in_order() {
        let worker = LifecycleWorker::start(1).expect("worker");
        let log = Arc::new(Mutex::new(Vec::new()));
        let ops: Vec<_> = (0..5)
            .map(|i| {
                let log = Arc::clone(&log);
                worker
                    .submit("push", move |_| {
                        log.lock().push(i);
                        Ok(())
                    })
                    .expect("submit")
            })
            .collect();
        for op in ops {
            op.wait().expect("job");
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn pending_ops_can_be_awaited() {
        let worker = LifecycleWorker::start(2).expect("worker");
        let a = worker.submit("a", |_| Ok(1)).expect("submit");
        let b = worker.submit("b", |_| Ok(2)).expect("submit");
        let sum = worker
            .block_on(async move { a.await.unwrap_or(0) + b.await.unwrap_or(0) })
            .expect("runtime");
        assert_eq!(sum, 3);
    }

    #[test]
    fn stopped_worker_refuses_jobs() {
        let worker = LifecycleWorker::start(1).expect("worker");
        worker.stop(Duration::from_secs(1));
        assert!(!worker.is_running());
        assert!(matches!(
            worker.submit("late", |_| Ok(())),
            Err(MechanismError::WorkerStopped)
        ));
    }
}
