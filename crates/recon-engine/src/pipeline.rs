//! Double-buffering pipeline worker.
//!
//! One background thread per physical device executes accelerator tasks
//! while the producer prepares the next unit. Producers talk to it through
//! a [`PipelineHandle`], which a master shares with its secondaries.
//!
//! ```text
//! Producer(s)                          Worker thread
//!     |                                     |
//!     |--enqueue(Run)--------------------->| rx.recv()
//!     |   [tx: bounded(1)]                 | task.run()
//!     |   blocks on done_rx                 |
//!     |<--status via done_tx---------------|
//!     |--enqueue(Terminate)--------------->| exit loop
//! ```
//!
//! The queue holds at most one item and every producer blocks until its
//! own item completes, so items run strictly in enqueue order and the
//! k-th call returns only after the k-th task has finished.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use recon_arena::MemoryError;
use recon_core::Task;
use tracing::debug;

/// A task shared between the producer (for finalization) and the worker.
pub type SharedTask = Arc<Mutex<dyn Task>>;

// ── Error types ────────────────────────────────────────────────────

/// Errors from pipeline operations.
#[derive(Debug, PartialEq)]
pub enum PipelineError {
    /// An item was enqueued after termination was requested.
    TerminationRequested,
    /// The worker thread exited before completing the item.
    WorkerGone,
    /// Pipelining is not set up for this instance.
    NotEnabled {
        /// What is missing.
        reason: &'static str,
    },
    /// The worker thread could not be spawned.
    ThreadSpawnFailed {
        /// The OS error.
        reason: String,
    },
    /// Clearing transient memory before the run failed.
    Memory(MemoryError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TerminationRequested => write!(f, "pipeline termination already requested"),
            Self::WorkerGone => write!(f, "pipeline worker has exited"),
            Self::NotEnabled { reason } => write!(f, "pipeline not enabled: {reason}"),
            Self::ThreadSpawnFailed { reason } => {
                write!(f, "pipeline worker spawn failed: {reason}")
            }
            Self::Memory(e) => write!(f, "memory: {e}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MemoryError> for PipelineError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

// ── Queue items ────────────────────────────────────────────────────

/// Operation carried by one queue item.
pub enum PipelineOp {
    /// Run the task and report its status.
    Run(SharedTask),
    /// Stop the worker.
    Terminate,
}

impl fmt::Debug for PipelineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(_) => f.write_str("Run"),
            Self::Terminate => f.write_str("Terminate"),
        }
    }
}

struct QueueItem {
    op: PipelineOp,
    done: Sender<i32>,
}

/// Worker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for an item.
    Idle = 0,
    /// Executing a task.
    Running = 1,
    /// Exited after the terminate item.
    Terminated = 2,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Terminated,
        }
    }
}

/// State the worker publishes to producers.
#[derive(Debug)]
struct WorkerStatus {
    state: AtomicU8,
    queued_runs: AtomicUsize,
}

impl WorkerStatus {
    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

struct Shared {
    tx: Sender<QueueItem>,
    /// Set once a terminate item is sent. Held across the send so no
    /// item can be queued behind the sentinel.
    terminate: Mutex<bool>,
    status: Arc<WorkerStatus>,
}

// ── PipelineHandle ─────────────────────────────────────────────────

/// Producer side of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl PipelineHandle {
    /// Queue `op` and block until the worker has completed it.
    ///
    /// Returns the task's status for [`PipelineOp::Run`], `0` for
    /// [`PipelineOp::Terminate`].
    pub fn enqueue(&self, op: PipelineOp) -> Result<i32, PipelineError> {
        let (done, done_rx) = bounded(1);
        {
            let mut terminate = self
                .shared
                .terminate
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *terminate {
                return Err(PipelineError::TerminationRequested);
            }
            let is_terminate = matches!(op, PipelineOp::Terminate);
            let status = &self.shared.status;
            if !is_terminate {
                status.queued_runs.fetch_add(1, Ordering::AcqRel);
            }
            if self.shared.tx.send(QueueItem { op, done }).is_err() {
                if !is_terminate {
                    status.queued_runs.fetch_sub(1, Ordering::AcqRel);
                }
                return Err(PipelineError::WorkerGone);
            }
            *terminate = is_terminate;
        }
        done_rx.recv().map_err(|_| PipelineError::WorkerGone)
    }

    /// Run `task` on the worker and return its status.
    pub fn run(&self, task: SharedTask) -> Result<i32, PipelineError> {
        self.enqueue(PipelineOp::Run(task))
    }

    /// Whether a run item is queued but not yet picked up.
    pub fn pending(&self) -> bool {
        self.shared.status.queued_runs.load(Ordering::Acquire) > 0
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.shared.status.state.load(Ordering::Acquire))
    }

    /// Whether termination has been requested.
    pub fn termination_requested(&self) -> bool {
        *self
            .shared
            .terminate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── PipelineWorker ─────────────────────────────────────────────────

/// Summary returned when the worker is joined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    /// Tasks executed.
    pub executed: u64,
    /// Whether the thread was joined without panicking.
    pub joined: bool,
}

/// Owner of the worker thread.
///
/// Dropping it sends the terminate item (if nobody has) and joins.
pub struct PipelineWorker {
    handle: PipelineHandle,
    thread: Option<JoinHandle<u64>>,
    report: Option<WorkerReport>,
}

impl fmt::Debug for PipelineWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineWorker")
            .field("handle", &self.handle)
            .field("joined", &self.thread.is_none())
            .finish()
    }
}

impl PipelineWorker {
    /// Spawn the worker thread as `name`.
    pub fn spawn(name: &str, log_lifecycle: bool) -> Result<Self, PipelineError> {
        let (tx, rx) = bounded(1);
        let status = Arc::new(WorkerStatus {
            state: AtomicU8::new(WorkerState::Idle as u8),
            queued_runs: AtomicUsize::new(0),
        });
        let worker_status = Arc::clone(&status);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(rx, worker_status, log_lifecycle))
            .map_err(|e| PipelineError::ThreadSpawnFailed {
                reason: format!("{name}: {e}"),
            })?;
        Ok(Self {
            handle: PipelineHandle {
                shared: Arc::new(Shared {
                    tx,
                    terminate: Mutex::new(false),
                    status,
                }),
            },
            thread: Some(thread),
            report: None,
        })
    }

    /// Producer handle for this worker.
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Send the terminate item unless already sent, then join.
    ///
    /// Idempotent: later calls return the first report.
    pub fn terminate(&mut self) -> WorkerReport {
        if let Some(report) = self.report {
            return report;
        }
        match self.handle.enqueue(PipelineOp::Terminate) {
            Ok(_) | Err(PipelineError::TerminationRequested) | Err(PipelineError::WorkerGone) => {}
            Err(e) => debug!(error = %e, "terminate item not delivered"),
        }
        let report = match self.thread.take().map(JoinHandle::join) {
            Some(Ok(executed)) => WorkerReport {
                executed,
                joined: true,
            },
            Some(Err(_)) | None => WorkerReport {
                executed: 0,
                joined: false,
            },
        };
        self.report = Some(report);
        report
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_loop(rx: Receiver<QueueItem>, status: Arc<WorkerStatus>, log_lifecycle: bool) -> u64 {
    if log_lifecycle {
        debug!("pipeline worker started");
    }
    let mut executed = 0u64;
    while let Ok(item) = rx.recv() {
        match item.op {
            PipelineOp::Terminate => {
                status.set(WorkerState::Terminated);
                let _ = item.done.send(0);
                break;
            }
            PipelineOp::Run(task) => {
                status.queued_runs.fetch_sub(1, Ordering::AcqRel);
                status.set(WorkerState::Running);
                let code = task.lock().unwrap_or_else(PoisonError::into_inner).run();
                executed += 1;
                status.set(WorkerState::Idle);
                let _ = item.done.send(code);
            }
        }
    }
    status.set(WorkerState::Terminated);
    if log_lifecycle {
        debug!(executed, "pipeline worker finished");
    }
    executed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Tally {
        runs: Arc<AtomicU32>,
        code: i32,
    }

    impl Task for Tally {
        fn run(&mut self) -> i32 {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.code
        }
    }

    fn tally(code: i32) -> (SharedTask, Arc<AtomicU32>) {
        let runs = Arc::new(AtomicU32::new(0));
        let task: SharedTask = Arc::new(Mutex::new(Tally {
            runs: Arc::clone(&runs),
            code,
        }));
        (task, runs)
    }

    #[test]
    fn run_returns_task_status() {
        let mut worker = PipelineWorker::spawn("test-pipeline", false).unwrap();
        let handle = worker.handle();
        let (task, runs) = tally(7);
        assert_eq!(handle.run(task).unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!handle.pending());
        let report = worker.terminate();
        assert_eq!(report, WorkerReport { executed: 1, joined: true });
        assert_eq!(handle.state(), WorkerState::Terminated);
    }

    #[test]
    fn enqueue_after_terminate_rejected() {
        let mut worker = PipelineWorker::spawn("test-pipeline", false).unwrap();
        let handle = worker.handle();
        assert_eq!(handle.enqueue(PipelineOp::Terminate).unwrap(), 0);
        assert!(handle.termination_requested());
        let (task, runs) = tally(0);
        assert_eq!(handle.run(task), Err(PipelineError::TerminationRequested));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(worker.terminate().executed, 0);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut worker = PipelineWorker::spawn("test-pipeline", true).unwrap();
        let first = worker.terminate();
        assert_eq!(worker.terminate(), first);
        assert!(first.joined);
    }

    #[test]
    fn drop_joins_worker() {
        let worker = PipelineWorker::spawn("test-pipeline", false).unwrap();
        let handle = worker.handle();
        drop(worker);
        assert_eq!(handle.state(), WorkerState::Terminated);
        assert_eq!(handle.enqueue(PipelineOp::Terminate), Err(PipelineError::TerminationRequested));
    }

    #[test]
    fn op_debug_names() {
        let (task, _) = tally(0);
        assert_eq!(format!("{:?}", PipelineOp::Run(task)), "Run");
        assert_eq!(format!("{:?}", PipelineOp::Terminate), "Terminate");
    }
}
