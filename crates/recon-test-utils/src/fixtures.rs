//! Reusable task fixtures.
//!
//! - [`CountingTask`] counts runs and returns a fixed status.
//! - [`RecordingTask`] appends its id to a shared log on every run.
//! - [`FailingTask`] fails after a number of successful runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use recon_core::Task;
use recon_engine::SharedTask;

/// Counts runs and returns `status` from each.
pub struct CountingTask {
    runs: Arc<AtomicUsize>,
    finalized: Arc<AtomicUsize>,
    pub status: i32,
    pub finalize_status: i32,
}

impl CountingTask {
    pub fn new(status: i32) -> Self {
        Self {
            runs: Arc::default(),
            finalized: Arc::default(),
            status,
            finalize_status: 0,
        }
    }

    pub fn with_finalize_status(mut self, status: i32) -> Self {
        self.finalize_status = status;
        self
    }

    /// Shared run counter.
    pub fn runs(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }

    /// Shared finalize counter.
    pub fn finalized(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.finalized)
    }

    /// Wrap into a [`SharedTask`].
    pub fn shared(self) -> SharedTask {
        Arc::new(Mutex::new(self))
    }
}

impl Task for CountingTask {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(&mut self) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.status
    }

    fn finalize_pipelined(&mut self) -> i32 {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        self.finalize_status
    }
}

/// Appends `id` to a shared log on every run.
pub struct RecordingTask {
    pub id: usize,
    log: Arc<Mutex<Vec<usize>>>,
}

impl RecordingTask {
    pub fn new(id: usize, log: Arc<Mutex<Vec<usize>>>) -> Self {
        Self { id, log }
    }

    pub fn shared(self) -> SharedTask {
        Arc::new(Mutex::new(self))
    }
}

impl Task for RecordingTask {
    fn name(&self) -> &str {
        "recording"
    }

    fn run(&mut self) -> i32 {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(self.id);
        0
    }
}

/// Succeeds `succeed_count` times, then returns `code`.
pub struct FailingTask {
    succeed_count: usize,
    calls: usize,
    code: i32,
}

impl FailingTask {
    pub fn new(succeed_count: usize, code: i32) -> Self {
        Self {
            succeed_count,
            calls: 0,
            code,
        }
    }

    pub fn shared(self) -> SharedTask {
        Arc::new(Mutex::new(self))
    }
}

impl Task for FailingTask {
    fn name(&self) -> &str {
        "failing"
    }

    fn run(&mut self) -> i32 {
        self.calls += 1;
        if self.calls > self.succeed_count {
            self.code
        } else {
            0
        }
    }
}
