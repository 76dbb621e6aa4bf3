//! Pipeline worker tests: FIFO execution, blocking enqueue, termination
//! and the instance-level enqueue protocol.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use recon_core::{DeviceType, FrameTag};
use recon_engine::{
    DeviceSettings, PipelineError, PipelineOp, PipelineWorker, ProcessingConfig, Reconstruction,
    WorkerReport, WorkerState,
};
use recon_test_utils::{accelerator_registry, CountingTask, FailingTask, RecordingTask};

fn pipelined_master() -> Reconstruction {
    let registry = accelerator_registry(DeviceType::Cuda);
    let settings = ProcessingConfig {
        double_pipeline: true,
        ..ProcessingConfig::default()
    };
    let mut master =
        Reconstruction::new(&registry, DeviceSettings::forced(DeviceType::Cuda), settings).unwrap();
    master
        .create_secondary(&registry, DeviceSettings::new(DeviceType::Cuda))
        .unwrap();
    master.init().unwrap();
    master.start_pipeline().unwrap();
    master
}

// ── Worker ─────────────────────────────────────────────────────────

#[test]
fn n_units_run_in_fifo_order() {
    let mut worker = PipelineWorker::spawn("fifo", false).unwrap();
    let handle = worker.handle();
    let log = Arc::new(Mutex::new(Vec::new()));
    for k in 0..16 {
        let task = RecordingTask::new(k, Arc::clone(&log)).shared();
        assert_eq!(handle.run(task).unwrap(), 0);
        // The k-th call returns only after the k-th task has run.
        assert_eq!(log.lock().unwrap().len(), k + 1);
    }
    assert_eq!(handle.enqueue(PipelineOp::Terminate).unwrap(), 0);
    let report = worker.terminate();
    assert_eq!(report.executed, 16);
    assert!(report.joined);
    assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
}

#[test]
fn concurrent_producers_each_wait_for_their_own_item() {
    let mut worker = PipelineWorker::spawn("producers", false).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let handle = worker.handle();
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..8 {
                    let id = p * 100 + i;
                    let task = RecordingTask::new(id, Arc::clone(&log)).shared();
                    handle.run(task).unwrap();
                    assert!(log.lock().unwrap().contains(&id));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    assert_eq!(worker.terminate().executed, 32);

    // Per-producer order is preserved.
    let log = log.lock().unwrap();
    for p in 0..4 {
        let mine: Vec<usize> = log.iter().copied().filter(|id| id / 100 == p).collect();
        assert_eq!(mine, (0..8).map(|i| p * 100 + i).collect::<Vec<_>>());
    }
}

#[test]
fn task_after_terminate_never_runs() {
    let mut worker = PipelineWorker::spawn("terminated", false).unwrap();
    let handle = worker.handle();
    handle.enqueue(PipelineOp::Terminate).unwrap();
    let task = CountingTask::new(0);
    let runs = task.runs();
    assert_eq!(
        handle.run(task.shared()),
        Err(PipelineError::TerminationRequested)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(worker.terminate().executed, 0);
    assert_eq!(handle.state(), WorkerState::Terminated);
}

#[test]
fn failure_status_is_propagated() {
    let mut worker = PipelineWorker::spawn("failing", false).unwrap();
    let handle = worker.handle();
    let task = FailingTask::new(2, -3).shared();
    let codes: Vec<i32> = (0..4).map(|_| handle.run(Arc::clone(&task)).unwrap()).collect();
    assert_eq!(codes, vec![0, 0, -3, -3]);
    worker.terminate();
}

// ── Instance protocol ──────────────────────────────────────────────

#[test]
fn enqueue_finalizes_successful_runs() {
    let mut master = pipelined_master();
    let task = CountingTask::new(0).with_finalize_status(5);
    let (runs, finalized) = (task.runs(), task.finalized());
    master.set_task(task.shared());
    assert_eq!(master.enqueue_pipeline().unwrap(), 5);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert!(!master.pipeline_pending());
    master.exit().unwrap();
}

#[test]
fn failed_run_skips_finalize() {
    let mut master = pipelined_master();
    let task = CountingTask::new(9);
    let finalized = task.finalized();
    master.set_task(task.shared());
    assert_eq!(master.enqueue_pipeline().unwrap(), 9);
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    master.exit().unwrap();
}

#[test]
fn secondary_shares_the_master_worker() {
    let mut master = pipelined_master();
    let log = Arc::new(Mutex::new(Vec::new()));
    master.set_task(RecordingTask::new(0, Arc::clone(&log)).shared());
    let secondary = master.secondary_mut(0).unwrap();
    secondary.set_task(RecordingTask::new(1, Arc::clone(&log)).shared());
    assert_eq!(secondary.enqueue_pipeline().unwrap(), 0);
    assert_eq!(master.enqueue_pipeline().unwrap(), 0);
    assert_eq!(*log.lock().unwrap(), vec![1, 0]);
    master.exit().unwrap();
}

#[test]
fn enqueue_after_terminate_is_rejected_on_every_instance() {
    let mut master = pipelined_master();
    let task = CountingTask::new(0);
    let runs = task.runs();
    let shared = task.shared();
    master.set_task(Arc::clone(&shared));
    master.secondary_mut(0).unwrap().set_task(shared);

    let report = master.terminate_pipeline().unwrap().unwrap();
    assert!(report.joined);
    assert_eq!(report.executed, 0);
    assert_eq!(
        master.secondary_mut(0).unwrap().enqueue_pipeline(),
        Err(PipelineError::TerminationRequested)
    );
    assert_eq!(
        master.secondary_mut(0).unwrap().terminate_pipeline(),
        Err(PipelineError::TerminationRequested)
    );
    assert_eq!(master.enqueue_pipeline(), Err(PipelineError::TerminationRequested));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    master.exit().unwrap();
}

#[test]
fn terminate_joins_worker_after_outstanding_runs() {
    let mut master = pipelined_master();
    let task = CountingTask::new(0);
    master.set_task(task.shared());
    for _ in 0..3 {
        master.enqueue_pipeline().unwrap();
    }
    let report = master.terminate_pipeline().unwrap().unwrap();
    assert_eq!(report, WorkerReport { executed: 3, joined: true });
    assert!(!master.pipeline_pending());
    master.exit().unwrap();
}

#[test]
fn enqueue_with_open_frame_rejected() {
    let mut master = pipelined_master();
    master.set_task(CountingTask::new(0).shared());
    let tag = FrameTag::from_name("unit");
    master.memory_mut().push_frame(tag);
    assert!(matches!(
        master.enqueue_pipeline(),
        Err(PipelineError::Memory(_))
    ));
    master.memory_mut().pop_frame(tag).unwrap();
    assert_eq!(master.enqueue_pipeline().unwrap(), 0);
    master.exit().unwrap();
}

#[test]
fn worker_needs_secondaries() {
    let registry = accelerator_registry(DeviceType::Hip);
    let settings = ProcessingConfig {
        double_pipeline: true,
        ..ProcessingConfig::default()
    };
    let mut master =
        Reconstruction::new(&registry, DeviceSettings::forced(DeviceType::Hip), settings).unwrap();
    master.init().unwrap();
    assert_eq!(
        master.start_pipeline().err(),
        Some(PipelineError::NotEnabled {
            reason: "master has no secondaries"
        })
    );
    master.exit().unwrap();
}
