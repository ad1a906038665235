//! Job pools: run a batch of independent jobs and wait for all of them.
//!
//! [`WorkerPool`] keeps a fixed set of named threads parked on a
//! [`CyclicalLatch`]. Each [`execute`](JobPool::execute) publishes the batch,
//! starts one latch cycle, and waits for it to finish. Workers claim jobs
//! through a shared atomic cursor, so each job runs exactly once no matter
//! how many workers there are.
//!
//! [`InlinePool`] runs the same contract on the calling thread.
//!
//! Errors and panics inside a job never kill a worker. They are captured as
//! [`JobFault`]s and stay stored until [`take_faults`](JobPool::take_faults)
//! collects them; a pool with uncollected faults refuses to execute.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use skein_ecs::EcsError;
use tracing::{debug, warn};

use crate::latch::CyclicalLatch;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

pub type JobFn = dyn Fn(f32) -> Result<(), EcsError> + Send + Sync;

/// A labelled unit of work. Cloning shares the closure.
#[derive(Clone)]
pub struct Job {
    label: Arc<str>,
    run: Arc<JobFn>,
}

impl Job {
    pub fn new(
        label: impl Into<Arc<str>>,
        run: impl Fn(f32) -> Result<(), EcsError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the job, turning an error or a panic into a fault.
    pub fn run_captured(&self, delta: f32) -> Option<JobFault> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.run)(delta))) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(JobFault {
                job: self.label.to_string(),
                kind: FaultKind::Failed(err),
            }),
            Err(payload) => Some(JobFault {
                job: self.label.to_string(),
                kind: FaultKind::Panicked(panic_message(payload.as_ref())),
            }),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Job").field(&self.label).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum FaultKind {
    Failed(EcsError),
    Panicked(String),
}

/// A job that failed or panicked.
#[derive(Debug)]
pub struct JobFault {
    pub job: String,
    pub kind: FaultKind,
}

impl fmt::Display for JobFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FaultKind::Failed(err) => write!(f, "job '{}' failed: {}", self.job, err),
            FaultKind::Panicked(message) => write!(f, "job '{}' panicked: {}", self.job, message),
        }
    }
}

fn frame_result(faults: &[JobFault]) -> Result<(), EngineError> {
    match faults.first() {
        None => Ok(()),
        Some(first) => Err(EngineError::JobsFailed {
            count: faults.len(),
            first: first.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// JobPool
// ---------------------------------------------------------------------------

pub trait JobPool: Send {
    fn start(&mut self) -> Result<(), EngineError>;

    /// Run every job once and wait for all of them. Returns
    /// [`EngineError::JobsFailed`] if any job faulted this call.
    fn execute(&mut self, jobs: &[Job], delta: f32) -> Result<(), EngineError>;

    /// Faults captured and not yet collected.
    fn fault_count(&self) -> usize;

    fn has_faults(&self) -> bool {
        self.fault_count() > 0
    }

    /// Collect and clear stored faults.
    fn take_faults(&mut self) -> Vec<JobFault>;

    /// Number of threads jobs run on.
    fn concurrency(&self) -> usize;

    fn shutdown(&mut self) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Idle,
    Running,
    Stopped,
}

// ---------------------------------------------------------------------------
// InlinePool
// ---------------------------------------------------------------------------

/// Runs jobs sequentially on the calling thread.
#[derive(Debug)]
pub struct InlinePool {
    state: PoolState,
    faults: Vec<JobFault>,
}

impl InlinePool {
    pub fn new() -> Self {
        Self {
            state: PoolState::Idle,
            faults: Vec::new(),
        }
    }
}

impl Default for InlinePool {
    fn default() -> Self {
        Self::new()
    }
}

impl JobPool for InlinePool {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.state != PoolState::Idle {
            return Err(EngineError::PoolAlreadyStarted);
        }
        self.state = PoolState::Running;
        Ok(())
    }

    fn execute(&mut self, jobs: &[Job], delta: f32) -> Result<(), EngineError> {
        if self.state != PoolState::Running {
            return Err(EngineError::PoolNotStarted);
        }
        if !self.faults.is_empty() {
            return Err(EngineError::UnresolvedFaults {
                count: self.faults.len(),
            });
        }
        for job in jobs {
            if let Some(fault) = job.run_captured(delta) {
                warn!(job = %fault.job, fault = %fault, "job fault captured");
                self.faults.push(fault);
            }
        }
        frame_result(&self.faults)
    }

    fn fault_count(&self) -> usize {
        self.faults.len()
    }

    fn take_faults(&mut self) -> Vec<JobFault> {
        std::mem::take(&mut self.faults)
    }

    fn concurrency(&self) -> usize {
        1
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.state = PoolState::Stopped;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

struct PoolShared {
    latch: CyclicalLatch,
    work: RwLock<Vec<Job>>,
    cursor: AtomicUsize,
    delta_bits: AtomicU32,
    faults: Mutex<Vec<JobFault>>,
    running: AtomicBool,
}

impl PoolShared {
    fn drain_work(&self) {
        let work = self.work.read();
        let delta = f32::from_bits(self.delta_bits.load(Ordering::Acquire));
        loop {
            let index = self.cursor.fetch_add(1, Ordering::AcqRel);
            let Some(job) = work.get(index) else {
                break;
            };
            if let Some(fault) = job.run_captured(delta) {
                warn!(job = %fault.job, fault = %fault, "job fault captured");
                self.faults.lock().push(fault);
            }
        }
    }

    fn signal_done(&self) {
        if let Err(err) = self.latch.signal() {
            warn!(error = %err, "worker signalled an idle latch");
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    // Boot cycle: report ready before waiting for real work.
    let mut last_version = shared.latch.version();
    shared.signal_done();

    while shared.running.load(Ordering::Acquire) {
        if !shared.latch.await_start(last_version) {
            break;
        }
        last_version = shared.latch.version();
        shared.drain_work();
        shared.signal_done();
    }
}

/// Fixed set of worker threads driven by a [`CyclicalLatch`].
pub struct WorkerPool {
    workers: usize,
    state: PoolState,
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// A pool of `workers` threads (at least one). Threads are spawned by
    /// [`start`](JobPool::start).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            state: PoolState::Idle,
            shared: Arc::new(PoolShared {
                latch: CyclicalLatch::new(),
                work: RwLock::new(Vec::new()),
                cursor: AtomicUsize::new(0),
                delta_bits: AtomicU32::new(0),
                faults: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
            handles: Vec::new(),
        }
    }

    fn stop_workers(&mut self) -> Result<(), EngineError> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.latch.interrupt();
        let mut result = Ok(());
        for handle in self.handles.drain(..) {
            let worker = handle.thread().name().unwrap_or("skein-worker").to_owned();
            if handle.join().is_err() {
                result = Err(EngineError::WorkerPanicked { worker });
            }
        }
        self.state = PoolState::Stopped;
        result
    }
}

impl JobPool for WorkerPool {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.state != PoolState::Idle {
            return Err(EngineError::PoolAlreadyStarted);
        }
        self.shared.running.store(true, Ordering::Release);
        self.shared.latch.start(self.workers)?;
        for index in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("skein-worker-{index}"))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(err) => {
                    // Workers that did start are parked on the boot cycle.
                    let _ = self.stop_workers();
                    return Err(EngineError::WorkerSpawn(err));
                }
            }
        }
        if !self.shared.latch.await_finished() {
            return Err(EngineError::LatchInterrupted);
        }
        self.state = PoolState::Running;
        debug!(workers = self.workers, "worker pool started");
        Ok(())
    }

    fn execute(&mut self, jobs: &[Job], delta: f32) -> Result<(), EngineError> {
        if self.state != PoolState::Running {
            return Err(EngineError::PoolNotStarted);
        }
        let unresolved = self.fault_count();
        if unresolved > 0 {
            return Err(EngineError::UnresolvedFaults { count: unresolved });
        }
        if jobs.is_empty() {
            return Ok(());
        }

        {
            let mut work = self.shared.work.write();
            work.clear();
            work.extend_from_slice(jobs);
        }
        self.shared.cursor.store(0, Ordering::Release);
        self.shared
            .delta_bits
            .store(delta.to_bits(), Ordering::Release);

        self.shared.latch.start(self.workers)?;
        let finished = self.shared.latch.await_finished();
        self.shared.work.write().clear();
        if !finished {
            return Err(EngineError::LatchInterrupted);
        }
        frame_result(&self.shared.faults.lock())
    }

    fn fault_count(&self) -> usize {
        self.shared.faults.lock().len()
    }

    fn take_faults(&mut self) -> Vec<JobFault> {
        std::mem::take(&mut *self.shared.faults.lock())
    }

    fn concurrency(&self) -> usize {
        self.workers
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.state == PoolState::Stopped {
            return Ok(());
        }
        let result = self.stop_workers();
        debug!(workers = self.workers, "worker pool stopped");
        result
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.state != PoolState::Stopped {
            if let Err(err) = self.stop_workers() {
                warn!(error = %err, "worker pool shutdown on drop failed");
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("state", &self.state)
            .field("latch", &self.shared.latch)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
