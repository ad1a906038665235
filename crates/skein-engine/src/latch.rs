//! Reusable start/finish barrier for a fixed set of worker threads.
//!
//! A [`CyclicalLatch`] coordinates one driving thread with N workers, cycle
//! after cycle:
//!
//! 1. The driver calls [`start(n)`](CyclicalLatch::start). This arms the
//!    latch with `n` outstanding signals and bumps its version.
//! 2. Each worker, parked in [`await_start`](CyclicalLatch::await_start)
//!    with the last version it saw, wakes once the version moves and does
//!    its share of the work, then calls [`signal`](CyclicalLatch::signal).
//! 3. The driver parks in [`await_finished`](CyclicalLatch::await_finished)
//!    until the count reaches zero.
//!
//! The version guarantees a worker never runs the same cycle twice, and the
//! count guarantees a new cycle cannot start before the previous one ends.
//! Both waits tolerate spurious wakeups. [`interrupt`](CyclicalLatch::interrupt)
//! releases every waiter for shutdown.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::EngineError;

struct LatchState {
    remaining: usize,
    version: u64,
    interrupted: bool,
}

pub struct CyclicalLatch {
    state: Mutex<LatchState>,
    started: Condvar,
    finished: Condvar,
    // Lock-free mirrors of `state`, written under the lock.
    version: AtomicU64,
    remaining: AtomicUsize,
}

impl CyclicalLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState {
                remaining: 0,
                version: 0,
                interrupted: false,
            }),
            started: Condvar::new(),
            finished: Condvar::new(),
            version: AtomicU64::new(0),
            remaining: AtomicUsize::new(0),
        }
    }

    /// Arm the latch for `count` signals and release the workers. Returns
    /// the new version.
    pub fn start(&self, count: usize) -> Result<u64, EngineError> {
        let mut state = self.state.lock();
        if state.remaining != 0 {
            return Err(EngineError::LatchBusy {
                remaining: state.remaining,
            });
        }
        state.remaining = count;
        state.version += 1;
        self.remaining.store(count, Ordering::Release);
        self.version.store(state.version, Ordering::Release);
        self.started.notify_all();
        Ok(state.version)
    }

    /// Report one unit of work done. Returns the signals still outstanding.
    pub fn signal(&self) -> Result<usize, EngineError> {
        let mut state = self.state.lock();
        if state.remaining == 0 {
            return Err(EngineError::LatchOverflow);
        }
        state.remaining -= 1;
        self.remaining.store(state.remaining, Ordering::Release);
        if state.remaining == 0 {
            self.finished.notify_all();
        }
        Ok(state.remaining)
    }

    /// Block until a cycle newer than `last_version` is running. Returns
    /// `false` if the latch was interrupted instead.
    pub fn await_start(&self, last_version: u64) -> bool {
        if self.version.load(Ordering::Acquire) != last_version
            && self.remaining.load(Ordering::Acquire) > 0
        {
            return true;
        }
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return false;
            }
            if state.version != last_version && state.remaining > 0 {
                return true;
            }
            self.started.wait(&mut state);
        }
    }

    /// Block until the current cycle's count reaches zero. Returns `false`
    /// if the latch was interrupted first.
    pub fn await_finished(&self) -> bool {
        if self.remaining.load(Ordering::Acquire) == 0 {
            return true;
        }
        let mut state = self.state.lock();
        while state.remaining > 0 {
            if state.interrupted {
                return false;
            }
            self.finished.wait(&mut state);
        }
        true
    }

    /// Release every waiter. Interruption is permanent.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.started.notify_all();
        self.finished.notify_all();
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.remaining() > 0
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }
}

impl Default for CyclicalLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CyclicalLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicalLatch")
            .field("version", &self.version())
            .field("remaining", &self.remaining())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
