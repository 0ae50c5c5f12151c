//! Hosted doubles for the kernel services, used by unit tests.
//!
//! `ThreadRuntime` maps each std thread onto a task handle and implements
//! block/unblock with a per-task wake token, which gives the same
//! no-lost-wakeup guarantee the scheduler's `pending_wakeup` flag does.

extern crate std;

use core::cell::Cell;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::kernel_services::{Clock, TaskHandle, TaskRuntime, WakeReason};

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(1);

std::thread_local! {
    static TASK_ID: Cell<usize> = const { Cell::new(0) };
}

#[derive(Default)]
struct Token {
    woken: bool,
    interrupted: bool,
}

#[derive(Default)]
struct RuntimeState {
    tokens: HashMap<usize, Token>,
    blocked: HashSet<usize>,
}

/// Task runtime backed by std threads.
#[derive(Default)]
pub struct ThreadRuntime {
    state: Mutex<RuntimeState>,
    cond: Condvar,
}

impl ThreadRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next (or current) block of `task` return `Interrupted`.
    pub fn interrupt(&self, task: TaskHandle) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens.entry(task.0).or_default().interrupted = true;
        self.cond.notify_all();
    }

    pub fn is_blocked(&self, task: TaskHandle) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blocked.contains(&task.0)
    }

    pub fn blocked_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blocked.len()
    }

    /// Spin until `count` tasks are blocked.  Panics after five seconds.
    pub fn wait_for_blocked(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.blocked_count() < count {
            assert!(Instant::now() < deadline, "tasks never blocked");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl TaskRuntime for ThreadRuntime {
    fn current_task(&self) -> TaskHandle {
        TASK_ID.with(|id| {
            if id.get() == 0 {
                id.set(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
            }
            TaskHandle(id.get())
        })
    }

    fn block_current_task(&self) -> WakeReason {
        let me = self.current_task().0;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blocked.insert(me);
        loop {
            let token = state.tokens.entry(me).or_default();
            if token.interrupted {
                token.interrupted = false;
                token.woken = false;
                state.blocked.remove(&me);
                return WakeReason::Interrupted;
            }
            if token.woken {
                token.woken = false;
                state.blocked.remove(&me);
                return WakeReason::Woken;
            }
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn unblock_task(&self, task: TaskHandle) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens.entry(task.0).or_default().woken = true;
        self.cond.notify_all();
    }
}

/// Clock advanced by hand.
#[derive(Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn uptime_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}
