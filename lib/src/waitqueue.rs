//! Wait queue primitive for blocking/waking kernel tasks.
//!
//! Waiters are kept in FIFO order and woken one at a time (`wake_one`) or
//! all at once (`wake_all`).  The scheduler is reached through the
//! [`TaskRuntime`] handed to each call, so the queue itself holds no
//! reference to any global.
//!
//! # Lost wakeups
//!
//! The condition is re-checked under the queue lock before the task
//! enqueues itself.  A wake that lands between the enqueue and the block is
//! absorbed by the runtime's pending-wakeup contract (see [`TaskRuntime`]).

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::IrqMutex;
use crate::kernel_services::{TaskHandle, TaskRuntime, WakeReason};

/// Why a wait ended without the condition holding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// The signal subsystem interrupted the wait, or the waiter was removed
    /// with [`WaitQueue::remove_task`].
    Interrupted,
}

/// A FIFO queue of blocked tasks.
pub struct WaitQueue {
    waiters: IrqMutex<VecDeque<TaskHandle>>,
    /// Tasks pulled out by `remove_task` that have not observed it yet.
    cancelled: IrqMutex<Vec<TaskHandle>>,
    /// Incremented on every successful wake.
    generation: AtomicU32,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: IrqMutex::new(VecDeque::new()),
            cancelled: IrqMutex::new(Vec::new()),
            generation: AtomicU32::new(0),
        }
    }

    /// Block the current task until `condition()` returns `true`.
    ///
    /// Spurious wakeups loop back to the condition check.  A task that was
    /// removed from the queue by [`remove_task`](Self::remove_task) while
    /// asleep returns [`WaitError::Interrupted`] instead of re-blocking.
    pub fn wait_event<F: FnMut() -> bool>(
        &self,
        runtime: &dyn TaskRuntime,
        mut condition: F,
    ) -> Result<(), WaitError> {
        let task = runtime.current_task();
        loop {
            if condition() {
                return Ok(());
            }

            {
                let mut waiters = self.waiters.lock();
                if condition() {
                    return Ok(());
                }
                waiters.push_back(task);
            }

            let reason = runtime.block_current_task();

            {
                let mut waiters = self.waiters.lock();
                if let Some(pos) = waiters.iter().position(|t| *t == task) {
                    waiters.remove(pos);
                }
            }

            let cancelled = self.take_cancelled(task);
            if reason == WakeReason::Interrupted {
                return Err(WaitError::Interrupted);
            }
            if cancelled {
                return if condition() {
                    Ok(())
                } else {
                    Err(WaitError::Interrupted)
                };
            }
        }
    }

    /// Wake the longest-waiting task.
    ///
    /// Returns `true` if a task was woken, `false` if the queue was empty.
    pub fn wake_one(&self, runtime: &dyn TaskRuntime) -> bool {
        let task = self.waiters.lock().pop_front();
        match task {
            Some(task) => {
                self.generation.fetch_add(1, Ordering::Relaxed);
                runtime.unblock_task(task);
                true
            }
            None => false,
        }
    }

    /// Wake every waiting task.  Returns the number woken.
    pub fn wake_all(&self, runtime: &dyn TaskRuntime) -> usize {
        let drained: VecDeque<TaskHandle> = core::mem::take(&mut *self.waiters.lock());
        if !drained.is_empty() {
            self.generation.fetch_add(1, Ordering::Relaxed);
        }
        for task in drained.iter() {
            runtime.unblock_task(*task);
        }
        drained.len()
    }

    /// Remove `task` from the queue and wake it.
    ///
    /// Used by the signal path when a blocked task is killed or interrupted.
    /// The woken task observes [`WaitError::Interrupted`] unless its
    /// condition became true in the meantime.
    pub fn remove_task(&self, runtime: &dyn TaskRuntime, task: TaskHandle) -> bool {
        let removed = {
            let mut waiters = self.waiters.lock();
            match waiters.iter().position(|t| *t == task) {
                Some(pos) => {
                    waiters.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.cancelled.lock().push(task);
            runtime.unblock_task(task);
        }
        removed
    }

    fn take_cancelled(&self, task: TaskHandle) -> bool {
        let mut cancelled = self.cancelled.lock();
        match cancelled.iter().position(|t| *t == task) {
            Some(pos) => {
                cancelled.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.lock().is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Wake generation counter (for diagnostics and tests).
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ThreadRuntime;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn condition_already_true_does_not_block() {
        let rt = ThreadRuntime::new();
        let wq = WaitQueue::new();
        assert_eq!(wq.wait_event(&rt, || true), Ok(()));
        assert_eq!(wq.waiter_count(), 0);
    }

    #[test]
    fn wake_one_releases_waiter() {
        let rt = Arc::new(ThreadRuntime::new());
        let wq = Arc::new(WaitQueue::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (rt, wq, ready) = (rt.clone(), wq.clone(), ready.clone());
            thread::spawn(move || wq.wait_event(&*rt, || ready.load(Ordering::Acquire)))
        };

        rt.wait_for_blocked(1);
        assert_eq!(wq.waiter_count(), 1);
        ready.store(true, Ordering::Release);
        assert!(wq.wake_one(&*rt));

        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(wq.generation(), 1);
        assert!(!wq.has_waiters());
    }

    #[test]
    fn removed_waiter_reports_interrupted() {
        let rt = Arc::new(ThreadRuntime::new());
        let wq = Arc::new(WaitQueue::new());

        let waiter = {
            let (rt, wq) = (rt.clone(), wq.clone());
            thread::spawn(move || {
                let me = rt.current_task();
                (me, wq.wait_event(&*rt, || false))
            })
        };

        rt.wait_for_blocked(1);
        let task = {
            let waiters = wq.waiters.lock();
            waiters[0]
        };
        assert!(wq.remove_task(&*rt, task));

        let (me, result) = waiter.join().unwrap();
        assert_eq!(me, task);
        assert_eq!(result, Err(WaitError::Interrupted));
        assert_eq!(wq.waiter_count(), 0);
    }
}
