use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicPtr, Ordering};

/// Interrupt state hooks used by [`IrqMutex`].
///
/// The architecture layer registers a real implementation during bring-up.
/// Until then the mutex only spins, which is correct for single-context
/// callers and for host-side unit tests.
pub struct IrqOps {
    /// Disable interrupts and return the previous flags word.
    pub save_flags_cli: fn() -> u64,
    /// Restore a flags word previously returned by `save_flags_cli`.
    pub restore_flags: fn(u64),
}

fn noop_save() -> u64 {
    0
}

fn noop_restore(_flags: u64) {}

static NOOP_OPS: IrqOps = IrqOps {
    save_flags_cli: noop_save,
    restore_flags: noop_restore,
};

static IRQ_OPS: AtomicPtr<IrqOps> = AtomicPtr::new(core::ptr::null_mut());

/// Install the architecture's interrupt save/restore pair.
pub fn register_irq_ops(ops: &'static IrqOps) {
    IRQ_OPS.store(ops as *const IrqOps as *mut IrqOps, Ordering::Release);
}

#[inline]
fn irq_ops() -> &'static IrqOps {
    let ptr = IRQ_OPS.load(Ordering::Acquire);
    if ptr.is_null() {
        &NOOP_OPS
    } else {
        // SAFETY: only `register_irq_ops` stores into IRQ_OPS and it takes a
        // `&'static IrqOps`.
        unsafe { &*ptr }
    }
}

/// Mutex that disables interrupts while held.
/// Required for state touched from both receive interrupts and task context.
pub struct IrqMutex<T> {
    inner: spin::Mutex<T>,
}

pub struct IrqMutexGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    saved_flags: u64,
}

impl<T> IrqMutex<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let saved_flags = (irq_ops().save_flags_cli)();
        IrqMutexGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            saved_flags,
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let ops = irq_ops();
        let saved_flags = (ops.save_flags_cli)();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqMutexGuard {
                guard: ManuallyDrop::new(guard),
                saved_flags,
            }),
            None => {
                (ops.restore_flags)(saved_flags);
                None
            }
        }
    }

    /// Check if the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for IrqMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<'a, T> Deref for IrqMutexGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for IrqMutexGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for IrqMutexGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, before interrupts
        // are restored.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        (irq_ops().restore_flags)(self.saved_flags);
    }
}
