#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod bitmap;
pub mod kernel_services;
pub mod klog;
pub mod spinlock;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod waitqueue;

pub use bitmap::Bitmap;
pub use kernel_services::{
    Clock, HeapPageAllocator, PAGE_SIZE, PageAllocator, PageBox, TaskHandle, TaskRuntime,
    WakeReason,
};
pub use klog::{KlogLevel, klog_get_level, klog_is_enabled, klog_register_backend, klog_set_level};
pub use spinlock::{IrqMutex, IrqMutexGuard, IrqOps, register_irq_ops};
pub use waitqueue::{WaitError, WaitQueue};
