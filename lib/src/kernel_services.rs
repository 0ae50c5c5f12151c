//! Narrow contracts the network core consumes from the rest of the kernel.
//!
//! The scheduler, page allocator and clock live outside this workspace.
//! Each is reached through a trait object handed to the subsystem that needs
//! it, so several independent instances (and test doubles) can coexist.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

/// Physical page size.
pub const PAGE_SIZE: usize = 4096;

/// Allocate and free physically contiguous, page-aligned runs of pages.
pub trait PageAllocator: Send + Sync {
    /// Allocate `count` contiguous pages aligned to [`PAGE_SIZE`].
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>>;

    /// Return pages obtained from [`alloc_pages`](Self::alloc_pages).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_pages` on this allocator with the same
    /// `count`, and must not be used afterwards.
    unsafe fn free_pages(&self, ptr: NonNull<u8>, count: usize);
}

/// Page allocator backed by the global heap.
///
/// Used when the core runs on top of a kernel heap rather than a frame
/// allocator, and by hosted builds.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapPageAllocator;

impl HeapPageAllocator {
    fn layout(count: usize) -> Option<Layout> {
        let size = count.checked_mul(PAGE_SIZE)?;
        Layout::from_size_align(size, PAGE_SIZE).ok()
    }
}

impl PageAllocator for HeapPageAllocator {
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>> {
        if count == 0 {
            return None;
        }
        let layout = Self::layout(count)?;
        // SAFETY: layout has non-zero size.
        NonNull::new(unsafe { alloc::alloc::alloc_zeroed(layout) })
    }

    unsafe fn free_pages(&self, ptr: NonNull<u8>, count: usize) {
        if let Some(layout) = Self::layout(count) {
            // SAFETY: caller guarantees `ptr` came from `alloc_pages(count)`,
            // which used this exact layout.
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// An owned run of pages, returned to its allocator on drop.
pub struct PageBox {
    ptr: NonNull<u8>,
    count: usize,
    allocator: Arc<dyn PageAllocator>,
}

impl PageBox {
    /// Allocate `count` zeroed pages.  Returns `None` when the allocator is
    /// exhausted.
    pub fn new_zeroed(allocator: Arc<dyn PageAllocator>, count: usize) -> Option<Self> {
        let ptr = allocator.alloc_pages(count)?;
        // SAFETY: `alloc_pages` returned `count` writable pages.
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, count * PAGE_SIZE) };
        Some(Self {
            ptr,
            count,
            allocator,
        })
    }

    pub fn page_count(&self) -> usize {
        self.count
    }
}

impl AsRef<[u8]> for PageBox {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the run is owned by `self` and spans `count` pages.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.count * PAGE_SIZE) }
    }
}

impl AsMut<[u8]> for PageBox {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.count * PAGE_SIZE) }
    }
}

impl Drop for PageBox {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`count` came from this allocator and are not used again.
        unsafe { self.allocator.free_pages(self.ptr, self.count) };
    }
}

// SAFETY: `PageBox` uniquely owns its pages; the allocator is `Send + Sync`.
unsafe impl Send for PageBox {}
unsafe impl Sync for PageBox {}

/// Opaque scheduler handle for a task.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub usize);

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({})", self.0)
    }
}

/// Why [`TaskRuntime::block_current_task`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeReason {
    /// `unblock_task` was called, or the wakeup was spurious.
    Woken,
    /// The signal subsystem interrupted the wait.
    Interrupted,
}

/// Scheduler primitives.
///
/// `unblock_task` on a task that has not blocked yet must not be lost: the
/// next `block_current_task` of that task returns immediately.
pub trait TaskRuntime: Send + Sync {
    fn current_task(&self) -> TaskHandle;
    fn block_current_task(&self) -> WakeReason;
    fn unblock_task(&self, task: TaskHandle);
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn uptime_ms(&self) -> u64;
}
