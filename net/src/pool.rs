//! Page-backed packet buffer pool.
//!
//! Every buffer is exactly half a page and aligned to its own size, so a
//! buffer's address alone identifies its unit.  The first
//! [`PBUF_HEADER_LEN`] bytes of each unit hold the intrusive free-list link,
//! the occupied length and the reference count; frame data follows.
//!
//! ```text
//! page:  | unit 0 (2 KiB)               | unit 1 (2 KiB)               |
//! unit:  | header | frame bytes ........                              |
//! ```
//!
//! The free list grows one page at a time when it runs dry.  Released units
//! go back on the free list, never to the page allocator; pages are only
//! returned when the pool itself (and every outstanding [`Pbuf`]) is gone.
//!
//! The free list is guarded by an [`IrqMutex`] because the receive interrupt
//! acquires buffers while tasks release them.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};

use kestrel_lib::{IrqMutex, PAGE_SIZE, PageAllocator, klog_debug};

use crate::pbuf::Pbuf;
use crate::types::{NetError, Result};

/// Size and alignment of one buffer unit.
pub const PBUF_SIZE: usize = PAGE_SIZE / 2;

/// Offset of frame data inside a unit.
pub const PBUF_HEADER_LEN: usize = 64;

/// Bytes of frame data a buffer can hold.
pub const PBUF_CAPACITY: usize = PBUF_SIZE - PBUF_HEADER_LEN;

/// In-unit bookkeeping, at offset 0 of every buffer.
#[repr(C)]
pub(crate) struct PbufHeader {
    next: *mut PbufHeader,
    pub(crate) len: usize,
    pub(crate) count: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<PbufHeader>() <= PBUF_HEADER_LEN);

struct FreeList {
    head: *mut PbufHeader,
    free: usize,
    pages: Vec<NonNull<u8>>,
}

// SAFETY: the raw pointers refer to pool-owned pages and are only touched
// under the `IrqMutex`.
unsafe impl Send for FreeList {}

pub(crate) struct PoolInner {
    list: IrqMutex<FreeList>,
    allocator: Arc<dyn PageAllocator>,
}

impl PoolInner {
    /// Pop a unit, growing by one page if the list is empty.
    pub(crate) fn acquire(&self) -> Result<NonNull<PbufHeader>> {
        let mut list = self.list.lock();
        if list.head.is_null() {
            let page = self
                .allocator
                .alloc_pages(1)
                .ok_or(NetError::NoBufferSpace)?;
            assert!(
                page.as_ptr() as usize % PBUF_SIZE == 0,
                "pbuf: page {:p} not aligned",
                page.as_ptr()
            );
            list.pages.push(page);
            for unit in 0..PAGE_SIZE / PBUF_SIZE {
                // SAFETY: the page is ours and large enough for two units.
                let hdr = unsafe { page.as_ptr().add(unit * PBUF_SIZE) } as *mut PbufHeader;
                // SAFETY: `hdr` is aligned (units are 2 KiB aligned) and writable.
                unsafe {
                    ptr::write(
                        hdr,
                        PbufHeader {
                            next: list.head,
                            len: 0,
                            count: AtomicU32::new(0),
                        },
                    );
                }
                list.head = hdr;
                list.free += 1;
            }
            klog_debug!("pbuf: pool grew to {} pages", list.pages.len());
        }

        let hdr = list.head;
        // SAFETY: a non-null head is a valid header on the free list.
        unsafe {
            list.head = (*hdr).next;
            (*hdr).next = ptr::null_mut();
            assert_eq!((*hdr).count.load(Ordering::Relaxed), 0, "pbuf: free unit in use");
            (*hdr).count.store(1, Ordering::Release);
            (*hdr).len = 0;
        }
        list.free -= 1;
        // SAFETY: checked non-null above.
        Ok(unsafe { NonNull::new_unchecked(hdr) })
    }

    /// Drop one reference; the last one puts the unit back on the free list.
    ///
    /// Panics on a misaligned unit or a count outside `{1, 2}`.
    pub(crate) fn release(&self, hdr: NonNull<PbufHeader>) {
        let addr = hdr.as_ptr() as usize;
        assert!(addr % PBUF_SIZE == 0, "pbuf: release of misaligned unit {:#x}", addr);

        // SAFETY: the caller owns a reference, so the header is live.
        let count = unsafe { &(*hdr.as_ptr()).count };
        let prev = match count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| match c {
            1 | 2 => Some(c - 1),
            _ => None,
        }) {
            Ok(prev) => prev,
            Err(bad) => panic!("pbuf: release of {:#x} with count {}", addr, bad),
        };
        if prev > 1 {
            return;
        }

        let mut list = self.list.lock();
        // SAFETY: count reached zero, nobody else references the unit.
        unsafe { (*hdr.as_ptr()).next = list.head };
        list.head = hdr.as_ptr();
        list.free += 1;
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let list = self.list.lock();
        for page in list.pages.iter() {
            // SAFETY: every page came from `alloc_pages(1)` on this allocator
            // and no `Pbuf` can outlive the pool (each holds an `Arc`).
            unsafe { self.allocator.free_pages(*page, 1) };
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub pages: usize,
    pub total: usize,
    pub free: usize,
}

/// Shared handle to a buffer pool.
#[derive(Clone)]
pub struct PbufPool {
    inner: Arc<PoolInner>,
}

impl PbufPool {
    pub fn new(allocator: Arc<dyn PageAllocator>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                list: IrqMutex::new(FreeList {
                    head: ptr::null_mut(),
                    free: 0,
                    pages: Vec::new(),
                }),
                allocator,
            }),
        }
    }

    /// Acquire an empty buffer with a reference count of 1.
    pub fn acquire(&self) -> Result<Pbuf> {
        let hdr = self.inner.acquire()?;
        Ok(Pbuf::from_header(hdr, self.inner.clone()))
    }

    /// Acquire a buffer holding a copy of `frame`.
    pub fn acquire_copy(&self, frame: &[u8]) -> Result<Pbuf> {
        if frame.len() > PBUF_CAPACITY {
            return Err(NetError::MessageTooLong);
        }
        let mut buf = self.acquire()?;
        buf.data_mut()[..frame.len()].copy_from_slice(frame);
        buf.set_len(frame.len());
        Ok(buf)
    }

    pub fn stats(&self) -> PoolStats {
        let list = self.inner.list.lock();
        PoolStats {
            pages: list.pages.len(),
            total: list.pages.len() * (PAGE_SIZE / PBUF_SIZE),
            free: list.free,
        }
    }
}
