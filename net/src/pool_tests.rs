use alloc::sync::Arc;
use alloc::vec::Vec;

use kestrel_lib::{HeapPageAllocator, PAGE_SIZE, PageAllocator};

use super::pool::{PBUF_CAPACITY, PBUF_SIZE, PbufPool};
use super::types::NetError;

fn pool() -> PbufPool {
    PbufPool::new(Arc::new(HeapPageAllocator))
}

struct NoPages;

impl PageAllocator for NoPages {
    fn alloc_pages(&self, _count: usize) -> Option<core::ptr::NonNull<u8>> {
        None
    }

    unsafe fn free_pages(&self, _ptr: core::ptr::NonNull<u8>, _count: usize) {}
}

#[test]
fn acquired_buffers_are_aligned_and_distinct() {
    let pool = pool();
    let bufs: Vec<_> = (0..9).map(|_| pool.acquire().unwrap()).collect();

    for (i, a) in bufs.iter().enumerate() {
        assert_eq!(a.unit_addr() % PBUF_SIZE, 0);
        assert_eq!(a.count(), 1);
        assert_eq!(a.len(), 0);
        for b in &bufs[i + 1..] {
            assert_ne!(a.unit_addr(), b.unit_addr());
        }
    }

    let stats = pool.stats();
    assert_eq!(stats.pages, 5);
    assert_eq!(stats.total, 5 * (PAGE_SIZE / PBUF_SIZE));
    assert_eq!(stats.free, 1);
}

#[test]
fn release_recycles_without_new_pages() {
    let pool = pool();
    let first = pool.acquire().unwrap();
    let addr = first.unit_addr();
    drop(first);

    assert_eq!(pool.stats().free, 2);
    let again = pool.acquire().unwrap();
    assert_eq!(again.unit_addr(), addr);
    assert_eq!(pool.stats().pages, 1);
}

#[test]
fn share_keeps_unit_until_last_release() {
    let pool = pool();
    let buf = pool.acquire_copy(b"hello").unwrap();
    let other = buf.share();
    assert_eq!(buf.count(), 2);
    assert_eq!(other.frame(), b"hello");

    drop(other);
    assert_eq!(buf.count(), 1);
    assert_eq!(pool.stats().free, 1);
    drop(buf);
    assert_eq!(pool.stats().free, 2);
}

#[test]
fn into_unique_copies_shared_buffer() {
    let pool = pool();
    let buf = pool.acquire_copy(b"ping").unwrap();
    let keep = buf.share();

    let mut mine = buf.into_unique().unwrap();
    assert_eq!(keep.count(), 1);
    assert_ne!(mine.unit_addr(), keep.unit_addr());
    mine.frame_mut()[0] = b'P';
    assert_eq!(keep.frame(), b"ping");
    assert_eq!(mine.frame(), b"Ping");
}

#[test]
fn into_unique_is_free_for_sole_owner() {
    let pool = pool();
    let buf = pool.acquire_copy(b"solo").unwrap();
    let addr = buf.unit_addr();
    let buf = buf.into_unique().unwrap();
    assert_eq!(buf.unit_addr(), addr);
}

#[test]
#[should_panic(expected = "count 2")]
fn writing_shared_buffer_panics() {
    let pool = pool();
    let mut buf = pool.acquire().unwrap();
    let _other = buf.share();
    buf.data_mut()[0] = 1;
}

#[test]
fn oversized_copy_is_rejected() {
    let pool = pool();
    let big = alloc::vec![0u8; PBUF_CAPACITY + 1];
    assert_eq!(pool.acquire_copy(&big).unwrap_err(), NetError::MessageTooLong);
    assert!(pool.acquire_copy(&big[..PBUF_CAPACITY]).is_ok());
}

#[test]
fn exhausted_allocator_reports_no_buffer_space() {
    let pool = PbufPool::new(Arc::new(NoPages));
    assert_eq!(pool.acquire().unwrap_err(), NetError::NoBufferSpace);
}
