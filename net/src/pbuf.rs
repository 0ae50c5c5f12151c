//! Reference-counted handle to one pool buffer.
//!
//! `Pbuf` is move-only; passing it down or up the stack transfers ownership
//! and dropping it releases the reference.  [`share`](Pbuf::share) is the only
//! way to get a second handle, raising the unit's count to 2.  While shared,
//! the bytes are read-only; [`into_unique`](Pbuf::into_unique) copies when a
//! holder needs to write.
//!
//! The buffer tracks a single occupied length.  Layers address their headers
//! by fixed offsets from the start of the frame (Ethernet at 0, IPv4 at 14).

use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use crate::pool::{PBUF_CAPACITY, PBUF_HEADER_LEN, PbufHeader, PoolInner};
use crate::types::Result;

pub struct Pbuf {
    hdr: NonNull<PbufHeader>,
    pool: Arc<PoolInner>,
}

// SAFETY: a `Pbuf` is the owner of its reference; the unit's bytes are only
// written through `&mut Pbuf` while the count is 1.
unsafe impl Send for Pbuf {}

impl Pbuf {
    pub(crate) fn from_header(hdr: NonNull<PbufHeader>, pool: Arc<PoolInner>) -> Self {
        Self { hdr, pool }
    }

    #[inline]
    fn header(&self) -> &PbufHeader {
        // SAFETY: the header stays valid while this handle holds a reference.
        unsafe { self.hdr.as_ref() }
    }

    /// Current reference count (1 or 2).
    #[inline]
    pub fn count(&self) -> u32 {
        self.header().count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.count() > 1
    }

    /// Address of the unit; always a multiple of the unit size.
    #[inline]
    pub fn unit_addr(&self) -> usize {
        self.hdr.as_ptr() as usize
    }

    /// Occupied length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.header().len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        PBUF_CAPACITY
    }

    pub fn set_len(&mut self, len: usize) {
        self.assert_unique();
        assert!(len <= PBUF_CAPACITY, "pbuf: length {} over capacity", len);
        // SAFETY: unique owner; see `assert_unique`.
        unsafe { (*self.hdr.as_ptr()).len = len };
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the data area lies inside the unit.
        unsafe { (self.hdr.as_ptr() as *mut u8).add(PBUF_HEADER_LEN) }
    }

    /// Whole data area, regardless of the occupied length.
    #[inline]
    pub fn data(&self) -> &[u8] {
        // SAFETY: `PBUF_CAPACITY` bytes follow the header inside the unit.
        unsafe { core::slice::from_raw_parts(self.data_ptr(), PBUF_CAPACITY) }
    }

    /// Whole data area, writable.  Panics if the buffer is shared.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.assert_unique();
        // SAFETY: count is 1 and we hold `&mut self`, so no other view exists.
        unsafe { core::slice::from_raw_parts_mut(self.data_ptr(), PBUF_CAPACITY) }
    }

    /// Occupied prefix.
    #[inline]
    pub fn frame(&self) -> &[u8] {
        &self.data()[..self.len()]
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.data_mut()[..len]
    }

    /// Second handle to the same unit.  Panics if already shared.
    pub fn share(&self) -> Pbuf {
        if self
            .header()
            .count
            .compare_exchange(1, 2, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("pbuf: share of {:#x} with count {}", self.unit_addr(), self.count());
        }
        Pbuf {
            hdr: self.hdr,
            pool: self.pool.clone(),
        }
    }

    /// Return a handle that may be written: `self` if unshared, otherwise a
    /// fresh copy of the occupied bytes.
    pub fn into_unique(self) -> Result<Pbuf> {
        if !self.is_shared() {
            return Ok(self);
        }
        let hdr = self.pool.acquire()?;
        let mut copy = Pbuf::from_header(hdr, self.pool.clone());
        let len = self.len();
        copy.data_mut()[..len].copy_from_slice(self.frame());
        copy.set_len(len);
        Ok(copy)
    }

    #[inline]
    fn assert_unique(&self) {
        let count = self.count();
        assert!(count == 1, "pbuf: write to {:#x} with count {}", self.unit_addr(), count);
    }
}

impl Drop for Pbuf {
    fn drop(&mut self) {
        self.pool.release(self.hdr);
    }
}

// Metadata only; never dump packet contents.
impl fmt::Debug for Pbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pbuf({:#x}) {{ len={}, count={} }}",
            self.unit_addr(),
            self.len(),
            self.count()
        )
    }
}
