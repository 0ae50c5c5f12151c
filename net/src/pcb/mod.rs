//! Protocol control blocks: packet capture, raw IP and UDP.
//!
//! Every PCB kind has the same receive side, an [`RxQueue`]: a FIFO of
//! delivered entries plus a FIFO [`WaitQueue`] of tasks blocked in receive.
//! Delivery appends and wakes the longest waiter, or drops the entry when
//! the queue already holds its limit; a blocking receive
//! re-checks the queue after every wake, so spurious wakes and wakes stolen
//! by a faster receiver just send it back to sleep.
//!
//! The stack keeps one list per kind.  Demux walks the list under its lock
//! only long enough to pick the first matching PCB, then delivers with the
//! list unlocked.

pub mod pkt;
pub mod raw;
pub mod udp;

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, Ordering};

use kestrel_lib::{IrqMutex, TaskRuntime, WaitQueue, klog_debug};

use crate::pbuf::Pbuf;
use crate::pool::PbufPool;
use crate::stack::NetStack;
use crate::types::{NetError, Result};

pub use pkt::{PktPcb, PktProtocol};
pub use raw::RawPcb;
pub use udp::{UdpFlags, UdpPcb};

/// Result of offering a buffer to a demux stage.
#[derive(Debug)]
pub enum Delivery {
    /// A PCB took the buffer; dispatch stops.
    Consumed,
    /// Nobody took it; the caller keeps dispatching.
    Declined(Pbuf),
}

/// Receive side shared by every PCB kind.
pub struct RxQueue<E> {
    items: IrqMutex<VecDeque<E>>,
    waiters: WaitQueue,
    closed: AtomicBool,
    limit: usize,
}

impl<E> RxQueue<E> {
    /// A queue holding at most `limit` entries.
    pub const fn new(limit: usize) -> Self {
        Self {
            items: IrqMutex::new(VecDeque::new()),
            waiters: WaitQueue::new(),
            closed: AtomicBool::new(false),
            limit,
        }
    }

    /// Append `item` and wake one receiver.  A closed or full queue drops
    /// it and returns false.
    pub fn push(&self, runtime: &dyn TaskRuntime, item: E) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut items = self.items.lock();
            if items.len() >= self.limit {
                return false;
            }
            items.push_back(item);
        }
        self.waiters.wake_one(runtime);
        true
    }

    pub fn try_pop(&self) -> Option<E> {
        self.items.lock().pop_front()
    }

    /// Oldest entry, blocking while the queue is empty.
    ///
    /// Fails with `Interrupted` when the wait is cancelled and with
    /// `NotConnected` once the PCB is closed.
    pub fn pop(&self, runtime: &dyn TaskRuntime) -> Result<E> {
        loop {
            if let Some(item) = self.try_pop() {
                return Ok(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(NetError::NotConnected);
            }
            self.waiters
                .wait_event(runtime, || {
                    self.closed.load(Ordering::Acquire) || !self.items.lock().is_empty()
                })
                .map_err(|_| NetError::Interrupted)?;
        }
    }

    /// Mark closed, drop every queued entry and wake all receivers.
    pub fn close(&self, runtime: &dyn TaskRuntime) -> usize {
        self.closed.store(true, Ordering::Release);
        let drained = core::mem::take(&mut *self.items.lock());
        self.waiters.wake_all(runtime);
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }
}

impl NetStack {
    /// New receive queue sized from the configuration.
    pub(crate) fn rx_queue<E>(&self) -> RxQueue<E> {
        RxQueue::new(self.config.pcb_rx_limit)
    }

    /// Push `item` onto `rx`, counting it when the queue refuses it.
    pub(crate) fn rx_deliver<E>(&self, rx: &RxQueue<E>, item: E) {
        if !rx.push(&*self.runtime, item) {
            self.stats.bump(&self.stats.pcb_rx_dropped);
            klog_debug!("pcb: receive queue full or closed, entry dropped");
        }
    }
}

/// Common view of a PCB for the cancellation path.
pub trait Pcb: Send + Sync {
    fn waiters(&self) -> &WaitQueue;
    /// Entries waiting to be received.
    fn pending(&self) -> usize;
}

/// A handle on `buf`'s bytes for a second consumer: a shared reference when
/// possible, a copy when the buffer is already shared.
pub(crate) fn duplicate(pool: &PbufPool, buf: &Pbuf) -> Result<Pbuf> {
    if buf.is_shared() {
        pool.acquire_copy(buf.frame())
    } else {
        Ok(buf.share())
    }
}

/// Copy as much of `src` as fits into `dst`.
pub(crate) fn copy_out(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
