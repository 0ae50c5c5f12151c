//! Port allocation over a 65 536-bit bitmap.
//!
//! Bit `p` is set exactly while port `p` is owned.  The bitmap lives in two
//! allocator pages.  Port 0 is never handed out: `port_get(0)` means "any
//! ephemeral port" and scans upward from the configured start.

use alloc::sync::Arc;

use kestrel_lib::{Bitmap, PAGE_SIZE, PageAllocator, PageBox, klog_debug};

use crate::stack::NetStack;
use crate::types::{NetError, Result};

const PORT_COUNT: usize = 1 << 16;
const PORT_MAP_PAGES: usize = PORT_COUNT / 8 / PAGE_SIZE;

pub struct PortMap {
    bits: Bitmap<PageBox>,
    ephemeral_start: u16,
}

impl PortMap {
    pub fn new(allocator: Arc<dyn PageAllocator>, ephemeral_start: u16) -> Result<Self> {
        let pages = PageBox::new_zeroed(allocator, PORT_MAP_PAGES).ok_or(NetError::NoBufferSpace)?;
        Ok(Self {
            bits: Bitmap::new(pages),
            ephemeral_start: ephemeral_start.max(1),
        })
    }

    /// Claim `port`, or any free ephemeral port when `port` is 0.
    pub fn get(&mut self, port: u16) -> Result<u16> {
        if port == 0 {
            let found = self
                .bits
                .find_clear_from(self.ephemeral_start as usize)
                .ok_or(NetError::PortExhausted)?;
            self.bits.set(found, true);
            return Ok(found as u16);
        }
        if self.bits.test(port as usize) {
            return Err(NetError::AddressInUse);
        }
        self.bits.set(port as usize, true);
        Ok(port)
    }

    /// Release `port`.  Panics on port 0 or a port that is not owned.
    pub fn put(&mut self, port: u16) {
        assert!(port != 0, "port: release of port 0");
        assert!(self.bits.test(port as usize), "port: double release of {}", port);
        self.bits.set(port as usize, false);
    }

    pub fn is_used(&self, port: u16) -> bool {
        self.bits.test(port as usize)
    }

    pub fn used(&self) -> usize {
        self.bits.count_set()
    }
}

impl NetStack {
    pub fn port_get(&self, port: u16) -> Result<u16> {
        let got = self.ports.lock().get(port);
        if let Err(err) = got {
            klog_debug!("port: get {} failed: {}", port, err);
        }
        got
    }

    pub fn port_put(&self, port: u16) {
        self.ports.lock().put(port);
    }

    pub fn port_in_use(&self, port: u16) -> bool {
        self.ports.lock().is_used(port)
    }
}
