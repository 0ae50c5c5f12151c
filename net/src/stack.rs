//! The network stack context.
//!
//! A [`NetStack`] owns every table the core keeps: the buffer pool, the
//! interface table, the ARP cache, the three PCB lists, the port map and the
//! receive backlog.  The protocol layers are `impl NetStack` blocks in their
//! own modules and reach all shared state through `&self`.
//!
//! # Locking
//!
//! Each table sits behind its own [`IrqMutex`].  A lock is held only for the
//! table operation itself and is always released before calling into
//! another layer, a driver or the scheduler, so the loopback path can
//! re-enter input from inside output without deadlocking.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use kestrel_lib::{Clock, IrqMutex, PageAllocator, TaskHandle, TaskRuntime, klog_debug};

use crate::arp::ArpCache;
use crate::config::NetConfig;
use crate::ipv4::TransportHook;
use crate::netif::Netif;
use crate::pbuf::Pbuf;
use crate::pcb::{Pcb, PktPcb, RawPcb, UdpPcb};
use crate::pool::PbufPool;
use crate::port::PortMap;
use crate::types::{IfIndex, Result};

/// Drop and error counters.
#[derive(Default)]
pub struct NetStats {
    pub(crate) ip_unknown_proto: AtomicU64,
    pub(crate) ip_rx_dropped: AtomicU64,
    pub(crate) tcp_no_hook: AtomicU64,
    pub(crate) udp_no_port: AtomicU64,
    pub(crate) udp_rx_errors: AtomicU64,
    pub(crate) rx_backlog_dropped: AtomicU64,
    pub(crate) pcb_rx_dropped: AtomicU64,
}

impl NetStats {
    #[inline]
    pub(crate) fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetStatsSnapshot {
        NetStatsSnapshot {
            ip_unknown_proto: self.ip_unknown_proto.load(Ordering::Relaxed),
            ip_rx_dropped: self.ip_rx_dropped.load(Ordering::Relaxed),
            tcp_no_hook: self.tcp_no_hook.load(Ordering::Relaxed),
            udp_no_port: self.udp_no_port.load(Ordering::Relaxed),
            udp_rx_errors: self.udp_rx_errors.load(Ordering::Relaxed),
            rx_backlog_dropped: self.rx_backlog_dropped.load(Ordering::Relaxed),
            pcb_rx_dropped: self.pcb_rx_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetStatsSnapshot {
    /// Datagrams of a protocol nobody handles.
    pub ip_unknown_proto: u64,
    /// Datagrams that failed validation.
    pub ip_rx_dropped: u64,
    /// TCP segments seen with no transport hook registered.
    pub tcp_no_hook: u64,
    pub udp_no_port: u64,
    /// Datagrams with a bad length or checksum.
    pub udp_rx_errors: u64,
    pub rx_backlog_dropped: u64,
    /// Entries refused by a full or closed PCB receive queue.
    pub pcb_rx_dropped: u64,
}

pub struct NetStack {
    pub(crate) config: NetConfig,
    pub(crate) pool: PbufPool,
    pub(crate) runtime: Arc<dyn TaskRuntime>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) netifs: IrqMutex<Vec<Netif>>,
    pub(crate) loopback: IfIndex,
    pub(crate) arp: IrqMutex<ArpCache>,
    pub(crate) ports: IrqMutex<PortMap>,
    pub(crate) pkt_pcbs: IrqMutex<Vec<Arc<PktPcb>>>,
    pub(crate) raw_pcbs: IrqMutex<Vec<Arc<RawPcb>>>,
    pub(crate) udp_pcbs: IrqMutex<Vec<Arc<UdpPcb>>>,
    pub(crate) ip_id: AtomicU16,
    pub(crate) tcp_hook: IrqMutex<Option<Arc<dyn TransportHook>>>,
    pub(crate) rx_backlog: IrqMutex<VecDeque<(IfIndex, Pbuf)>>,
    pub(crate) stats: NetStats,
}

impl NetStack {
    /// Build a stack with only the loopback interface.
    ///
    /// Fails with `NoBufferSpace` if the port map pages cannot be allocated.
    pub fn new(
        config: NetConfig,
        allocator: Arc<dyn PageAllocator>,
        runtime: Arc<dyn TaskRuntime>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ports = PortMap::new(allocator.clone(), config.ephemeral_start)?;
        let stack = Self {
            config,
            pool: PbufPool::new(allocator),
            runtime,
            clock,
            netifs: IrqMutex::new(Vec::new()),
            loopback: IfIndex(0),
            arp: IrqMutex::new(ArpCache::new()),
            ports: IrqMutex::new(ports),
            pkt_pcbs: IrqMutex::new(Vec::new()),
            raw_pcbs: IrqMutex::new(Vec::new()),
            udp_pcbs: IrqMutex::new(Vec::new()),
            ip_id: AtomicU16::new(0),
            tcp_hook: IrqMutex::new(None),
            rx_backlog: IrqMutex::new(VecDeque::new()),
            stats: NetStats::default(),
        };
        let lo = stack.netif_setup_loopback();
        assert_eq!(lo, stack.loopback, "net: loopback must be the first interface");
        klog_debug!("net: stack ready, ephemeral ports from {}", stack.config.ephemeral_start);
        Ok(stack)
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn pool(&self) -> &PbufPool {
        &self.pool
    }

    pub fn stats(&self) -> NetStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.uptime_ms()
    }

    /// Next IPv4 identification value.
    pub(crate) fn next_ip_id(&self) -> u16 {
        self.ip_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register (or clear) the TCP input hook.
    pub fn set_tcp_hook(&self, hook: Option<Arc<dyn TransportHook>>) {
        *self.tcp_hook.lock() = hook;
    }

    /// Pull `task` out of `pcb`'s wait queue.  Its blocked receive returns
    /// [`NetError::Interrupted`](crate::NetError::Interrupted) unless data
    /// arrived in the meantime.
    pub fn cancel_wait<P: Pcb + ?Sized>(&self, pcb: &P, task: TaskHandle) -> bool {
        pcb.waiters().remove_task(&*self.runtime, task)
    }
}
