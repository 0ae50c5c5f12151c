//! Raw IP PCBs.
//!
//! A raw PCB receives whole IPv4 datagrams of one protocol (0 means any).
//! For a protocol the stack handles itself the PCB gets a shared handle and
//! normal dispatch continues; a protocol nobody else handles is consumed by
//! the first matching PCB.

use alloc::sync::Arc;

use kestrel_lib::{IrqMutex, WaitQueue, klog_debug};

use crate::config::IP_MTU;
use crate::ipv4::{IP_OFFSET, IpMeta};
use crate::pbuf::Pbuf;
use crate::pcb::{Delivery, Pcb, RxQueue, copy_out, duplicate};
use crate::stack::NetStack;
use crate::types::{Ipv4Addr, NetError, Result, SockAddr};
use crate::wire::Ipv4Packet;
use crate::wire::ipv4::HEADER_LEN;

#[derive(Clone, Copy, Debug)]
struct RawState {
    protocol: u8,
    laddr: Ipv4Addr,
    raddr: Ipv4Addr,
}

pub struct RawPcb {
    state: IrqMutex<RawState>,
    rx: RxQueue<Pbuf>,
}

impl RawPcb {
    fn accepts(&self, meta: &IpMeta) -> bool {
        let state = *self.state.lock();
        if !state.raddr.is_unspecified() && state.raddr != meta.src {
            return false;
        }
        if !state.laddr.is_unspecified() && state.laddr != meta.dst {
            return false;
        }
        state.protocol == 0 || state.protocol == meta.protocol
    }

    pub fn protocol(&self) -> u8 {
        self.state.lock().protocol
    }

    pub fn local_addr(&self) -> SockAddr {
        SockAddr::new(self.state.lock().laddr, 0)
    }

    pub fn peer_addr(&self) -> SockAddr {
        SockAddr::new(self.state.lock().raddr, 0)
    }
}

impl Pcb for RawPcb {
    fn waiters(&self) -> &WaitQueue {
        self.rx.waiters()
    }

    fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Copy the IPv4 datagram in `buf` into `out`; returns the length copied
/// and the datagram's source.
fn datagram_out(buf: &Pbuf, out: &mut [u8]) -> Result<(usize, SockAddr)> {
    let ip = Ipv4Packet::new_checked(&buf.frame()[IP_OFFSET..])?;
    let end = (IP_OFFSET + ip.total_len()).min(buf.len());
    let n = copy_out(out, &buf.frame()[IP_OFFSET..end]);
    Ok((n, SockAddr::new(ip.src(), 0)))
}

impl NetStack {
    pub fn raw_open(&self, protocol: u8) -> Arc<RawPcb> {
        let pcb = Arc::new(RawPcb {
            state: IrqMutex::new(RawState {
                protocol,
                laddr: Ipv4Addr::UNSPECIFIED,
                raddr: Ipv4Addr::UNSPECIFIED,
            }),
            rx: self.rx_queue(),
        });
        self.raw_pcbs.lock().push(pcb.clone());
        pcb
    }

    pub fn raw_bind(&self, pcb: &RawPcb, addr: Ipv4Addr) {
        pcb.state.lock().laddr = addr;
    }

    pub fn raw_connect(&self, pcb: &RawPcb, addr: Ipv4Addr) {
        pcb.state.lock().raddr = addr;
    }

    pub fn raw_close(&self, pcb: &Arc<RawPcb>) {
        self.raw_pcbs.lock().retain(|p| !Arc::ptr_eq(p, pcb));
        let dropped = pcb.rx.close(&*self.runtime);
        klog_debug!("raw: closed, {} datagrams dropped", dropped);
    }

    /// Offer a validated datagram to the raw PCBs.
    ///
    /// With `consume` set the first match takes `buf`; otherwise it gets a
    /// second handle and `buf` is handed back for normal dispatch.
    pub(crate) fn raw_input(&self, meta: &IpMeta, buf: Pbuf, consume: bool) -> Result<Delivery> {
        let pcb = {
            let pcbs = self.raw_pcbs.lock();
            pcbs.iter().find(|p| p.accepts(meta)).cloned()
        };
        let Some(pcb) = pcb else {
            return Ok(Delivery::Declined(buf));
        };
        if consume {
            self.rx_deliver(&pcb.rx, buf);
            return Ok(Delivery::Consumed);
        }
        match duplicate(&self.pool, &buf) {
            Ok(copy) => self.rx_deliver(&pcb.rx, copy),
            Err(err) => klog_debug!("raw: no buffer for copy of {:?}: {}", buf, err),
        }
        Ok(Delivery::Declined(buf))
    }

    /// Copy the oldest datagram (IPv4 header included) into `out`, blocking
    /// while none is queued.
    pub fn raw_recv(&self, pcb: &RawPcb, out: &mut [u8]) -> Result<(usize, SockAddr)> {
        let buf = pcb.rx.pop(&*self.runtime)?;
        datagram_out(&buf, out)
    }

    pub fn raw_try_recv(&self, pcb: &RawPcb, out: &mut [u8]) -> Result<(usize, SockAddr)> {
        let buf = pcb.rx.try_pop().ok_or(NetError::WouldBlock)?;
        datagram_out(&buf, out)
    }

    /// Send `payload` with the PCB's protocol to `dst`, or to the connected
    /// peer.  The IPv4 header is added here.
    pub fn raw_send(&self, pcb: &RawPcb, dst: Option<Ipv4Addr>, payload: &[u8]) -> Result<usize> {
        if payload.len() > IP_MTU - HEADER_LEN {
            return Err(NetError::MessageTooLong);
        }
        let state = *pcb.state.lock();
        if state.protocol == 0 {
            return Err(NetError::InvalidArgument);
        }
        let dst = dst.unwrap_or(state.raddr);
        if dst.is_unspecified() {
            return Err(NetError::AddressNotAvailable);
        }

        let netif = self.route(dst)?;
        let mut buf = self.pool.acquire()?;
        let start = IP_OFFSET + HEADER_LEN;
        buf.data_mut()[start..start + payload.len()].copy_from_slice(payload);
        self.ip_output(&netif, buf, dst, state.protocol, payload.len())?;
        Ok(payload.len())
    }
}
