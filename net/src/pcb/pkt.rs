//! Packet (link-level) PCBs.
//!
//! A packet PCB sees whole Ethernet frames on one interface before any
//! protocol processing.  The first PCB that matches a frame takes it, and
//! the frame goes no further up the stack.

use alloc::sync::Arc;

use kestrel_abi::net::{PKT_PROTO_ALL, PKT_PROTO_ICMP, PKT_PROTO_IP, PKT_PROTO_TCP, PKT_PROTO_UDP};
use kestrel_lib::{IrqMutex, WaitQueue, klog_debug, klog_trace};

use crate::config::ETH_MTU;
use crate::ipv4::IP_OFFSET;
use crate::netif::Netif;
use crate::pbuf::Pbuf;
use crate::pcb::{Delivery, Pcb, RxQueue, copy_out};
use crate::stack::NetStack;
use crate::types::{EtherType, IfIndex, IpProtocol, MacAddr, NetError, Result};
use crate::wire::EthernetFrame;

/// Which frames a packet PCB wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PktProtocol {
    All,
    Ip,
    Icmp,
    Udp,
    Tcp,
}

impl PktProtocol {
    pub fn from_abi(value: u16) -> Result<Self> {
        match value {
            PKT_PROTO_ALL => Ok(Self::All),
            PKT_PROTO_IP => Ok(Self::Ip),
            PKT_PROTO_ICMP => Ok(Self::Icmp),
            PKT_PROTO_UDP => Ok(Self::Udp),
            PKT_PROTO_TCP => Ok(Self::Tcp),
            _ => Err(NetError::InvalidArgument),
        }
    }

    fn matches(self, frame: &[u8]) -> bool {
        let is_ipv4 = match EthernetFrame::new_checked(frame) {
            Ok(eth) => eth.ethertype() == EtherType::Ipv4.as_u16(),
            Err(_) => false,
        };
        // Protocol byte of the IPv4 header.
        let ip_proto = frame.get(IP_OFFSET + 9).copied();
        let wants = |p: IpProtocol| is_ipv4 && ip_proto == Some(p.as_u8());
        match self {
            Self::All => true,
            Self::Ip => is_ipv4,
            Self::Icmp => wants(IpProtocol::Icmp),
            Self::Udp => wants(IpProtocol::Udp),
            Self::Tcp => wants(IpProtocol::Tcp),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PktState {
    netif: Option<IfIndex>,
    /// Destination filter; zero matches any.
    laddr: MacAddr,
    /// Source filter; zero matches any.
    raddr: MacAddr,
    protocol: PktProtocol,
}

pub struct PktPcb {
    state: IrqMutex<PktState>,
    rx: RxQueue<Pbuf>,
}

impl PktPcb {
    fn accepts(&self, netif: IfIndex, frame: &[u8]) -> bool {
        let state = *self.state.lock();
        if state.netif != Some(netif) {
            return false;
        }
        let Ok(eth) = EthernetFrame::new_checked(frame) else {
            return false;
        };
        if !state.raddr.is_zero() && state.raddr != eth.src() {
            return false;
        }
        if !state.laddr.is_zero() && state.laddr != eth.dst() {
            return false;
        }
        state.protocol.matches(frame)
    }

    pub fn netif(&self) -> Option<IfIndex> {
        self.state.lock().netif
    }

    pub fn local_addr(&self) -> MacAddr {
        self.state.lock().laddr
    }

    pub fn peer_addr(&self) -> MacAddr {
        self.state.lock().raddr
    }

    pub fn protocol(&self) -> PktProtocol {
        self.state.lock().protocol
    }
}

impl Pcb for PktPcb {
    fn waiters(&self) -> &WaitQueue {
        self.rx.waiters()
    }

    fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl NetStack {
    pub fn pkt_open(&self, netif: Option<IfIndex>, protocol: PktProtocol) -> Arc<PktPcb> {
        let pcb = Arc::new(PktPcb {
            state: IrqMutex::new(PktState {
                netif,
                laddr: MacAddr::ZERO,
                raddr: MacAddr::ZERO,
                protocol,
            }),
            rx: self.rx_queue(),
        });
        self.pkt_pcbs.lock().push(pcb.clone());
        pcb
    }

    /// Attach `pcb` to an interface.
    pub fn pkt_set_netif(&self, pcb: &PktPcb, netif: IfIndex) -> Result<()> {
        self.netif(netif)?;
        pcb.state.lock().netif = Some(netif);
        Ok(())
    }

    pub fn pkt_bind(&self, pcb: &PktPcb, mac: MacAddr) {
        pcb.state.lock().laddr = mac;
    }

    pub fn pkt_connect(&self, pcb: &PktPcb, mac: MacAddr) {
        pcb.state.lock().raddr = mac;
    }

    pub fn pkt_close(&self, pcb: &Arc<PktPcb>) {
        self.pkt_pcbs.lock().retain(|p| !Arc::ptr_eq(p, pcb));
        let dropped = pcb.rx.close(&*self.runtime);
        klog_debug!("pkt: closed, {} frames dropped", dropped);
    }

    /// Offer an inbound frame to the packet PCBs on `netif`.
    pub fn pkt_input(&self, netif: &Netif, buf: Pbuf) -> Result<Delivery> {
        let pcb = {
            let pcbs = self.pkt_pcbs.lock();
            pcbs.iter()
                .find(|p| p.accepts(netif.index, buf.frame()))
                .cloned()
        };
        match pcb {
            Some(pcb) => {
                klog_trace!("pkt: captured {:?} on {}", buf, netif.index);
                self.rx_deliver(&pcb.rx, buf);
                Ok(Delivery::Consumed)
            }
            None => Ok(Delivery::Declined(buf)),
        }
    }

    /// Copy the oldest captured frame into `out`, blocking while none is
    /// queued.  Returns the bytes copied.
    pub fn pkt_recv(&self, pcb: &PktPcb, out: &mut [u8]) -> Result<usize> {
        let buf = pcb.rx.pop(&*self.runtime)?;
        Ok(copy_out(out, buf.frame()))
    }

    pub fn pkt_try_recv(&self, pcb: &PktPcb, out: &mut [u8]) -> Result<usize> {
        let buf = pcb.rx.try_pop().ok_or(NetError::WouldBlock)?;
        Ok(copy_out(out, buf.frame()))
    }

    /// Write `frame` unchanged to the PCB's interface.  `dst`, if given,
    /// becomes the peer filter first.
    pub fn pkt_send(&self, pcb: &PktPcb, dst: Option<MacAddr>, frame: &[u8]) -> Result<usize> {
        if frame.len() > ETH_MTU {
            return Err(NetError::MessageTooLong);
        }
        if let Some(mac) = dst {
            self.pkt_connect(pcb, mac);
        }
        let index = pcb.netif().ok_or(NetError::InvalidArgument)?;
        let netif = self.netif(index)?;
        let buf = self.pool.acquire_copy(frame)?;
        self.netif_output(&netif, buf)?;
        Ok(frame.len())
    }
}
