//! UDP PCBs and UDP input.
//!
//! Matching is first-fit over the PCB list.  A PCB matches when its local
//! port equals the destination port and every specified field of its
//! endpoints agrees with the datagram; an unspecified address or a zero
//! remote port matches anything.

use alloc::sync::Arc;

use bitflags::bitflags;
use kestrel_abi::net::{UDP_FLAG_BROADCAST, UDP_FLAG_CONNECTED, UDP_FLAG_NOCHKSUM};
use kestrel_lib::{IrqMutex, WaitQueue, klog_debug, klog_trace};

use crate::config::IP_MTU;
use crate::ipv4::IP_OFFSET;
use crate::netif::{Netif, NetifFlags};
use crate::pbuf::Pbuf;
use crate::pcb::{Pcb, RxQueue, copy_out};
use crate::stack::NetStack;
use crate::types::{IpProtocol, NetError, Result, SockAddr};
use crate::wire::udp::HEADER_LEN as UDP_HEADER_LEN;
use crate::wire::ipv4::HEADER_LEN as IP_HEADER_LEN;
use crate::wire::{Ipv4Packet, UdpDatagram};

/// Largest payload one datagram carries.
pub const UDP_MAX_PAYLOAD: usize = IP_MTU - IP_HEADER_LEN - UDP_HEADER_LEN;

const UDP_OFFSET: usize = IP_OFFSET + IP_HEADER_LEN;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UdpFlags: u32 {
        /// Send without a checksum.
        const NOCHKSUM  = UDP_FLAG_NOCHKSUM;
        /// Allow sends to broadcast addresses.
        const BROADCAST = UDP_FLAG_BROADCAST;
        const CONNECTED = UDP_FLAG_CONNECTED;
    }
}

#[derive(Clone, Copy, Debug)]
struct UdpState {
    local: SockAddr,
    remote: SockAddr,
    flags: UdpFlags,
    bound: bool,
}

/// A received datagram: the frame, where its payload sits, and the sender.
struct UdpEntry {
    buf: Pbuf,
    from: SockAddr,
    offset: usize,
    len: usize,
}

impl UdpEntry {
    fn payload(&self) -> &[u8] {
        &self.buf.frame()[self.offset..self.offset + self.len]
    }
}

pub struct UdpPcb {
    state: IrqMutex<UdpState>,
    rx: RxQueue<UdpEntry>,
}

impl UdpPcb {
    fn accepts(&self, src: SockAddr, dst: SockAddr) -> bool {
        let state = *self.state.lock();
        if !state.bound || state.local.port != dst.port {
            return false;
        }
        if !state.local.ip.is_unspecified() && state.local.ip != dst.ip {
            return false;
        }
        if state.remote.port != 0 && state.remote.port != src.port {
            return false;
        }
        state.remote.ip.is_unspecified() || state.remote.ip == src.ip
    }

    pub fn local_addr(&self) -> SockAddr {
        self.state.lock().local
    }

    pub fn peer_addr(&self) -> Result<SockAddr> {
        let state = self.state.lock();
        if state.flags.contains(UdpFlags::CONNECTED) {
            Ok(state.remote)
        } else {
            Err(NetError::NotConnected)
        }
    }

    pub fn flags(&self) -> UdpFlags {
        self.state.lock().flags
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }
}

impl Pcb for UdpPcb {
    fn waiters(&self) -> &WaitQueue {
        self.rx.waiters()
    }

    fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Datagram addressing after length and checksum checks.
struct UdpMeta {
    src: SockAddr,
    dst: SockAddr,
    len: usize,
}

fn parse(netif: &Netif, frame: &[u8]) -> Result<UdpMeta> {
    let ip = Ipv4Packet::new_checked(frame.get(IP_OFFSET..).unwrap_or(&[]))?;
    if ip.header_len() != IP_HEADER_LEN || IP_OFFSET + ip.total_len() > frame.len() {
        klog_debug!("udp: datagram from {} does not fit the frame", ip.src());
        return Err(NetError::ProtocolMismatch);
    }
    let udp = UdpDatagram::new_checked(ip.payload())?;
    let udp_len = udp.len();
    if udp_len < UDP_HEADER_LEN || udp_len > ip.payload().len() {
        klog_debug!("udp: length {} bad from {}", udp_len, ip.src());
        return Err(NetError::ProtocolMismatch);
    }
    if !netif.flags.contains(NetifFlags::UDP_RX) && !udp.verify_checksum(ip.src(), ip.dst()) {
        klog_debug!("udp: bad checksum from {}:{}", ip.src(), udp.src_port());
        return Err(NetError::ProtocolMismatch);
    }
    Ok(UdpMeta {
        src: SockAddr::new(ip.src(), udp.src_port()),
        dst: SockAddr::new(ip.dst(), udp.dst_port()),
        len: udp_len - UDP_HEADER_LEN,
    })
}

impl NetStack {
    pub fn udp_open(&self) -> Arc<UdpPcb> {
        let pcb = Arc::new(UdpPcb {
            state: IrqMutex::new(UdpState {
                local: SockAddr::ANY,
                remote: SockAddr::ANY,
                flags: UdpFlags::empty(),
                bound: false,
            }),
            rx: self.rx_queue(),
        });
        self.udp_pcbs.lock().push(pcb.clone());
        pcb
    }

    /// Bind to `addr`.  Port 0 picks an ephemeral port.
    pub fn udp_bind(&self, pcb: &UdpPcb, addr: SockAddr) -> Result<SockAddr> {
        if pcb.is_bound() {
            return Err(NetError::InvalidArgument);
        }
        if !addr.ip.is_unspecified() && !self.is_local_addr(addr.ip) {
            return Err(NetError::AddressNotAvailable);
        }
        let port = self.port_get(addr.port)?;
        let local = SockAddr::new(addr.ip, port);
        let mut state = pcb.state.lock();
        if state.bound {
            drop(state);
            self.port_put(port);
            return Err(NetError::InvalidArgument);
        }
        state.local = local;
        state.bound = true;
        Ok(local)
    }

    /// Fix the peer.  An unbound PCB is bound to an ephemeral port first.
    pub fn udp_connect(&self, pcb: &UdpPcb, addr: SockAddr) -> Result<()> {
        if !pcb.is_bound() {
            self.udp_bind(pcb, SockAddr::ANY)?;
        }
        let mut state = pcb.state.lock();
        state.remote = addr;
        state.flags.insert(UdpFlags::CONNECTED);
        Ok(())
    }

    /// Replace the user-settable flags; `CONNECTED` is kept as is.
    pub fn udp_set_flags(&self, pcb: &UdpPcb, flags: UdpFlags) {
        let mut state = pcb.state.lock();
        let connected = state.flags & UdpFlags::CONNECTED;
        state.flags = (flags - UdpFlags::CONNECTED) | connected;
    }

    pub fn udp_close(&self, pcb: &Arc<UdpPcb>) {
        self.udp_pcbs.lock().retain(|p| !Arc::ptr_eq(p, pcb));
        let dropped = pcb.rx.close(&*self.runtime);
        let port = {
            let mut state = pcb.state.lock();
            let port = state.bound.then_some(state.local.port);
            state.bound = false;
            port
        };
        if let Some(port) = port {
            self.port_put(port);
        }
        klog_debug!("udp: closed, {} datagrams dropped", dropped);
    }

    /// Deliver an inbound datagram to the first matching PCB.
    pub fn udp_input(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        let meta = match parse(netif, buf.frame()) {
            Ok(meta) => meta,
            Err(err) => {
                self.stats.bump(&self.stats.udp_rx_errors);
                return Err(err);
            }
        };

        let pcb = {
            let pcbs = self.udp_pcbs.lock();
            pcbs.iter().find(|p| p.accepts(meta.src, meta.dst)).cloned()
        };
        let Some(pcb) = pcb else {
            self.stats.bump(&self.stats.udp_no_port);
            klog_debug!("udp: no socket for {} from {}, dropped", meta.dst, meta.src);
            return Err(NetError::AddressNotAvailable);
        };

        klog_trace!("udp: {} bytes {} -> {}", meta.len, meta.src, meta.dst);
        self.rx_deliver(
            &pcb.rx,
            UdpEntry {
                buf,
                from: meta.src,
                offset: UDP_OFFSET + UDP_HEADER_LEN,
                len: meta.len,
            },
        );
        Ok(())
    }

    /// Copy the oldest datagram's payload into `out`, blocking while none
    /// is queued.  Returns the bytes copied and the sender.
    pub fn udp_recv_from(&self, pcb: &UdpPcb, out: &mut [u8]) -> Result<(usize, SockAddr)> {
        let entry = pcb.rx.pop(&*self.runtime)?;
        Ok((copy_out(out, entry.payload()), entry.from))
    }

    pub fn udp_try_recv_from(&self, pcb: &UdpPcb, out: &mut [u8]) -> Result<(usize, SockAddr)> {
        let entry = pcb.rx.try_pop().ok_or(NetError::WouldBlock)?;
        Ok((copy_out(out, entry.payload()), entry.from))
    }

    /// Send `payload` to `dst`, or to the connected peer.
    pub fn udp_send_to(&self, pcb: &UdpPcb, dst: Option<SockAddr>, payload: &[u8]) -> Result<usize> {
        if payload.len() > UDP_MAX_PAYLOAD {
            return Err(NetError::MessageTooLong);
        }
        if !pcb.is_bound() {
            self.udp_bind(pcb, SockAddr::ANY)?;
        }
        let state = *pcb.state.lock();
        let dst = match dst {
            Some(dst) => dst,
            None if state.flags.contains(UdpFlags::CONNECTED) => state.remote,
            None => SockAddr::ANY,
        };
        if dst.ip.is_unspecified() {
            return Err(NetError::AddressNotAvailable);
        }
        if dst.port == 0 {
            return Err(NetError::NotConnected);
        }

        let netif = self.route(dst.ip)?;
        if netif.is_broadcast(dst.ip) && !state.flags.contains(UdpFlags::BROADCAST) {
            return Err(NetError::PermissionDenied);
        }

        let udp_len = UDP_HEADER_LEN + payload.len();
        let mut buf = self.pool.acquire()?;
        {
            let data = buf.data_mut();
            let mut udp = UdpDatagram::new_checked(&mut data[UDP_OFFSET..UDP_OFFSET + udp_len])?;
            udp.set_src_port(state.local.port);
            udp.set_dst_port(dst.port);
            udp.set_len(udp_len as u16);
            udp.set_checksum(0);
            udp.payload_mut().copy_from_slice(payload);
            if !state.flags.contains(UdpFlags::NOCHKSUM) && !netif.flags.contains(NetifFlags::UDP_TX) {
                udp.fill_checksum(netif.ip, dst.ip);
            }
        }
        self.ip_output(&netif, buf, dst.ip, IpProtocol::Udp.as_u8(), udp_len)?;
        Ok(payload.len())
    }
}
