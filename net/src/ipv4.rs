//! IPv4 input validation, protocol dispatch, datagram construction and
//! routing.
//!
//! The IP header always sits at [`IP_OFFSET`] in the frame.  Output expects
//! the transport layer to have placed `len` bytes at
//! `IP_OFFSET + HEADER_LEN` and fills the header in front of them.
//!
//! # Routing
//!
//! There is a single physical interface plus loopback:
//!
//! - `127/8` goes to the loopback interface;
//! - an address owned by an interface goes to that interface, and IP output
//!   then takes the loopback shortcut since the datagram is for us;
//! - everything else goes to the first physical interface, where ARP picks
//!   the next hop (on-link or gateway).
//!
//! Fragments are neither reassembled nor generated.  Inbound fragment bits
//! are left as received and the datagram is delivered as is.

use kestrel_lib::{klog_debug, klog_trace};

use crate::config::IP_MTU;
use crate::netif::{Netif, NetifFlags};
use crate::pbuf::Pbuf;
use crate::pcb::Delivery;
use crate::stack::NetStack;
use crate::types::{EtherType, IpProtocol, Ipv4Addr, NetError, Result};
use crate::wire::ethernet;
use crate::wire::ipv4::HEADER_LEN;
use crate::wire::{EthernetFrame, Ipv4Packet};

/// Offset of the IPv4 header inside a frame.
pub const IP_OFFSET: usize = ethernet::HEADER_LEN;

/// Receiver for a transport protocol the core only demultiplexes.
///
/// The TCP state machine registers one with
/// [`NetStack::set_tcp_hook`].  `buf` holds the whole frame with the IPv4
/// header at [`IP_OFFSET`].
pub trait TransportHook: Send + Sync {
    fn input(&self, stack: &NetStack, netif: &Netif, buf: Pbuf) -> Result<()>;
}

/// Header fields input needs after validation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct IpMeta {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
}

/// Validate the datagram in `frame` for `netif`.
fn validate(stack: &NetStack, netif: &Netif, frame: &[u8]) -> Result<IpMeta> {
    let ip = Ipv4Packet::new_checked(frame.get(IP_OFFSET..).unwrap_or(&[]))?;
    if ip.version() != 4 {
        klog_debug!("ip: version {} dropped", ip.version());
        return Err(NetError::ProtocolMismatch);
    }
    if ip.header_len() != HEADER_LEN {
        klog_debug!("ip: options unsupported (ihl {})", ip.header_len() / 4);
        return Err(NetError::ProtocolMismatch);
    }
    let total_len = ip.total_len();
    if total_len < HEADER_LEN || IP_OFFSET + total_len > frame.len() {
        klog_debug!("ip: total length {} bad for {}-byte frame", total_len, frame.len());
        return Err(NetError::ProtocolMismatch);
    }
    if ip.ttl() == 0 {
        klog_debug!("ip: ttl expired from {}", ip.src());
        return Err(NetError::ProtocolMismatch);
    }
    if !netif.flags.contains(NetifFlags::IP_RX) && !ip.verify_checksum() {
        klog_debug!("ip: bad header checksum from {}", ip.src());
        return Err(NetError::ProtocolMismatch);
    }

    let dst = ip.dst();
    let for_us = if netif.is_loopback() {
        stack.is_local_addr(dst)
    } else {
        dst == netif.ip || netif.is_broadcast(dst)
    };
    if !for_us {
        klog_trace!("ip: {} not for {}", dst, netif.index);
        return Err(NetError::AddressNotAvailable);
    }
    if ip.is_fragment() {
        klog_trace!("ip: fragment id {} from {} passed through", ip.ident(), ip.src());
    }

    Ok(IpMeta {
        src: ip.src(),
        dst,
        protocol: ip.protocol(),
    })
}

impl NetStack {
    pub fn ip_input(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        let meta = match validate(self, netif, buf.frame()) {
            Ok(meta) => meta,
            Err(err) => {
                self.stats.bump(&self.stats.ip_rx_dropped);
                return Err(err);
            }
        };

        let Some(protocol) = IpProtocol::from_u8(meta.protocol) else {
            return match self.raw_input(&meta, buf, true)? {
                Delivery::Consumed => Ok(()),
                Delivery::Declined(_) => {
                    self.stats.bump(&self.stats.ip_unknown_proto);
                    klog_debug!(
                        "ip: protocol {} from {} to {} dropped",
                        meta.protocol,
                        meta.src,
                        meta.dst
                    );
                    Err(NetError::ProtocolMismatch)
                }
            };
        };

        let buf = match self.raw_input(&meta, buf, false)? {
            Delivery::Consumed => return Ok(()),
            Delivery::Declined(buf) => buf,
        };

        match protocol {
            IpProtocol::Icmp => self.icmp_input(netif, buf),
            IpProtocol::Udp => self.udp_input(netif, buf),
            IpProtocol::Tcp => {
                let hook = self.tcp_hook.lock().clone();
                match hook {
                    Some(hook) => hook.input(self, netif, buf),
                    None => {
                        self.stats.bump(&self.stats.tcp_no_hook);
                        klog_trace!("ip: no tcp hook, segment from {} dropped", meta.src);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Fill the IPv4 header in front of `len` transport bytes and send the
    /// datagram to `dst`.
    pub fn ip_output(
        &self,
        netif: &Netif,
        buf: Pbuf,
        dst: Ipv4Addr,
        protocol: u8,
        len: usize,
    ) -> Result<()> {
        let total = HEADER_LEN + len;
        if total > IP_MTU {
            return Err(NetError::MessageTooLong);
        }
        let mut buf = buf.into_unique()?;
        {
            let data = buf.data_mut();
            let mut ip = Ipv4Packet::new_checked(&mut data[IP_OFFSET..IP_OFFSET + total])?;
            ip.set_version_ihl();
            ip.set_tos(0);
            ip.set_total_len(total as u16);
            ip.set_ident(self.next_ip_id());
            ip.set_flags_frag(0);
            ip.set_ttl(self.config.default_ttl);
            ip.set_protocol(protocol);
            ip.set_dst(dst);
            ip.set_src(netif.ip);
            if netif.flags.contains(NetifFlags::IP_TX) {
                ip.set_checksum_zero();
            } else {
                ip.fill_checksum();
            }
        }

        if netif.is_loopback() || dst == netif.ip || dst.is_loopback() {
            return self.loopback_output(buf, total);
        }
        self.arp_eth_output(netif, buf, dst, EtherType::Ipv4, total)
    }

    /// Hand a finished datagram of `total` bytes straight to the loopback
    /// interface.
    fn loopback_output(&self, mut buf: Pbuf, total: usize) -> Result<()> {
        let lo = self.netif(self.loopback)?;
        buf.set_len(IP_OFFSET + total);
        {
            let mut eth = EthernetFrame::new_checked(buf.frame_mut())?;
            eth.set_dst(lo.mac);
            eth.set_src(lo.mac);
            eth.set_ethertype(EtherType::Ipv4.as_u16());
        }
        klog_trace!("ip: {} bytes via loopback", total);
        self.netif_output(&lo, buf)
    }

    /// Pick the interface that sends toward `dst`.
    pub fn route(&self, dst: Ipv4Addr) -> Result<Netif> {
        let table = self.netifs.lock();
        if dst.is_loopback() {
            return table
                .get(self.loopback.0)
                .cloned()
                .ok_or(NetError::NetworkUnreachable);
        }
        if let Some(owner) = table.iter().find(|n| n.is_configured() && n.ip == dst) {
            return Ok(owner.clone());
        }
        table
            .iter()
            .find(|n| !n.is_loopback() && n.has_output())
            .cloned()
            .ok_or(NetError::NetworkUnreachable)
    }
}
