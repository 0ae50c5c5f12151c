//! ICMP echo responder and originator.

use kestrel_lib::{klog_debug, klog_info};

use crate::ipv4::IP_OFFSET;
use crate::netif::Netif;
use crate::pbuf::Pbuf;
use crate::stack::NetStack;
use crate::types::{IpProtocol, Ipv4Addr, NetError, Result};
use crate::wire::icmp::{self, TYPE_ECHO_REPLY, TYPE_ECHO_REQUEST};
use crate::wire::ipv4::HEADER_LEN;
use crate::wire::{IcmpEcho, Ipv4Packet};

/// Payload of every echo request this stack originates.
pub const ECHO_PAYLOAD: &[u8] = b"kestrel icmp echo 1234567890 asdfghjkl;'\0";
pub const ECHO_IDENT: u16 = 1;
pub const ECHO_SEQ: u16 = 1;

const ICMP_OFFSET: usize = IP_OFFSET + HEADER_LEN;

/// Source, destination and ICMP length of the datagram in `buf`.
///
/// The ICMP message must fit the buffer behind an option-less header.
fn addressing(buf: &Pbuf) -> Result<(Ipv4Addr, Ipv4Addr, usize)> {
    let frame = buf.frame();
    let ip = Ipv4Packet::new_checked(frame.get(IP_OFFSET..).unwrap_or(&[]))?;
    let icmp_len = ip.total_len().saturating_sub(HEADER_LEN);
    if ip.header_len() != HEADER_LEN
        || icmp_len < icmp::HEADER_LEN
        || ICMP_OFFSET + icmp_len > frame.len()
    {
        klog_debug!("icmp: {} bytes from {} truncated", icmp_len, ip.src());
        return Err(NetError::ProtocolMismatch);
    }
    Ok((ip.src(), ip.dst(), icmp_len))
}

impl NetStack {
    pub fn icmp_input(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        let (src, _, icmp_len) = addressing(&buf)?;
        let frame = buf.frame();
        let icmp = IcmpEcho::new_checked(&frame[ICMP_OFFSET..ICMP_OFFSET + icmp_len])?;
        match icmp.msg_type() {
            TYPE_ECHO_REPLY => {
                klog_info!(
                    "icmp: echo reply from {} id {} seq {} ({} bytes)",
                    src,
                    icmp.ident(),
                    icmp.seq(),
                    icmp_len
                );
                Ok(())
            }
            TYPE_ECHO_REQUEST => self.icmp_echo_reply(netif, buf),
            other => {
                klog_debug!("icmp: type {} from {} ignored", other, src);
                Ok(())
            }
        }
    }

    /// Turn an echo request into the reply and send it back to its source.
    ///
    /// Requests to a broadcast, multicast or foreign address are refused
    /// without touching the buffer.
    pub fn icmp_echo_reply(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        let (src, dst, icmp_len) = addressing(&buf)?;
        let local = if netif.is_loopback() {
            self.is_local_addr(dst)
        } else {
            dst == netif.ip
        };
        if netif.is_broadcast(dst) || dst.is_multicast() || !local {
            klog_debug!("icmp: no echo reply for request to {}", dst);
            return Err(NetError::ProtocolMismatch);
        }

        let mut buf = buf.into_unique()?;
        {
            let frame = buf.frame_mut();
            let mut icmp = IcmpEcho::new_checked(&mut frame[ICMP_OFFSET..ICMP_OFFSET + icmp_len])?;
            icmp.set_msg_type(TYPE_ECHO_REPLY);
            icmp.fill_checksum();
        }
        self.ip_output(netif, buf, src, IpProtocol::Icmp.as_u8(), icmp_len)
    }

    /// Send one echo request to `dst`.
    pub fn icmp_echo(&self, dst: Ipv4Addr) -> Result<()> {
        let netif = self.route(dst)?;
        let mut buf = self.pool.acquire()?;
        let icmp_len = icmp::HEADER_LEN + ECHO_PAYLOAD.len();
        {
            let data = buf.data_mut();
            let mut icmp = IcmpEcho::new_checked(&mut data[ICMP_OFFSET..ICMP_OFFSET + icmp_len])?;
            icmp.set_msg_type(TYPE_ECHO_REQUEST);
            icmp.set_code(0);
            icmp.set_ident(ECHO_IDENT);
            icmp.set_seq(ECHO_SEQ);
            icmp.payload_mut().copy_from_slice(ECHO_PAYLOAD);
            icmp.fill_checksum();
        }
        self.ip_output(&netif, buf, dst, IpProtocol::Icmp.as_u8(), icmp_len)
    }
}
