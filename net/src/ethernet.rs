//! Ethernet dispatch.
//!
//! Inbound frames are offered to packet capture first; a frame no packet
//! PCB takes is dispatched on its type field.  Outbound, the header is
//! written in front of a payload the upper layer already placed at offset
//! [`HEADER_LEN`].

use kestrel_lib::klog_debug;

use crate::netif::Netif;
use crate::pbuf::Pbuf;
use crate::pcb::Delivery;
use crate::stack::NetStack;
use crate::types::{EtherType, MacAddr, NetError, Result};
use crate::wire::EthernetFrame;
use crate::wire::ethernet::HEADER_LEN;

impl NetStack {
    pub fn eth_input(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        let ethertype = match EthernetFrame::new_checked(buf.frame()) {
            Ok(eth) => eth.ethertype(),
            Err(err) => {
                klog_debug!("eth: runt frame of {} bytes on {}", buf.len(), netif.index);
                return Err(err);
            }
        };

        let buf = match self.pkt_input(netif, buf)? {
            Delivery::Consumed => return Ok(()),
            Delivery::Declined(buf) => buf,
        };

        match EtherType::from_u16(ethertype) {
            Some(EtherType::Ipv4) => self.ip_input(netif, buf),
            Some(EtherType::Arp) => self.arp_input(netif, buf),
            Some(EtherType::Ipv6) => Ok(()),
            None => {
                klog_debug!("eth: unknown type {:#06x} on {}", ethertype, netif.index);
                Err(NetError::ProtocolMismatch)
            }
        }
    }

    /// Frame `len` payload bytes already at offset [`HEADER_LEN`] and send
    /// them to `dst`.
    pub fn eth_output(
        &self,
        netif: &Netif,
        buf: Pbuf,
        dst: MacAddr,
        ethertype: EtherType,
        len: usize,
    ) -> Result<()> {
        let mut buf = buf.into_unique()?;
        if HEADER_LEN + len > buf.capacity() {
            return Err(NetError::MessageTooLong);
        }
        buf.set_len(HEADER_LEN + len);
        let mut eth = EthernetFrame::new_checked(buf.frame_mut())?;
        eth.set_dst(dst);
        eth.set_src(netif.mac);
        eth.set_ethertype(ethertype.as_u16());
        self.netif_output(netif, buf)
    }
}
