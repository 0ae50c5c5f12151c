use crate::types::{Ipv4Addr, MacAddr, NetError, Result};
use crate::wire::{read_u16, write_u16};

/// Ethernet/IPv4 ARP message length.
pub const PACKET_LEN: usize = 28;

pub const HTYPE_ETHERNET: u16 = 1;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

mod field {
    use core::ops::Range;

    pub const HTYPE: usize = 0;
    pub const PTYPE: usize = 2;
    pub const HLEN: usize = 4;
    pub const PLEN: usize = 5;
    pub const OPER: usize = 6;
    pub const SHA: Range<usize> = 8..14;
    pub const SPA: Range<usize> = 14..18;
    pub const THA: Range<usize> = 18..24;
    pub const TPA: Range<usize> = 24..28;
}

/// ARP message for Ethernet hardware and IPv4 protocol addresses.
#[derive(Debug)]
pub struct ArpPacket<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> ArpPacket<T> {
    pub fn new_checked(buffer: T) -> Result<Self> {
        if buffer.as_ref().len() < PACKET_LEN {
            return Err(NetError::ProtocolMismatch);
        }
        Ok(Self { buffer })
    }

    pub fn hardware_type(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::HTYPE)
    }

    pub fn protocol_type(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::PTYPE)
    }

    pub fn hardware_len(&self) -> u8 {
        self.buffer.as_ref()[field::HLEN]
    }

    pub fn protocol_len(&self) -> u8 {
        self.buffer.as_ref()[field::PLEN]
    }

    pub fn operation(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::OPER)
    }

    pub fn sender_hw(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::SHA])
    }

    pub fn sender_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::SPA])
    }

    pub fn target_hw(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::THA])
    }

    pub fn target_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::TPA])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> ArpPacket<T> {
    /// Write the fixed Ethernet/IPv4 preamble (types and address lengths).
    pub fn set_ethernet_ipv4(&mut self) {
        let buf = self.buffer.as_mut();
        write_u16(buf, field::HTYPE, HTYPE_ETHERNET);
        write_u16(buf, field::PTYPE, crate::types::EtherType::Ipv4.as_u16());
        buf[field::HLEN] = 6;
        buf[field::PLEN] = 4;
    }

    pub fn set_operation(&mut self, op: u16) {
        write_u16(self.buffer.as_mut(), field::OPER, op);
    }

    pub fn set_sender(&mut self, hw: MacAddr, ip: Ipv4Addr) {
        let buf = self.buffer.as_mut();
        buf[field::SHA].copy_from_slice(&hw.0);
        buf[field::SPA].copy_from_slice(&ip.0);
    }

    pub fn set_target(&mut self, hw: MacAddr, ip: Ipv4Addr) {
        let buf = self.buffer.as_mut();
        buf[field::THA].copy_from_slice(&hw.0);
        buf[field::TPA].copy_from_slice(&ip.0);
    }
}
