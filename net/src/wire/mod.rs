//! Bounds-checked views over wire-format headers.
//!
//! Each view wraps a byte slice (`T: AsRef<[u8]>`, plus `AsMut<[u8]>` for
//! setters) and reads or writes fields at fixed offsets.  Multi-byte fields are
//! big-endian on the wire and host-order at the accessor, so no layer ever
//! sees a network-order integer.  `new_checked` rejects buffers too short for
//! the fixed header; nothing is copied.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod udp;

pub use arp::ArpPacket;
pub use ethernet::EthernetFrame;
pub use icmp::IcmpEcho;
pub use ipv4::Ipv4Packet;
pub use udp::UdpDatagram;

#[inline]
pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub(crate) fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}
