use crate::checksum;
use crate::types::{IpProtocol, Ipv4Addr, NetError, Result};
use crate::wire::{read_u16, write_u16};

pub const HEADER_LEN: usize = 8;

mod field {
    pub const SRC_PORT: usize = 0;
    pub const DST_PORT: usize = 2;
    pub const LENGTH: usize = 4;
    pub const CHECKSUM: usize = 6;
}

/// UDP header followed by its payload.  The slice must span exactly the
/// datagram (header plus payload) for checksum routines to be meaningful.
#[derive(Debug)]
pub struct UdpDatagram<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> UdpDatagram<T> {
    pub fn new_checked(buffer: T) -> Result<Self> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(NetError::ProtocolMismatch);
        }
        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::SRC_PORT)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::DST_PORT)
    }

    /// Length field: header plus payload.
    pub fn len(&self) -> usize {
        read_u16(self.buffer.as_ref(), field::LENGTH) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= HEADER_LEN
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    /// Payload bounded by the length field and the slice.
    pub fn payload(&self) -> &[u8] {
        let buf = self.buffer.as_ref();
        let end = self.len().clamp(HEADER_LEN, buf.len());
        &buf[HEADER_LEN..end]
    }

    /// Checksum 0 means the sender did not compute one.
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        let buf = self.buffer.as_ref();
        let len = self.len().min(buf.len());
        checksum::pseudo_checksum(&buf[..len], src, dst, IpProtocol::Udp.as_u8(), len as u16) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpDatagram<T> {
    pub fn set_src_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), field::SRC_PORT, port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), field::DST_PORT, port);
    }

    pub fn set_len(&mut self, len: u16) {
        write_u16(self.buffer.as_mut(), field::LENGTH, len);
    }

    pub fn set_checksum(&mut self, sum: u16) {
        write_u16(self.buffer.as_mut(), field::CHECKSUM, sum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[HEADER_LEN..]
    }

    /// Pseudo-header checksum over the datagram.  A computed zero goes out
    /// as `0xffff`, since zero on the wire means "no checksum".
    pub fn fill_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr) {
        let len = self.len();
        let buf = self.buffer.as_mut();
        write_u16(buf, field::CHECKSUM, 0);
        let sum = checksum::pseudo_checksum(&buf[..len], src, dst, IpProtocol::Udp.as_u8(), len as u16);
        write_u16(buf, field::CHECKSUM, if sum == 0 { 0xffff } else { sum });
    }
}
