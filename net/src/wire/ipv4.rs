use crate::checksum;
use crate::types::{Ipv4Addr, NetError, Result};
use crate::wire::{read_u16, write_u16};

/// Header length without options; the only form this core emits.
pub const HEADER_LEN: usize = 20;
/// Largest datagram that fits one Ethernet frame.
pub const IP_MTU: usize = 1500;

/// "More fragments" bit within the flags/offset word.
pub const FLAG_MF: u16 = 0x2000;
/// "Don't fragment".
pub const FLAG_DF: u16 = 0x4000;
const OFFSET_MASK: u16 = 0x1fff;

mod field {
    use core::ops::Range;

    pub const VER_IHL: usize = 0;
    pub const TOS: usize = 1;
    pub const TOTAL_LEN: usize = 2;
    pub const IDENT: usize = 4;
    pub const FLAGS_FRAG: usize = 6;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: usize = 10;
    pub const SRC: Range<usize> = 12..16;
    pub const DST: Range<usize> = 16..20;
}

/// IPv4 header followed by its payload.
#[derive(Debug)]
pub struct Ipv4Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4Packet<T> {
    /// Reject buffers shorter than the fixed header.  Field validation
    /// (version, lengths, checksum) is the input path's job.
    pub fn new_checked(buffer: T) -> Result<Self> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(NetError::ProtocolMismatch);
        }
        Ok(Self { buffer })
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    /// Header length in bytes (IHL * 4).
    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::VER_IHL] & 0x0f) as usize) * 4
    }

    pub fn tos(&self) -> u8 {
        self.buffer.as_ref()[field::TOS]
    }

    pub fn total_len(&self) -> usize {
        read_u16(self.buffer.as_ref(), field::TOTAL_LEN) as usize
    }

    pub fn ident(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::IDENT)
    }

    pub fn more_fragments(&self) -> bool {
        read_u16(self.buffer.as_ref(), field::FLAGS_FRAG) & FLAG_MF != 0
    }

    pub fn dont_fragment(&self) -> bool {
        read_u16(self.buffer.as_ref(), field::FLAGS_FRAG) & FLAG_DF != 0
    }

    /// Fragment offset in 8-byte units.
    pub fn frag_offset(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::FLAGS_FRAG) & OFFSET_MASK
    }

    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.frag_offset() != 0
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[field::PROTOCOL]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::SRC])
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::DST])
    }

    /// Header checksum over `header_len` bytes.  Callers check that the
    /// buffer holds that many bytes first.
    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.buffer.as_ref()[..self.header_len()])
    }

    /// Bytes between the header and `total_len`.
    pub fn payload(&self) -> &[u8] {
        let buf = self.buffer.as_ref();
        let end = self.total_len().min(buf.len());
        let start = self.header_len().min(end);
        &buf[start..end]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Packet<T> {
    /// Version 4, no options.
    pub fn set_version_ihl(&mut self) {
        self.buffer.as_mut()[field::VER_IHL] = 0x45;
    }

    pub fn set_tos(&mut self, tos: u8) {
        self.buffer.as_mut()[field::TOS] = tos;
    }

    pub fn set_total_len(&mut self, len: u16) {
        write_u16(self.buffer.as_mut(), field::TOTAL_LEN, len);
    }

    pub fn set_ident(&mut self, ident: u16) {
        write_u16(self.buffer.as_mut(), field::IDENT, ident);
    }

    /// Flags and fragment offset as one word.
    pub fn set_flags_frag(&mut self, word: u16) {
        write_u16(self.buffer.as_mut(), field::FLAGS_FRAG, word);
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[field::TTL] = ttl;
    }

    pub fn set_protocol(&mut self, proto: u8) {
        self.buffer.as_mut()[field::PROTOCOL] = proto;
    }

    pub fn set_src(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(&addr.0);
    }

    pub fn set_dst(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::DST].copy_from_slice(&addr.0);
    }

    /// Exchange source and destination.
    pub fn swap_addrs(&mut self) {
        let (src, dst) = (self.src(), self.dst());
        self.set_src(dst);
        self.set_dst(src);
    }

    /// Leave the checksum to the hardware.
    pub fn set_checksum_zero(&mut self) {
        write_u16(self.buffer.as_mut(), field::CHECKSUM, 0);
    }

    /// Zero the checksum field, then store the checksum of the header.
    pub fn fill_checksum(&mut self) {
        let hlen = self.header_len();
        let buf = self.buffer.as_mut();
        write_u16(buf, field::CHECKSUM, 0);
        let sum = checksum::inet_checksum(&buf[..hlen]);
        write_u16(buf, field::CHECKSUM, sum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let hlen = self.header_len();
        &mut self.buffer.as_mut()[hlen..]
    }
}
