use crate::checksum;
use crate::types::{NetError, Result};
use crate::wire::{read_u16, write_u16};

/// Type, code, checksum, identifier and sequence.
pub const HEADER_LEN: usize = 8;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_ECHO_REQUEST: u8 = 8;

mod field {
    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: usize = 2;
    pub const IDENT: usize = 4;
    pub const SEQ: usize = 6;
}

/// ICMP echo request or reply.  The slice spans the whole ICMP message, so
/// the checksum covers exactly `buffer.len()` bytes.
#[derive(Debug)]
pub struct IcmpEcho<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpEcho<T> {
    pub fn new_checked(buffer: T) -> Result<Self> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(NetError::ProtocolMismatch);
        }
        Ok(Self { buffer })
    }

    pub fn msg_type(&self) -> u8 {
        self.buffer.as_ref()[field::TYPE]
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    pub fn ident(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::IDENT)
    }

    pub fn seq(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::SEQ)
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify(self.buffer.as_ref())
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IcmpEcho<T> {
    pub fn set_msg_type(&mut self, ty: u8) {
        self.buffer.as_mut()[field::TYPE] = ty;
    }

    pub fn set_code(&mut self, code: u8) {
        self.buffer.as_mut()[field::CODE] = code;
    }

    pub fn set_ident(&mut self, ident: u16) {
        write_u16(self.buffer.as_mut(), field::IDENT, ident);
    }

    pub fn set_seq(&mut self, seq: u16) {
        write_u16(self.buffer.as_mut(), field::SEQ, seq);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[HEADER_LEN..]
    }

    pub fn fill_checksum(&mut self) {
        let buf = self.buffer.as_mut();
        write_u16(buf, field::CHECKSUM, 0);
        let sum = checksum::inet_checksum(buf);
        write_u16(buf, field::CHECKSUM, sum);
    }
}
