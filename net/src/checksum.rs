//! Checksum engine: CRC-32 frame check and the Internet checksum family.
//!
//! All routines are pure.  Checksum fields inside the summed range must be
//! zero before computing; verifying a region that already carries its
//! checksum yields zero from [`inet_checksum`].

use crate::types::Ipv4Addr;

const CRC32_POLY: u32 = 0xEDB8_8320;

/// Reflected CRC-32 (IEEE 802.3): init all-ones, final complement.
///
/// Also used for whole-image integrity checks outside the network path.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = u32::MAX;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (CRC32_POLY & mask);
        }
    }
    !crc
}

/// Add big-endian 16-bit words of `data` into `sum`.  An odd trailing byte is
/// treated as the high half of a zero-padded word.
#[inline]
fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([pair[0], pair[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }
    sum
}

#[inline]
fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Internet checksum (RFC 1071) of `data`, ready to store big-endian.
pub fn inet_checksum(data: &[u8]) -> u16 {
    !fold(sum_words(0, data))
}

/// `true` if `data`, checksum field included, sums to zero.
pub fn verify(data: &[u8]) -> bool {
    inet_checksum(data) == 0
}

/// Internet checksum over `data` preceded by the IPv4 pseudo-header.
///
/// `len` is the transport length carried in the pseudo-header, normally
/// `data.len()`.
pub fn pseudo_checksum(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, proto: u8, len: u16) -> u16 {
    let mut sum = sum_words(0, &dst.0);
    sum = sum_words(sum, &src.0);
    sum = sum.wrapping_add(proto as u32);
    sum = sum.wrapping_add(len as u32);
    !fold(sum_words(sum, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn rfc1071_example_words() {
        // Sum 0x0001 + 0xf203 + 0xf4f5 + 0xf6f7 = 0x2ddf0 -> folded 0xddf2.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(inet_checksum(&data), !0xddf2);
    }

    #[test]
    fn odd_length_pads_trailing_byte() {
        assert_eq!(inet_checksum(&[0xab]), !0xab00);
        assert_eq!(inet_checksum(&[0x12, 0x34, 0xab]), !(0x1234u16 + 0xab00));
    }

    #[test]
    fn storing_checksum_makes_region_verify() {
        let mut header = [
            0x45, 0x00, 0x00, 0x54, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x01, 0x00, 0x00, 0xc0, 0xa8,
            0x6f, 0x01, 0xc0, 0xa8, 0x6f, 0x21,
        ];
        let sum = inet_checksum(&header);
        header[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(verify(&header));

        for len in [2usize, 8, 64, 334] {
            let mut data: alloc::vec::Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            data.extend_from_slice(&[0, 0]);
            let sum = inet_checksum(&data);
            data[len..].copy_from_slice(&sum.to_be_bytes());
            assert!(verify(&data));
        }
    }

    #[test]
    fn pseudo_header_matches_manual_sum() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let udp = [0x04, 0x00, 0x00, 0x35, 0x00, 0x0a, 0x00, 0x00, 0x68, 0x69];

        let mut manual = alloc::vec::Vec::new();
        manual.extend_from_slice(&src.0);
        manual.extend_from_slice(&dst.0);
        manual.extend_from_slice(&[0, 17, 0, 10]);
        manual.extend_from_slice(&udp);

        assert_eq!(pseudo_checksum(&udp, src, dst, 17, 10), inet_checksum(&manual));
    }
}
