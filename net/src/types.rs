//! Addresses, protocol numbers and the error type shared by every layer.
//!
//! Addresses are kept in wire order (`[u8; N]`) so they can be copied to and
//! from headers without conversion.  Classification helpers here are the only
//! place address semantics (broadcast, multicast, subnet membership) live.

use core::fmt;
use core::str::FromStr;

use kestrel_abi::net::{AF_INET, SockAddrIn};

// =============================================================================
// Addresses
// =============================================================================

/// IPv4 address stored in **network byte order**.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// `0.0.0.0`: unconfigured, or "any" in a PCB endpoint.
    pub const UNSPECIFIED: Self = Self([0, 0, 0, 0]);
    /// `255.255.255.255`, the limited broadcast.
    pub const BROADCAST: Self = Self([255, 255, 255, 255]);
    pub const LOCALHOST: Self = Self([127, 0, 0, 1]);

    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    #[inline]
    pub const fn from_u32(val: u32) -> Self {
        Self(val.to_be_bytes())
    }

    #[inline]
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Copy out of a 4-byte wire field.  Shorter slices yield `0.0.0.0`.
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Self {
        match <[u8; 4]>::try_from(bytes) {
            Ok(raw) => Self(raw),
            Err(_) => Self::UNSPECIFIED,
        }
    }

    #[inline]
    pub const fn octets(&self) -> [u8; 4] {
        self.0
    }

    /// In `127.0.0.0/8`.
    #[inline]
    pub const fn is_loopback(&self) -> bool {
        self.0[0] == 127
    }

    /// Exactly `255.255.255.255`.
    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.to_u32() == u32::MAX
    }

    /// In `224.0.0.0/4`.
    #[inline]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0xf0 == 0xe0
    }

    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        self.to_u32() == 0
    }

    /// `self` and `other` share the network part under `mask`.
    #[inline]
    pub const fn same_subnet(&self, other: Ipv4Addr, mask: Ipv4Addr) -> bool {
        (self.to_u32() & mask.to_u32()) == (other.to_u32() & mask.to_u32())
    }

    /// Directed broadcast of the subnet `self` lives in.
    #[inline]
    pub const fn subnet_broadcast(&self, mask: Ipv4Addr) -> Ipv4Addr {
        Self::from_u32(self.to_u32() | !mask.to_u32())
    }

    /// Limited broadcast, or an address whose host part under `mask` is all
    /// ones.  A /32 mask has no host part and so no directed broadcast.
    pub const fn is_broadcast_in(&self, mask: Ipv4Addr) -> bool {
        if self.is_broadcast() {
            return true;
        }
        let host = !mask.to_u32();
        host != 0 && (self.to_u32() & host) == host
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Dotted-quad parser: exactly four decimal parts, each 0..=255.
impl FromStr for Ipv4Addr {
    type Err = NetError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(NetError::InvalidArgument)?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(NetError::InvalidArgument);
            }
            let value: u16 = part.parse().map_err(|_| NetError::InvalidArgument)?;
            *octet = u8::try_from(value).map_err(|_| NetError::InvalidArgument)?;
        }
        if parts.next().is_some() {
            return Err(NetError::InvalidArgument);
        }
        Ok(Self(octets))
    }
}

/// Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);
    /// All zeros: unknown, or "any" in a packet PCB endpoint.
    pub const ZERO: Self = Self([0; 6]);

    /// Copy out of a 6-byte wire field.  Shorter slices yield the zero address.
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Self {
        match <[u8; 6]>::try_from(bytes) {
            Ok(raw) => Self(raw),
            Err(_) => Self::ZERO,
        }
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit of the first octet.
    #[inline]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Interface index inside one [`NetStack`](crate::NetStack).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IfIndex(pub usize);

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// IPv4 endpoint: address plus host-order port.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SockAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl SockAddr {
    pub const ANY: Self = Self {
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    #[inline]
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse a userspace [`SockAddrIn`], rejecting other families.
    pub fn from_user(raw: &SockAddrIn) -> Result<Self> {
        if raw.family != AF_INET {
            return Err(NetError::InvalidArgument);
        }
        Ok(Self {
            ip: Ipv4Addr(raw.addr),
            port: u16::from_be(raw.port),
        })
    }

    pub fn to_user(&self) -> SockAddrIn {
        SockAddrIn {
            family: AF_INET,
            port: self.port.to_be(),
            addr: self.ip.0,
            _pad: [0; 8],
        }
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// =============================================================================
// Protocol numbers
// =============================================================================

/// Ethernet type field values this core knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
    Ipv6 = 0x86DD,
}

impl EtherType {
    #[inline]
    pub const fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x0800 => Some(Self::Ipv4),
            0x0806 => Some(Self::Arp),
            0x86DD => Some(Self::Ipv6),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// IP protocol numbers this core dispatches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl IpProtocol {
    #[inline]
    pub const fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::Icmp),
            6 => Some(Self::Tcp),
            17 => Some(Self::Udp),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => write!(f, "ICMP"),
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

// =============================================================================
// NetError
// =============================================================================

/// Recoverable failures of the network core.
///
/// Programming errors (over-release, misaligned buffers, port double free)
/// are assertions, not variants.  Conversion to errno happens at the syscall
/// boundary via [`to_errno`](Self::to_errno).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Frame or datagram is malformed or not handled at this layer (EPROTO).
    ProtocolMismatch,
    /// ARP request sent; the datagram was dropped (EAGAIN).
    ResolutionPending,
    /// ARP gave up on the next hop (EHOSTUNREACH).
    HostUnreachable,
    /// No interface can reach the destination (ENETUNREACH).
    NetworkUnreachable,
    /// Explicit port already bound (EADDRINUSE).
    AddressInUse,
    /// Every ephemeral port is taken (EADDRINUSE).
    PortExhausted,
    /// Address is not local, or nobody listens on it (EADDRNOTAVAIL).
    AddressNotAvailable,
    /// Page allocator could not back a new buffer (ENOBUFS).
    NoBufferSpace,
    /// No destination port or peer (ENOTCONN).
    NotConnected,
    /// Broadcast without the broadcast flag (EACCES).
    PermissionDenied,
    /// Payload does not fit in one frame (EMSGSIZE).
    MessageTooLong,
    InvalidArgument,
    /// Interface has no output implementation (ENODEV).
    NotConfigured,
    /// Blocking receive was cancelled (EINTR).
    Interrupted,
    /// Non-blocking receive found nothing queued (EAGAIN).
    WouldBlock,
}

impl NetError {
    /// Negative Linux errno for the syscall return path.
    pub const fn to_errno(&self) -> i32 {
        match self {
            Self::ProtocolMismatch => -71,    // EPROTO
            Self::ResolutionPending => -11,   // EAGAIN
            Self::HostUnreachable => -113,    // EHOSTUNREACH
            Self::NetworkUnreachable => -101, // ENETUNREACH
            Self::AddressInUse => -98,        // EADDRINUSE
            Self::PortExhausted => -98,       // EADDRINUSE
            Self::AddressNotAvailable => -99, // EADDRNOTAVAIL
            Self::NoBufferSpace => -105,      // ENOBUFS
            Self::NotConnected => -107,       // ENOTCONN
            Self::PermissionDenied => -13,    // EACCES
            Self::MessageTooLong => -90,      // EMSGSIZE
            Self::InvalidArgument => -22,     // EINVAL
            Self::NotConfigured => -19,       // ENODEV
            Self::Interrupted => -4,          // EINTR
            Self::WouldBlock => -11,          // EAGAIN
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolMismatch => write!(f, "protocol mismatch"),
            Self::ResolutionPending => write!(f, "address resolution pending"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::AddressInUse => write!(f, "address already in use"),
            Self::PortExhausted => write!(f, "no free ephemeral port"),
            Self::AddressNotAvailable => write!(f, "address not available"),
            Self::NoBufferSpace => write!(f, "no buffer space available"),
            Self::NotConnected => write!(f, "not connected"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::MessageTooLong => write!(f, "message too long"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotConfigured => write!(f, "interface not configured"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::WouldBlock => write!(f, "operation would block"),
        }
    }
}

pub type Result<T> = core::result::Result<T, NetError>;
