// =============================================================================
// Socket ABI types
// =============================================================================

/// Address family: IPv4 Internet protocols.
pub const AF_INET: u16 = 2;
/// Address family: link-level packet access.
pub const AF_PACKET: u16 = 17;

/// Socket type: datagram (UDP).
pub const SOCK_DGRAM: u16 = 2;
/// Socket type: raw IP.
pub const SOCK_RAW: u16 = 3;
/// Socket type: raw link-level packets.
pub const SOCK_PACKET: u16 = 10;

/// IPv4 socket address, mirroring POSIX `sockaddr_in` layout.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct SockAddrIn {
    pub family: u16,
    /// Port in **network** byte order (big-endian).
    pub port: u16,
    /// IPv4 address in network byte order.
    pub addr: [u8; 4],
    pub _pad: [u8; 8],
}

/// Link-level socket address for `AF_PACKET`.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct SockAddrLl {
    pub family: u16,
    /// Packet protocol filter, one of the `PKT_PROTO_*` values.
    pub protocol: u16,
    pub ifindex: u32,
    pub addr: [u8; 6],
    pub _pad: [u8; 2],
}

pub const PKT_PROTO_ALL: u16 = 0;
pub const PKT_PROTO_IP: u16 = 1;
pub const PKT_PROTO_ICMP: u16 = 2;
pub const PKT_PROTO_UDP: u16 = 3;
pub const PKT_PROTO_TCP: u16 = 4;

/// `setsockopt`-style UDP flags.
pub const UDP_FLAG_NOCHKSUM: u32 = 1 << 0;
pub const UDP_FLAG_BROADCAST: u32 = 1 << 1;
pub const UDP_FLAG_CONNECTED: u32 = 1 << 2;

// =============================================================================
// Interface ioctl
// =============================================================================

pub const IFNAMSIZ: usize = 16;

pub const SIOCGIFNAME: u32 = 0x8910;
pub const SIOCGIFADDR: u32 = 0x8915;
pub const SIOCSIFADDR: u32 = 0x8916;
pub const SIOCGIFBRDADDR: u32 = 0x8919;
pub const SIOCGIFNETMASK: u32 = 0x891b;
pub const SIOCSIFNETMASK: u32 = 0x891c;
pub const SIOCGIFHWADDR: u32 = 0x8927;
pub const SIOCGIFINDEX: u32 = 0x8933;
/// Not a Linux number: the gateway lives on the interface here.
pub const SIOCGIFGATEWAY: u32 = 0x89f0;
pub const SIOCSIFGATEWAY: u32 = 0x89f1;

/// Interface request block, filled in place by the ioctl.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct IfReq {
    /// NUL-padded interface name.
    pub name: [u8; IFNAMSIZ],
    pub index: u32,
    pub ipaddr: [u8; 4],
    pub netmask: [u8; 4],
    pub gateway: [u8; 4],
    pub broadcast: [u8; 4],
    pub hwaddr: [u8; 6],
    pub _pad: [u8; 2],
}

impl IfReq {
    /// Request naming the interface `name`, truncated to `IFNAMSIZ - 1` bytes.
    pub fn with_name(name: &str) -> Self {
        let mut req = Self::default();
        let len = name.len().min(IFNAMSIZ - 1);
        req.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        req
    }

    /// The name up to the first NUL, if it is valid UTF-8.
    pub fn name_str(&self) -> Option<&str> {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(IFNAMSIZ);
        core::str::from_utf8(&self.name[..end]).ok()
    }
}
