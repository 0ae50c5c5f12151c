//! Tunables for one [`NetStack`](crate::NetStack).

use crate::types::Ipv4Addr;

pub use crate::wire::ethernet::ETH_MTU;
pub use crate::wire::ipv4::IP_MTU;

/// First port handed out by `port_get(0)`.
pub const EPHEMERAL_PORT_START: u16 = 4096;

/// Default depth of a PCB receive queue.
pub const PCB_RX_LIMIT: usize = 16;

/// Stack-wide configuration, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetConfig {
    /// TTL stamped on every outbound datagram.
    pub default_ttl: u8,
    pub ephemeral_start: u16,
    /// Resolved and failed ARP entries are evicted this long after their
    /// last update.
    pub arp_timeout_ms: u64,
    /// Requests re-sent for a pending entry before it fails.
    pub arp_retry: u32,
    pub arp_delay_ms: u64,
    /// Addressing a physical interface comes up with.
    pub phys_addr: Ipv4Addr,
    pub phys_netmask: Ipv4Addr,
    pub phys_gateway: Ipv4Addr,
    pub loopback_addr: Ipv4Addr,
    pub loopback_netmask: Ipv4Addr,
    /// Frames the receive backlog holds before dropping.
    pub rx_backlog: usize,
    /// Entries one PCB receive queue holds before dropping.
    pub pcb_rx_limit: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            default_ttl: 64,
            ephemeral_start: EPHEMERAL_PORT_START,
            arp_timeout_ms: 600 * 1000,
            arp_retry: 5,
            arp_delay_ms: 2000,
            phys_addr: Ipv4Addr::new(192, 168, 111, 33),
            phys_netmask: Ipv4Addr::new(255, 255, 255, 0),
            phys_gateway: Ipv4Addr::new(192, 168, 111, 2),
            loopback_addr: Ipv4Addr::LOCALHOST,
            loopback_netmask: Ipv4Addr::new(255, 0, 0, 0),
            rx_backlog: 256,
            pcb_rx_limit: PCB_RX_LIMIT,
        }
    }
}
