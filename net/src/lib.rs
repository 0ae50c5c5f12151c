//! Packet-processing core of the kernel network subsystem.
//!
//! Frames enter through [`NetStack::netif_input`] (or the receive backlog),
//! climb Ethernet, ARP/IPv4 and ICMP/UDP, and land on PCB receive queues.
//! Output runs the other way and ends in an interface's output hook.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod arp;
pub mod checksum;
pub mod config;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod loopback;
pub mod netif;
pub mod pbuf;
pub mod pcb;
pub mod pool;
pub mod port;
pub mod stack;
pub mod types;
pub mod wire;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod pcb_tests;
#[cfg(test)]
mod pool_tests;
#[cfg(test)]
mod port_tests;
#[cfg(test)]
mod udp_tests;

pub use arp::{ArpEntry, ArpState};
pub use config::{ETH_MTU, IP_MTU, NetConfig};
pub use ipv4::TransportHook;
pub use netif::{DeviceOutput, LinkOutput, NetDevice, Netif, NetifFlags};
pub use pbuf::Pbuf;
pub use pcb::{Delivery, Pcb, PktPcb, PktProtocol, RawPcb, UdpFlags, UdpPcb};
pub use pool::{PBUF_CAPACITY, PBUF_SIZE, PbufPool, PoolStats};
pub use stack::{NetStack, NetStatsSnapshot};
pub use types::{EtherType, IfIndex, IpProtocol, Ipv4Addr, MacAddr, NetError, Result, SockAddr};
