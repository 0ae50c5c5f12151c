//! Hosted fixtures for the protocol tests: a stack on std threads, a device
//! that records transmitted frames, and builders for inbound frames.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use std::sync::Mutex;

use kestrel_lib::testing::{ManualClock, ThreadRuntime};
use kestrel_lib::HeapPageAllocator;

use crate::checksum;
use crate::config::NetConfig;
use crate::ipv4::IP_OFFSET;
use crate::netif::NetDevice;
use crate::stack::NetStack;
use crate::types::{EtherType, IfIndex, IpProtocol, Ipv4Addr, MacAddr, Result};
use crate::wire::arp::{self, ArpPacket};
use crate::wire::icmp::{self, IcmpEcho};
use crate::wire::ipv4::{self, Ipv4Packet};
use crate::wire::udp::{self, UdpDatagram};
use crate::wire::{ethernet, EthernetFrame};

pub const OUR_MAC: MacAddr = MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x01]);
pub const PEER_MAC: MacAddr = MacAddr([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
pub const OUR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 111, 33);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 111, 1);
pub const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 111, 2);

/// Device that keeps every transmitted frame.
#[derive(Default)]
pub struct CaptureDevice {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl CaptureDevice {
    pub fn take(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut *self.frames.lock().unwrap())
    }

    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl NetDevice for CaptureDevice {
    fn transmit(&self, frame: &[u8]) -> Result<()> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

/// A stack with loopback plus one captured `eth0`.
pub struct Harness {
    pub stack: Arc<NetStack>,
    pub runtime: Arc<ThreadRuntime>,
    pub clock: Arc<ManualClock>,
    pub dev: Arc<CaptureDevice>,
    pub eth0: IfIndex,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(NetConfig::default())
    }

    pub fn with_config(config: NetConfig) -> Self {
        let runtime = Arc::new(ThreadRuntime::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let dev = Arc::new(CaptureDevice::default());
        let stack = NetStack::new(
            config,
            Arc::new(HeapPageAllocator),
            runtime.clone(),
            clock.clone(),
        )
        .unwrap();
        let eth0 = stack.netif_attach(OUR_MAC, dev.clone());
        Self {
            stack: Arc::new(stack),
            runtime,
            clock,
            dev,
            eth0,
        }
    }

    /// Run `frame` through input on `eth0`.
    pub fn inject(&self, frame: &[u8]) -> Result<()> {
        let buf = self.stack.pool().acquire_copy(frame).unwrap();
        self.stack.netif_input(self.eth0, buf)
    }

    /// Teach the ARP cache where the peer is, then forget the reply.
    pub fn learn_peer(&self) {
        let frame = arp_frame(arp::OP_REQUEST, PEER_MAC, PEER_IP, MacAddr::ZERO, OUR_IP);
        self.inject(&frame).unwrap();
        self.dev.take();
    }
}

pub fn eth_frame(dst: MacAddr, src: MacAddr, ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; ethernet::HEADER_LEN + payload.len()];
    let mut eth = EthernetFrame::new_checked(&mut frame[..]).unwrap();
    eth.set_dst(dst);
    eth.set_src(src);
    eth.set_ethertype(ethertype.as_u16());
    eth.payload_mut().copy_from_slice(payload);
    frame
}

pub fn arp_frame(
    op: u16,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut body = [0u8; arp::PACKET_LEN];
    let mut pkt = ArpPacket::new_checked(&mut body[..]).unwrap();
    pkt.set_ethernet_ipv4();
    pkt.set_operation(op);
    pkt.set_sender(sender_mac, sender_ip);
    pkt.set_target(target_mac, target_ip);
    let dst = if op == arp::OP_REQUEST { MacAddr::BROADCAST } else { target_mac };
    eth_frame(dst, sender_mac, EtherType::Arp, &body)
}

/// IPv4 datagram (checksummed) from the peer to us, inside a frame.
pub fn ipv4_frame(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> Vec<u8> {
    let mut datagram = vec![0u8; ipv4::HEADER_LEN + payload.len()];
    let mut ip = Ipv4Packet::new_checked(&mut datagram[..]).unwrap();
    ip.set_version_ihl();
    ip.set_total_len((ipv4::HEADER_LEN + payload.len()) as u16);
    ip.set_ident(0x1c46);
    ip.set_ttl(64);
    ip.set_protocol(protocol);
    ip.set_src(src);
    ip.set_dst(dst);
    ip.payload_mut().copy_from_slice(payload);
    ip.fill_checksum();
    eth_frame(OUR_MAC, PEER_MAC, EtherType::Ipv4, &datagram)
}

pub fn icmp_echo_request(ident: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut msg = vec![0u8; icmp::HEADER_LEN + payload.len()];
    let mut echo = IcmpEcho::new_checked(&mut msg[..]).unwrap();
    echo.set_msg_type(icmp::TYPE_ECHO_REQUEST);
    echo.set_ident(ident);
    echo.set_seq(seq);
    echo.payload_mut().copy_from_slice(payload);
    echo.fill_checksum();
    msg
}

/// UDP datagram with a valid checksum for `src -> dst`.
pub fn udp_datagram(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let len = udp::HEADER_LEN + payload.len();
    let mut seg = vec![0u8; len];
    let mut dgram = UdpDatagram::new_checked(&mut seg[..]).unwrap();
    dgram.set_src_port(sport);
    dgram.set_dst_port(dport);
    dgram.set_len(len as u16);
    dgram.payload_mut().copy_from_slice(payload);
    dgram.fill_checksum(src, dst);
    seg
}

/// Parsed view of a captured IPv4 frame.
pub struct SentIp {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub payload: Vec<u8>,
    pub header_ok: bool,
}

pub fn parse_ip(frame: &[u8]) -> SentIp {
    let eth = EthernetFrame::new_checked(frame).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Ipv4.as_u16());
    let ip = Ipv4Packet::new_checked(&frame[IP_OFFSET..]).unwrap();
    SentIp {
        src: ip.src(),
        dst: ip.dst(),
        protocol: ip.protocol(),
        payload: ip.payload().to_vec(),
        header_ok: checksum::verify(&frame[IP_OFFSET..IP_OFFSET + ip.header_len()]),
    }
}

pub const ICMP: u8 = IpProtocol::Icmp as u8;
pub const UDP: u8 = IpProtocol::Udp as u8;
