use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::mpsc;
use std::thread;

use kestrel_lib::{TaskHandle, TaskRuntime};

use super::config::{EPHEMERAL_PORT_START, NetConfig};
use super::ipv4::IP_OFFSET;
use super::pcb::udp::UDP_MAX_PAYLOAD;
use super::pcb::{Pcb, UdpFlags, UdpPcb};
use super::test_support::{Harness, OUR_IP, PEER_IP, UDP, ipv4_frame, parse_ip, udp_datagram};
use super::types::{Ipv4Addr, MacAddr, NetError, Result, SockAddr};
use super::wire::{EthernetFrame, Ipv4Packet, UdpDatagram};

const PEER: SockAddr = SockAddr::new(PEER_IP, 5000);

fn bound(h: &Harness, port: u16) -> Arc<UdpPcb> {
    let pcb = h.stack.udp_open();
    h.stack.udp_bind(&pcb, SockAddr::new(Ipv4Addr::UNSPECIFIED, port)).unwrap();
    pcb
}

fn from_peer(dport: u16, payload: &[u8]) -> Vec<u8> {
    let seg = udp_datagram(PEER_IP, OUR_IP, PEER.port, dport, payload);
    ipv4_frame(PEER_IP, OUR_IP, UDP, &seg)
}

type Received = Result<(Vec<u8>, SockAddr)>;

/// Start a receive on `pcb` in its own task and wait until it blocks.
fn blocked_recv(h: &Harness, pcb: &Arc<UdpPcb>) -> (TaskHandle, thread::JoinHandle<Received>) {
    let stack = h.stack.clone();
    let pcb = pcb.clone();
    let runtime = h.runtime.clone();
    let (tx, rx) = mpsc::channel();
    let waiting = h.runtime.blocked_count();
    let join = thread::spawn(move || {
        tx.send(runtime.current_task()).unwrap();
        let mut out = [0u8; 256];
        stack
            .udp_recv_from(&pcb, &mut out)
            .map(|(n, from)| (out[..n].to_vec(), from))
    });
    let task = rx.recv().unwrap();
    h.runtime.wait_for_blocked(waiting + 1);
    (task, join)
}

#[test]
fn unbound_port_is_dropped_silently() {
    let h = Harness::new();
    h.learn_peer();
    assert_eq!(h.inject(&from_peer(9999, b"anyone?")), Err(NetError::AddressNotAvailable));
    assert_eq!(h.dev.count(), 0);
    assert_eq!(h.stack.stats().udp_no_port, 1);
}

#[test]
fn datagram_reaches_bound_pcb() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    h.inject(&from_peer(7, b"hello")).unwrap();
    assert_eq!(pcb.pending(), 1);

    let mut out = [0u8; 64];
    let (n, from) = h.stack.udp_try_recv_from(&pcb, &mut out).unwrap();
    assert_eq!(&out[..n], b"hello");
    assert_eq!(from, PEER);
    assert_eq!(h.stack.udp_try_recv_from(&pcb, &mut out), Err(NetError::WouldBlock));
}

#[test]
fn short_buffer_truncates() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    h.inject(&from_peer(7, b"hello")).unwrap();
    let mut out = [0u8; 3];
    let (n, _) = h.stack.udp_try_recv_from(&pcb, &mut out).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&out, b"hel");
}

#[test]
fn bad_checksum_is_dropped() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    let mut frame = from_peer(7, b"hello");
    let last = frame.len() - 1;
    frame[last] ^= 0x01;
    assert_eq!(h.inject(&frame), Err(NetError::ProtocolMismatch));
    assert_eq!(h.stack.stats().udp_rx_errors, 1);
    assert_eq!(pcb.pending(), 0);
}

#[test]
fn truncated_datagram_is_dropped() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    let eth0 = h.stack.netif(h.eth0).unwrap();

    let mut frame = from_peer(7, b"hello");
    Ipv4Packet::new_checked(&mut frame[IP_OFFSET..]).unwrap().set_total_len(0x0100);
    let buf = h.stack.pool().acquire_copy(&frame).unwrap();
    assert_eq!(h.stack.udp_input(&eth0, buf), Err(NetError::ProtocolMismatch));

    let runt = h.stack.pool().acquire_copy(&frame[..10]).unwrap();
    assert_eq!(h.stack.udp_input(&eth0, runt), Err(NetError::ProtocolMismatch));
    assert_eq!(h.stack.stats().udp_rx_errors, 2);
    assert_eq!(pcb.pending(), 0);
}

#[test]
fn full_receive_queue_drops_datagrams() {
    let h = Harness::with_config(NetConfig {
        pcb_rx_limit: 2,
        ..NetConfig::default()
    });
    let pcb = bound(&h, 7);
    for payload in [b"one", b"two", b"3rd"] {
        h.inject(&from_peer(7, payload)).unwrap();
    }
    assert_eq!(pcb.pending(), 2);
    assert_eq!(h.stack.stats().pcb_rx_dropped, 1);

    let mut out = [0u8; 8];
    let (n, _) = h.stack.udp_try_recv_from(&pcb, &mut out).unwrap();
    assert_eq!(&out[..n], b"one");
    h.inject(&from_peer(7, b"4th")).unwrap();
    let (n, _) = h.stack.udp_try_recv_from(&pcb, &mut out).unwrap();
    assert_eq!(&out[..n], b"two");
    let (n, _) = h.stack.udp_try_recv_from(&pcb, &mut out).unwrap();
    assert_eq!(&out[..n], b"4th");
    assert_eq!(h.stack.stats().pcb_rx_dropped, 1);
}

#[test]
fn zero_checksum_is_accepted() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    let mut seg = udp_datagram(PEER_IP, OUR_IP, PEER.port, 7, b"hello");
    UdpDatagram::new_checked(&mut seg[..]).unwrap().set_checksum(0);
    h.inject(&ipv4_frame(PEER_IP, OUR_IP, UDP, &seg)).unwrap();
    assert_eq!(pcb.pending(), 1);
}

#[test]
fn connected_pcb_filters_sources() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    h.stack.udp_connect(&pcb, SockAddr::new(PEER_IP, 53)).unwrap();
    assert_eq!(pcb.peer_addr(), Ok(SockAddr::new(PEER_IP, 53)));

    // From port 5000: no match.
    assert_eq!(h.inject(&from_peer(7, b"no")), Err(NetError::AddressNotAvailable));

    let seg = udp_datagram(PEER_IP, OUR_IP, 53, 7, b"yes");
    h.inject(&ipv4_frame(PEER_IP, OUR_IP, UDP, &seg)).unwrap();
    let mut out = [0u8; 8];
    let (n, from) = h.stack.udp_try_recv_from(&pcb, &mut out).unwrap();
    assert_eq!(&out[..n], b"yes");
    assert_eq!(from.port, 53);
}

#[test]
fn send_builds_checksummed_datagram() {
    let h = Harness::new();
    h.learn_peer();
    let pcb = h.stack.udp_open();
    h.stack.udp_connect(&pcb, SockAddr::new(PEER_IP, 53)).unwrap();
    assert_eq!(pcb.local_addr().port, EPHEMERAL_PORT_START);

    assert_eq!(h.stack.udp_send_to(&pcb, None, b"query"), Ok(5));
    let sent = h.dev.take();
    assert_eq!(sent.len(), 1);
    let ip = parse_ip(&sent[0]);
    assert_eq!(ip.protocol, UDP);
    assert_eq!((ip.src, ip.dst), (OUR_IP, PEER_IP));

    let dgram = UdpDatagram::new_checked(&ip.payload[..]).unwrap();
    assert_eq!(dgram.src_port(), EPHEMERAL_PORT_START);
    assert_eq!(dgram.dst_port(), 53);
    assert_eq!(dgram.len(), 8 + 5);
    assert_ne!(dgram.checksum(), 0);
    assert!(dgram.verify_checksum(OUR_IP, PEER_IP));
    assert_eq!(dgram.payload(), b"query");
}

#[test]
fn nochksum_sends_zero_checksum() {
    let h = Harness::new();
    h.learn_peer();
    let pcb = bound(&h, 7);
    h.stack.udp_set_flags(&pcb, UdpFlags::NOCHKSUM);
    h.stack.udp_send_to(&pcb, Some(PEER), b"x").unwrap();
    let sent = h.dev.take();
    let ip = parse_ip(&sent[0]);
    assert_eq!(UdpDatagram::new_checked(&ip.payload[..]).unwrap().checksum(), 0);
}

#[test]
fn send_errors() {
    let h = Harness::new();
    h.learn_peer();
    let pcb = h.stack.udp_open();

    let big = [0u8; UDP_MAX_PAYLOAD + 1];
    assert_eq!(h.stack.udp_send_to(&pcb, Some(PEER), &big), Err(NetError::MessageTooLong));
    assert!(!pcb.is_bound());

    assert_eq!(h.stack.udp_send_to(&pcb, None, b"x"), Err(NetError::AddressNotAvailable));
    assert_eq!(
        h.stack.udp_send_to(&pcb, Some(SockAddr::new(PEER_IP, 0)), b"x"),
        Err(NetError::NotConnected)
    );
    assert_eq!(pcb.peer_addr(), Err(NetError::NotConnected));
    assert_eq!(h.dev.count(), 0);
}

#[test]
fn broadcast_needs_permission() {
    let h = Harness::new();
    let pcb = bound(&h, 68);
    let dst = SockAddr::new(Ipv4Addr::new(192, 168, 111, 255), 67);
    assert_eq!(h.stack.udp_send_to(&pcb, Some(dst), b"x"), Err(NetError::PermissionDenied));
    assert_eq!(h.dev.count(), 0);

    h.stack.udp_set_flags(&pcb, UdpFlags::BROADCAST);
    h.stack.udp_send_to(&pcb, Some(dst), b"x").unwrap();
    let sent = h.dev.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(EthernetFrame::new_checked(&sent[0][..]).unwrap().dst(), MacAddr::BROADCAST);
}

#[test]
fn loopback_delivery() {
    let h = Harness::new();
    let server = h.stack.udp_open();
    h.stack.udp_bind(&server, SockAddr::new(Ipv4Addr::LOCALHOST, 2000)).unwrap();
    let client = h.stack.udp_open();

    let dst = SockAddr::new(Ipv4Addr::LOCALHOST, 2000);
    assert_eq!(h.stack.udp_send_to(&client, Some(dst), b"hello"), Ok(5));
    assert_eq!(h.dev.count(), 0);

    let mut out = [0u8; 16];
    let (n, from) = h.stack.udp_try_recv_from(&server, &mut out).unwrap();
    assert_eq!(&out[..n], b"hello");
    assert_eq!(from, SockAddr::new(Ipv4Addr::LOCALHOST, client.local_addr().port));
}

#[test]
fn send_to_own_address_loops_back() {
    let h = Harness::new();
    let server = bound(&h, 3000);
    let client = h.stack.udp_open();
    h.stack.udp_send_to(&client, Some(SockAddr::new(OUR_IP, 3000)), b"me").unwrap();
    assert_eq!(h.dev.count(), 0);

    let mut out = [0u8; 16];
    let (n, from) = h.stack.udp_try_recv_from(&server, &mut out).unwrap();
    assert_eq!(&out[..n], b"me");
    assert_eq!(from.ip, OUR_IP);
}

#[test]
fn blocked_receiver_wakes_on_delivery() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    let (_task, join) = blocked_recv(&h, &pcb);

    h.inject(&from_peer(7, b"late")).unwrap();
    let (data, from) = join.join().unwrap().unwrap();
    assert_eq!(data, b"late");
    assert_eq!(from, PEER);
}

#[test]
fn receivers_wake_in_arrival_order() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    let (_, first) = blocked_recv(&h, &pcb);
    let (_, second) = blocked_recv(&h, &pcb);
    assert_eq!(pcb.waiters().waiter_count(), 2);

    h.inject(&from_peer(7, b"one")).unwrap();
    assert_eq!(first.join().unwrap().unwrap().0, b"one");

    h.inject(&from_peer(7, b"two")).unwrap();
    assert_eq!(second.join().unwrap().unwrap().0, b"two");
}

#[test]
fn cancelled_wait_is_interrupted() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    let (task, join) = blocked_recv(&h, &pcb);

    assert!(h.stack.cancel_wait(&*pcb, task));
    assert_eq!(join.join().unwrap(), Err(NetError::Interrupted));
    assert!(!h.stack.cancel_wait(&*pcb, task));
}

#[test]
fn close_wakes_receiver_and_releases_port() {
    let h = Harness::new();
    let pcb = bound(&h, 7000);
    assert!(h.stack.port_in_use(7000));
    let (_, join) = blocked_recv(&h, &pcb);

    h.stack.udp_close(&pcb);
    assert_eq!(join.join().unwrap(), Err(NetError::NotConnected));
    assert!(!h.stack.port_in_use(7000));
    assert_eq!(h.inject(&from_peer(7000, b"gone")), Err(NetError::AddressNotAvailable));

    let again = bound(&h, 7000);
    assert_eq!(again.local_addr().port, 7000);
}

#[test]
fn bind_rules() {
    let h = Harness::new();
    let pcb = bound(&h, 7);
    assert_eq!(
        h.stack.udp_bind(&pcb, SockAddr::new(Ipv4Addr::UNSPECIFIED, 8)),
        Err(NetError::InvalidArgument)
    );

    let other = h.stack.udp_open();
    assert_eq!(
        h.stack.udp_bind(&other, SockAddr::new(Ipv4Addr::UNSPECIFIED, 7)),
        Err(NetError::AddressInUse)
    );
    assert_eq!(
        h.stack.udp_bind(&other, SockAddr::new(Ipv4Addr::new(10, 0, 0, 1), 9)),
        Err(NetError::AddressNotAvailable)
    );
    assert!(!h.stack.port_in_use(9));
    assert_eq!(
        h.stack.udp_bind(&other, SockAddr::ANY),
        Ok(SockAddr::new(Ipv4Addr::UNSPECIFIED, EPHEMERAL_PORT_START))
    );
}
