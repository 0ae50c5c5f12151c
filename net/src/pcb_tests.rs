use super::pcb::{Pcb, PktProtocol};
use super::test_support::{
    Harness, ICMP, OUR_IP, OUR_MAC, PEER_IP, PEER_MAC, UDP, arp_frame, eth_frame,
    icmp_echo_request, ipv4_frame, udp_datagram,
};
use super::types::{EtherType, IfIndex, Ipv4Addr, MacAddr, NetError, SockAddr};
use super::wire::arp::OP_REQUEST;

fn arp_request() -> alloc::vec::Vec<u8> {
    arp_frame(OP_REQUEST, PEER_MAC, PEER_IP, MacAddr::ZERO, OUR_IP)
}

#[test]
fn packet_capture_takes_the_frame() {
    let h = Harness::new();
    let pcb = h.stack.pkt_open(Some(h.eth0), PktProtocol::All);

    let frame = arp_request();
    h.inject(&frame).unwrap();
    assert_eq!(h.dev.count(), 0);
    assert!(h.stack.arp_lookup(PEER_IP).is_none());

    let mut out = [0u8; 128];
    let n = h.stack.pkt_try_recv(&pcb, &mut out).unwrap();
    assert_eq!(&out[..n], &frame[..]);
    assert_eq!(h.stack.pkt_try_recv(&pcb, &mut out), Err(NetError::WouldBlock));

    h.stack.pkt_close(&pcb);
    h.inject(&frame).unwrap();
    assert_eq!(h.dev.count(), 1);
}

#[test]
fn packet_pcb_needs_an_interface() {
    let h = Harness::new();
    let pcb = h.stack.pkt_open(None, PktProtocol::All);
    h.inject(&arp_request()).unwrap();
    assert_eq!(h.dev.take().len(), 1);
    assert_eq!(pcb.pending(), 0);

    assert_eq!(h.stack.pkt_set_netif(&pcb, IfIndex(9)), Err(NetError::InvalidArgument));
    h.stack.pkt_set_netif(&pcb, h.eth0).unwrap();
    h.inject(&arp_request()).unwrap();
    assert_eq!(h.dev.count(), 0);
    assert_eq!(pcb.pending(), 1);
}

#[test]
fn protocol_filter_selects_frames() {
    let h = Harness::new();
    h.learn_peer();
    let pcb = h.stack.pkt_open(Some(h.eth0), PktProtocol::Udp);

    let ping = ipv4_frame(PEER_IP, OUR_IP, ICMP, &icmp_echo_request(1, 1, b"hi"));
    h.inject(&ping).unwrap();
    assert_eq!(h.dev.take().len(), 1);
    assert_eq!(pcb.pending(), 0);

    let seg = udp_datagram(PEER_IP, OUR_IP, 5000, 9999, b"data");
    h.inject(&ipv4_frame(PEER_IP, OUR_IP, UDP, &seg)).unwrap();
    assert_eq!(pcb.pending(), 1);
    assert_eq!(h.stack.stats().udp_no_port, 0);
}

#[test]
fn protocol_from_abi() {
    assert_eq!(PktProtocol::from_abi(0), Ok(PktProtocol::All));
    assert_eq!(PktProtocol::from_abi(3), Ok(PktProtocol::Udp));
    assert_eq!(PktProtocol::from_abi(7), Err(NetError::InvalidArgument));
}

#[test]
fn mac_filters() {
    let h = Harness::new();
    let pcb = h.stack.pkt_open(Some(h.eth0), PktProtocol::All);
    h.stack.pkt_connect(&pcb, MacAddr([0x52, 0x54, 0, 0, 0, 0x99]));
    h.inject(&arp_request()).unwrap();
    assert_eq!(pcb.pending(), 0);
    h.dev.take();

    h.stack.pkt_connect(&pcb, PEER_MAC);
    h.stack.pkt_bind(&pcb, OUR_MAC);
    // Requests are broadcast, so the destination filter rejects them.
    h.inject(&arp_request()).unwrap();
    assert_eq!(pcb.pending(), 0);

    let unicast = eth_frame(OUR_MAC, PEER_MAC, EtherType::Ipv6, &[0u8; 40]);
    h.inject(&unicast).unwrap();
    assert_eq!(pcb.pending(), 1);
    assert_eq!(pcb.local_addr(), OUR_MAC);
    assert_eq!(pcb.peer_addr(), PEER_MAC);
}

#[test]
fn packet_send_writes_frame_unchanged() {
    let h = Harness::new();
    let pcb = h.stack.pkt_open(Some(h.eth0), PktProtocol::All);
    let frame = eth_frame(PEER_MAC, OUR_MAC, EtherType::Ipv4, b"not really ip");

    assert_eq!(h.stack.pkt_send(&pcb, None, &frame), Ok(frame.len()));
    assert_eq!(h.dev.take(), [frame.clone()]);

    let big = [0u8; 1519];
    assert_eq!(h.stack.pkt_send(&pcb, None, &big), Err(NetError::MessageTooLong));

    let detached = h.stack.pkt_open(None, PktProtocol::All);
    assert_eq!(h.stack.pkt_send(&detached, None, &frame), Err(NetError::InvalidArgument));
}

#[test]
fn raw_and_udp_both_see_a_datagram() {
    let h = Harness::new();
    let raw = h.stack.raw_open(UDP);
    let udp = h.stack.udp_open();
    h.stack.udp_bind(&udp, SockAddr::new(Ipv4Addr::UNSPECIFIED, 7)).unwrap();

    let seg = udp_datagram(PEER_IP, OUR_IP, 5000, 7, b"both");
    h.inject(&ipv4_frame(PEER_IP, OUR_IP, UDP, &seg)).unwrap();
    assert_eq!(raw.pending(), 1);
    assert_eq!(udp.pending(), 1);

    let mut out = [0u8; 64];
    let (n, _) = h.stack.raw_try_recv(&raw, &mut out).unwrap();
    assert_eq!(n, 20 + 8 + 4);
    let (n, _) = h.stack.udp_try_recv_from(&udp, &mut out).unwrap();
    assert_eq!(&out[..n], b"both");
}

#[test]
fn raw_address_filters() {
    let h = Harness::new();
    let raw = h.stack.raw_open(0);
    h.stack.raw_connect(&raw, Ipv4Addr::new(192, 168, 111, 50));
    let frame = ipv4_frame(PEER_IP, OUR_IP, 99, b"x");
    assert_eq!(h.inject(&frame), Err(NetError::ProtocolMismatch));
    assert_eq!(raw.pending(), 0);

    h.stack.raw_connect(&raw, PEER_IP);
    h.stack.raw_bind(&raw, OUR_IP);
    h.inject(&frame).unwrap();
    assert_eq!(raw.pending(), 1);
    assert_eq!(raw.peer_addr(), SockAddr::new(PEER_IP, 0));
    assert_eq!(raw.local_addr(), SockAddr::new(OUR_IP, 0));
}

#[test]
fn raw_send_errors() {
    let h = Harness::new();
    let any = h.stack.raw_open(0);
    assert_eq!(h.stack.raw_send(&any, Some(PEER_IP), b"x"), Err(NetError::InvalidArgument));

    let icmp = h.stack.raw_open(ICMP);
    assert_eq!(h.stack.raw_send(&icmp, None, b"x"), Err(NetError::AddressNotAvailable));
    assert_eq!(h.dev.count(), 0);
}
