use alloc::sync::Arc;

use kestrel_lib::HeapPageAllocator;

use super::config::EPHEMERAL_PORT_START;
use super::port::PortMap;
use super::types::NetError;

fn ports() -> PortMap {
    PortMap::new(Arc::new(HeapPageAllocator), EPHEMERAL_PORT_START).unwrap()
}

#[test]
fn two_ephemeral_gets_differ() {
    let mut map = ports();
    let a = map.get(0).unwrap();
    let b = map.get(0).unwrap();
    assert_ne!(a, b);
    assert_eq!(a, EPHEMERAL_PORT_START);
    assert_eq!(b, EPHEMERAL_PORT_START + 1);
}

#[test]
fn ephemeral_get_skips_owned_ports() {
    let mut map = ports();
    assert_eq!(map.get(EPHEMERAL_PORT_START).unwrap(), EPHEMERAL_PORT_START);
    assert_eq!(map.get(EPHEMERAL_PORT_START + 1).unwrap(), EPHEMERAL_PORT_START + 1);
    let got = map.get(0).unwrap();
    assert_eq!(got, EPHEMERAL_PORT_START + 2);
    assert!(map.is_used(got));
}

#[test]
fn explicit_port_in_use() {
    let mut map = ports();
    assert_eq!(map.get(53).unwrap(), 53);
    assert_eq!(map.get(53).unwrap_err(), NetError::AddressInUse);
}

#[test]
fn put_then_get_returns_same_port() {
    let mut map = ports();
    let p = map.get(0).unwrap();
    map.put(p);
    assert!(!map.is_used(p));
    assert_eq!(map.get(p).unwrap(), p);
    map.put(p);
    assert_eq!(map.get(0).unwrap(), p);
}

#[test]
fn exhaustion_reports_port_exhausted() {
    let mut map = ports();
    let span = 65536 - EPHEMERAL_PORT_START as usize;
    for port in EPHEMERAL_PORT_START..=u16::MAX {
        map.get(port).unwrap();
    }
    assert_eq!(map.used(), span);
    assert_eq!(map.get(0).unwrap_err(), NetError::PortExhausted);
    // Low ports stay available for explicit binds.
    assert_eq!(map.get(80).unwrap(), 80);
}

#[test]
#[should_panic(expected = "double release")]
fn put_of_free_port_panics() {
    let mut map = ports();
    map.put(9000);
}

#[test]
#[should_panic(expected = "port 0")]
fn put_of_port_zero_panics() {
    let mut map = ports();
    map.put(0);
}
