//! Loopback interface output.
//!
//! Frames sent on `lo` never reach a device.  The IPv4 source and
//! destination are exchanged in place and the frame re-enters input on the
//! loopback interface synchronously, in the sender's context.  Since the
//! sender stamped its own address as the source, the re-entered datagram is
//! addressed to the loopback interface and passes the destination check.
//!
//! Swapping the two addresses leaves the IP header checksum and every
//! pseudo-header checksum unchanged.

use kestrel_lib::klog_trace;

use crate::netif::{LinkOutput, Netif};
use crate::pbuf::Pbuf;
use crate::stack::NetStack;
use crate::types::{EtherType, Result};
use crate::wire::{EthernetFrame, Ipv4Packet, ethernet};

/// Output hook of the loopback interface.
pub struct LoopbackOutput;

impl LinkOutput for LoopbackOutput {
    fn output(&self, stack: &NetStack, _netif: &Netif, buf: Pbuf) -> Result<()> {
        let mut buf = buf.into_unique()?;
        swap_ip_addrs(&mut buf);
        klog_trace!("lo: looping {:?}", buf);
        stack.netif_input(stack.loopback(), buf)
    }
}

/// Exchange IPv4 source and destination if `buf` holds an IPv4 frame.
/// Anything else is looped unchanged.
fn swap_ip_addrs(buf: &mut Pbuf) {
    let is_ipv4 = match EthernetFrame::new_checked(buf.frame()) {
        Ok(eth) => eth.ethertype() == EtherType::Ipv4.as_u16(),
        Err(_) => false,
    };
    if !is_ipv4 {
        return;
    }
    if let Ok(mut ip) = Ipv4Packet::new_checked(&mut buf.frame_mut()[ethernet::HEADER_LEN..]) {
        ip.swap_addrs();
    }
}
