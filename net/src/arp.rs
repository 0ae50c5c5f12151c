//! Address resolution: the ARP cache, request/reply handling and
//! next-hop resolution for IPv4 output.
//!
//! # Entry lifecycle
//!
//! ```text
//! (absent) --send--> Pending --reply/request seen--> Resolved
//!                       |                               |
//!                       +--retries exhausted--> Failed  |
//!                                                 |     |
//!                        evicted after arp_timeout_ms since last update
//! ```
//!
//! A send toward an unresolved next hop broadcasts a request and drops the
//! datagram; the caller sees [`NetError::ResolutionPending`].  [`arp_tick`]
//! re-sends requests for pending entries every `arp_delay_ms` and gives up
//! after `arp_retry` of them.
//!
//! [`arp_tick`]: NetStack::arp_tick

use alloc::vec::Vec;

use kestrel_lib::{klog_debug, klog_trace};

use crate::netif::Netif;
use crate::pbuf::Pbuf;
use crate::stack::NetStack;
use crate::types::{EtherType, IfIndex, Ipv4Addr, MacAddr, NetError, Result};
use crate::wire::arp::{HTYPE_ETHERNET, OP_REPLY, OP_REQUEST, PACKET_LEN};
use crate::wire::ethernet::HEADER_LEN;
use crate::wire::ArpPacket;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpState {
    /// Request outstanding; `retries` re-sends so far.
    Pending { retries: u32, last_sent_ms: u64 },
    Resolved,
    /// Retries exhausted; sends fail until the entry is evicted or the host
    /// speaks up.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub netif: IfIndex,
    pub state: ArpState,
    pub updated_ms: u64,
}

/// Outcome of a cache lookup for output.
enum Resolution {
    Resolved(MacAddr),
    Pending,
    Failed,
    Absent,
}

#[derive(Default)]
pub struct ArpCache {
    entries: Vec<ArpEntry>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.entries.iter().find(|e| e.ip == ip)
    }

    fn find_mut(&mut self, ip: Ipv4Addr) -> Option<&mut ArpEntry> {
        self.entries.iter_mut().find(|e| e.ip == ip)
    }

    fn resolve(&self, ip: Ipv4Addr) -> Resolution {
        match self.find(ip) {
            Some(e) => match e.state {
                ArpState::Resolved => Resolution::Resolved(e.mac),
                ArpState::Pending { .. } => Resolution::Pending,
                ArpState::Failed => Resolution::Failed,
            },
            None => Resolution::Absent,
        }
    }

    /// Insert `ip -> mac` as resolved, or refresh an existing entry.
    fn update(&mut self, netif: IfIndex, ip: Ipv4Addr, mac: MacAddr, now_ms: u64) {
        let entry = ArpEntry {
            ip,
            mac,
            netif,
            state: ArpState::Resolved,
            updated_ms: now_ms,
        };
        match self.find_mut(ip) {
            Some(e) => *e = entry,
            None => self.entries.push(entry),
        }
    }

    /// Start resolving `ip`.  Returns `false` if an entry already exists.
    fn insert_pending(&mut self, netif: IfIndex, ip: Ipv4Addr, now_ms: u64) -> bool {
        if self.find(ip).is_some() {
            return false;
        }
        self.entries.push(ArpEntry {
            ip,
            mac: MacAddr::ZERO,
            netif,
            state: ArpState::Pending {
                retries: 0,
                last_sent_ms: now_ms,
            },
            updated_ms: now_ms,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NetStack {
    /// Handle an inbound ARP message.  Requests for our address are answered
    /// in the same buffer.
    pub fn arp_input(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        let (op, sender_hw, sender_ip) = {
            let frame = buf.frame();
            if frame.len() < HEADER_LEN + PACKET_LEN {
                klog_debug!("arp: short message ({} bytes)", frame.len());
                return Err(NetError::ProtocolMismatch);
            }
            let arp = ArpPacket::new_checked(&frame[HEADER_LEN..])?;
            if arp.hardware_type() != HTYPE_ETHERNET
                || arp.protocol_type() != EtherType::Ipv4.as_u16()
                || arp.hardware_len() != 6
                || arp.protocol_len() != 4
            {
                klog_debug!(
                    "arp: unsupported hw {} proto {:#06x}",
                    arp.hardware_type(),
                    arp.protocol_type()
                );
                return Err(NetError::ProtocolMismatch);
            }
            if arp.target_ip() != netif.ip {
                klog_trace!("arp: {} is not for {}", arp.target_ip(), netif.ip);
                return Err(NetError::ProtocolMismatch);
            }
            (arp.operation(), arp.sender_hw(), arp.sender_ip())
        };

        let now = self.now_ms();
        self.arp.lock().update(netif.index, sender_ip, sender_hw, now);
        klog_debug!("arp: {} is at {}", sender_ip, sender_hw);

        match op {
            OP_REQUEST => {
                let mut buf = buf.into_unique()?;
                {
                    let mut arp = ArpPacket::new_checked(&mut buf.data_mut()[HEADER_LEN..])?;
                    arp.set_operation(OP_REPLY);
                    arp.set_target(sender_hw, sender_ip);
                    arp.set_sender(netif.mac, netif.ip);
                }
                self.eth_output(netif, buf, sender_hw, EtherType::Arp, PACKET_LEN)
            }
            OP_REPLY => Ok(()),
            other => {
                klog_debug!("arp: unknown opcode {}", other);
                Err(NetError::ProtocolMismatch)
            }
        }
    }

    /// Broadcast a request for `target` on `netif`.
    fn arp_request(&self, netif: &Netif, target: Ipv4Addr) -> Result<()> {
        let mut buf = self.pool.acquire()?;
        {
            let mut arp = ArpPacket::new_checked(&mut buf.data_mut()[HEADER_LEN..])?;
            arp.set_ethernet_ipv4();
            arp.set_operation(OP_REQUEST);
            arp.set_sender(netif.mac, netif.ip);
            arp.set_target(MacAddr::ZERO, target);
        }
        klog_trace!("arp: who has {}? tell {}", target, netif.ip);
        self.eth_output(netif, buf, MacAddr::BROADCAST, EtherType::Arp, PACKET_LEN)
    }

    /// Send `len` bytes at offset [`HEADER_LEN`] toward `dst`, resolving the
    /// next hop first.
    pub fn arp_eth_output(
        &self,
        netif: &Netif,
        buf: Pbuf,
        dst: Ipv4Addr,
        ethertype: EtherType,
        len: usize,
    ) -> Result<()> {
        if netif.is_broadcast(dst) {
            return self.eth_output(netif, buf, MacAddr::BROADCAST, ethertype, len);
        }

        let next_hop = if netif.on_link(dst) {
            dst
        } else if !netif.gateway.is_unspecified() {
            netif.gateway
        } else {
            klog_debug!("arp: {} is off-link and {} has no gateway", dst, netif.index);
            return Err(NetError::NetworkUnreachable);
        };

        let resolution = self.arp.lock().resolve(next_hop);
        match resolution {
            Resolution::Resolved(mac) => self.eth_output(netif, buf, mac, ethertype, len),
            Resolution::Failed => {
                klog_debug!("arp: {} unreachable", next_hop);
                Err(NetError::HostUnreachable)
            }
            Resolution::Pending => {
                drop(buf);
                Err(NetError::ResolutionPending)
            }
            Resolution::Absent => {
                drop(buf);
                let now = self.now_ms();
                if self.arp.lock().insert_pending(netif.index, next_hop, now) {
                    self.arp_request(netif, next_hop)?;
                }
                Err(NetError::ResolutionPending)
            }
        }
    }

    /// Retry pending requests and evict stale entries.  Call periodically.
    pub fn arp_tick(&self, now_ms: u64) {
        let cfg = &self.config;
        let mut resend: Vec<(IfIndex, Ipv4Addr)> = Vec::new();
        {
            let mut cache = self.arp.lock();
            for entry in cache.entries.iter_mut() {
                if let ArpState::Pending {
                    retries,
                    last_sent_ms,
                } = entry.state
                {
                    if now_ms.saturating_sub(last_sent_ms) < cfg.arp_delay_ms {
                        continue;
                    }
                    if retries >= cfg.arp_retry {
                        klog_debug!("arp: giving up on {}", entry.ip);
                        entry.state = ArpState::Failed;
                        entry.updated_ms = now_ms;
                    } else {
                        entry.state = ArpState::Pending {
                            retries: retries + 1,
                            last_sent_ms: now_ms,
                        };
                        resend.push((entry.netif, entry.ip));
                    }
                }
            }
            cache.entries.retain(|e| {
                matches!(e.state, ArpState::Pending { .. })
                    || now_ms.saturating_sub(e.updated_ms) < cfg.arp_timeout_ms
            });
        }

        for (index, ip) in resend {
            let Ok(netif) = self.netif(index) else {
                continue;
            };
            if let Err(err) = self.arp_request(&netif, ip) {
                klog_debug!("arp: retry for {} failed: {}", ip, err);
            }
        }
    }

    /// [`arp_tick`](Self::arp_tick) at the current clock reading.
    pub fn arp_poll(&self) {
        self.arp_tick(self.now_ms());
    }

    pub fn arp_lookup(&self, ip: Ipv4Addr) -> Option<ArpEntry> {
        self.arp.lock().find(ip).copied()
    }

    /// Copy of the whole cache, for diagnostics.
    pub fn arp_entries(&self) -> Vec<ArpEntry> {
        self.arp.lock().entries.clone()
    }
}
