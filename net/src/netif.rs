//! Network interfaces: identity, addressing, offload flags and output hook.
//!
//! The interface table lives in the [`NetStack`].  Every layer works on a
//! [`Netif`] snapshot taken under the table lock and released before the
//! call goes any further, so a driver's output hook (or the loopback hook,
//! which re-enters input) never runs with the table locked.
//!
//! # Output hooks
//!
//! A [`LinkOutput`] turns a finished frame into a transmission.  Physical
//! interfaces use [`DeviceOutput`], which hands the bytes to the driver's
//! [`NetDevice`]; the loopback interface uses
//! [`LoopbackOutput`](crate::loopback::LoopbackOutput).  An interface
//! created without a hook fails output with [`NetError::NotConfigured`].

use alloc::format;
use alloc::sync::Arc;
use core::fmt;

use bitflags::bitflags;
use kestrel_abi::net::{
    IFNAMSIZ, IfReq, SIOCGIFADDR, SIOCGIFBRDADDR, SIOCGIFGATEWAY, SIOCGIFHWADDR, SIOCGIFINDEX,
    SIOCGIFNAME, SIOCGIFNETMASK, SIOCSIFADDR, SIOCSIFGATEWAY, SIOCSIFNETMASK,
};
use kestrel_lib::{klog_debug, klog_info};

use crate::loopback::LoopbackOutput;
use crate::pbuf::Pbuf;
use crate::stack::NetStack;
use crate::types::{IfIndex, Ipv4Addr, MacAddr, NetError, Result};

bitflags! {
    /// Interface capabilities.
    ///
    /// An `*_RX` bit means inbound checksums of that protocol were already
    /// verified (or need not be); a `*_TX` bit means the stack leaves the
    /// outbound checksum to the hardware.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NetifFlags: u32 {
        const LOOPBACK = 0x1;
        const IP_TX    = 0x10000;
        const IP_RX    = 0x20000;
        const UDP_RX   = 0x40000;
        const UDP_TX   = 0x80000;
        const TCP_RX   = 0x100000;
        const TCP_TX   = 0x200000;
    }
}

impl NetifFlags {
    /// Every checksum offload bit.
    pub const OFFLOAD_ALL: Self = Self::IP_TX
        .union(Self::IP_RX)
        .union(Self::UDP_RX)
        .union(Self::UDP_TX)
        .union(Self::TCP_RX)
        .union(Self::TCP_TX);
}

/// Driver side of a physical interface.
///
/// `transmit` receives one complete Ethernet frame (no FCS).  It may be
/// called from any task context; implementations serialize internally.
pub trait NetDevice: Send + Sync {
    fn transmit(&self, frame: &[u8]) -> Result<()>;
}

/// Output implementation of an interface.
pub trait LinkOutput: Send + Sync {
    /// Send `buf`, whose occupied length is the whole frame.
    fn output(&self, stack: &NetStack, netif: &Netif, buf: Pbuf) -> Result<()>;
}

/// Output hook for physical interfaces.
pub struct DeviceOutput {
    device: Arc<dyn NetDevice>,
}

impl DeviceOutput {
    pub fn new(device: Arc<dyn NetDevice>) -> Self {
        Self { device }
    }
}

impl LinkOutput for DeviceOutput {
    fn output(&self, _stack: &NetStack, _netif: &Netif, buf: Pbuf) -> Result<()> {
        self.device.transmit(buf.frame())
    }
}

/// Snapshot of one interface.
#[derive(Clone)]
pub struct Netif {
    pub index: IfIndex,
    name: [u8; IFNAMSIZ],
    name_len: usize,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub flags: NetifFlags,
    output: Option<Arc<dyn LinkOutput>>,
}

impl Netif {
    /// Zeroed record: no address, no flags, no output hook.
    pub(crate) fn empty(index: IfIndex) -> Self {
        Self {
            index,
            name: [0; IFNAMSIZ],
            name_len: 0,
            mac: MacAddr::ZERO,
            ip: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            flags: NetifFlags::empty(),
            output: None,
        }
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("")
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        let len = name.len().min(IFNAMSIZ - 1);
        self.name = [0; IFNAMSIZ];
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        self.name_len = len;
    }

    #[inline]
    pub fn is_loopback(&self) -> bool {
        self.flags.contains(NetifFlags::LOOPBACK)
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        !self.ip.is_unspecified()
    }

    #[inline]
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Directed broadcast of the interface's subnet.
    #[inline]
    pub fn broadcast(&self) -> Ipv4Addr {
        self.ip.subnet_broadcast(self.netmask)
    }

    /// `addr` is the limited broadcast or this subnet's directed broadcast.
    pub fn is_broadcast(&self, addr: Ipv4Addr) -> bool {
        addr.is_broadcast()
            || (self.is_configured()
                && addr.same_subnet(self.ip, self.netmask)
                && addr.is_broadcast_in(self.netmask))
    }

    /// `addr` is on the directly attached subnet.
    #[inline]
    pub fn on_link(&self, addr: Ipv4Addr) -> bool {
        addr.same_subnet(self.ip, self.netmask)
    }
}

impl fmt::Debug for Netif {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Netif")
            .field("index", &self.index)
            .field("name", &self.name())
            .field("mac", &self.mac)
            .field("ip", &self.ip)
            .field("netmask", &self.netmask)
            .field("gateway", &self.gateway)
            .field("flags", &self.flags)
            .field("output", &self.output.is_some())
            .finish()
    }
}

impl NetStack {
    /// Add a zeroed interface with no output hook.
    pub fn netif_create(&self) -> IfIndex {
        let mut table = self.netifs.lock();
        let index = IfIndex(table.len());
        table.push(Netif::empty(index));
        index
    }

    /// Bring up a physical interface `eth<N>` on `device`, with the default
    /// addressing from [`NetConfig`](crate::NetConfig).
    pub fn netif_attach(&self, mac: MacAddr, device: Arc<dyn NetDevice>) -> IfIndex {
        let cfg = &self.config;
        let mut table = self.netifs.lock();
        let index = IfIndex(table.len());
        let unit = table.iter().filter(|n| !n.is_loopback()).count();

        let mut netif = Netif::empty(index);
        netif.set_name(&format!("eth{}", unit));
        netif.mac = mac;
        netif.ip = cfg.phys_addr;
        netif.netmask = cfg.phys_netmask;
        netif.gateway = cfg.phys_gateway;
        netif.output = Some(Arc::new(DeviceOutput::new(device)));
        klog_info!(
            "netif: {} up, mac {} addr {} mask {} gw {}",
            netif.name(),
            netif.mac,
            netif.ip,
            netif.netmask,
            netif.gateway
        );
        table.push(netif);
        index
    }

    /// Install the loopback interface `lo`.  Called once, by `NetStack::new`.
    pub(crate) fn netif_setup_loopback(&self) -> IfIndex {
        let index = self.netif_create();
        let mut table = self.netifs.lock();
        let lo = &mut table[index.0];
        lo.set_name("lo");
        lo.ip = self.config.loopback_addr;
        lo.netmask = self.config.loopback_netmask;
        lo.flags = NetifFlags::LOOPBACK | NetifFlags::OFFLOAD_ALL;
        lo.output = Some(Arc::new(LoopbackOutput));
        klog_info!("netif: lo up, addr {} mask {}", lo.ip, lo.netmask);
        index
    }

    /// Replace the output hook of `index`.
    pub fn netif_set_output(&self, index: IfIndex, output: Arc<dyn LinkOutput>) -> Result<()> {
        let mut table = self.netifs.lock();
        let netif = table.get_mut(index.0).ok_or(NetError::InvalidArgument)?;
        netif.output = Some(output);
        Ok(())
    }

    pub fn netif_set_name(&self, index: IfIndex, name: &str) -> Result<()> {
        let mut table = self.netifs.lock();
        let netif = table.get_mut(index.0).ok_or(NetError::InvalidArgument)?;
        netif.set_name(name);
        Ok(())
    }

    pub fn netif_set_mac(&self, index: IfIndex, mac: MacAddr) -> Result<()> {
        let mut table = self.netifs.lock();
        let netif = table.get_mut(index.0).ok_or(NetError::InvalidArgument)?;
        netif.mac = mac;
        Ok(())
    }

    pub fn netif_set_flags(&self, index: IfIndex, flags: NetifFlags) -> Result<()> {
        let mut table = self.netifs.lock();
        let netif = table.get_mut(index.0).ok_or(NetError::InvalidArgument)?;
        netif.flags = flags;
        Ok(())
    }

    pub fn netif_set_addr(
        &self,
        index: IfIndex,
        ip: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        let mut table = self.netifs.lock();
        let netif = table.get_mut(index.0).ok_or(NetError::InvalidArgument)?;
        netif.ip = ip;
        netif.netmask = netmask;
        netif.gateway = gateway;
        Ok(())
    }

    /// Snapshot of interface `index`.
    pub fn netif(&self, index: IfIndex) -> Result<Netif> {
        self.netifs
            .lock()
            .get(index.0)
            .cloned()
            .ok_or(NetError::InvalidArgument)
    }

    pub fn netif_find(&self, name: &str) -> Option<IfIndex> {
        self.netifs
            .lock()
            .iter()
            .find(|n| n.name() == name)
            .map(|n| n.index)
    }

    pub fn netif_count(&self) -> usize {
        self.netifs.lock().len()
    }

    pub fn loopback(&self) -> IfIndex {
        self.loopback
    }

    /// `addr` is the address of some interface, or in 127/8.
    pub fn is_local_addr(&self, addr: Ipv4Addr) -> bool {
        addr.is_loopback() || self.netifs.lock().iter().any(|n| n.is_configured() && n.ip == addr)
    }

    /// Inbound entry point: hand a received frame to Ethernet dispatch.
    pub fn netif_input(&self, index: IfIndex, buf: Pbuf) -> Result<()> {
        let netif = self.netif(index)?;
        self.eth_input(&netif, buf)
    }

    /// Send a finished frame through the interface's output hook.
    pub fn netif_output(&self, netif: &Netif, buf: Pbuf) -> Result<()> {
        match netif.output.as_ref() {
            Some(output) => output.output(self, netif, buf),
            None => {
                klog_debug!("netif: {} has no output, dropping {:?}", netif.index, buf);
                Err(NetError::NotConfigured)
            }
        }
    }

    /// Queue a received frame for [`poll_rx`](Self::poll_rx).  Safe to call
    /// from the receive interrupt.  A full backlog drops the frame.
    pub fn netif_rx_enqueue(&self, index: IfIndex, buf: Pbuf) -> Result<()> {
        let mut backlog = self.rx_backlog.lock();
        if backlog.len() >= self.config.rx_backlog {
            drop(backlog);
            self.stats.bump(&self.stats.rx_backlog_dropped);
            klog_debug!("netif: rx backlog full, dropping {:?}", buf);
            return Err(NetError::NoBufferSpace);
        }
        backlog.push_back((index, buf));
        Ok(())
    }

    /// Run up to `budget` queued frames through input, oldest first.
    /// Returns the number processed.
    pub fn poll_rx(&self, budget: usize) -> usize {
        let mut done = 0;
        while done < budget {
            let Some((index, buf)) = self.rx_backlog.lock().pop_front() else {
                break;
            };
            if let Err(err) = self.netif_input(index, buf) {
                klog_debug!("netif: input on {} failed: {}", index, err);
            }
            done += 1;
        }
        done
    }

    pub fn rx_pending(&self) -> usize {
        self.rx_backlog.lock().len()
    }

    /// Interface ioctl.
    ///
    /// `SIOCGIFNAME` looks the interface up by `req.index`; every other
    /// command by `req.name`.
    pub fn netif_ioctl(&self, cmd: u32, req: &mut IfReq) -> Result<()> {
        let index = match cmd {
            SIOCGIFNAME => IfIndex(req.index as usize),
            _ => {
                let name = req.name_str().ok_or(NetError::InvalidArgument)?;
                self.netif_find(name).ok_or(NetError::NotConfigured)?
            }
        };

        let mut table = self.netifs.lock();
        let netif = table.get_mut(index.0).ok_or(NetError::NotConfigured)?;
        match cmd {
            SIOCGIFNAME => req.name = netif.name,
            SIOCGIFINDEX => req.index = netif.index.0 as u32,
            SIOCGIFADDR => req.ipaddr = netif.ip.0,
            SIOCGIFNETMASK => req.netmask = netif.netmask.0,
            SIOCGIFGATEWAY => req.gateway = netif.gateway.0,
            SIOCGIFBRDADDR => req.broadcast = netif.broadcast().0,
            SIOCGIFHWADDR => req.hwaddr = netif.mac.0,
            SIOCSIFADDR => netif.ip = Ipv4Addr(req.ipaddr),
            SIOCSIFNETMASK => netif.netmask = Ipv4Addr(req.netmask),
            SIOCSIFGATEWAY => netif.gateway = Ipv4Addr(req.gateway),
            _ => return Err(NetError::InvalidArgument),
        }
        Ok(())
    }
}
