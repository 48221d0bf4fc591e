//! Loopback listener keys.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Address every mirrored listener binds to.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Identifies a local listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey {
    pub address: IpAddr,
    pub port: u16,
}

impl ListenerKey {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    /// A listener on 127.0.0.1.
    pub fn loopback(port: u16) -> Self {
        Self::new(LOOPBACK, port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
