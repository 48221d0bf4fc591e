//! Listener tracker port (interface).

use std::net::IpAddr;

use crate::error::Result;

/// Port for opening and closing local listeners.
///
/// Both operations must be safe to repeat for the same (address, port).
pub trait ListenerTracker: Send + Sync {
    /// Open a listener unless one already exists.
    fn add(&self, address: IpAddr, port: u16)
        -> impl std::future::Future<Output = Result<()>> + Send;

    /// Close a listener if one exists.
    fn remove(
        &self,
        address: IpAddr,
        port: u16,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
