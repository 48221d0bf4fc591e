//! Loopback TCP listener adapter.
//!
//! Each listener accepts connections and closes them immediately; its only
//! job is to make the port show up as listening.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::ListenerKey;
use crate::error::{Error, Result};
use crate::ports::ListenerTracker;

/// Back-off after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Tracks open loopback listeners keyed by (address, port).
pub struct TcpListenerTracker {
    listeners: Mutex<HashMap<ListenerKey, CancellationToken>>,
    shutdown: CancellationToken,
}

impl TcpListenerTracker {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Currently open listeners, sorted.
    pub fn active(&self) -> Vec<ListenerKey> {
        let mut keys: Vec<_> = self.listeners.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn is_listening(&self, key: &ListenerKey) -> bool {
        self.listeners.lock().contains_key(key)
    }

    /// Closes every listener.
    pub fn close_all(&self) {
        let closed: Vec<_> = self.listeners.lock().drain().collect();
        for (key, token) in closed {
            token.cancel();
            debug!(listener = %key, "closed listener");
        }
    }
}

impl Default for TcpListenerTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpListenerTracker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl ListenerTracker for TcpListenerTracker {
    async fn add(&self, address: IpAddr, port: u16) -> Result<()> {
        let key = ListenerKey::new(address, port);
        if self.is_listening(&key) {
            debug!(listener = %key, "listener already open");
            return Ok(());
        }

        let listener = TcpListener::bind(key.socket_addr())
            .await
            .map_err(|source| Error::Listener {
                address,
                port,
                source,
            })?;

        let token = self.shutdown.child_token();
        {
            let mut listeners = self.listeners.lock();
            if listeners.contains_key(&key) {
                return Ok(());
            }
            listeners.insert(key, token.clone());
        }

        tokio::spawn(accept_loop(key, listener, token));
        debug!(listener = %key, "opened listener");
        Ok(())
    }

    async fn remove(&self, address: IpAddr, port: u16) -> Result<()> {
        let key = ListenerKey::new(address, port);
        let removed = self.listeners.lock().remove(&key);
        match removed {
            Some(token) => {
                token.cancel();
                debug!(listener = %key, "closed listener");
            }
            None => debug!(listener = %key, "no listener to close"),
        }
        Ok(())
    }
}

async fn accept_loop(key: ListenerKey, listener: TcpListener, token: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(listener = %key, peer = %peer, "dropping connection");
                    drop(stream);
                }
                Err(e) => {
                    warn!(listener = %key, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                }
            },
        }
    }
}
