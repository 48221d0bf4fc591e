//! Cluster client ports (interfaces).

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::ServiceEvent;
use crate::error::{Error, Result};

/// Buffer size for a service watch channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 64;

/// Port for building a cluster client from loaded config.
pub trait ClusterConnector: Send + Sync {
    /// Config produced by the matching `ConfigProvider`.
    type Config: Send + Sync;

    /// Client type this connector builds.
    type Client: ClusterClient;

    /// Constructs an API client. Failures are not expected to clear on retry.
    fn connect(&self, config: &Self::Config) -> Result<Self::Client>;
}

/// Port for watching Service resources.
pub trait ClusterClient: Send + Sync {
    /// Opens a watch over all services.
    ///
    /// The background reader must stop once `cancel` fires. Connectivity
    /// failures should be reported so that `Error::is_timeout` returns true.
    fn watch_services(
        &self,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<ServiceWatch>> + Send;
}

/// One item delivered by a service watch.
#[derive(Debug)]
pub enum WatchUpdate {
    /// A service changed.
    Event(ServiceEvent),
    /// The stream broke; no further events follow.
    Failed(Error),
}

/// Receiving half of a service watch.
///
/// Events and stream errors share one queue, so they are observed in the
/// order the reader produced them.
#[derive(Debug)]
pub struct ServiceWatch {
    rx: mpsc::Receiver<WatchUpdate>,
}

impl ServiceWatch {
    /// Creates a connected sender/watch pair.
    pub fn channel(capacity: usize) -> (WatchSender, ServiceWatch) {
        let (tx, rx) = mpsc::channel(capacity);
        (WatchSender { tx }, ServiceWatch { rx })
    }

    /// Waits for the next update. A closed channel is reported as
    /// `Error::WatchClosed`.
    pub async fn next(&mut self) -> WatchUpdate {
        match self.rx.recv().await {
            Some(update) => update,
            None => WatchUpdate::Failed(Error::WatchClosed),
        }
    }
}

/// Sending half of a service watch, held by the stream reader.
#[derive(Debug, Clone)]
pub struct WatchSender {
    tx: mpsc::Sender<WatchUpdate>,
}

impl WatchSender {
    /// Delivers an event. Returns false once the watch has been dropped.
    pub async fn event(&self, event: ServiceEvent) -> bool {
        self.tx.send(WatchUpdate::Event(event)).await.is_ok()
    }

    /// Reports a stream failure. Returns false once the watch has been dropped.
    pub async fn fail(&self, error: Error) -> bool {
        self.tx.send(WatchUpdate::Failed(error)).await.is_ok()
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
