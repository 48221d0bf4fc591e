//! Cluster config provider port (interface).

use std::path::Path;

use crate::error::Result;

/// Port for loading cluster connection config.
///
/// A missing file must be reported so that `Error::is_not_found` returns
/// true; the engine waits for such a file to appear.
pub trait ConfigProvider: Send + Sync {
    /// Loaded config handed to the `ClusterConnector`.
    type Config: Send + Sync;

    /// Load config from `path`.
    fn load(&self, path: &Path) -> impl std::future::Future<Output = Result<Self::Config>> + Send;
}
