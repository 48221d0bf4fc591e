//! Errors raised while talking to a cluster through kubectl.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for kubectl operations.
pub type Result<T> = std::result::Result<T, KubectlError>;

/// stderr fragments that mean the API server is not reachable (yet).
const NOT_CONNECTED_PATTERNS: &[&str] = &[
    "connection refused",
    "dial tcp",
    "i/o timeout",
    "unable to connect to the server",
    "context deadline exceeded",
    "tls handshake timeout",
    "no route to host",
    "connection reset by peer",
    "server is currently unable to handle the request",
];

/// Errors that can occur when loading a kubeconfig or running kubectl.
#[derive(Error, Debug)]
pub enum KubectlError {
    /// The kubeconfig file does not exist.
    #[error("Kubeconfig not found at {}", .0.display())]
    KubeconfigNotFound(PathBuf),

    /// The kubeconfig exists but cannot be used.
    #[error("Invalid kubeconfig: {0}")]
    InvalidKubeconfig(String),

    /// kubectl is not installed or not found.
    #[error("kubectl not found")]
    KubectlNotFound,

    /// The API server could not be reached.
    #[error("Cluster not connected: {0}")]
    ClusterNotConnected(String),

    /// A kubectl command did not finish in time.
    #[error("kubectl command timed out")]
    Timeout,

    /// kubectl exited with an error.
    #[error("kubectl command failed: {0}")]
    CommandFailed(String),

    /// kubectl produced output that could not be decoded.
    #[error("Failed to parse kubectl output: {0}")]
    ParsingFailed(String),

    /// The watch stream reported an error object.
    #[error("Watch error: {0}")]
    WatchFailed(String),

    /// I/O error while spawning or reading kubectl.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubectlError {
    /// Classifies kubectl stderr output.
    pub fn from_kubectl_error(stderr: &str) -> Self {
        let message = stderr.trim();
        let lower = message.to_lowercase();
        if NOT_CONNECTED_PATTERNS.iter().any(|p| lower.contains(p)) {
            KubectlError::ClusterNotConnected(message.to_string())
        } else {
            KubectlError::CommandFailed(message.to_string())
        }
    }

    /// Returns true if the API server could not be reached.
    pub fn is_cluster_not_connected(&self) -> bool {
        matches!(self, KubectlError::ClusterNotConnected(_))
    }

    /// Returns true for timeouts and connectivity failures.
    pub fn is_timeout(&self) -> bool {
        match self {
            KubectlError::Timeout => true,
            KubectlError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => self.is_cluster_not_connected(),
        }
    }

    /// Returns true if the kubeconfig file is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubectlError::KubeconfigNotFound(_))
    }
}
