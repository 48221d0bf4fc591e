//! Error types for the portmirror-core library.

use std::net::IpAddr;

use thiserror::Error;

use crate::kubernetes::errors::KubectlError;

/// Result type alias for portmirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while mirroring NodePort services.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to open or close a loopback listener.
    #[error("Listener {address}:{port} failed: {source}")]
    Listener {
        address: IpAddr,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The service watch ended without reporting a reason.
    #[error("Service watch stream closed")]
    WatchClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kubernetes/kubectl error.
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubectlError),
}

impl Error {
    /// Returns true if the cluster config file does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kubernetes(e) if e.is_not_found())
    }

    /// Returns true if the error is a timeout or connectivity failure that
    /// may clear once the API server comes up.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Kubernetes(e) => e.is_timeout(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
