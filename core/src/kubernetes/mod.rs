//! Kubernetes module for kubeconfig loading and service watching.
//!
//! This module provides:
//! - Kubeconfig discovery and parsing
//! - kubectl discovery
//! - A kubectl-backed cluster client that watches services
//! - Classification of kubectl failures into transient and fatal

pub mod client;
pub mod discovery;
pub mod errors;
pub mod kubeconfig;
pub mod models;

// Re-export commonly used types
pub use client::{KubectlClient, KubectlConnector, WatchDecoder, DEFAULT_REQUEST_TIMEOUT};
pub use discovery::KubectlDiscovery;
pub use errors::{KubectlError, Result};
pub use kubeconfig::{default_kubeconfig_path, KubeconfigLoader, Kubeconfig};
