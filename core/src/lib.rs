//! PortMirror Core Library
//!
//! Keeps a set of loopback TCP listeners in sync with the NodePort services
//! of a Kubernetes cluster, so that port-forwarding tools which look for
//! "something listening on 127.0.0.1:<port>" pick the services up.
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Service and listener data models
//! - `ports`: Trait definitions (interfaces) the engine depends on
//! - `adapters`: Loopback listener implementation
//! - `kubernetes`: kubeconfig loading and the kubectl-backed cluster client
//! - `engine`: The watch-and-reconcile state machine

// Hexagonal architecture layers
pub mod domain;
pub mod ports;
pub mod adapters;

pub mod config;
pub mod engine;
pub mod error;
pub mod kubernetes;

// Re-export domain types (primary API)
pub use domain::{ListenerKey, ServiceDescriptor, ServiceEvent, ServicePort, ServiceType, LOOPBACK};

// Re-export other commonly used types
pub use adapters::TcpListenerTracker;
pub use config::{Settings, SettingsStore};
pub use engine::{EngineState, NodePortSyncEngine, DEFAULT_RETRY_DELAY};
pub use error::{Error, Result};
pub use kubernetes::{KubeconfigLoader, KubectlConnector, KubectlDiscovery};
