//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`
//! that are not Kubernetes specific. The kubectl-backed cluster adapters live
//! in `kubernetes`.

pub mod listener;

// Re-export main types for convenience
pub use listener::TcpListenerTracker;
