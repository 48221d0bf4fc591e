//! Domain layer - Pure data models.
//!
//! This module contains the service and listener types the engine works on.
//! These types have no I/O dependencies and can be tested in isolation.

mod listener;
mod service;

// Re-export all domain types
pub use listener::{ListenerKey, LOOPBACK};
pub use service::{ServiceDescriptor, ServiceEvent, ServicePort, ServiceType};
