//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces the sync engine uses to interact
//! with external systems. Implementations live in `adapters` and
//! `kubernetes`.

mod cluster;
mod config;
mod listener;

pub use cluster::{
    ClusterClient, ClusterConnector, ServiceWatch, WatchSender, WatchUpdate,
    WATCH_CHANNEL_CAPACITY,
};
pub use config::ConfigProvider;
pub use listener::ListenerTracker;
