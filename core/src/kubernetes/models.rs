//! kubectl JSON models for services and watch events.

use serde::Deserialize;

use super::errors::{KubectlError, Result};
use crate::domain::{ServiceDescriptor, ServiceEvent, ServicePort, ServiceType};

// ============================================================================
// kubectl JSON Response Parsing
// ============================================================================

/// Response structure for `kubectl get services -o json`.
#[derive(Debug, Deserialize)]
pub struct ServiceListResponse {
    pub items: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceItem {
    pub metadata: ServiceMetadata,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
pub struct ServiceMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub ports: Option<Vec<ServicePortSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    pub name: Option<String>,
    pub port: u16,
    pub node_port: Option<u16>,
    pub protocol: Option<String>,
}

impl From<ServiceItem> for ServiceDescriptor {
    fn from(item: ServiceItem) -> Self {
        ServiceDescriptor {
            namespace: item.metadata.namespace,
            name: item.metadata.name,
            service_type: ServiceType::parse(item.spec.service_type.as_deref()),
            ports: item
                .spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| ServicePort {
                    name: p.name,
                    port: p.port,
                    node_port: p.node_port.filter(|&np| np != 0),
                    protocol: p.protocol,
                })
                .collect(),
        }
    }
}

impl ServiceListResponse {
    /// Converts the kubectl response to a list of service descriptors.
    pub fn into_services(self) -> Vec<ServiceDescriptor> {
        self.items.into_iter().map(ServiceDescriptor::from).collect()
    }
}

// ============================================================================
// Watch events
// ============================================================================

/// One object of `kubectl get --watch --output-watch-events -o json`.
#[derive(Debug, Deserialize)]
pub struct WatchEventJson {
    #[serde(rename = "type")]
    pub event_type: String,
    pub object: serde_json::Value,
}

/// The `Status` object carried by `ERROR` watch events.
#[derive(Debug, Default, Deserialize)]
struct WatchStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
}

impl WatchEventJson {
    /// Converts the raw event. Bookmarks yield `None`.
    pub fn into_event(self) -> Result<Option<ServiceEvent>> {
        let deleted = match self.event_type.as_str() {
            "ADDED" | "MODIFIED" => false,
            "DELETED" => true,
            "BOOKMARK" => return Ok(None),
            "ERROR" => {
                let status: WatchStatus = serde_json::from_value(self.object).unwrap_or_default();
                return Err(KubectlError::WatchFailed(
                    format!("{} {}", status.reason, status.message).trim().to_string(),
                ));
            }
            other => {
                return Err(KubectlError::ParsingFailed(format!(
                    "unknown watch event type {other:?}"
                )))
            }
        };

        let item: ServiceItem = serde_json::from_value(self.object)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;
        Ok(Some(ServiceEvent {
            service: item.into(),
            deleted,
        }))
    }
}
