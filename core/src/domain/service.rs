//! Kubernetes service domain models.

use serde::{Deserialize, Serialize};

// ============================================================================
// ServiceType
// ============================================================================

/// The `spec.type` of a Kubernetes service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
    /// A type this crate does not know about.
    Other(String),
}

impl ServiceType {
    /// Parses the API server's type string. A missing type means `ClusterIP`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("") | Some("ClusterIP") => ServiceType::ClusterIP,
            Some("NodePort") => ServiceType::NodePort,
            Some("LoadBalancer") => ServiceType::LoadBalancer,
            Some("ExternalName") => ServiceType::ExternalName,
            Some(other) => ServiceType::Other(other.to_string()),
        }
    }

    /// The type string as the API server spells it.
    pub fn as_str(&self) -> &str {
        match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::ExternalName => "ExternalName",
            ServiceType::Other(other) => other,
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ServicePort / ServiceDescriptor
// ============================================================================

/// One port mapping of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    /// The port reserved on every node, if the API server has allocated one.
    pub node_port: Option<u16>,
    pub protocol: Option<String>,
}

impl ServicePort {
    /// Creates a TCP port mapping with a node port.
    pub fn node_port(port: u16, node_port: u16) -> Self {
        Self {
            name: None,
            port,
            node_port: Some(node_port),
            protocol: Some("TCP".to_string()),
        }
    }
}

/// Snapshot of a service as received from the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub namespace: String,
    pub name: String,
    pub service_type: ServiceType,
    pub ports: Vec<ServicePort>,
}

impl ServiceDescriptor {
    /// Creates a service descriptor.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        service_type: ServiceType,
        ports: Vec<ServicePort>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            service_type,
            ports,
        }
    }

    /// Returns the service ID in the format "namespace/name".
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Whether the service exposes node ports that should be mirrored.
    pub fn is_node_port(&self) -> bool {
        self.service_type == ServiceType::NodePort
    }

    /// Allocated node ports, in the order the cluster reports them.
    pub fn node_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().filter_map(|p| p.node_port)
    }
}

// ============================================================================
// ServiceEvent
// ============================================================================

/// A change notification for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub service: ServiceDescriptor,
    /// True when the service was removed from the cluster.
    pub deleted: bool,
}

impl ServiceEvent {
    /// The service was added or modified.
    pub fn applied(service: ServiceDescriptor) -> Self {
        Self {
            service,
            deleted: false,
        }
    }

    /// The service was deleted.
    pub fn deleted(service: ServiceDescriptor) -> Self {
        Self {
            service,
            deleted: true,
        }
    }
}
