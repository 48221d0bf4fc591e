//! Services command - list the services that would be mirrored.

use anyhow::{Context, Result};
use portmirror_core::ports::{ClusterConnector, ConfigProvider};
use portmirror_core::{KubeconfigLoader, ServiceDescriptor};

use super::{resolve, ClusterArgs};

pub async fn run(cluster: ClusterArgs, all: bool, json: bool) -> Result<()> {
    let resolved = resolve(cluster).await?;
    let config = KubeconfigLoader::new()
        .load(&resolved.kubeconfig)
        .await
        .with_context(|| format!("failed to load {}", resolved.kubeconfig.display()))?;
    let client = resolved.connector.connect(&config)?;

    let mut services = client.list_services().await?;
    if !all {
        services.retain(ServiceDescriptor::is_node_port);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if services.is_empty() {
        println!("No NodePort services found.");
        return Ok(());
    }

    // Table header
    println!(
        "{:<20} {:<30} {:<14} NODE PORTS",
        "NAMESPACE", "NAME", "TYPE"
    );
    println!("{}", "-".repeat(80));

    for service in &services {
        let node_ports: Vec<String> = service.node_ports().map(|p| p.to_string()).collect();
        let node_ports = if node_ports.is_empty() {
            "-".to_string()
        } else {
            node_ports.join(",")
        };

        println!(
            "{:<20} {:<30} {:<14} {}",
            truncate(&service.namespace, 20),
            truncate(&service.name, 30),
            service.service_type.as_str(),
            node_ports
        );
    }

    println!("\nTotal: {} services", services.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 1).collect();
        format!("{}…", head)
    }
}
