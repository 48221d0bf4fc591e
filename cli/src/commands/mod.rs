//! Subcommand implementations.

pub mod config;
pub mod services;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use portmirror_core::{KubectlConnector, KubectlDiscovery, Settings, SettingsStore};

/// Flags selecting the cluster to talk to.
#[derive(Args, Debug, Default)]
pub struct ClusterArgs {
    /// Kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// kubectl binary (default: searched in common locations and $PATH)
    #[arg(long)]
    pub kubectl: Option<PathBuf>,
}

/// Settings merged with command-line overrides.
pub struct Resolved {
    pub settings: Settings,
    pub kubeconfig: PathBuf,
    pub connector: KubectlConnector,
}

pub async fn load_settings() -> Result<Settings> {
    let store = SettingsStore::new()?;
    store
        .load()
        .await
        .with_context(|| format!("failed to load settings from {}", store.path().display()))
}

pub async fn resolve(args: ClusterArgs) -> Result<Resolved> {
    let settings = load_settings().await?;

    let kubeconfig = args
        .kubeconfig
        .or_else(|| settings.resolved_kubeconfig_path())
        .context("could not determine the kubeconfig path; pass --kubeconfig")?;

    let discovery = KubectlDiscovery::with_path(args.kubectl.or_else(|| settings.kubectl_path.clone()));
    let connector = KubectlConnector::new(discovery).with_request_timeout(settings.request_timeout());

    Ok(Resolved {
        settings,
        kubeconfig,
        connector,
    })
}
