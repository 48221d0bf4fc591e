//! Kubeconfig loading.
//!
//! Only the parts needed to pick a cluster are modelled; credentials are
//! left to kubectl.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;

use super::errors::{KubectlError, Result};
use crate::ports::ConfigProvider;

/// A parsed kubeconfig file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: Option<String>,
    /// File this config was read from.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterEntry {
    #[serde(default)]
    pub server: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextEntry {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Kubeconfig {
    /// Parses kubeconfig YAML read from `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(KubectlError::InvalidKubeconfig(format!(
                "{} is empty",
                path.display()
            )));
        }
        let mut config: Kubeconfig = serde_yaml::from_str(content).map_err(|e| {
            KubectlError::InvalidKubeconfig(format!("{}: {}", path.display(), e))
        })?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Name of the current context.
    pub fn current_context_name(&self) -> Result<&str> {
        match self.current_context.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(KubectlError::InvalidKubeconfig(
                "no current-context set".to_string(),
            )),
        }
    }

    /// Resolves the API server of the current context.
    pub fn current_server(&self) -> Result<&str> {
        let context_name = self.current_context_name()?;
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| {
                KubectlError::InvalidKubeconfig(format!("context {context_name:?} not found"))
            })?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| {
                KubectlError::InvalidKubeconfig(format!(
                    "cluster {:?} of context {context_name:?} not found",
                    context.context.cluster
                ))
            })?;
        if cluster.cluster.server.is_empty() {
            return Err(KubectlError::InvalidKubeconfig(format!(
                "cluster {:?} has no server",
                cluster.name
            )));
        }
        Ok(&cluster.cluster.server)
    }
}

/// Returns the kubeconfig path kubectl would use by default: the first
/// entry of `$KUBECONFIG`, else `~/.kube/config`.
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// Loads kubeconfig files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeconfigLoader;

impl KubeconfigLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigProvider for KubeconfigLoader {
    type Config = Kubeconfig;

    async fn load(&self, path: &Path) -> crate::error::Result<Kubeconfig> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KubectlError::KubeconfigNotFound(path.to_path_buf()).into())
            }
            Err(e) => return Err(KubectlError::Io(e).into()),
        };
        Ok(Kubeconfig::parse(&content, path)?)
    }
}
