//! Locating the kubectl executable.

use std::path::{Path, PathBuf};

/// Default paths to search for kubectl.
const KUBECTL_PATHS: &[&str] = &[
    "/opt/homebrew/bin/kubectl", // Apple Silicon
    "/usr/local/bin/kubectl",    // Intel Mac / Homebrew
    "/usr/bin/kubectl",          // System
];

/// Finds the kubectl binary used by the cluster client.
#[derive(Debug, Clone)]
pub struct KubectlDiscovery {
    kubectl_path: Option<PathBuf>,
}

impl KubectlDiscovery {
    /// Searches the well-known install locations, then `$PATH`.
    pub fn new() -> Self {
        let kubectl_path = find_executable(KUBECTL_PATHS).or_else(|| find_in_path("kubectl"));
        Self { kubectl_path }
    }

    /// Uses an explicit kubectl path when given, else searches as `new` does.
    pub fn with_path(kubectl_path: Option<PathBuf>) -> Self {
        match kubectl_path {
            Some(path) => Self {
                kubectl_path: Some(path),
            },
            None => Self::new(),
        }
    }

    /// Returns the kubectl path if found.
    pub fn kubectl_path(&self) -> Option<&PathBuf> {
        self.kubectl_path.as_ref()
    }

    /// Returns true if kubectl is available.
    pub fn is_kubectl_available(&self) -> bool {
        self.kubectl_path.as_deref().is_some_and(Path::exists)
    }
}

impl Default for KubectlDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds an executable in the given paths.
fn find_executable(paths: &[&str]) -> Option<PathBuf> {
    paths.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Finds an executable by name in `$PATH`.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
