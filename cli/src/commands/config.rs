//! Config command - show or change stored settings.

use std::path::PathBuf;

use anyhow::Result;
use portmirror_core::SettingsStore;
use serde::Serialize;

use super::load_settings;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EffectiveSettings {
    settings_file: PathBuf,
    kubeconfig: Option<PathBuf>,
    kubectl: Option<PathBuf>,
    retry_delay_ms: u64,
    request_timeout_secs: u64,
}

pub async fn show(json: bool) -> Result<()> {
    let store = SettingsStore::new()?;
    let settings = load_settings().await?;
    let kubectl = portmirror_core::KubectlDiscovery::with_path(settings.kubectl_path.clone())
        .kubectl_path()
        .cloned();

    let effective = EffectiveSettings {
        settings_file: store.path().to_path_buf(),
        kubeconfig: settings.resolved_kubeconfig_path(),
        kubectl,
        retry_delay_ms: settings.retry_delay_ms,
        request_timeout_secs: settings.request_timeout_secs,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&effective)?);
        return Ok(());
    }

    println!("Settings file:   {}", effective.settings_file.display());
    println!("Kubeconfig:      {}", display_path(&effective.kubeconfig));
    println!("kubectl:         {}", display_path(&effective.kubectl));
    println!("Retry delay:     {} ms", effective.retry_delay_ms);
    println!("Request timeout: {} s", effective.request_timeout_secs);
    Ok(())
}

pub async fn set(
    kubeconfig: Option<PathBuf>,
    kubectl: Option<PathBuf>,
    retry_delay_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
) -> Result<()> {
    let store = SettingsStore::new()?;
    store
        .update(|settings| {
            if let Some(path) = kubeconfig {
                settings.kubeconfig_path = Some(path);
            }
            if let Some(path) = kubectl {
                settings.kubectl_path = Some(path);
            }
            if let Some(ms) = retry_delay_ms {
                settings.retry_delay_ms = ms;
            }
            if let Some(secs) = request_timeout_secs {
                settings.request_timeout_secs = secs;
            }
        })
        .await?;

    println!("Saved {}", store.path().display());
    Ok(())
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not found)".to_string())
}
