//! Watch command - keep loopback listeners in sync with the cluster.

use std::time::Duration;

use anyhow::Result;
use portmirror_core::{KubeconfigLoader, NodePortSyncEngine, TcpListenerTracker};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{resolve, ClusterArgs};

pub async fn run(cluster: ClusterArgs, retry_delay_ms: Option<u64>) -> Result<()> {
    let resolved = resolve(cluster).await?;
    let retry_delay = retry_delay_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| resolved.settings.retry_delay());

    let engine = NodePortSyncEngine::new(KubeconfigLoader::new(), resolved.connector)
        .with_retry_delay(retry_delay);
    let tracker = TcpListenerTracker::new();

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    info!(
        kubeconfig = %resolved.kubeconfig.display(),
        retry_delay_ms = engine.retry_delay().as_millis() as u64,
        "watching for NodePort services"
    );
    let result = engine.run(cancel, &tracker, &resolved.kubeconfig).await;

    let open = tracker.active();
    tracker.close_all();
    info!(listeners = open.len(), "closed listeners");

    result?;
    Ok(())
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    wait_for_signal().await;
    info!("shutting down");
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
