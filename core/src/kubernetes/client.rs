//! Cluster client backed by kubectl.
//!
//! A watch runs `kubectl get services --watch` as a child process and a
//! reader task decodes its output into service events.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::discovery::KubectlDiscovery;
use super::errors::{KubectlError, Result};
use super::kubeconfig::Kubeconfig;
use super::models::{ServiceListResponse, WatchEventJson};
use crate::domain::{ServiceDescriptor, ServiceEvent};
use crate::error::Error;
use crate::ports::{ClusterClient, ClusterConnector, ServiceWatch, WatchSender, WATCH_CHANNEL_CAPACITY};

/// Default timeout for one-shot kubectl requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Read buffer size for watch output.
const READ_CHUNK: usize = 16 * 1024;

/// Builds `KubectlClient`s from loaded kubeconfigs.
#[derive(Debug, Clone)]
pub struct KubectlConnector {
    discovery: KubectlDiscovery,
    request_timeout: Duration,
}

impl KubectlConnector {
    pub fn new(discovery: KubectlDiscovery) -> Self {
        Self {
            discovery,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl Default for KubectlConnector {
    fn default() -> Self {
        Self::new(KubectlDiscovery::new())
    }
}

impl ClusterConnector for KubectlConnector {
    type Config = Kubeconfig;
    type Client = KubectlClient;

    fn connect(&self, config: &Kubeconfig) -> crate::error::Result<KubectlClient> {
        let kubectl = self
            .discovery
            .kubectl_path()
            .ok_or(KubectlError::KubectlNotFound)?
            .clone();
        let context = config.current_context_name()?.to_string();
        let server = config.current_server()?.to_string();

        debug!(context = %context, server = %server, "kubernetes: created client");
        Ok(KubectlClient {
            kubectl,
            kubeconfig: config.path.clone(),
            context,
            server,
            request_timeout: self.request_timeout,
        })
    }
}

/// kubectl invocation bound to one kubeconfig context.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl: PathBuf,
    kubeconfig: PathBuf,
    context: String,
    server: String,
    request_timeout: Duration,
}

impl KubectlClient {
    /// API server URL of the bound context.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.kubectl);
        command
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .arg("--context")
            .arg(&self.context)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Checks that the API server answers.
    pub async fn probe(&self) -> Result<()> {
        self.execute(&["get", "--raw", "/version"]).await.map(|_| ())
    }

    /// Lists services in all namespaces, sorted by namespace and name.
    pub async fn list_services(&self) -> Result<Vec<ServiceDescriptor>> {
        let output = self
            .execute(&["get", "services", "--all-namespaces", "-o", "json"])
            .await?;

        let response: ServiceListResponse = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        let mut services = response.into_services();
        services.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(services)
    }

    /// Executes a one-shot kubectl command and returns its stdout.
    async fn execute(&self, args: &[&str]) -> Result<String> {
        let request_timeout = format!("--request-timeout={}s", self.request_timeout.as_secs().max(1));
        let mut command = self.command();
        command.args(args).arg(&request_timeout);

        // kubectl enforces its own request timeout; this bounds the process.
        let result = timeout(self.request_timeout + Duration::from_secs(5), command.output()).await;

        match result {
            Ok(Ok(output)) => {
                if output.status.success() {
                    String::from_utf8(output.stdout)
                        .map_err(|e| KubectlError::ParsingFailed(e.to_string()))
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(KubectlError::from_kubectl_error(&stderr))
                }
            }
            Ok(Err(e)) => Err(KubectlError::Io(e)),
            Err(_) => Err(KubectlError::Timeout),
        }
    }
}

impl ClusterClient for KubectlClient {
    async fn watch_services(&self, cancel: CancellationToken) -> crate::error::Result<ServiceWatch> {
        self.probe().await?;

        let mut child = self
            .command()
            .args([
                "get",
                "services",
                "--all-namespaces",
                "--watch",
                "--output-watch-events",
                "-o",
                "json",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(KubectlError::Io)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KubectlError::CommandFailed("kubectl stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KubectlError::CommandFailed("kubectl stderr not captured".to_string()))?;

        let (tx, watch) = ServiceWatch::channel(WATCH_CHANNEL_CAPACITY);
        tokio::spawn(read_watch(child, stdout, stderr, tx, cancel));
        Ok(watch)
    }
}

/// Pumps kubectl watch output into the channel until cancelled or broken.
async fn read_watch<R, E>(
    mut child: Child,
    mut stdout: R,
    stderr: E,
    tx: WatchSender,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let stderr_task = tokio::spawn(collect_stderr(stderr));
    let mut decoder = WatchDecoder::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    let failure: Error = loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("kubernetes: watch cancelled");
                let _ = child.kill().await;
                return;
            }
            read = stdout.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                let status = child.wait().await;
                let stderr = stderr_task.await.unwrap_or_default();
                debug!(
                    status = ?status,
                    stderr = %stderr.trim(),
                    pending = decoder.pending(),
                    "kubernetes: watch process exited"
                );
                break if !stderr.trim().is_empty() {
                    KubectlError::from_kubectl_error(&stderr).into()
                } else if decoder.pending() > 0 {
                    KubectlError::ParsingFailed("watch output ended mid-object".to_string()).into()
                } else {
                    Error::WatchClosed
                };
            }
            Ok(n) => {
                let mut broken = None;
                for decoded in decoder.push(&chunk[..n]) {
                    match decoded {
                        Ok(event) => {
                            if !tx.event(event).await {
                                let _ = child.kill().await;
                                return;
                            }
                        }
                        Err(e) => {
                            broken = Some(e);
                            break;
                        }
                    }
                }
                if let Some(e) = broken {
                    break e.into();
                }
            }
            Err(e) => break KubectlError::Io(e).into(),
        }
    };

    warn!(error = %failure, "kubernetes: service watch failed");
    let _ = child.kill().await;
    tx.fail(failure).await;
}

async fn collect_stderr<E: AsyncRead + Unpin>(mut stderr: E) -> String {
    let mut buf = Vec::new();
    let _ = stderr.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Incremental decoder for kubectl's stream of concatenated JSON objects.
#[derive(Debug, Default)]
pub struct WatchDecoder {
    buf: Vec<u8>,
}

impl WatchDecoder {
    /// Feeds a chunk of output and returns every complete event in it.
    /// Incomplete trailing data is kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ServiceEvent>> {
        self.buf.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        let mut consumed = 0;
        let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<WatchEventJson>();
        loop {
            match stream.next() {
                Some(Ok(raw)) => {
                    consumed = stream.byte_offset();
                    match raw.into_event() {
                        Ok(Some(event)) => decoded.push(Ok(event)),
                        Ok(None) => {}
                        Err(e) => decoded.push(Err(e)),
                    }
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    decoded.push(Err(KubectlError::ParsingFailed(e.to_string())));
                    consumed = self.buf.len();
                    break;
                }
                None => {
                    consumed = self.buf.len();
                    break;
                }
            }
        }

        self.buf.drain(..consumed);
        decoded
    }

    /// Bytes buffered waiting for the rest of an object.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
