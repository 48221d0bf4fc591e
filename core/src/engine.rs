//! NodePort sync engine - keeps loopback listeners in step with the cluster.
//!
//! The engine is a single loop over an explicit state machine:
//!
//! ```text
//! NoConfig --load ok--> Disconnected --connect--> Connected --watch ok--> Watching
//!    ^  |                    ^                        |                     |
//!    |  +-- not found: retry +------ timeout: retry --+                     |
//!    +---------------------------- stream error: full restart --------------+
//! ```
//!
//! Transient failures are retried after a fixed delay. Everything else is
//! returned to the caller, which ends the loop.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::{ServiceEvent, LOOPBACK};
use crate::error::Result;
use crate::ports::{
    ClusterClient, ClusterConnector, ConfigProvider, ListenerTracker, ServiceWatch, WatchUpdate,
};

/// Delay between retries of a transient failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Observable phase of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Waiting for cluster config to load.
    #[default]
    NoConfig,
    /// Config loaded, no client yet.
    Disconnected,
    /// Client built, watch not yet open.
    Connected,
    /// Consuming service events.
    Watching,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConfig => "no-config",
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Watching => "watching",
        }
    }
}

/// Cancellation scope of one watch. Dropping it stops the watch reader.
struct WatchScope {
    token: CancellationToken,
}

impl WatchScope {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for WatchScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Data owned by each state.
enum Phase<Cfg, Client> {
    NoConfig,
    Disconnected(Cfg),
    Watching {
        watch: ServiceWatch,
        scope: WatchScope,
        client: Client,
    },
}

/// Mirrors NodePort services onto loopback listeners.
pub struct NodePortSyncEngine<P, C> {
    config_provider: P,
    connector: C,
    retry_delay: Duration,
    state: watch::Sender<EngineState>,
}

impl<P, C> NodePortSyncEngine<P, C>
where
    P: ConfigProvider,
    C: ClusterConnector<Config = P::Config>,
{
    /// Creates an engine with the default retry delay.
    pub fn new(config_provider: P, connector: C) -> Self {
        let (state, _) = watch::channel(EngineState::NoConfig);
        Self {
            config_provider,
            connector,
            retry_delay: DEFAULT_RETRY_DELAY,
            state,
        }
    }

    /// Sets the fixed delay between retries.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Current state of the loop.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Runs the sync loop until `cancel` fires or a fatal error occurs.
    ///
    /// Returns `Ok(())` only on cancellation.
    pub async fn run<L: ListenerTracker>(
        &self,
        cancel: CancellationToken,
        tracker: &L,
        config_path: &Path,
    ) -> Result<()> {
        let mut phase: Phase<P::Config, C::Client> = Phase::NoConfig;
        self.set_state(EngineState::NoConfig);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            phase = match phase {
                Phase::NoConfig => {
                    self.set_state(EngineState::NoConfig);
                    match self.config_provider.load(config_path).await {
                        Ok(config) => {
                            debug!(config_path = %config_path.display(), "kubernetes: loaded kubeconfig");
                            Phase::Disconnected(config)
                        }
                        Err(e) => {
                            debug!(
                                config_path = %config_path.display(),
                                error = %e,
                                "kubernetes: failed to read kubeconfig"
                            );
                            if !e.is_not_found() {
                                return Err(e);
                            }
                            // Wait for the file to exist
                            if !self.pause(&cancel).await {
                                break;
                            }
                            Phase::NoConfig
                        }
                    }
                }

                Phase::Disconnected(config) => {
                    self.set_state(EngineState::Disconnected);
                    let client = match self.connector.connect(&config) {
                        Ok(client) => client,
                        Err(e) => {
                            error!(
                                config_path = %config_path.display(),
                                error = %e,
                                "kubernetes: failed to create client"
                            );
                            return Err(e);
                        }
                    };
                    self.set_state(EngineState::Connected);

                    let scope = WatchScope::new(&cancel);
                    let opened = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        opened = client.watch_services(scope.token()) => opened,
                    };

                    match opened {
                        Ok(watch) => {
                            debug!("kubernetes: watching services");
                            self.set_state(EngineState::Watching);
                            Phase::Watching {
                                watch,
                                scope,
                                client,
                            }
                        }
                        Err(e) if e.is_timeout() => {
                            // The API server may not be running yet
                            debug!(error = %e, "kubernetes: timed out opening watch, retrying");
                            drop(scope);
                            self.set_state(EngineState::Disconnected);
                            if !self.pause(&cancel).await {
                                break;
                            }
                            Phase::Disconnected(config)
                        }
                        Err(e) => {
                            error!(error = %e, "kubernetes: failed to watch services");
                            return Err(e);
                        }
                    }
                }

                Phase::Watching {
                    mut watch,
                    scope,
                    client,
                } => {
                    let update = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        update = watch.next() => update,
                    };

                    match update {
                        WatchUpdate::Failed(e) => {
                            debug!(error = %e, "kubernetes: got error, rolling back");
                            drop(watch);
                            drop(scope);
                            drop(client);
                            self.set_state(EngineState::NoConfig);
                            if !self.pause(&cancel).await {
                                break;
                            }
                            Phase::NoConfig
                        }
                        WatchUpdate::Event(event) => {
                            self.apply(&cancel, tracker, &event).await;
                            Phase::Watching {
                                watch,
                                scope,
                                client,
                            }
                        }
                    }
                }
            };
        }

        info!("kubernetes: service watcher stopped");
        Ok(())
    }

    /// Issues listener calls for one event, in port order.
    async fn apply<L: ListenerTracker>(
        &self,
        cancel: &CancellationToken,
        tracker: &L,
        event: &ServiceEvent,
    ) {
        let service = &event.service;
        if !service.is_node_port() {
            debug!(
                service = %service.id(),
                service_type = %service.service_type,
                "kubernetes service: not node port"
            );
            return;
        }

        for port in &service.ports {
            if cancel.is_cancelled() {
                return;
            }
            let Some(node_port) = port.node_port else {
                debug!(
                    namespace = %service.namespace,
                    name = %service.name,
                    port = port.port,
                    "kubernetes service: port has no node port"
                );
                continue;
            };

            if event.deleted {
                match tracker.remove(LOOPBACK, node_port).await {
                    Ok(()) => debug!(
                        namespace = %service.namespace,
                        name = %service.name,
                        port = node_port,
                        "kubernetes service: deleted listener"
                    ),
                    Err(e) => error!(
                        namespace = %service.namespace,
                        name = %service.name,
                        port = node_port,
                        error = %e,
                        "failed to close listener"
                    ),
                }
            } else {
                match tracker.add(LOOPBACK, node_port).await {
                    Ok(()) => debug!(
                        namespace = %service.namespace,
                        name = %service.name,
                        port = node_port,
                        "kubernetes service: started listener"
                    ),
                    Err(e) => error!(
                        namespace = %service.namespace,
                        name = %service.name,
                        port = node_port,
                        error = %e,
                        "failed to create listener"
                    ),
                }
            }
        }
    }

    /// Sleeps for the retry delay. Returns false if cancelled first.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = current.as_str(), to = state.as_str(), "kubernetes: state change");
            *current = state;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet, VecDeque};
    use std::net::IpAddr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::domain::{ServiceDescriptor, ServicePort, ServiceType};
    use crate::error::Error;
    use crate::kubernetes::KubectlError;
    use crate::ports::WATCH_CHANNEL_CAPACITY;

    // =========================================================================
    // Fakes
    // =========================================================================

    /// Config provider that replays scripted results, then succeeds.
    #[derive(Default)]
    struct ScriptedConfig {
        results: Mutex<VecDeque<Result<String>>>,
        loads: AtomicUsize,
    }

    impl ScriptedConfig {
        fn with(results: Vec<Result<String>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                loads: AtomicUsize::new(0),
            }
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl ConfigProvider for Arc<ScriptedConfig> {
        type Config = String;

        async fn load(&self, _path: &Path) -> Result<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("cluster".to_string()))
        }
    }

    /// Shared state between the fake connector and the clients it builds.
    #[derive(Default)]
    struct FakeCluster {
        connect_results: Mutex<VecDeque<Result<()>>>,
        watch_results: Mutex<VecDeque<Result<Vec<WatchUpdate>>>>,
        connects: AtomicUsize,
        scopes: Mutex<Vec<CancellationToken>>,
        senders: Mutex<Vec<crate::ports::WatchSender>>,
        previous_scopes_closed: Mutex<Vec<bool>>,
        /// When set, `watch_services` never completes.
        stall_watch: AtomicBool,
    }

    impl FakeCluster {
        fn with_watches(watches: Vec<Result<Vec<WatchUpdate>>>) -> Self {
            Self {
                watch_results: Mutex::new(watches.into()),
                ..Default::default()
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    struct FakeConnector(Arc<FakeCluster>);

    impl ClusterConnector for FakeConnector {
        type Config = String;
        type Client = FakeClient;

        fn connect(&self, _config: &String) -> Result<FakeClient> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            self.0.connect_results.lock().pop_front().unwrap_or(Ok(()))?;
            Ok(FakeClient(self.0.clone()))
        }
    }

    struct FakeClient(Arc<FakeCluster>);

    impl ClusterClient for FakeClient {
        async fn watch_services(&self, cancel: CancellationToken) -> Result<ServiceWatch> {
            {
                let mut scopes = self.0.scopes.lock();
                let closed = scopes.iter().all(|t| t.is_cancelled());
                self.0.previous_scopes_closed.lock().push(closed);
                scopes.push(cancel);
            }
            if self.0.stall_watch.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            let updates = self.0.watch_results.lock().pop_front().unwrap_or(Ok(vec![]))?;
            let (tx, watch) = ServiceWatch::channel(WATCH_CHANNEL_CAPACITY);
            for update in updates {
                match update {
                    WatchUpdate::Event(event) => tx.event(event).await,
                    WatchUpdate::Failed(e) => tx.fail(e).await,
                };
            }
            // Keep the stream open after the scripted updates.
            self.0.senders.lock().push(tx);
            Ok(watch)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Add(u16),
        Remove(u16),
    }

    /// Listener tracker that records calls and keeps a set of open ports.
    #[derive(Default)]
    struct RecordingTracker {
        calls: Mutex<Vec<Call>>,
        open: Mutex<BTreeSet<u16>>,
        failing: HashSet<u16>,
    }

    impl RecordingTracker {
        fn failing(ports: &[u16]) -> Self {
            Self {
                failing: ports.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn open(&self) -> BTreeSet<u16> {
            self.open.lock().clone()
        }

        fn check(&self, address: IpAddr, port: u16) -> Result<()> {
            assert_eq!(address, LOOPBACK);
            if self.failing.contains(&port) {
                return Err(Error::Listener {
                    address,
                    port,
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                });
            }
            Ok(())
        }
    }

    impl ListenerTracker for RecordingTracker {
        async fn add(&self, address: IpAddr, port: u16) -> Result<()> {
            self.calls.lock().push(Call::Add(port));
            self.check(address, port)?;
            self.open.lock().insert(port);
            Ok(())
        }

        async fn remove(&self, address: IpAddr, port: u16) -> Result<()> {
            self.calls.lock().push(Call::Remove(port));
            self.check(address, port)?;
            self.open.lock().remove(&port);
            Ok(())
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn service(name: &str, service_type: ServiceType, node_ports: &[u16]) -> ServiceDescriptor {
        ServiceDescriptor::new(
            "default",
            name,
            service_type,
            node_ports
                .iter()
                .map(|&np| ServicePort::node_port(80, np))
                .collect(),
        )
    }

    fn added(name: &str, node_ports: &[u16]) -> WatchUpdate {
        WatchUpdate::Event(ServiceEvent::applied(service(name, ServiceType::NodePort, node_ports)))
    }

    fn deleted(name: &str, node_ports: &[u16]) -> WatchUpdate {
        WatchUpdate::Event(ServiceEvent::deleted(service(name, ServiceType::NodePort, node_ports)))
    }

    fn not_found() -> Result<String> {
        Err(KubectlError::KubeconfigNotFound(PathBuf::from("/kubeconfig")).into())
    }

    type TestEngine = NodePortSyncEngine<Arc<ScriptedConfig>, FakeConnector>;

    fn engine(config: &Arc<ScriptedConfig>, cluster: &Arc<FakeCluster>) -> TestEngine {
        NodePortSyncEngine::new(config.clone(), FakeConnector(cluster.clone()))
    }

    /// Runs the engine, cancelling it after `settle` of (virtual) time.
    async fn drive(engine: &TestEngine, tracker: &RecordingTracker, settle: Duration) -> Result<()> {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let stop = async move {
            tokio::time::sleep(settle).await;
            canceller.cancel();
        };
        let (result, ()) = tokio::join!(engine.run(cancel, tracker, Path::new("/kubeconfig")), stop);
        result
    }

    const SETTLE: Duration = Duration::from_secs(30);

    // =========================================================================
    // Event handling
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_node_port_add_then_remove() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![
            added("web", &[30080]),
            deleted("web", &[30080]),
        ])]));
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        drive(&engine, &tracker, SETTLE).await.unwrap();

        assert_eq!(tracker.calls(), vec![Call::Add(30080), Call::Remove(30080)]);
        assert!(tracker.open().is_empty());
        assert_eq!(engine.state(), EngineState::Watching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_node_port_services_ignored() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![
            WatchUpdate::Event(ServiceEvent::applied(service(
                "db",
                ServiceType::ClusterIP,
                &[30090, 30091],
            ))),
            WatchUpdate::Event(ServiceEvent::applied(service(
                "lb",
                ServiceType::LoadBalancer,
                &[30092],
            ))),
            WatchUpdate::Event(ServiceEvent::deleted(service(
                "db",
                ServiceType::ClusterIP,
                &[30090],
            ))),
        ])]));
        let tracker = RecordingTracker::default();

        drive(&engine(&config, &cluster), &tracker, SETTLE).await.unwrap();

        assert!(tracker.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_port_does_not_stop_remaining_ports() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![added(
            "web",
            &[30001, 30002, 30003],
        )])]));
        let tracker = RecordingTracker::failing(&[30002]);

        let engine = engine(&config, &cluster);
        drive(&engine, &tracker, SETTLE).await.unwrap();

        assert_eq!(
            tracker.calls(),
            vec![Call::Add(30001), Call::Add(30002), Call::Add(30003)]
        );
        assert_eq!(tracker.open(), BTreeSet::from([30001, 30003]));
        // A listener failure is not a stream failure.
        assert_eq!(config.loads(), 1);
        assert_eq!(engine.state(), EngineState::Watching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ports_without_node_port_skipped() {
        let config = Arc::new(ScriptedConfig::default());
        let mut svc = service("web", ServiceType::NodePort, &[30080]);
        svc.ports.insert(
            0,
            ServicePort {
                name: Some("pending".to_string()),
                port: 8080,
                node_port: None,
                protocol: None,
            },
        );
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![WatchUpdate::Event(
            ServiceEvent::applied(svc),
        )])]));
        let tracker = RecordingTracker::default();

        drive(&engine(&config, &cluster), &tracker, SETTLE).await.unwrap();

        assert_eq!(tracker.calls(), vec![Call::Add(30080)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_listeners_match_live_node_port_services() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![
            added("a", &[30001, 30002]),
            added("b", &[30003]),
            WatchUpdate::Event(ServiceEvent::applied(service("c", ServiceType::ClusterIP, &[30009]))),
            deleted("a", &[30001, 30002]),
            added("d", &[30004]),
            // Re-delivery of an unchanged service.
            added("b", &[30003]),
        ])]));
        let tracker = RecordingTracker::default();

        drive(&engine(&config, &cluster), &tracker, SETTLE).await.unwrap();

        assert_eq!(tracker.open(), BTreeSet::from([30003, 30004]));
    }

    // =========================================================================
    // Config loading
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_missing_config_retried_until_present() {
        let config = Arc::new(ScriptedConfig::with(vec![not_found(), not_found(), not_found()]));
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![added("web", &[30080])])]));
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        drive(&engine, &tracker, SETTLE).await.unwrap();

        assert_eq!(config.loads(), 4);
        assert_eq!(cluster.connects(), 1);
        assert_eq!(tracker.calls(), vec![Call::Add(30080)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_config_never_terminates() {
        let config = Arc::new(ScriptedConfig::with((0..100).map(|_| not_found()).collect()));
        let cluster = Arc::new(FakeCluster::default());
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        drive(&engine, &tracker, Duration::from_millis(10_500)).await.unwrap();

        assert_eq!(config.loads(), 11);
        assert_eq!(cluster.connects(), 0);
        assert_eq!(engine.state(), EngineState::NoConfig);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_config_is_fatal() {
        let config = Arc::new(ScriptedConfig::with(vec![Err(KubectlError::InvalidKubeconfig(
            "mapping values are not allowed here".to_string(),
        )
        .into())]));
        let cluster = Arc::new(FakeCluster::default());
        let tracker = RecordingTracker::default();

        let err = drive(&engine(&config, &cluster), &tracker, SETTLE)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Kubernetes(KubectlError::InvalidKubeconfig(_))));
        assert_eq!(config.loads(), 1);
        assert_eq!(cluster.connects(), 0);
    }

    // =========================================================================
    // Connecting
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_client_construction_failure_is_fatal() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::default());
        cluster
            .connect_results
            .lock()
            .push_back(Err(KubectlError::KubectlNotFound.into()));
        let tracker = RecordingTracker::default();

        let err = drive(&engine(&config, &cluster), &tracker, SETTLE)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Kubernetes(KubectlError::KubectlNotFound)));
        assert_eq!(cluster.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_timeout_retried() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![
            Err(KubectlError::Timeout.into()),
            Err(KubectlError::from_kubectl_error("dial tcp 127.0.0.1:6443: connect: connection refused").into()),
            Ok(vec![added("web", &[30080])]),
        ]));
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        drive(&engine, &tracker, SETTLE).await.unwrap();

        // Retries rebuild the client from the same config.
        assert_eq!(config.loads(), 1);
        assert_eq!(cluster.connects(), 3);
        assert_eq!(tracker.calls(), vec![Call::Add(30080)]);
        assert_eq!(engine.state(), EngineState::Watching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_other_failure_is_fatal() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Err(
            KubectlError::from_kubectl_error("Error from server (Forbidden): services is forbidden")
                .into(),
        )]));
        let tracker = RecordingTracker::default();

        let err = drive(&engine(&config, &cluster), &tracker, SETTLE)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Kubernetes(KubectlError::CommandFailed(_))));
        assert_eq!(cluster.connects(), 1);
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_restarts_from_config() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![
            Ok(vec![added("web", &[30080]), WatchUpdate::Failed(Error::WatchClosed)]),
            Ok(vec![added("api", &[30081])]),
        ]));
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        drive(&engine, &tracker, SETTLE).await.unwrap();

        assert_eq!(config.loads(), 2);
        assert_eq!(cluster.connects(), 2);
        assert_eq!(tracker.calls(), vec![Call::Add(30080), Call::Add(30081)]);
        // The first watch scope was closed before the second watch opened.
        assert_eq!(*cluster.previous_scopes_closed.lock(), vec![true, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_restarts() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::default());
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let cluster_ref = cluster.clone();
        let stop = async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            // Dropping the sender closes the first watch.
            cluster_ref.senders.lock().clear();
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        };
        let (result, ()) =
            tokio::join!(engine.run(cancel, &tracker, Path::new("/kubeconfig")), stop);

        result.unwrap();
        assert_eq!(config.loads(), 2);
        assert_eq!(cluster.scopes.lock().len(), 2);
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_makes_no_calls() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![added("web", &[30080])])]));
        let tracker = RecordingTracker::default();

        let cancel = CancellationToken::new();
        cancel.cancel();
        cancel.cancel();
        engine(&config, &cluster)
            .run(cancel, &tracker, Path::new("/kubeconfig"))
            .await
            .unwrap();

        assert_eq!(config.loads(), 0);
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_sleep_is_prompt() {
        let config = Arc::new(ScriptedConfig::with((0..100).map(|_| not_found()).collect()));
        let cluster = Arc::new(FakeCluster::default());
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster).with_retry_delay(Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        drive(&engine, &tracker, Duration::from_millis(100)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(config.loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_watching_closes_scope() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(vec![Ok(vec![added("web", &[30080])])]));
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        let mut states = engine.subscribe();
        drive(&engine, &tracker, SETTLE).await.unwrap();

        let scopes = cluster.scopes.lock();
        assert_eq!(scopes.len(), 1);
        assert!(scopes[0].is_cancelled());
        assert_eq!(*states.borrow_and_update(), EngineState::Watching);
        // Late events must not reach the tracker.
        let sender = cluster.senders.lock().pop().unwrap();
        assert!(sender.is_closed());
        assert_eq!(tracker.calls(), vec![Call::Add(30080)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_watch_retry_is_prompt() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::with_watches(
            (0..100).map(|_| Err(KubectlError::Timeout.into())).collect(),
        ));
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster).with_retry_delay(Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        drive(&engine, &tracker, Duration::from_millis(100)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(config.loads(), 1);
        assert_eq!(cluster.connects(), 1);
        assert!(tracker.calls().is_empty());
        assert_eq!(engine.state(), EngineState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_opening_watch() {
        let config = Arc::new(ScriptedConfig::default());
        let cluster = Arc::new(FakeCluster::default());
        cluster.stall_watch.store(true, Ordering::SeqCst);
        let tracker = RecordingTracker::default();

        let engine = engine(&config, &cluster);
        let started = tokio::time::Instant::now();
        drive(&engine, &tracker, Duration::from_millis(100)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.state(), EngineState::Connected);
        assert!(tracker.calls().is_empty());
        // The pending watch's scope is released on the way out.
        let scopes = cluster.scopes.lock();
        assert_eq!(scopes.len(), 1);
        assert!(scopes[0].is_cancelled());
    }
}
