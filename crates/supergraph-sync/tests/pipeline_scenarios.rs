//! End-to-end pipeline runs against in-process collaborators.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use supergraph_sync::compose::{CompositionError, Composer};
use supergraph_sync::deploy::{DeployError, Deployer, DeploymentRecord};
use supergraph_sync::deps::ToolProbe;
use supergraph_sync::introspect::{FetchError, SchemaSource};
use supergraph_sync::publish::{ArtifactStore, LocalStore, StoreError};
use supergraph_sync::supergraph::SupergraphConfig;
use supergraph_sync::verify::{HealthCheck, HealthError};
use supergraph_sync::{
    Clock, Collaborators, Outcome, Pipeline, PipelineOptions, PipelineState, PublishedArtifactRefs,
    ReleaseHook, RetryPolicy, ServiceRegistry, ServiceRegistryEntry, ServiceSelection, Stage,
    SyncError, LATEST_KEY,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct StaticProbe {
    missing: HashSet<String>,
}

impl ToolProbe for StaticProbe {
    fn is_available(&self, tool: &str) -> bool {
        !self.missing.contains(tool)
    }
}

/// Serves `type Query { <name>: String }` per service.
#[derive(Default)]
struct FakeSource {
    /// Services that fail every attempt.
    down: HashSet<String>,
    /// Services that fail this many attempts before answering.
    flaky: HashMap<String, u32>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FakeSource {
    fn calls(&self, service: &str) -> u32 {
        self.calls.lock().unwrap().get(service).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SchemaSource for FakeSource {
    async fn fetch(&self, service: &ServiceRegistryEntry) -> Result<String, FetchError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(service.name.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if let Some(delay) = self.delays.get(&service.name) {
            tokio::time::sleep(*delay).await;
        }
        if self.down.contains(&service.name) {
            return Err(FetchError("connection refused".into()));
        }
        if let Some(failures) = self.flaky.get(&service.name) {
            if attempt <= *failures {
                return Err(FetchError("503 Service Unavailable".into()));
            }
        }
        Ok(format!("type Query {{ {}: String }}", service.name))
    }
}

/// Concatenates the schema files named by the config.
#[derive(Default)]
struct FakeComposer {
    fail: AtomicBool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Composer for FakeComposer {
    async fn compose(
        &self,
        config: &SupergraphConfig,
        config_path: &Path,
    ) -> Result<Vec<u8>, CompositionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push(config.entries.iter().map(|e| e.service_name.clone()).collect());
        assert!(config_path.exists(), "config must be on disk before composing");

        if self.fail.load(Ordering::SeqCst) {
            return Err(CompositionError {
                diagnostic: "error[E029]: Encountered 1 build error while trying to build a supergraph.\nINVALID_FIELD_SHARING".into(),
            });
        }

        let mut out = String::new();
        for entry in &config.entries {
            out.push_str(&std::fs::read_to_string(&entry.schema_path).unwrap());
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

#[derive(Default)]
struct MemoryStore {
    fail_key: Option<String>,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    puts: AtomicUsize,
}

impl MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &str, content: &[u8]) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_key.as_deref() == Some(key) {
            return Err(StoreError("AccessDeniedException: 403".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), content.to_vec());
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("mem://supergraphs/{}", key)
    }
}

#[derive(Default)]
struct FakeDeployer {
    fail: bool,
    calls: Mutex<Vec<PublishedArtifactRefs>>,
}

#[async_trait]
impl Deployer for FakeDeployer {
    fn target(&self) -> &str {
        "gateway"
    }

    async fn deploy(&self, refs: &PublishedArtifactRefs) -> Result<DeploymentRecord, DeployError> {
        self.calls.lock().unwrap().push(refs.clone());
        if self.fail {
            return Err(DeployError("PERMISSION_DENIED".into()));
        }
        Ok(DeploymentRecord {
            artifact_ref: refs.latest_path.clone(),
            version_key: refs.version_key.clone(),
            revision: Some(format!("gateway-{}", refs.version_key)),
        })
    }
}

#[derive(Default)]
struct FakeHealth {
    unhealthy: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl HealthCheck for FakeHealth {
    fn endpoint(&self) -> &str {
        "https://gateway.test/graphql"
    }

    async fn check(&self) -> Result<(), HealthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy {
            return Err(HealthError("gateway answered HTTP 503 Service Unavailable".into()));
        }
        Ok(())
    }
}

struct FixedClock(AtomicI64);

impl FixedClock {
    fn at(secs: i64) -> Self {
        Self(AtomicI64::new(secs))
    }

    fn set(&self, secs: i64) {
        self.0.store(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0.load(Ordering::SeqCst), 0).unwrap()
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    registry: ServiceRegistry,
    probe: Arc<StaticProbe>,
    source: Arc<FakeSource>,
    composer: Arc<FakeComposer>,
    store: Arc<dyn ArtifactStore>,
    memory: Arc<MemoryStore>,
    deployer: Arc<FakeDeployer>,
    health: Arc<FakeHealth>,
    clock: Arc<FixedClock>,
    releases: Arc<AtomicUsize>,
    workspace_parent: TempDir,
    parallel: bool,
    skip_verify: bool,
}

impl Harness {
    fn new(services: &[&str]) -> Self {
        let registry = ServiceRegistry::new(
            services
                .iter()
                .map(|name| ServiceRegistryEntry::new(*name, format!("http://{}.internal/graphql", name)))
                .collect(),
        )
        .unwrap();
        let memory = Arc::new(MemoryStore::default());

        Self {
            registry,
            probe: Arc::new(StaticProbe::default()),
            source: Arc::new(FakeSource::default()),
            composer: Arc::new(FakeComposer::default()),
            store: memory.clone(),
            memory,
            deployer: Arc::new(FakeDeployer::default()),
            health: Arc::new(FakeHealth::default()),
            clock: Arc::new(FixedClock::at(1_709_294_400)),
            releases: Arc::new(AtomicUsize::new(0)),
            workspace_parent: TempDir::new().unwrap(),
            parallel: false,
            skip_verify: false,
        }
    }

    fn with_memory_store(mut self, store: MemoryStore) -> Self {
        self.memory = Arc::new(store);
        self.store = self.memory.clone();
        self
    }

    fn pipeline(&self) -> Pipeline {
        let collaborators = Collaborators {
            probe: self.probe.clone(),
            source: self.source.clone(),
            composer: self.composer.clone(),
            store: self.store.clone(),
            deployer: self.deployer.clone(),
            health: self.health.clone(),
            clock: self.clock.clone(),
        };
        let options = PipelineOptions {
            required_tools: vec!["rover".into(), "gcloud".into(), "gsutil".into()],
            introspection_tools: vec!["rover".into()],
            retry: RetryPolicy::fixed(3, Duration::from_secs(2)),
            parallel_introspection: self.parallel,
            settle: Duration::ZERO,
            skip_verify: self.skip_verify,
            workspace_parent: Some(self.workspace_parent.path().to_path_buf()),
            ..Default::default()
        };

        let releases = self.releases.clone();
        let hook: ReleaseHook = Arc::new(move |_: &Path| {
            releases.fetch_add(1, Ordering::SeqCst);
        });

        Pipeline::new(self.registry.clone(), collaborators, options).with_release_hook(hook)
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.workspace_parent.path()).unwrap().count()
    }

    fn deploys(&self) -> usize {
        self.deployer.calls.lock().unwrap().len()
    }
}

fn named(names: &[&str]) -> ServiceSelection {
    ServiceSelection::Named(names.iter().map(|s| s.to_string()).collect())
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn full_sync_publishes_deploys_and_verifies() {
    let h = Harness::new(&["a", "b"]);

    let report = h.pipeline().run(&named(&["a", "b"])).await;

    assert!(report.succeeded(), "{:?}", report.outcome);
    assert_eq!(report.final_state(), PipelineState::Done(Outcome::Success));
    assert_eq!(report.stages, Stage::ALL.to_vec());

    assert_eq!(h.composer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*h.composer.seen.lock().unwrap(), vec![vec!["a", "b"]]);

    let versioned = h.memory.get("supergraph-1709294400.graphql").unwrap();
    let latest = h.memory.get(LATEST_KEY).unwrap();
    assert_eq!(versioned, latest);
    let text = String::from_utf8(latest).unwrap();
    assert!(text.contains("a: String") && text.contains("b: String"));

    let deploys = h.deployer.calls.lock().unwrap().clone();
    assert_eq!(deploys.len(), 1);
    assert_eq!(deploys[0].latest_path, "mem://supergraphs/supergraph-latest.graphql");
    assert_eq!(h.health.calls.load(Ordering::SeqCst), 1);

    let published = report.published.unwrap();
    assert_eq!(published.versioned_path, "mem://supergraphs/supergraph-1709294400.graphql");
    assert_eq!(report.deployment.unwrap().revision.as_deref(), Some("gateway-1709294400"));

    assert_eq!(h.releases(), 1);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_service_stops_before_composition() {
    let mut h = Harness::new(&["c", "d"]);
    h.source = Arc::new(FakeSource {
        down: ["c".to_string()].into_iter().collect(),
        ..Default::default()
    });

    let report = h.pipeline().run(&named(&["c", "d"])).await;

    match &report.outcome {
        Err(SyncError::IntrospectionFailed { services }) => assert_eq!(services, &["c"]),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.final_state(), PipelineState::Done(Outcome::Failure));

    assert_eq!(h.source.calls("c"), 3);
    assert_eq!(h.source.calls("d"), 1);
    assert_eq!(report.introspection.len(), 2);
    assert!(report.introspection[1].succeeded);

    assert!(!report.entered(Stage::Composing));
    assert_eq!(h.composer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.memory.puts.load(Ordering::SeqCst), 0);
    assert_eq!(h.deploys(), 0);
    assert_eq!(h.releases(), 1);
}

#[tokio::test]
async fn composition_failure_keeps_previous_artifacts() {
    let artifacts = TempDir::new().unwrap();
    let mut h = Harness::new(&["a", "b"]);
    h.store = Arc::new(LocalStore::new(artifacts.path()));

    let first = h.pipeline().run(&ServiceSelection::All).await;
    assert!(first.succeeded(), "{:?}", first.outcome);
    let latest_before = std::fs::read(artifacts.path().join(LATEST_KEY)).unwrap();

    h.composer.fail.store(true, Ordering::SeqCst);
    h.clock.set(1_709_294_460);
    let second = h.pipeline().run(&ServiceSelection::All).await;

    match &second.outcome {
        Err(SyncError::CompositionFailed { diagnostic }) => {
            assert!(diagnostic.starts_with("error[E029]"));
            assert!(diagnostic.contains("INVALID_FIELD_SHARING"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!second.entered(Stage::Publishing));
    assert_eq!(h.deploys(), 1);
    assert_eq!(h.health.calls.load(Ordering::SeqCst), 1);

    assert_eq!(std::fs::read(artifacts.path().join(LATEST_KEY)).unwrap(), latest_before);
    assert!(artifacts.path().join("supergraph-1709294400.graphql").exists());
    assert!(!artifacts.path().join("supergraph-1709294460.graphql").exists());
    assert_eq!(h.releases(), 2);
}

#[tokio::test]
async fn failed_latest_write_is_reported_as_stale_latest() {
    let h = Harness::new(&["a"]).with_memory_store(MemoryStore {
        fail_key: Some(LATEST_KEY.to_string()),
        ..Default::default()
    });

    let report = h.pipeline().run(&ServiceSelection::All).await;
    let err = report.outcome.as_ref().unwrap_err();

    assert!(matches!(err, SyncError::StaleLatest { .. }), "{err:?}");
    assert_eq!(err.exit_code(), 13);
    assert!(err.needs_operator());
    assert_eq!(err.stage(), Some(Stage::Publishing));

    assert!(h.memory.get("supergraph-1709294400.graphql").is_some());
    assert!(h.memory.get(LATEST_KEY).is_none());
    assert_eq!(h.deploys(), 0);
}

#[tokio::test]
async fn failed_versioned_write_touches_nothing() {
    let h = Harness::new(&["a"]).with_memory_store(MemoryStore {
        fail_key: Some("supergraph-1709294400.graphql".to_string()),
        ..Default::default()
    });

    let report = h.pipeline().run(&ServiceSelection::All).await;
    let err = report.outcome.as_ref().unwrap_err();

    assert!(matches!(err, SyncError::VersionedPublishFailed { .. }), "{err:?}");
    assert_eq!(err.exit_code(), 12);
    assert!(!err.needs_operator());
    assert_eq!(h.memory.puts.load(Ordering::SeqCst), 1);
    assert!(h.memory.get(LATEST_KEY).is_none());
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test(start_paused = true)]
async fn flaky_service_recovers_on_last_attempt() {
    let mut h = Harness::new(&["a", "b"]);
    h.source = Arc::new(FakeSource {
        flaky: [("b".to_string(), 2)].into_iter().collect(),
        ..Default::default()
    });

    let report = h.pipeline().run(&ServiceSelection::All).await;

    assert!(report.succeeded(), "{:?}", report.outcome);
    assert_eq!(h.source.calls("b"), 3);
    assert_eq!(report.introspection[1].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn config_order_follows_request_not_completion() {
    let mut h = Harness::new(&["a", "b", "c"]);
    h.parallel = true;
    h.source = Arc::new(FakeSource {
        delays: [
            ("a".to_string(), Duration::from_secs(5)),
            ("b".to_string(), Duration::from_secs(1)),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    });

    let report = h.pipeline().run(&named(&["c", "a", "b"])).await;

    assert!(report.succeeded(), "{:?}", report.outcome);
    assert_eq!(*h.composer.seen.lock().unwrap(), vec![vec!["c", "a", "b"]]);
}

#[tokio::test]
async fn consecutive_runs_get_distinct_versioned_paths() {
    let h = Harness::new(&["a"]);

    let first = h.pipeline().run(&ServiceSelection::All).await;
    h.clock.set(1_709_294_401);
    let second = h.pipeline().run(&ServiceSelection::All).await;

    let first = first.published.unwrap();
    let second = second.published.unwrap();
    assert_ne!(first.versioned_path, second.versioned_path);
    assert_eq!(first.latest_path, second.latest_path);
    assert_eq!(h.memory.get(LATEST_KEY), h.memory.get("supergraph-1709294401.graphql"));
}

#[tokio::test]
async fn missing_tool_fails_before_any_network_call() {
    let mut h = Harness::new(&["a"]);
    h.probe = Arc::new(StaticProbe {
        missing: ["gsutil".to_string()].into_iter().collect(),
    });

    let report = h.pipeline().run(&ServiceSelection::All).await;

    match &report.outcome {
        Err(SyncError::MissingDependency { tools, guidance }) => {
            assert_eq!(tools, &["gsutil"]);
            assert!(guidance.contains("cloud.google.com/sdk"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.stages, vec![Stage::ValidatingDeps]);
    assert_eq!(h.source.total_calls(), 0);
    assert_eq!(h.releases(), 1);
}

#[tokio::test]
async fn unknown_service_fails_before_any_fetch() {
    let h = Harness::new(&["a", "b"]);

    let report = h.pipeline().run(&named(&["a", "nope"])).await;
    let err = report.outcome.as_ref().unwrap_err();

    assert!(matches!(err, SyncError::UnknownService { name, .. } if name == "nope"));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(h.source.total_calls(), 0);
    assert_eq!(h.releases(), 1);
}

#[tokio::test]
async fn unhealthy_gateway_is_reported_after_deploy() {
    let mut h = Harness::new(&["a"]);
    h.health = Arc::new(FakeHealth {
        unhealthy: true,
        ..Default::default()
    });

    let report = h.pipeline().run(&ServiceSelection::All).await;

    match &report.outcome {
        Err(SyncError::HealthCheckFailed { guidance, .. }) => {
            assert!(guidance.contains("gateway-1709294400"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(report.deployment.is_some());
    assert_eq!(h.deploys(), 1);
}

#[tokio::test]
async fn deploy_failure_names_the_gateway() {
    let mut h = Harness::new(&["a"]);
    h.deployer = Arc::new(FakeDeployer {
        fail: true,
        ..Default::default()
    });

    let report = h.pipeline().run(&ServiceSelection::All).await;

    match &report.outcome {
        Err(SyncError::DeployFailed { service, message }) => {
            assert_eq!(service, "gateway");
            assert_eq!(message, "PERMISSION_DENIED");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.health.calls.load(Ordering::SeqCst), 0);
    // Latest already moved; the previous gateway revision keeps serving.
    assert!(h.memory.get(LATEST_KEY).is_some());
}

#[tokio::test]
async fn skip_verify_ends_after_deploy() {
    let mut h = Harness::new(&["a"]);
    h.skip_verify = true;

    let report = h.pipeline().run(&ServiceSelection::All).await;

    assert!(report.succeeded());
    assert!(!report.entered(Stage::Verifying));
    assert_eq!(h.health.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn observer_sees_every_transition() {
    let h = Harness::new(&["a"]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let pipeline = h
        .pipeline()
        .with_observer(Arc::new(move |state: PipelineState| sink.lock().unwrap().push(state)));
    pipeline.run(&ServiceSelection::All).await;

    let mut expected = vec![PipelineState::Idle];
    expected.extend(Stage::ALL.iter().map(|s| PipelineState::Running(*s)));
    expected.push(PipelineState::Done(Outcome::Success));
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[derive(Debug, Clone, Copy)]
enum Inject {
    Nothing,
    MissingTool,
    UnknownService,
    Introspection,
    Composition,
    VersionedWrite,
    LatestWrite,
    Deploy,
    Health,
}

#[tokio::test(start_paused = true)]
async fn workspace_is_released_once_at_every_failure_point() {
    let points = [
        Inject::Nothing,
        Inject::MissingTool,
        Inject::UnknownService,
        Inject::Introspection,
        Inject::Composition,
        Inject::VersionedWrite,
        Inject::LatestWrite,
        Inject::Deploy,
        Inject::Health,
    ];

    for point in points {
        let mut h = Harness::new(&["a", "b"]);
        let mut selection = ServiceSelection::All;
        match point {
            Inject::Nothing => {}
            Inject::MissingTool => {
                h.probe = Arc::new(StaticProbe {
                    missing: ["rover".to_string()].into_iter().collect(),
                })
            }
            Inject::UnknownService => selection = named(&["zzz"]),
            Inject::Introspection => {
                h.source = Arc::new(FakeSource {
                    down: ["b".to_string()].into_iter().collect(),
                    ..Default::default()
                })
            }
            Inject::Composition => h.composer.fail.store(true, Ordering::SeqCst),
            Inject::VersionedWrite => {
                h = h.with_memory_store(MemoryStore {
                    fail_key: Some("supergraph-1709294400.graphql".into()),
                    ..Default::default()
                })
            }
            Inject::LatestWrite => {
                h = h.with_memory_store(MemoryStore {
                    fail_key: Some(LATEST_KEY.into()),
                    ..Default::default()
                })
            }
            Inject::Deploy => {
                h.deployer = Arc::new(FakeDeployer {
                    fail: true,
                    ..Default::default()
                })
            }
            Inject::Health => {
                h.health = Arc::new(FakeHealth {
                    unhealthy: true,
                    ..Default::default()
                })
            }
        }

        let report = h.pipeline().run(&selection).await;

        assert_eq!(report.succeeded(), matches!(point, Inject::Nothing), "{point:?}");
        assert_eq!(h.releases(), 1, "{point:?}");
        assert_eq!(h.leftover_workspaces(), 0, "{point:?}");
    }
}

#[tokio::test]
async fn introspect_only_keeps_schemas() {
    let h = Harness::new(&["a", "b"]);
    let out = TempDir::new().unwrap();

    let results = h
        .pipeline()
        .introspect_only(&named(&["b"]), out.path())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        std::fs::read_to_string(out.path().join("b.graphql")).unwrap(),
        "type Query { b: String }"
    );
    assert!(!out.path().join("a.graphql").exists());
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test(start_paused = true)]
async fn introspect_only_checks_tools_before_fetching() {
    let mut h = Harness::new(&["a", "b"]);
    h.probe = Arc::new(StaticProbe {
        missing: ["rover".to_string()].into_iter().collect(),
    });
    let out = TempDir::new().unwrap();

    let err = h
        .pipeline()
        .introspect_only(&ServiceSelection::All, out.path())
        .await
        .unwrap_err();

    match err {
        SyncError::MissingDependency { tools, .. } => assert_eq!(tools, vec!["rover"]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.source.total_calls(), 0);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn introspect_only_ignores_deploy_tools() {
    let mut h = Harness::new(&["a"]);
    h.probe = Arc::new(StaticProbe {
        missing: ["gcloud".to_string(), "gsutil".to_string()].into_iter().collect(),
    });
    let out = TempDir::new().unwrap();

    let results = h
        .pipeline()
        .introspect_only(&ServiceSelection::All, out.path())
        .await
        .unwrap();

    assert!(results[0].succeeded);
}
