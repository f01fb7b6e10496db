//! Pipeline orchestration.
//!
//! ```text
//! Idle → ValidatingDeps → Introspecting → Composing → Publishing → Deploying → Verifying → Done
//!              │                │              │            │           │           │
//!              └────────────────┴──────────────┴────────────┴───────────┴───────────┴──▶ Done(failure)
//! ```
//!
//! The workspace is acquired before the first stage and released on the way
//! into `Done`, whichever stage failed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::artifact::{Clock, SupergraphArtifact, SystemClock};
use crate::compose::{Composer, RoverComposer};
use crate::config::{ArtifactBackend, IntrospectionMode, SyncConfig};
use crate::deploy::{CloudRunDeployer, DeploymentRecord, Deployer};
use crate::deps::{install_guidance, missing_tools, PathProbe, ToolProbe};
use crate::diagnostic::SyncError;
use crate::introspect::{
    failed_services, HttpIntrospector, IntrospectionResult, Introspector, RoverIntrospector,
    SchemaSource,
};
use crate::publish::{ArtifactStore, GcsStore, LocalStore, PublishedArtifactRefs, Publisher};
use crate::registry::{ServiceRegistry, ServiceSelection};
use crate::retry::RetryPolicy;
use crate::supergraph::SupergraphConfig;
use crate::verify::{HealthCheck, HealthVerifier, HttpHealthCheck};
use crate::workspace::{keep_files_in, ReleaseHook, Workspace};

/// Workspace file name of the composed supergraph.
pub const SUPERGRAPH_FILE: &str = "supergraph.graphql";

const COMPOSE_TIMEOUT: Duration = Duration::from_secs(300);

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ValidatingDeps,
    Introspecting,
    Composing,
    Publishing,
    Deploying,
    Verifying,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::ValidatingDeps,
        Stage::Introspecting,
        Stage::Composing,
        Stage::Publishing,
        Stage::Deploying,
        Stage::Verifying,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::ValidatingDeps => "validating dependencies",
            Stage::Introspecting => "introspecting subgraphs",
            Stage::Composing => "composing supergraph",
            Stage::Publishing => "publishing artifact",
            Stage::Deploying => "deploying gateway",
            Stage::Verifying => "verifying gateway health",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Where a run is. Observers see every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running(Stage),
    Done(Outcome),
}

/// Callback fired on every state transition.
pub type StageObserver = Arc<dyn Fn(PipelineState) + Send + Sync>;

/// The external collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn ToolProbe>,
    pub source: Arc<dyn SchemaSource>,
    pub composer: Arc<dyn Composer>,
    pub store: Arc<dyn ArtifactStore>,
    pub deployer: Arc<dyn Deployer>,
    pub health: Arc<dyn HealthCheck>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Production collaborators for a configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let fetch_timeout = config.introspection.timeout();

        let source: Arc<dyn SchemaSource> = match config.introspection.mode {
            IntrospectionMode::Rover => Arc::new(RoverIntrospector::new(fetch_timeout)),
            IntrospectionMode::Http => Arc::new(
                HttpIntrospector::new(fetch_timeout)
                    .map_err(|e| SyncError::config(format!("failed to build HTTP client: {}", e)))?,
            ),
        };

        let store: Arc<dyn ArtifactStore> = match config.artifacts.backend {
            ArtifactBackend::Gcs => Arc::new(GcsStore::new(
                config.artifacts.bucket.clone(),
                Duration::from_secs(config.artifacts.timeout_secs),
            )),
            ArtifactBackend::Local => Arc::new(LocalStore::new(&config.artifacts.bucket)),
        };

        let health = HttpHealthCheck::new(
            config.gateway.endpoint.clone(),
            Duration::from_secs(config.gateway.timeout_secs),
        )
        .map_err(|e| SyncError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            probe: Arc::new(PathProbe),
            source,
            composer: Arc::new(RoverComposer::new(COMPOSE_TIMEOUT)),
            store,
            deployer: Arc::new(CloudRunDeployer::new(&config.gateway)),
            health: Arc::new(health),
            clock: Arc::new(SystemClock),
        })
    }
}

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Tools that must be on PATH before any network call.
    pub required_tools: Vec<String>,
    /// The subset of `required_tools` an introspection-only run needs.
    pub introspection_tools: Vec<String>,
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub parallel_introspection: bool,
    pub federation_version: String,
    /// Delay between deploy and health check.
    pub settle: Duration,
    /// Shown to the operator when the health check fails.
    pub log_hint: String,
    pub skip_verify: bool,
    pub workspace_parent: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            required_tools: Vec::new(),
            introspection_tools: Vec::new(),
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(30),
            parallel_introspection: false,
            federation_version: "=2.5.0".to_string(),
            settle: Duration::from_secs(15),
            log_hint: "Check the gateway logs.".to_string(),
            skip_verify: false,
            workspace_parent: None,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            required_tools: config.required_tools(),
            introspection_tools: config.introspection_tools(),
            retry: config.introspection.retry_policy(),
            fetch_timeout: config.introspection.timeout(),
            parallel_introspection: config.introspection.parallel,
            federation_version: config.federation_version.clone(),
            settle: Duration::from_secs(config.gateway.settle_secs),
            log_hint: config.gateway.log_hint(),
            skip_verify: false,
            workspace_parent: config.workspace_parent.clone(),
        }
    }
}

/// What a run did.
#[derive(Debug)]
pub struct PipelineReport {
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
    pub introspection: Vec<IntrospectionResult>,
    pub published: Option<PublishedArtifactRefs>,
    pub deployment: Option<DeploymentRecord>,
    pub elapsed: Duration,
    pub outcome: Result<(), SyncError>,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            stages: Vec::new(),
            introspection: Vec::new(),
            published: None,
            deployment: None,
            elapsed: Duration::ZERO,
            outcome: Ok(()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn final_state(&self) -> PipelineState {
        if self.succeeded() {
            PipelineState::Done(Outcome::Success)
        } else {
            PipelineState::Done(Outcome::Failure)
        }
    }

    pub fn entered(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

/// The supergraph sync pipeline.
pub struct Pipeline {
    registry: ServiceRegistry,
    probe: Arc<dyn ToolProbe>,
    introspector: Introspector,
    composer: Arc<dyn Composer>,
    publisher: Publisher,
    deployer: Arc<dyn Deployer>,
    verifier: HealthVerifier,
    clock: Arc<dyn Clock>,
    options: PipelineOptions,
    release_hook: Option<ReleaseHook>,
    observer: Option<StageObserver>,
}

impl Pipeline {
    pub fn new(registry: ServiceRegistry, collaborators: Collaborators, options: PipelineOptions) -> Self {
        let introspector = Introspector::new(collaborators.source, options.retry, options.fetch_timeout)
            .parallel(options.parallel_introspection);
        let verifier = HealthVerifier::new(collaborators.health, options.settle, options.log_hint.clone());

        Self {
            registry,
            probe: collaborators.probe,
            introspector,
            composer: collaborators.composer,
            publisher: Publisher::new(collaborators.store),
            deployer: collaborators.deployer,
            verifier,
            clock: collaborators.clock,
            options,
            release_hook: None,
            observer: None,
        }
    }

    /// Production pipeline for a validated configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self::new(
            config.registry()?,
            Collaborators::from_config(config)?,
            PipelineOptions::from_config(config),
        ))
    }

    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.release_hook = Some(hook);
        self
    }

    pub fn with_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.options.skip_verify = skip;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Required tools that are not installed.
    pub fn missing_dependencies(&self) -> Vec<String> {
        missing_tools(self.probe.as_ref(), &self.options.required_tools)
    }

    /// Runs the whole pipeline for `selection`.
    ///
    /// Never panics on stage failure; the outcome is in the report.
    pub async fn run(&self, selection: &ServiceSelection) -> PipelineReport {
        let started = Instant::now();
        let mut report = PipelineReport::new();
        self.transition(PipelineState::Idle);

        let outcome = match self.acquire_workspace() {
            Ok(workspace) => {
                let outcome = self
                    .run_stages(&workspace, selection, &mut report)
                    .instrument(info_span!("pipeline", workspace = %workspace.root().display()))
                    .await;
                drop(workspace);
                outcome
            }
            Err(e) => Err(e),
        };

        report.elapsed = started.elapsed();
        report.outcome = outcome;

        match &report.outcome {
            Ok(()) => info!(elapsed_ms = report.elapsed.as_millis() as u64, "supergraph sync complete"),
            Err(e) => error!(stage = ?e.stage(), error = %e, "supergraph sync failed"),
        }
        self.transition(report.final_state());

        report
    }

    /// Introspects `selection` and keeps the fetched schemas in `out_dir`.
    pub async fn introspect_only(
        &self,
        selection: &ServiceSelection,
        out_dir: &Path,
    ) -> Result<Vec<IntrospectionResult>, SyncError> {
        ensure_installed(missing_tools(self.probe.as_ref(), &self.options.introspection_tools))?;
        let services = self.registry.resolve(selection)?;
        let workspace = Workspace::acquire(self.options.workspace_parent.as_deref())?
            .with_release_hook(Some(keep_files_in(out_dir.to_path_buf())));

        Ok(self.introspector.introspect_all(&services, &workspace).await)
    }

    fn acquire_workspace(&self) -> Result<Workspace, SyncError> {
        Ok(Workspace::acquire(self.options.workspace_parent.as_deref())?
            .with_release_hook(self.release_hook.clone()))
    }

    fn transition(&self, state: PipelineState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    fn enter(&self, stage: Stage, report: &mut PipelineReport) {
        info!(stage = %stage, "entering stage");
        report.stages.push(stage);
        self.transition(PipelineState::Running(stage));
    }

    async fn run_stages(
        &self,
        workspace: &Workspace,
        selection: &ServiceSelection,
        report: &mut PipelineReport,
    ) -> Result<(), SyncError> {
        self.enter(Stage::ValidatingDeps, report);
        self.validate_dependencies()?;

        self.enter(Stage::Introspecting, report);
        self.introspect(workspace, selection, report).await?;

        self.enter(Stage::Composing, report);
        let artifact = self.compose(workspace, &report.introspection).await?;

        self.enter(Stage::Publishing, report);
        let refs = self.publisher.publish(&artifact).await?;
        report.published = Some(refs.clone());

        self.enter(Stage::Deploying, report);
        let deployment = self.deploy(&refs).await?;
        report.deployment = Some(deployment.clone());

        if self.options.skip_verify {
            info!("health verification skipped");
            return Ok(());
        }
        self.enter(Stage::Verifying, report);
        self.verifier.verify(&deployment).await
    }

    fn validate_dependencies(&self) -> Result<(), SyncError> {
        ensure_installed(self.missing_dependencies())
    }

    /// Attempts every requested service, then fails if any of them failed.
    async fn introspect(
        &self,
        workspace: &Workspace,
        selection: &ServiceSelection,
        report: &mut PipelineReport,
    ) -> Result<(), SyncError> {
        let services = self.registry.resolve(selection)?;
        report.introspection = self.introspector.introspect_all(&services, workspace).await;

        let failed = failed_services(&report.introspection);
        if failed.is_empty() {
            Ok(())
        } else {
            Err(SyncError::IntrospectionFailed { services: failed })
        }
    }

    async fn compose(
        &self,
        workspace: &Workspace,
        results: &[IntrospectionResult],
    ) -> Result<SupergraphArtifact, SyncError> {
        let config = SupergraphConfig::build(results, &self.options.federation_version);
        let config_path = config.write(workspace)?;

        let content = self
            .composer
            .compose(&config, &config_path)
            .await
            .map_err(|e| SyncError::CompositionFailed {
                diagnostic: e.diagnostic,
            })?;
        workspace.write(SUPERGRAPH_FILE, &content)?;

        let artifact = SupergraphArtifact::new(content, self.clock.now());
        info!(
            subgraphs = config.entries.len(),
            bytes = artifact.content().len(),
            version = %artifact.version_key(),
            "supergraph composed"
        );
        Ok(artifact)
    }

    async fn deploy(&self, refs: &PublishedArtifactRefs) -> Result<DeploymentRecord, SyncError> {
        self.deployer
            .deploy(refs)
            .await
            .map_err(|e| SyncError::DeployFailed {
                service: self.deployer.target().to_string(),
                message: e.to_string(),
            })
    }
}

fn ensure_installed(missing: Vec<String>) -> Result<(), SyncError> {
    if missing.is_empty() {
        return Ok(());
    }
    Err(SyncError::MissingDependency {
        guidance: install_guidance(&missing),
        tools: missing,
    })
}
