//! Subgraph schema introspection.
//!
//! Each requested subgraph is fetched with a bounded retry. A failure is
//! recorded in its [`IntrospectionResult`] and never stops the other
//! services; deciding what a failure means for the run is the pipeline's job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::registry::ServiceRegistryEntry;
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::tools::{run_tool, ToolError};
use crate::workspace::Workspace;

/// A single failed fetch attempt.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

impl From<ToolError> for FetchError {
    fn from(err: ToolError) -> Self {
        Self(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

/// Fetches the SDL of one subgraph.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, service: &ServiceRegistryEntry) -> Result<String, FetchError>;
}

/// Introspects through `rover subgraph introspect`.
#[derive(Debug, Clone)]
pub struct RoverIntrospector {
    timeout: Duration,
}

impl RoverIntrospector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SchemaSource for RoverIntrospector {
    async fn fetch(&self, service: &ServiceRegistryEntry) -> Result<String, FetchError> {
        let stdout = run_tool(
            "rover",
            &["subgraph", "introspect", service.routing_url.as_str()],
            self.timeout,
        )
        .await?;
        non_empty_sdl(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// Query every federated subgraph answers with its own SDL.
pub const SUBGRAPH_SDL_QUERY: &str = "query SubgraphIntrospectQuery { _service { sdl } }";

/// Introspects by POSTing the federation `_service` query to the routing URL.
#[derive(Debug, Clone)]
pub struct HttpIntrospector {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SdlResponse {
    data: Option<SdlData>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Deserialize)]
struct SdlData {
    #[serde(rename = "_service")]
    service: Option<SdlService>,
}

#[derive(Deserialize)]
struct SdlService {
    sdl: Option<String>,
}

#[derive(Deserialize)]
struct GraphQLError {
    message: String,
}

impl HttpIntrospector {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SchemaSource for HttpIntrospector {
    async fn fetch(&self, service: &ServiceRegistryEntry) -> Result<String, FetchError> {
        let response = self
            .client
            .post(&service.routing_url)
            .json(&serde_json::json!({ "query": SUBGRAPH_SDL_QUERY }))
            .send()
            .await?
            .error_for_status()?;

        let body: SdlResponse = response.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(FetchError(messages.join("; ")));
        }

        let sdl = body
            .data
            .and_then(|d| d.service)
            .and_then(|s| s.sdl)
            .ok_or_else(|| FetchError("response has no _service.sdl".to_string()))?;
        non_empty_sdl(sdl)
    }
}

fn non_empty_sdl(sdl: String) -> Result<String, FetchError> {
    if sdl.trim().is_empty() {
        Err(FetchError("introspection returned an empty schema".to_string()))
    } else {
        Ok(sdl)
    }
}

/// Outcome of introspecting one service. Never mutated once returned.
#[derive(Debug, Clone)]
pub struct IntrospectionResult {
    pub service_name: String,
    pub routing_url: String,
    pub schema_text: Option<String>,
    /// Where the schema was written inside the workspace.
    pub schema_path: Option<PathBuf>,
    pub succeeded: bool,
    pub attempts: u32,
    /// Last error seen, if the service failed.
    pub error: Option<String>,
}

/// Fetches subgraph schemas into a workspace.
#[derive(Clone)]
pub struct Introspector {
    source: Arc<dyn SchemaSource>,
    policy: RetryPolicy,
    timeout: Duration,
    parallel: bool,
}

impl Introspector {
    pub fn new(source: Arc<dyn SchemaSource>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            source,
            policy,
            timeout,
            parallel: false,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Introspects one service, retrying per the policy.
    #[instrument(skip_all, fields(service = %service.name))]
    pub async fn introspect(&self, service: &ServiceRegistryEntry, workspace: &Workspace) -> IntrospectionResult {
        let outcome = execute_with_retry(self.policy, |attempt| async move {
            match tokio::time::timeout(self.timeout, self.source.fetch(service)).await {
                Ok(Ok(sdl)) => Ok(sdl),
                Ok(Err(err)) => {
                    warn!(attempt, error = %err, "introspection attempt failed");
                    Err(err)
                }
                Err(_) => {
                    warn!(attempt, timeout_secs = self.timeout.as_secs(), "introspection attempt timed out");
                    Err(FetchError(format!("timed out after {}s", self.timeout.as_secs())))
                }
            }
        })
        .await;

        let mut result = IntrospectionResult {
            service_name: service.name.clone(),
            routing_url: service.routing_url.clone(),
            schema_text: None,
            schema_path: None,
            succeeded: false,
            attempts: outcome.attempts,
            error: None,
        };

        match outcome.result {
            Ok(sdl) => match workspace.write(&schema_file_name(&service.name), sdl.as_bytes()) {
                Ok(path) => {
                    info!(attempts = outcome.attempts, path = %path.display(), "introspected");
                    result.schema_text = Some(sdl);
                    result.schema_path = Some(path);
                    result.succeeded = true;
                }
                Err(err) => {
                    warn!(error = %err, "failed to write schema");
                    result.error = Some(err.to_string());
                }
            },
            Err(err) => {
                warn!(attempts = outcome.attempts, error = %err, "giving up on service");
                result.error = Some(err.to_string());
            }
        }

        result
    }

    /// Introspects every service and returns results in input order.
    ///
    /// All services are attempted even when some fail.
    pub async fn introspect_all(
        &self,
        services: &[ServiceRegistryEntry],
        workspace: &Workspace,
    ) -> Vec<IntrospectionResult> {
        if self.parallel {
            let fetches = services.iter().map(|s| self.introspect(s, workspace));
            return futures::future::join_all(fetches).await;
        }

        let mut results = Vec::with_capacity(services.len());
        for service in services {
            results.push(self.introspect(service, workspace).await);
        }
        results
    }
}

/// Workspace file name for a service's schema.
pub fn schema_file_name(service: &str) -> String {
    format!("{}.graphql", service)
}

/// Names of the services that failed, in result order.
pub fn failed_services(results: &[IntrospectionResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| !r.succeeded)
        .map(|r| r.service_name.clone())
        .collect()
}
