//! Pipeline configuration.
//!
//! Loaded from a JSON file, then overlaid with environment variables so the
//! same file can drive several environments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diagnostic::SyncError;
use crate::registry::{ServiceRegistry, ServiceRegistryEntry};
use crate::retry::RetryPolicy;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "supergraph-sync.json";

/// Configuration for a supergraph sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// The service registry, in composition order.
    pub services: Vec<ServiceRegistryEntry>,

    /// Federation version written into the composition input.
    #[serde(default = "default_federation_version")]
    pub federation_version: String,

    #[serde(default)]
    pub introspection: IntrospectionSettings,

    #[serde(default)]
    pub artifacts: ArtifactSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Parent directory for the per-run workspace (system temp dir if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_parent: Option<PathBuf>,
}

/// How subgraph schemas are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntrospectionMode {
    /// `rover subgraph introspect <url>`.
    #[default]
    Rover,
    /// POST `{ _service { sdl } }` straight to the routing URL.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionSettings {
    #[serde(default)]
    pub mode: IntrospectionMode,

    /// Total attempts per service, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Bound on a single fetch; a timeout counts as a failed attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Introspect services concurrently. Results are still aggregated before
    /// the pipeline decides whether to compose.
    #[serde(default)]
    pub parallel: bool,
}

impl Default for IntrospectionSettings {
    fn default() -> Self {
        Self {
            mode: IntrospectionMode::default(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            timeout_secs: default_timeout_secs(),
            parallel: false,
        }
    }
}

impl IntrospectionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.backoff_secs))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where composed supergraphs are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackend {
    /// Google Cloud Storage via `gsutil`.
    #[default]
    Gcs,
    /// A local directory (development and dry runs).
    Local,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSettings {
    #[serde(default)]
    pub backend: ArtifactBackend,

    /// `gs://bucket[/prefix]` for GCS, a directory path for local.
    #[serde(default)]
    pub bucket: String,

    /// Bound on a single upload.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Container platform service name of the gateway.
    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Environment variable the gateway reads the supergraph URL from.
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Public GraphQL endpoint used for the post-deploy health check.
    #[serde(default)]
    pub endpoint: String,

    /// Wait before the health check so the platform can finish rolling.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Bound on the deploy command and on the health request.
    #[serde(default = "default_deploy_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            service: String::new(),
            region: String::new(),
            project: None,
            env_var: default_env_var(),
            endpoint: String::new(),
            settle_secs: default_settle_secs(),
            timeout_secs: default_deploy_timeout_secs(),
        }
    }
}

impl GatewaySettings {
    /// Where an operator should look when the new revision is unhealthy.
    pub fn log_hint(&self) -> String {
        let mut cmd = format!(
            "gcloud run services logs read {} --region {}",
            self.service, self.region
        );
        if let Some(project) = &self.project {
            cmd.push_str(&format!(" --project {}", project));
        }
        format!(
            "The new revision is deployed and was NOT rolled back. Inspect its logs with: {}",
            cmd
        )
    }
}

fn default_federation_version() -> String {
    "=2.5.0".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_env_var() -> String {
    "SUPERGRAPH_URL".to_string()
}

fn default_settle_secs() -> u64 {
    15
}

fn default_deploy_timeout_secs() -> u64 {
    300
}

impl SyncConfig {
    /// Loads a config file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e.to_string()))?;
        let mut config = Self::from_json(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, SyncError> {
        serde_json::from_str(content)
            .map_err(|e| SyncError::config(format!("failed to parse config: {}", e)))
    }

    /// Overlays environment variables on top of the file values.
    ///
    /// Takes a lookup function so tests don't have to mutate process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("SUPERGRAPH_BUCKET") {
            self.artifacts.bucket = bucket;
        }
        if let Some(service) = lookup("GATEWAY_SERVICE") {
            self.gateway.service = service;
        }
        if let Some(region) = lookup("GATEWAY_REGION") {
            self.gateway.region = region;
        }
        if let Some(endpoint) = lookup("GATEWAY_URL") {
            self.gateway.endpoint = endpoint;
        }
        if let Some(project) = lookup("GCP_PROJECT") {
            self.gateway.project = Some(project);
        }
    }

    /// Checks the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), SyncError> {
        self.registry()?;

        if self.introspection.max_attempts == 0 {
            return Err(SyncError::config("introspection.max_attempts must be at least 1"));
        }
        if self.artifacts.bucket.trim().is_empty() {
            return Err(SyncError::config(
                "artifacts.bucket is not set (or export SUPERGRAPH_BUCKET)",
            ));
        }
        if self.artifacts.backend == ArtifactBackend::Gcs
            && !self.artifacts.bucket.starts_with("gs://")
        {
            return Err(SyncError::config(format!(
                "artifacts.bucket '{}' must be a gs:// URL for the gcs backend",
                self.artifacts.bucket
            )));
        }
        if self.gateway.service.trim().is_empty() || self.gateway.region.trim().is_empty() {
            return Err(SyncError::config(
                "gateway.service and gateway.region are required (or export GATEWAY_SERVICE / GATEWAY_REGION)",
            ));
        }
        if self.gateway.endpoint.trim().is_empty() {
            return Err(SyncError::config(
                "gateway.endpoint is not set (or export GATEWAY_URL)",
            ));
        }

        Ok(())
    }

    pub fn registry(&self) -> Result<ServiceRegistry, SyncError> {
        ServiceRegistry::new(self.services.clone())
    }

    /// External tools this configuration needs on PATH.
    pub fn required_tools(&self) -> Vec<String> {
        let mut tools = vec!["rover".to_string(), "gcloud".to_string()];
        if self.artifacts.backend == ArtifactBackend::Gcs {
            tools.push("gsutil".to_string());
        }
        tools
    }

    /// External tools an introspection-only run needs on PATH.
    pub fn introspection_tools(&self) -> Vec<String> {
        match self.introspection.mode {
            IntrospectionMode::Rover => vec!["rover".to_string()],
            IntrospectionMode::Http => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"{
        "services": [
            { "name": "accounts", "routing_url": "http://accounts:4001/graphql" },
            { "name": "products", "routing_url": "http://products:4002/graphql" }
        ],
        "artifacts": { "bucket": "gs://supergraphs/prod" },
        "gateway": {
            "service": "gateway",
            "region": "europe-west1",
            "endpoint": "https://gateway.example.com/graphql"
        }
    }"#;

    #[test]
    fn defaults_are_applied() {
        let config = SyncConfig::from_json(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.federation_version, "=2.5.0");
        assert_eq!(config.introspection.max_attempts, 3);
        assert_eq!(config.introspection.backoff_secs, 2);
        assert_eq!(config.introspection.mode, IntrospectionMode::Rover);
        assert!(!config.introspection.parallel);
        assert_eq!(config.gateway.env_var, "SUPERGRAPH_URL");
        assert_eq!(config.artifacts.backend, ArtifactBackend::Gcs);
    }

    #[test]
    fn env_overrides_win() {
        let mut config = SyncConfig::from_json(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("SUPERGRAPH_BUCKET", "gs://staging-supergraphs"),
            ("GATEWAY_URL", "https://staging.example.com/graphql"),
            ("GCP_PROJECT", "staging-project"),
        ]
        .into_iter()
        .collect();

        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.artifacts.bucket, "gs://staging-supergraphs");
        assert_eq!(config.gateway.endpoint, "https://staging.example.com/graphql");
        assert_eq!(config.gateway.project.as_deref(), Some("staging-project"));
        assert_eq!(config.gateway.service, "gateway");
    }

    #[test]
    fn missing_bucket_is_rejected() {
        let mut config = SyncConfig::from_json(MINIMAL).unwrap();
        config.artifacts.bucket.clear();
        assert!(matches!(config.validate(), Err(SyncError::Config { .. })));
    }

    #[test]
    fn gcs_backend_requires_gs_url() {
        let mut config = SyncConfig::from_json(MINIMAL).unwrap();
        config.artifacts.bucket = "/var/supergraphs".into();
        assert!(config.validate().is_err());

        config.artifacts.backend = ArtifactBackend::Local;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn required_tools_follow_backend() {
        let mut config = SyncConfig::from_json(MINIMAL).unwrap();
        assert!(config.required_tools().contains(&"gsutil".to_string()));

        config.artifacts.backend = ArtifactBackend::Local;
        assert_eq!(config.required_tools(), vec!["rover", "gcloud"]);
    }

    #[test]
    fn introspection_tools_follow_mode() {
        let mut config = SyncConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.introspection_tools(), vec!["rover"]);

        config.introspection.mode = IntrospectionMode::Http;
        assert!(config.introspection_tools().is_empty());
    }

    #[test]
    fn log_hint_names_service_and_region() {
        let config = SyncConfig::from_json(MINIMAL).unwrap();
        let hint = config.gateway.log_hint();
        assert!(hint.contains("gcloud run services logs read gateway --region europe-west1"));
        assert!(hint.contains("NOT rolled back"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = SyncConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }
}
