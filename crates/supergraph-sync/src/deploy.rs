//! Gateway rollout.
//!
//! A deploy only asks the platform to roll a new revision that reads the
//! latest supergraph. Whether that revision actually serves is checked
//! separately by the health verifier.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::GatewaySettings;
use crate::publish::PublishedArtifactRefs;
use crate::tools::{run_tool, ToolError};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeployError(pub String);

impl From<ToolError> for DeployError {
    fn from(err: ToolError) -> Self {
        Self(err.to_string())
    }
}

/// What was rolled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    /// Artifact address handed to the gateway.
    pub artifact_ref: String,
    pub version_key: String,
    /// Platform revision name, when the platform reported one.
    pub revision: Option<String>,
}

/// Triggers a new gateway revision.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Name of the deployed process, for error reports.
    fn target(&self) -> &str;

    async fn deploy(&self, refs: &PublishedArtifactRefs) -> Result<DeploymentRecord, DeployError>;
}

/// Cloud Run deployment through `gcloud`.
#[derive(Debug, Clone)]
pub struct CloudRunDeployer {
    service: String,
    region: String,
    project: Option<String>,
    env_var: String,
    timeout: Duration,
}

impl CloudRunDeployer {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            service: settings.service.clone(),
            region: settings.region.clone(),
            project: settings.project.clone(),
            env_var: settings.env_var.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    fn scope_args(&self, args: &mut Vec<String>) {
        args.push(format!("--region={}", self.region));
        if let Some(project) = &self.project {
            args.push(format!("--project={}", project));
        }
    }

    /// Setting the version alongside the URL changes the revision template
    /// on every publish, so the platform always rolls a new revision even
    /// though the latest URL itself never changes.
    fn update_args(&self, refs: &PublishedArtifactRefs) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "services".to_string(),
            "update".to_string(),
            self.service.clone(),
            format!(
                "--update-env-vars={}={},SUPERGRAPH_VERSION={}",
                self.env_var,
                https_url(&refs.latest_path),
                refs.version_key
            ),
            "--quiet".to_string(),
        ];
        self.scope_args(&mut args);
        args
    }

    fn describe_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "services".to_string(),
            "describe".to_string(),
            self.service.clone(),
            "--format=value(status.latestCreatedRevisionName)".to_string(),
        ];
        self.scope_args(&mut args);
        args
    }
}

#[async_trait]
impl Deployer for CloudRunDeployer {
    fn target(&self) -> &str {
        &self.service
    }

    #[instrument(skip_all, fields(service = %self.service, version = %refs.version_key))]
    async fn deploy(&self, refs: &PublishedArtifactRefs) -> Result<DeploymentRecord, DeployError> {
        run_tool("gcloud", &self.update_args(refs), self.timeout).await?;

        let revision = match run_tool("gcloud", &self.describe_args(), self.timeout).await {
            Ok(out) => {
                let name = String::from_utf8_lossy(&out).trim().to_string();
                (!name.is_empty()).then_some(name)
            }
            Err(e) => {
                warn!(error = %e, "could not read the new revision name");
                None
            }
        };
        info!(revision = revision.as_deref().unwrap_or("unknown"), "gateway deploy accepted");

        Ok(DeploymentRecord {
            artifact_ref: https_url(&refs.latest_path),
            version_key: refs.version_key.clone(),
            revision,
        })
    }
}

/// Maps `gs://bucket/key` to its public HTTPS address; other refs pass through.
pub fn https_url(artifact_ref: &str) -> String {
    match artifact_ref.strip_prefix("gs://") {
        Some(rest) => format!("https://storage.googleapis.com/{}", rest),
        None => artifact_ref.to_string(),
    }
}
