//! Post-deploy health verification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

use crate::deploy::DeploymentRecord;
use crate::diagnostic::SyncError;

/// Smallest query that proves the gateway loaded a schema.
pub const HEALTH_QUERY: &str = "{ __schema { queryType { name } } }";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct HealthError(pub String);

/// Probes the gateway once.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn check(&self) -> Result<(), HealthError>;
}

/// POSTs [`HEALTH_QUERY`] to the gateway's public endpoint.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpHealthCheck {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn check(&self) -> Result<(), HealthError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": HEALTH_QUERY }))
            .send()
            .await
            .map_err(|e| HealthError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HealthError(format!("gateway answered HTTP {}", status)));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| HealthError(format!("gateway answered {} without valid JSON: {}", status, e)))?;

        Ok(())
    }
}

/// Waits for the rollout to settle, then checks the gateway once.
///
/// A failure does not roll anything back.
#[derive(Clone)]
pub struct HealthVerifier {
    check: Arc<dyn HealthCheck>,
    settle: Duration,
    log_hint: String,
}

impl HealthVerifier {
    pub fn new(check: Arc<dyn HealthCheck>, settle: Duration, log_hint: impl Into<String>) -> Self {
        Self {
            check,
            settle,
            log_hint: log_hint.into(),
        }
    }

    #[instrument(skip_all, fields(endpoint = %self.check.endpoint()))]
    pub async fn verify(&self, deployment: &DeploymentRecord) -> Result<(), SyncError> {
        tokio::time::sleep(self.settle).await;

        self.check.check().await.map_err(|e| {
            let mut guidance = self.log_hint.clone();
            if let Some(revision) = &deployment.revision {
                guidance.push_str(&format!(" (revision {})", revision));
            }
            SyncError::HealthCheckFailed {
                endpoint: self.check.endpoint().to_string(),
                message: e.to_string(),
                guidance,
            }
        })?;

        info!(version = %deployment.version_key, "gateway healthy");
        Ok(())
    }
}
