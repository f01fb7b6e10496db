//! Supergraph composition.
//!
//! Composition itself belongs to the external tool. The pipeline hands it the
//! config file and takes back either the supergraph or the tool's diagnostic,
//! untouched.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::supergraph::SupergraphConfig;
use crate::tools::{run_tool, ToolError};

/// Composition was rejected; `diagnostic` is the tool's own output.
#[derive(Debug, Error)]
#[error("{diagnostic}")]
pub struct CompositionError {
    pub diagnostic: String,
}

impl From<ToolError> for CompositionError {
    fn from(err: ToolError) -> Self {
        let diagnostic = match err {
            ToolError::Failed { stderr, .. } if !stderr.trim().is_empty() => stderr,
            other => other.to_string(),
        };
        Self { diagnostic }
    }
}

/// Turns a supergraph config into one composed schema document.
#[async_trait]
pub trait Composer: Send + Sync {
    /// `config_path` is `config` already written to disk.
    async fn compose(
        &self,
        config: &SupergraphConfig,
        config_path: &Path,
    ) -> Result<Vec<u8>, CompositionError>;
}

/// Composes with `rover supergraph compose`.
#[derive(Debug, Clone)]
pub struct RoverComposer {
    timeout: Duration,
}

impl RoverComposer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn args(config_path: &Path) -> Vec<String> {
        vec![
            "supergraph".to_string(),
            "compose".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
            "--elv2-license".to_string(),
            "accept".to_string(),
        ]
    }
}

#[async_trait]
impl Composer for RoverComposer {
    async fn compose(
        &self,
        _config: &SupergraphConfig,
        config_path: &Path,
    ) -> Result<Vec<u8>, CompositionError> {
        let supergraph = run_tool("rover", &Self::args(config_path), self.timeout).await?;
        if supergraph.iter().all(u8::is_ascii_whitespace) {
            return Err(CompositionError {
                diagnostic: "composition produced an empty supergraph".to_string(),
            });
        }
        Ok(supergraph)
    }
}
