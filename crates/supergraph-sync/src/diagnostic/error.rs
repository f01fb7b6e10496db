//! Pipeline error types.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::pipeline::Stage;

/// Errors that can end a pipeline run.
///
/// Every variant is fatal to the run. The orchestrator is the only place that
/// turns one of these into an abort; stages attach context and propagate.
#[derive(Error, Diagnostic, Debug)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(supergraph::config::invalid),
        help("Check supergraph-sync.json and the SUPERGRAPH_* / GATEWAY_* environment overrides")
    )]
    Config { message: String },

    #[error("Failed to access '{}': {message}", .path.display())]
    #[diagnostic(code(supergraph::io::access_failed))]
    Io { path: PathBuf, message: String },

    #[error("Failed to prepare workspace: {message}")]
    #[diagnostic(code(supergraph::workspace::unavailable))]
    Workspace { message: String },

    // =========================================================================
    // Pre-flight Errors
    // =========================================================================
    #[error("Missing required tools: {}", .tools.join(", "))]
    #[diagnostic(code(supergraph::preflight::missing_dependency))]
    MissingDependency {
        tools: Vec<String>,
        #[help]
        guidance: String,
    },

    #[error("Unknown service '{name}'")]
    #[diagnostic(code(supergraph::preflight::unknown_service))]
    UnknownService {
        name: String,
        #[help]
        known: String,
    },

    // =========================================================================
    // Stage Errors
    // =========================================================================
    #[error("Introspection failed for {} service(s): {}", .services.len(), .services.join(", "))]
    #[diagnostic(
        code(supergraph::introspect::failed),
        help("Each listed subgraph exhausted its retries. Check that it is deployed and its routing URL answers.")
    )]
    IntrospectionFailed { services: Vec<String> },

    #[error("Supergraph composition failed:\n{diagnostic}")]
    #[diagnostic(
        code(supergraph::compose::failed),
        help("The composition tool rejected the subgraph schemas. Fix the conflicting subgraph and re-run.")
    )]
    CompositionFailed { diagnostic: String },

    #[error("Failed to publish versioned artifact '{path}': {message}")]
    #[diagnostic(
        code(supergraph::publish::versioned_failed),
        help("The latest pointer was not touched. The gateway keeps serving its current supergraph.")
    )]
    VersionedPublishFailed { path: String, message: String },

    #[error("Published '{versioned_path}' but failed to update '{latest_path}': {message}")]
    #[diagnostic(
        code(supergraph::publish::stale_latest),
        severity(Error),
        help("The latest pointer is STALE. Copy the versioned artifact over the latest path by hand before the gateway next restarts.")
    )]
    StaleLatest {
        versioned_path: String,
        latest_path: String,
        message: String,
    },

    #[error("Failed to deploy gateway '{service}': {message}")]
    #[diagnostic(
        code(supergraph::deploy::failed),
        help("The gateway keeps serving its previous revision.")
    )]
    DeployFailed { service: String, message: String },

    #[error("Gateway health check against '{endpoint}' failed: {message}")]
    #[diagnostic(code(supergraph::verify::unhealthy))]
    HealthCheckFailed {
        endpoint: String,
        message: String,
        #[help]
        guidance: String,
    },
}

impl SyncError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The pipeline stage this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::MissingDependency { .. } => Some(Stage::ValidatingDeps),
            Self::UnknownService { .. } | Self::IntrospectionFailed { .. } => {
                Some(Stage::Introspecting)
            }
            Self::CompositionFailed { .. } => Some(Stage::Composing),
            Self::VersionedPublishFailed { .. } | Self::StaleLatest { .. } => {
                Some(Stage::Publishing)
            }
            Self::DeployFailed { .. } => Some(Stage::Deploying),
            Self::HealthCheckFailed { .. } => Some(Stage::Verifying),
            Self::Config { .. } | Self::Io { .. } | Self::Workspace { .. } => None,
        }
    }

    /// Process exit code for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io { .. } | Self::Workspace { .. } => 1,
            Self::Config { .. } => 2,
            Self::MissingDependency { .. } => 3,
            Self::UnknownService { .. } => 4,
            Self::IntrospectionFailed { .. } => 10,
            Self::CompositionFailed { .. } => 11,
            Self::VersionedPublishFailed { .. } => 12,
            Self::StaleLatest { .. } => 13,
            Self::DeployFailed { .. } => 14,
            Self::HealthCheckFailed { .. } => 15,
        }
    }

    /// True when the gateway may now be serving something other than what the
    /// operator last saw succeed.
    pub fn needs_operator(&self) -> bool {
        matches!(self, Self::StaleLatest { .. } | Self::HealthCheckFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_latest_is_distinct_from_versioned_failure() {
        let versioned = SyncError::VersionedPublishFailed {
            path: "gs://b/supergraph-1.graphql".into(),
            message: "denied".into(),
        };
        let stale = SyncError::StaleLatest {
            versioned_path: "gs://b/supergraph-1.graphql".into(),
            latest_path: "gs://b/supergraph-latest.graphql".into(),
            message: "denied".into(),
        };

        assert_ne!(versioned.exit_code(), stale.exit_code());
        assert!(stale.needs_operator());
        assert!(!versioned.needs_operator());
        assert_eq!(versioned.stage(), stale.stage());
    }

    #[test]
    fn introspection_message_names_every_service() {
        let err = SyncError::IntrospectionFailed {
            services: vec!["c".into(), "e".into()],
        };
        assert_eq!(
            err.to_string(),
            "Introspection failed for 2 service(s): c, e"
        );
    }

    #[test]
    fn composition_diagnostic_is_verbatim() {
        let diagnostic = "error[INVALID_FIELD_SHARING]: Non-shareable field \"User.id\"";
        let err = SyncError::CompositionFailed {
            diagnostic: diagnostic.into(),
        };
        assert!(err.to_string().ends_with(diagnostic));
    }

    #[test]
    fn exit_codes_are_non_zero() {
        let errors = [
            SyncError::config("x"),
            SyncError::io("/tmp", "x"),
            SyncError::DeployFailed {
                service: "gateway".into(),
                message: "x".into(),
            },
        ];
        assert!(errors.iter().all(|e| e.exit_code() != 0));
    }
}
