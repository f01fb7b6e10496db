//! # Supergraph Sync
//!
//! Keeps a federated GraphQL gateway in step with its subgraphs: fetch every
//! subgraph schema, compose them into one supergraph, publish it as a
//! versioned artifact, point the gateway at it and check the gateway still
//! answers.
//!
//! ## Architecture
//!
//! ```text
//!  Service Registry
//!        │
//!        ▼
//! ┌──────────────┐
//! │  Validate    │  rover / gcloud / gsutil on PATH
//! │    deps      │
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  Introspect  │  Per service, 3 attempts, 2s apart
//! │  (→ *.graphql)│
//! └──────┬───────┘
//!        │  all succeeded?
//!        ▼
//! ┌──────────────┐
//! │   Compose    │  supergraph.yaml → rover supergraph compose
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   Publish    │  supergraph-<version>.graphql, then supergraph-latest.graphql
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   Deploy     │  New gateway revision reading latest
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   Verify     │  Settle, then one GraphQL request
//! └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use supergraph_sync::{Pipeline, ServiceSelection, SyncConfig};
//!
//! let config = SyncConfig::load("supergraph-sync.json".as_ref())?;
//! let pipeline = Pipeline::from_config(&config)?;
//!
//! let report = pipeline.run(&ServiceSelection::All).await;
//! std::process::exit(report.outcome.map_or_else(|e| e.exit_code(), |_| 0).into());
//! ```

pub mod artifact;
pub mod compose;
pub mod config;
pub mod deploy;
pub mod deps;
pub mod diagnostic;
pub mod introspect;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod retry;
pub mod supergraph;
pub mod tools;
pub mod verify;
pub mod workspace;

pub use artifact::{Clock, SupergraphArtifact, SystemClock, LATEST_KEY};
pub use config::{SyncConfig, DEFAULT_CONFIG_FILE};
pub use diagnostic::SyncError;
pub use introspect::IntrospectionResult;
pub use pipeline::{
    Collaborators, Outcome, Pipeline, PipelineOptions, PipelineReport, PipelineState, Stage,
    StageObserver,
};
pub use publish::PublishedArtifactRefs;
pub use registry::{ServiceRegistry, ServiceRegistryEntry, ServiceSelection};
pub use retry::{execute_with_retry, RetryOutcome, RetryPolicy};
pub use workspace::{keep_files_in, ReleaseHook, Workspace};
