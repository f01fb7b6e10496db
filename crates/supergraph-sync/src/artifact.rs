//! Composed supergraph artifacts and their version keys.

use chrono::{DateTime, Utc};

/// Supplies the time a supergraph was produced.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A composed supergraph. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupergraphArtifact {
    content: Vec<u8>,
    version_key: String,
    produced_at: DateTime<Utc>,
}

impl SupergraphArtifact {
    /// Wraps composed bytes; the version key is seconds since the epoch.
    pub fn new(content: Vec<u8>, produced_at: DateTime<Utc>) -> Self {
        Self {
            content,
            version_key: produced_at.timestamp().to_string(),
            produced_at,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn version_key(&self) -> &str {
        &self.version_key
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    /// Storage key of the immutable copy.
    pub fn versioned_key(&self) -> String {
        format!("supergraph-{}.graphql", self.version_key)
    }
}

/// Storage key of the mutable pointer the gateway reads.
pub const LATEST_KEY: &str = "supergraph-latest.graphql";
