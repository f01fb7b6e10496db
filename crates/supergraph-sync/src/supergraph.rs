//! Composition input.
//!
//! Builds the supergraph config the composition tool consumes:
//!
//! ```yaml
//! federation_version: =2.5.0
//! subgraphs:
//!   accounts:
//!     routing_url: http://accounts:4001/graphql
//!     schema:
//!       file: /tmp/supergraph-sync-XXXX/accounts.graphql
//! ```

use std::path::PathBuf;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::diagnostic::SyncError;
use crate::introspect::IntrospectionResult;
use crate::workspace::Workspace;

/// Workspace file name of the composition input.
pub const CONFIG_FILE: &str = "supergraph.yaml";

/// One subgraph in the composition input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupergraphEntry {
    pub service_name: String,
    pub routing_url: String,
    pub schema_path: PathBuf,
}

/// Ordered list of subgraphs to compose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupergraphConfig {
    pub federation_version: String,
    #[serde(rename = "subgraphs", serialize_with = "serialize_subgraphs")]
    pub entries: Vec<SupergraphEntry>,
}

impl SupergraphConfig {
    /// Builds the config from introspection results, keeping their order.
    ///
    /// The caller guarantees every result succeeded; results without a schema
    /// file have nothing to contribute and are skipped.
    pub fn build(results: &[IntrospectionResult], federation_version: &str) -> Self {
        let entries = results
            .iter()
            .filter_map(|r| {
                r.schema_path.as_ref().map(|path| SupergraphEntry {
                    service_name: r.service_name.clone(),
                    routing_url: r.routing_url.clone(),
                    schema_path: path.clone(),
                })
            })
            .collect();

        Self {
            federation_version: federation_version.to_string(),
            entries,
        }
    }

    pub fn to_yaml(&self) -> Result<String, SyncError> {
        serde_yaml::to_string(self)
            .map_err(|e| SyncError::config(format!("failed to render supergraph config: {}", e)))
    }

    /// Writes the config into the workspace and returns its path.
    pub fn write(&self, workspace: &Workspace) -> Result<PathBuf, SyncError> {
        let yaml = self.to_yaml()?;
        workspace.write(CONFIG_FILE, yaml.as_bytes())
    }
}

#[derive(Serialize)]
struct SubgraphYaml<'a> {
    routing_url: &'a str,
    schema: SchemaFileYaml,
}

#[derive(Serialize)]
struct SchemaFileYaml {
    file: String,
}

// A map serialized entry by entry keeps insertion order, which keeps the
// composed output stable across runs with the same inputs.
fn serialize_subgraphs<S>(entries: &[SupergraphEntry], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for entry in entries {
        map.serialize_entry(
            &entry.service_name,
            &SubgraphYaml {
                routing_url: &entry.routing_url,
                schema: SchemaFileYaml {
                    file: entry.schema_path.display().to_string(),
                },
            },
        )?;
    }
    map.end()
}
