//! Static service registry.
//!
//! The registry maps subgraph names to routing URLs. It is loaded once from
//! configuration and passed explicitly into the pipeline; nothing discovers
//! services at runtime.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::diagnostic::SyncError;

/// One subgraph known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistryEntry {
    /// Subgraph name, used as the key in the composition input.
    pub name: String,

    /// URL the gateway routes subgraph requests to.
    pub routing_url: String,
}

impl ServiceRegistryEntry {
    pub fn new(name: impl Into<String>, routing_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing_url: routing_url.into(),
        }
    }
}

/// Which services a run should update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSelection {
    /// Every registered service, in registry order.
    All,
    /// The named services, in the order given.
    Named(Vec<String>),
}

impl ServiceSelection {
    /// Builds a selection from CLI-style input: no names means nothing was
    /// requested, so callers must pass `all = true` explicitly for the sentinel.
    pub fn from_args(names: Vec<String>, all: bool) -> Self {
        if all {
            Self::All
        } else {
            Self::Named(names)
        }
    }
}

/// Its schema file would clash with the composed output.
const RESERVED_NAME: &str = "supergraph";

fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Ordered, immutable name → routing URL mapping.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    entries: Vec<ServiceRegistryEntry>,
}

impl ServiceRegistry {
    /// Creates a registry, rejecting duplicate or unsafe names and empty URLs.
    ///
    /// Names become workspace file names, so only `[A-Za-z0-9_-]` is allowed.
    pub fn new(entries: Vec<ServiceRegistryEntry>) -> Result<Self, SyncError> {
        if entries.is_empty() {
            return Err(SyncError::config("service registry is empty"));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err(SyncError::config("service registry contains an unnamed entry"));
            }
            if !is_valid_name(&entry.name) {
                return Err(SyncError::config(format!(
                    "service name '{}' may only contain letters, digits, '-' and '_'",
                    entry.name
                )));
            }
            if entry.name == RESERVED_NAME {
                return Err(SyncError::config(format!(
                    "service name '{}' is reserved for the composed supergraph",
                    RESERVED_NAME
                )));
            }
            if entry.routing_url.trim().is_empty() {
                return Err(SyncError::config(format!(
                    "service '{}' has no routing_url",
                    entry.name
                )));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(SyncError::config(format!(
                    "service '{}' is registered twice",
                    entry.name
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ServiceRegistryEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ServiceRegistryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Resolves a selection to registry entries.
    ///
    /// Named selections keep the requested order; a name requested twice is
    /// introspected once. The first unknown name fails the whole resolution,
    /// before any network activity.
    pub fn resolve(
        &self,
        selection: &ServiceSelection,
    ) -> Result<Vec<ServiceRegistryEntry>, SyncError> {
        let names = match selection {
            ServiceSelection::All => return Ok(self.entries.clone()),
            ServiceSelection::Named(names) => names,
        };

        if names.is_empty() {
            return Err(SyncError::config(
                "no services requested; name at least one service or select all",
            ));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let entry = self.get(name).ok_or_else(|| SyncError::UnknownService {
                name: name.clone(),
                known: format!("Registered services: {}", self.names().join(", ")),
            })?;
            if seen.insert(name.as_str()) {
                resolved.push(entry.clone());
            }
        }

        Ok(resolved)
    }
}
