//! Datastores and placement requests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A storage resource inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
    pub free_space_mb: u64,
    pub total_space_mb: u64,
}

impl Datastore {
    /// One-line summary used in placement diagnostics.
    pub fn debug_info(&self) -> String {
        format!(
            "{} ({}MB free of {}MB)",
            self.name, self.free_space_mb, self.total_space_mb
        )
    }
}

/// Datastore classification, decided by name pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskKind {
    Ephemeral,
    Persistent,
}

impl fmt::Display for DiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskKind::Ephemeral => f.write_str("ephemeral"),
            DiskKind::Persistent => f.write_str("persistent"),
        }
    }
}

/// A request for disk space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementRequest {
    pub size_mb: u64,
    pub kind: DiskKind,
}

impl PlacementRequest {
    pub fn persistent(size_mb: u64) -> Self {
        Self {
            size_mb,
            kind: DiskKind::Persistent,
        }
    }
}
