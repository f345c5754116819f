//! Placement error types.

use std::fmt;

use thiserror::Error;

use crate::datastore::{Datastore, DiskKind};

/// Errors raised while resolving inventory or placing a disk.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("datacenter not found: {0}")]
    DatacenterNotFound(String),

    #[error("can't find cluster: {0}")]
    ClusterNotFound(String),

    #[error("can't find properties for cluster: {0}")]
    PropertiesNotFound(String),

    #[error("invalid properties for cluster {cluster}: {reason}")]
    InvalidProperties { cluster: String, reason: String },

    #[error("invalid datastore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{0}")]
    NoCapacity(NoCapacity),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// No datastore could take a disk of the requested size.
///
/// Carries every candidate that was considered so operators can see how
/// far off the fleet is.
#[derive(Debug, Clone, PartialEq)]
pub struct NoCapacity {
    pub kind: DiskKind,
    pub size_mb: u64,
    pub headroom_mb: u64,
    pub candidates: Vec<Datastore>,
}

impl fmt::Display for NoCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "couldn't find a {} datastore with {}MB of free space (headroom {}MB). Found:",
            self.kind, self.size_mb, self.headroom_mb
        )?;
        if self.candidates.is_empty() {
            return f.write_str(" none");
        }
        for datastore in &self.candidates {
            write!(f, "\n {}", datastore.debug_info())?;
        }
        Ok(())
    }
}
