//! Planner error types.

use std::fmt;

use fleetgrid_placement::PlacementError;
use fleetgrid_state::StateError;
use thiserror::Error;

use crate::stage::BindingStage;

/// The kind of entity a lookup failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Release,
    Stemcell,
    ResourcePool,
    Network,
    Template,
    Package,
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionKind::Release => "release",
            ResolutionKind::Stemcell => "stemcell",
            ResolutionKind::ResourcePool => "resource pool",
            ResolutionKind::Network => "network",
            ResolutionKind::Template => "template",
            ResolutionKind::Package => "package",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while building or binding a deployment plan.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("manifest validation failed:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),

    #[error("invalid deployment manifest: {0}")]
    Parse(String),

    #[error("{kind} '{name}' not found (available: {})", available_list(.available))]
    Lookup {
        kind: ResolutionKind,
        name: String,
        available: Vec<String>,
    },

    #[error("{stage} failed: {reason}")]
    Binding { stage: BindingStage, reason: String },

    #[error("cannot run '{stage}' before '{missing}'")]
    StageOrder {
        stage: BindingStage,
        missing: BindingStage,
    },

    #[error("failed to compile package {package} for stemcell {stemcell}: {reason}")]
    Compilation {
        package: String,
        stemcell: String,
        reason: String,
    },

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type PlannerResult<T> = Result<T, PlannerError>;

impl PlannerError {
    pub(crate) fn binding(stage: BindingStage, reason: impl Into<String>) -> Self {
        PlannerError::Binding {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn lookup(kind: ResolutionKind, name: impl Into<String>, available: Vec<String>) -> Self {
        PlannerError::Lookup {
            kind,
            name: name.into(),
            available,
        }
    }
}

fn available_list(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}
