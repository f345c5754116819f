//! fleetgrid-planner — turns a deployment manifest into a bound plan.
//!
//! A raw manifest is migrated, validated and parsed into a
//! [`DeploymentPlan`]; the binding pipeline then resolves it against the
//! fleet: releases, existing instances, resource pools, stemcells,
//! templates, properties, VMs and persistent disks, network addresses,
//! compiled packages and DNS records.
//!
//! # Architecture
//!
//! ```text
//! PlannerFactory
//!   ├── ManifestMigrator / ManifestValidator / Canonicalizer
//!   ├── DeploymentSpecParser ──▶ DeploymentPlan
//!   ├── Assembler (one method per BindingStage)
//!   │     └── PlacerFactory ──▶ DatastorePlacer (persistent disks)
//!   ├── PackageCompileStep (Semaphore + JoinSet, dependency waves)
//!   └── ProgressTracker
//! ```
//!
//! Stages run strictly in order; each refuses to run before its
//! prerequisites and replaces its own output when re-run.

pub mod assembler;
pub mod collaborators;
pub mod compile;
pub mod error;
pub mod factory;
pub mod fingerprint;
pub mod manifest;
pub mod network;
pub mod parser;
pub mod plan;
pub mod progress;
pub mod stage;

pub use assembler::{Assembler, DEFAULT_DNS_DOMAIN};
pub use collaborators::{
    Collaborators, CompileTask, CompiledBlob, CompiledPackageCache, DeploymentRepository,
    DnsRegistry, InstanceInventory, PackageCompiler, ReleaseCatalog, StemcellManager,
};
pub use compile::PackageCompileStep;
pub use error::{PlannerError, PlannerResult, ResolutionKind};
pub use factory::PlannerFactory;
pub use manifest::{
    Canonicalizer, DefaultCanonicalizer, DefaultMigrator, ManifestMigrator, ManifestValidator,
    SchemaValidator,
};
pub use parser::DeploymentSpecParser;
pub use plan::{DeploymentPlan, Instance, Job, PlanAttrs, PlanSummary, VmBinding};
pub use progress::{
    ProgressEvent, ProgressTracker, RecordingProgress, TracingProgress, track, track_and_log,
};
pub use stage::BindingStage;
