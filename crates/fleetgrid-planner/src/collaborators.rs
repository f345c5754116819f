//! Narrow interfaces to the fleet services the planner consumes.
//!
//! Every trait is `Send + Sync` so a single set of collaborators can be
//! shared through `Arc` across concurrent planning requests. The embedded
//! [`StateStore`] implements all of them except [`PackageCompiler`], which
//! drives compile VMs and lives outside this crate.

use std::sync::Arc;

use fleetgrid_placement::PlacerFactory;
use fleetgrid_state::{
    CompiledPackageRecord, DeploymentRecord, DnsRecord, InstanceRecord, ReleaseVersionRecord,
    StateResult, StateStore, StemcellRecord,
};

use crate::progress::ProgressTracker;

pub trait DeploymentRepository: Send + Sync {
    /// Look up the record for a canonical name, creating it on first use.
    fn find_or_create_by_name(&self, name: &str) -> StateResult<DeploymentRecord>;
}

pub trait ReleaseCatalog: Send + Sync {
    fn find_release_version(&self, name: &str, version: &str) -> StateResult<Option<ReleaseVersionRecord>>;

    fn list_versions(&self, name: &str) -> StateResult<Vec<ReleaseVersionRecord>>;
}

pub trait StemcellManager: Send + Sync {
    fn find_by_name_and_version(&self, name: &str, version: &str) -> StateResult<Option<StemcellRecord>>;

    fn list(&self) -> StateResult<Vec<StemcellRecord>>;
}

pub trait InstanceInventory: Send + Sync {
    fn instances_for_deployment(&self, deployment_id: &str) -> StateResult<Vec<InstanceRecord>>;
}

pub trait CompiledPackageCache: Send + Sync {
    fn find_compiled(&self, fingerprint: &str, stemcell: &str) -> StateResult<Option<CompiledPackageRecord>>;

    fn store_compiled(&self, record: &CompiledPackageRecord) -> StateResult<()>;
}

pub trait DnsRegistry: Send + Sync {
    /// Replace the published records of `deployment` with `records`.
    fn publish(&self, deployment: &str, records: &[DnsRecord]) -> StateResult<()>;
}

/// One package to build against one stemcell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileTask {
    pub package: String,
    pub release: String,
    pub version: String,
    pub fingerprint: String,
    /// Stemcell in `name/version` form.
    pub stemcell: String,
    /// Fingerprints that must be compiled first.
    pub dependencies: Vec<String>,
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBlob {
    pub blob_id: String,
    pub sha1: String,
}

/// Builds a package on a compile VM. Blocking; called from the blocking pool.
pub trait PackageCompiler: Send + Sync {
    fn compile(&self, task: &CompileTask) -> anyhow::Result<CompiledBlob>;
}

/// Everything the planner talks to, shared across requests.
#[derive(Clone)]
pub struct Collaborators {
    pub deployments: Arc<dyn DeploymentRepository>,
    pub releases: Arc<dyn ReleaseCatalog>,
    pub stemcells: Arc<dyn StemcellManager>,
    pub instances: Arc<dyn InstanceInventory>,
    pub compiled_packages: Arc<dyn CompiledPackageCache>,
    pub compiler: Arc<dyn PackageCompiler>,
    pub dns: Arc<dyn DnsRegistry>,
    pub placer: Arc<dyn PlacerFactory>,
    pub progress: Arc<dyn ProgressTracker>,
}

impl Collaborators {
    /// Back every store-facing collaborator with one [`StateStore`].
    pub fn from_store(
        store: StateStore,
        compiler: Arc<dyn PackageCompiler>,
        placer: Arc<dyn PlacerFactory>,
        progress: Arc<dyn ProgressTracker>,
    ) -> Self {
        let store = Arc::new(store);
        Self {
            deployments: store.clone(),
            releases: store.clone(),
            stemcells: store.clone(),
            instances: store.clone(),
            compiled_packages: store.clone(),
            dns: store,
            compiler,
            placer,
            progress,
        }
    }
}

// ── StateStore implementations ────────────────────────────────────

impl DeploymentRepository for StateStore {
    fn find_or_create_by_name(&self, name: &str) -> StateResult<DeploymentRecord> {
        self.find_or_create_deployment(name)
    }
}

impl ReleaseCatalog for StateStore {
    fn find_release_version(&self, name: &str, version: &str) -> StateResult<Option<ReleaseVersionRecord>> {
        self.get_release_version(name, version)
    }

    fn list_versions(&self, name: &str) -> StateResult<Vec<ReleaseVersionRecord>> {
        self.list_release_versions(name)
    }
}

impl StemcellManager for StateStore {
    fn find_by_name_and_version(&self, name: &str, version: &str) -> StateResult<Option<StemcellRecord>> {
        self.get_stemcell(name, version)
    }

    fn list(&self) -> StateResult<Vec<StemcellRecord>> {
        self.list_stemcells()
    }
}

impl InstanceInventory for StateStore {
    fn instances_for_deployment(&self, deployment_id: &str) -> StateResult<Vec<InstanceRecord>> {
        self.list_instances_for_deployment(deployment_id)
    }
}

impl CompiledPackageCache for StateStore {
    fn find_compiled(&self, fingerprint: &str, stemcell: &str) -> StateResult<Option<CompiledPackageRecord>> {
        self.get_compiled_package(fingerprint, stemcell)
    }

    fn store_compiled(&self, record: &CompiledPackageRecord) -> StateResult<()> {
        self.put_compiled_package(record)
    }
}

impl DnsRegistry for StateStore {
    fn publish(&self, deployment: &str, records: &[DnsRecord]) -> StateResult<()> {
        self.replace_dns_records(deployment, records)
    }
}
