//! The deployment plan — a per-request aggregate built by the parser and
//! progressively bound by the pipeline stages.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use fleet_core::{
    CompilationSpec, InstanceState, JobNetworkSpec, PlanOptions, Properties, ReleaseSpec,
    ResourcePoolSpec,
};
use fleetgrid_state::{
    CompiledPackageRecord, DeploymentRecord, DnsRecord, InstanceRecord, ReleaseVersionRecord,
    StemcellRecord,
};
use serde::Serialize;

use crate::network::Network;
use crate::stage::BindingStage;

/// Deployment-level attributes handed to the parser.
#[derive(Debug, Clone)]
pub struct PlanAttrs {
    /// Canonical deployment name.
    pub name: String,
    pub properties: Properties,
}

#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub name: String,
    pub record: DeploymentRecord,
    pub properties: Properties,
    pub options: PlanOptions,
    pub release_specs: Vec<ReleaseSpec>,
    pub jobs: Vec<Job>,
    pub resource_pools: BTreeMap<String, ResourcePool>,
    pub networks: BTreeMap<String, Network>,
    pub compilation: CompilationSpec,

    // Filled in by binding stages.
    pub releases: BTreeMap<String, ResolvedRelease>,
    pub obsolete_instances: Vec<InstanceRecord>,
    pub compiled_packages: BTreeMap<String, CompiledPackageRecord>,
    pub dns_records: Vec<DnsRecord>,
    completed: BTreeSet<BindingStage>,
}

impl DeploymentPlan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        attrs: PlanAttrs,
        record: DeploymentRecord,
        options: PlanOptions,
        release_specs: Vec<ReleaseSpec>,
        jobs: Vec<Job>,
        resource_pools: BTreeMap<String, ResourcePool>,
        networks: BTreeMap<String, Network>,
        compilation: CompilationSpec,
    ) -> Self {
        Self {
            name: attrs.name,
            record,
            properties: attrs.properties,
            options,
            release_specs,
            jobs,
            resource_pools,
            networks,
            compilation,
            releases: BTreeMap::new(),
            obsolete_instances: Vec::new(),
            compiled_packages: BTreeMap::new(),
            dns_records: Vec::new(),
            completed: BTreeSet::new(),
        }
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.jobs.iter().flat_map(|j| j.instances.iter())
    }

    pub fn is_completed(&self, stage: BindingStage) -> bool {
        self.completed.contains(&stage)
    }

    pub fn completed_stages(&self) -> impl Iterator<Item = BindingStage> + '_ {
        self.completed.iter().copied()
    }

    pub(crate) fn mark_completed(&mut self, stage: BindingStage) {
        self.completed.insert(stage);
    }

    /// Whether every instance has a pool, a stemcell, and bound templates.
    pub fn is_fully_bound(&self) -> bool {
        self.jobs.iter().all(|job| {
            job.stemcell.is_some()
                && !job.templates.is_empty()
                && job.templates.len() == job.bound_templates.len()
                && self.resource_pools.contains_key(&job.resource_pool)
                && job.instances.iter().all(|i| i.vm != VmBinding::Unbound)
        })
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            deployment: self.name.clone(),
            deployment_id: self.record.id.clone(),
            completed_stages: self.completed.iter().copied().collect(),
            instances: self
                .jobs
                .iter()
                .flat_map(|job| {
                    job.instances.iter().map(move |instance| InstanceSummary {
                        name: instance.name(),
                        resource_pool: job.resource_pool.clone(),
                        stemcell: job.stemcell.as_ref().map(StemcellRecord::table_key),
                        templates: job.bound_templates.iter().map(|t| t.name.clone()).collect(),
                        vm: instance.vm.clone(),
                        disk: instance.disk.clone(),
                        ips: instance
                            .reservations
                            .iter()
                            .map(|r| (r.network.clone(), r.ip))
                            .collect(),
                    })
                })
                .collect(),
            obsolete_instances: self
                .obsolete_instances
                .iter()
                .map(|r| format!("{}/{}", r.job, r.index))
                .collect(),
            compiled_packages: self.compiled_packages.len(),
            dns_records: self.dns_records.len(),
        }
    }
}

// ── Jobs and instances ────────────────────────────────────────────

/// A job template resolved to the release that provides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    pub name: String,
    pub release: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub templates: Vec<JobTemplate>,
    pub resource_pool: String,
    pub networks: Vec<JobNetworkSpec>,
    pub persistent_disk_mb: u64,
    pub properties: Properties,
    pub state: InstanceState,
    pub instances: Vec<Instance>,

    // Filled in by binding stages.
    pub stemcell: Option<StemcellRecord>,
    pub bound_templates: Vec<BoundTemplate>,
    pub packages: BTreeMap<String, BoundPackage>,
    pub merged_properties: Option<Properties>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundTemplate {
    pub name: String,
    pub release: String,
    pub version: String,
    pub sha1: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundPackage {
    pub name: String,
    pub release: String,
    pub version: String,
    pub fingerprint: String,
    /// Fingerprints of the packages this one builds against.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub job: String,
    pub index: u32,
    /// What the fleet currently runs for this slot, if anything.
    pub existing: Option<InstanceRecord>,
    pub recreate: bool,
    pub vm: VmBinding,
    pub disk: Option<DiskBinding>,
    pub reservations: Vec<NetworkReservation>,
}

impl Instance {
    pub(crate) fn new(job: &str, index: u32) -> Self {
        Self {
            job: job.to_string(),
            index,
            existing: None,
            recreate: false,
            vm: VmBinding::Unbound,
            disk: None,
            reservations: Vec::new(),
        }
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.job, self.index)
    }

    pub fn ip_on(&self, network: &str) -> Option<Ipv4Addr> {
        self.reservations
            .iter()
            .find(|r| r.network == network)
            .map(|r| r.ip)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VmBinding {
    Unbound,
    /// Keep the VM the fleet already runs.
    Existing { vm_cid: String },
    /// A VM must be created from the resource pool.
    PendingAllocation { resource_pool: String },
    /// The job is detached; no VM is kept or created.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskBinding {
    pub size_mb: u64,
    pub datastore: Option<String>,
    /// Set when an existing disk is kept.
    pub disk_cid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkReservation {
    pub network: String,
    pub ip: Ipv4Addr,
    pub kind: ReservationKind,
}

// ── Pools and releases ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourcePool {
    pub spec: ResourcePoolSpec,
    /// Instances requested by jobs using this pool.
    pub demand: u32,
    pub stemcell: Option<StemcellRecord>,
}

impl ResourcePool {
    pub(crate) fn new(spec: ResourcePoolSpec) -> Self {
        Self {
            spec,
            demand: 0,
            stemcell: None,
        }
    }
}

/// A release version resolved against the catalog, with package
/// fingerprints computed.
#[derive(Debug, Clone)]
pub struct ResolvedRelease {
    pub record: ReleaseVersionRecord,
    /// Package name → content fingerprint.
    pub fingerprints: BTreeMap<String, String>,
}

// ── Summary ───────────────────────────────────────────────────────

/// Serializable overview of a plan, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub deployment: String,
    pub deployment_id: String,
    pub completed_stages: Vec<BindingStage>,
    pub instances: Vec<InstanceSummary>,
    pub obsolete_instances: Vec<String>,
    pub compiled_packages: usize,
    pub dns_records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub name: String,
    pub resource_pool: String,
    pub stemcell: Option<String>,
    pub templates: Vec<String>,
    pub vm: VmBinding,
    pub disk: Option<DiskBinding>,
    pub ips: BTreeMap<String, Ipv4Addr>,
}
