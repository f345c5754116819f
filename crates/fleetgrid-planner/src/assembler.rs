//! The binding pipeline.
//!
//! Each `bind_*` method checks that its prerequisite stages have completed,
//! recomputes its bindings from scratch, and marks its stage complete.
//! Re-running a stage therefore replaces its previous output rather than
//! adding to it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use fleet_core::{InstanceState, Properties};
use fleetgrid_placement::DatastorePlacer;
use fleetgrid_state::{DnsRecord, InstanceRecord, ReleaseVersionRecord, StemcellRecord, compare_versions};
use serde_json::Value;
use tracing::{debug, info};

use crate::collaborators::Collaborators;
use crate::error::{PlannerError, PlannerResult, ResolutionKind};
use crate::fingerprint::release_fingerprints;
use crate::plan::{
    BoundPackage, BoundTemplate, DeploymentPlan, DiskBinding, Instance, NetworkReservation,
    ReservationKind, ResolvedRelease, VmBinding,
};
use crate::stage::BindingStage;

/// Default DNS domain appended to instance records.
pub const DEFAULT_DNS_DOMAIN: &str = "fleet";

#[derive(Clone)]
pub struct Assembler {
    collaborators: Collaborators,
    dns_domain: String,
}

impl Assembler {
    pub fn new(collaborators: Collaborators, dns_domain: impl Into<String>) -> Self {
        Self {
            collaborators,
            dns_domain: dns_domain.into(),
        }
    }

    /// Run one synchronous stage. Package compilation is async and runs
    /// through [`crate::compile::PackageCompileStep`] instead.
    pub fn run(&self, stage: BindingStage, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        match stage {
            BindingStage::Releases => self.bind_releases(plan),
            BindingStage::ExistingDeployment => self.bind_existing_deployment(plan),
            BindingStage::ResourcePools => self.bind_resource_pools(plan),
            BindingStage::Stemcells => self.bind_stemcells(plan),
            BindingStage::Templates => self.bind_templates(plan),
            BindingStage::Properties => self.bind_properties(plan),
            BindingStage::UnallocatedVms => self.bind_unallocated_vms(plan),
            BindingStage::InstanceNetworks => self.bind_instance_networks(plan),
            BindingStage::CompilePackages => Err(PlannerError::binding(
                stage,
                "package compilation is asynchronous; use PackageCompileStep",
            )),
            BindingStage::Dns => self.bind_dns(plan),
        }
    }

    // ── Releases ───────────────────────────────────────────────────

    pub fn bind_releases(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        ensure_ready(plan, BindingStage::Releases)?;

        let mut releases = BTreeMap::new();
        for spec in &plan.release_specs {
            let record = self.resolve_release(&spec.name, &spec.version)?;
            let fingerprints = release_fingerprints(&record)?;
            debug!(
                release = %record.name,
                version = %record.version,
                packages = fingerprints.len(),
                "release bound"
            );
            releases.insert(
                spec.name.clone(),
                ResolvedRelease {
                    record,
                    fingerprints,
                },
            );
        }

        plan.releases = releases;
        plan.mark_completed(BindingStage::Releases);
        Ok(())
    }

    fn resolve_release(&self, name: &str, version: &str) -> PlannerResult<ReleaseVersionRecord> {
        let catalog = &self.collaborators.releases;
        if version == fleet_core::LATEST_VERSION {
            return catalog
                .list_versions(name)?
                .into_iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
                .ok_or_else(|| PlannerError::lookup(ResolutionKind::Release, name, Vec::new()));
        }
        match catalog.find_release_version(name, version)? {
            Some(record) => Ok(record),
            None => {
                let available = catalog
                    .list_versions(name)?
                    .iter()
                    .map(ReleaseVersionRecord::table_key)
                    .collect();
                Err(PlannerError::lookup(
                    ResolutionKind::Release,
                    format!("{name}/{version}"),
                    available,
                ))
            }
        }
    }

    // ── Existing deployment ────────────────────────────────────────

    pub fn bind_existing_deployment(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        let stage = BindingStage::ExistingDeployment;
        ensure_ready(plan, stage)?;

        let records = self
            .collaborators
            .instances
            .instances_for_deployment(&plan.record.id)?;

        for instance in plan.jobs.iter_mut().flat_map(|j| j.instances.iter_mut()) {
            instance.existing = None;
            instance.recreate = false;
        }
        let mut obsolete = Vec::new();

        for record in records {
            let job_name = plan
                .options
                .job_rename
                .get(&record.job)
                .unwrap_or(&record.job)
                .clone();
            let recreate_all = plan.options.recreate;

            let slot = plan
                .jobs
                .iter_mut()
                .find(|j| j.name == job_name)
                .and_then(|job| {
                    let recreate = recreate_all || job.state == InstanceState::Recreate;
                    job.instances
                        .get_mut(record.index as usize)
                        .map(|instance| (instance, recreate))
                });

            match slot {
                Some((instance, _)) if instance.existing.is_some() => {
                    let previous = instance
                        .existing
                        .as_ref()
                        .map(|r| format!("{}/{}", r.job, r.index))
                        .unwrap_or_default();
                    return Err(PlannerError::binding(
                        stage,
                        format!(
                            "instance {} is claimed by both {previous} and {}/{}",
                            instance.name(),
                            record.job,
                            record.index
                        ),
                    ));
                }
                Some((instance, recreate)) => {
                    debug!(instance = %instance.name(), recreate, "existing instance attached");
                    instance.recreate = recreate;
                    instance.existing = Some(record);
                }
                None => {
                    debug!(job = %record.job, index = record.index, "instance is obsolete");
                    obsolete.push(record);
                }
            }
        }

        plan.obsolete_instances = obsolete;
        plan.mark_completed(stage);
        Ok(())
    }

    // ── Resource pools ─────────────────────────────────────────────

    pub fn bind_resource_pools(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        let stage = BindingStage::ResourcePools;
        ensure_ready(plan, stage)?;

        let mut demand: BTreeMap<&str, u32> = BTreeMap::new();
        for job in &plan.jobs {
            *demand.entry(job.resource_pool.as_str()).or_default() += job.instances.len() as u32;
        }

        for (name, pool) in plan.resource_pools.iter_mut() {
            if !plan.networks.contains_key(&pool.spec.network) {
                return Err(PlannerError::lookup(
                    ResolutionKind::Network,
                    pool.spec.network.clone(),
                    plan.networks.keys().cloned().collect(),
                ));
            }
            pool.demand = demand.get(name.as_str()).copied().unwrap_or(0);
            match pool.spec.size {
                Some(size) if pool.demand > size => {
                    return Err(PlannerError::binding(
                        stage,
                        format!(
                            "resource pool '{name}' has size {size} but jobs need {} VMs",
                            pool.demand
                        ),
                    ));
                }
                _ => {}
            }
        }

        plan.mark_completed(stage);
        Ok(())
    }

    // ── Stemcells ──────────────────────────────────────────────────

    pub fn bind_stemcells(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        ensure_ready(plan, BindingStage::Stemcells)?;

        let manager = &self.collaborators.stemcells;
        for pool in plan.resource_pools.values_mut() {
            let wanted = &pool.spec.stemcell;
            let Some(stemcell) = manager.find_by_name_and_version(&wanted.name, &wanted.version)? else {
                let available = manager.list()?.iter().map(StemcellRecord::table_key).collect();
                return Err(PlannerError::lookup(ResolutionKind::Stemcell, wanted.key(), available));
            };
            pool.stemcell = Some(stemcell);
        }

        plan.mark_completed(BindingStage::Stemcells);
        Ok(())
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn bind_templates(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        let stage = BindingStage::Templates;
        ensure_ready(plan, stage)?;

        for job in plan.jobs.iter_mut() {
            let stemcell = plan
                .resource_pools
                .get(&job.resource_pool)
                .and_then(|pool| pool.stemcell.clone())
                .ok_or_else(|| {
                    PlannerError::binding(
                        stage,
                        format!("resource pool '{}' has no bound stemcell", job.resource_pool),
                    )
                })?;

            let mut bound_templates = Vec::with_capacity(job.templates.len());
            let mut packages = BTreeMap::new();
            for template in &job.templates {
                let release = plan.releases.get(&template.release).ok_or_else(|| {
                    PlannerError::lookup(
                        ResolutionKind::Release,
                        template.release.clone(),
                        plan.releases.keys().cloned().collect(),
                    )
                })?;
                let record = release.record.template(&template.name).ok_or_else(|| {
                    PlannerError::lookup(
                        ResolutionKind::Template,
                        template.name.clone(),
                        release.record.templates.iter().map(|t| t.name.clone()).collect(),
                    )
                })?;
                for package in &record.packages {
                    collect_package(release, package, &mut packages)?;
                }
                bound_templates.push(BoundTemplate {
                    name: record.name.clone(),
                    release: release.record.name.clone(),
                    version: record.version.clone(),
                    sha1: record.sha1.clone(),
                });
            }

            job.stemcell = Some(stemcell);
            job.bound_templates = bound_templates;
            job.packages = packages;
        }

        plan.mark_completed(stage);
        Ok(())
    }

    // ── Properties ─────────────────────────────────────────────────

    pub fn bind_properties(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        ensure_ready(plan, BindingStage::Properties)?;

        for job in plan.jobs.iter_mut() {
            let mut merged = plan.properties.clone();
            if let Some(pool) = plan.resource_pools.get(&job.resource_pool) {
                deep_merge(&mut merged, &pool.spec.properties);
            }
            deep_merge(&mut merged, &job.properties);
            job.merged_properties = Some(merged);
        }

        plan.mark_completed(BindingStage::Properties);
        Ok(())
    }

    // ── Unallocated VMs ────────────────────────────────────────────

    pub fn bind_unallocated_vms(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        let stage = BindingStage::UnallocatedVms;
        ensure_ready(plan, stage)?;

        let placer: Option<Box<dyn DatastorePlacer>> = if plan.jobs.iter().any(|j| j.persistent_disk_mb > 0) {
            Some(self.collaborators.placer.for_deployment(&plan.record.id)?)
        } else {
            None
        };
        let mut pending = 0usize;
        let mut placed = 0usize;

        for job in plan.jobs.iter_mut() {
            let size_mb = job.persistent_disk_mb;
            for instance in job.instances.iter_mut() {
                instance.vm = vm_binding(instance, job.state, &job.resource_pool);
                if matches!(instance.vm, VmBinding::PendingAllocation { .. }) {
                    pending += 1;
                }

                if size_mb == 0 {
                    instance.disk = None;
                    continue;
                }
                if let Some(disk) = reusable_disk(instance.existing.as_ref(), size_mb) {
                    instance.disk = Some(disk);
                    continue;
                }
                let Some(placer) = placer.as_deref() else {
                    return Err(PlannerError::binding(stage, "no datastore placer available"));
                };
                let datastore = placer.pick_persistent_datastore(size_mb)?;
                debug!(
                    instance = %instance.name(),
                    datastore = %datastore.name,
                    size_mb,
                    "persistent disk placed"
                );
                placed += 1;
                instance.disk = Some(DiskBinding {
                    size_mb,
                    datastore: Some(datastore.name),
                    disk_cid: None,
                });
            }
        }

        info!(deployment = %plan.name, pending, placed, "unallocated VMs bound");
        plan.mark_completed(stage);
        Ok(())
    }

    // ── Instance networks ──────────────────────────────────────────

    pub fn bind_instance_networks(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        let stage = BindingStage::InstanceNetworks;
        ensure_ready(plan, stage)?;

        let networks = &plan.networks;
        let mut taken = AddressBook::default();

        for instance in plan.jobs.iter_mut().flat_map(|j| j.instances.iter_mut()) {
            instance.reservations.clear();
        }

        // Static addresses first so nothing else can take them.
        for job in plan.jobs.iter_mut() {
            for job_network in &job.networks {
                for (instance, ip) in job.instances.iter_mut().zip(&job_network.static_ips) {
                    taken.reserve(stage, &job_network.name, *ip, instance.name())?;
                    instance.reservations.push(NetworkReservation {
                        network: job_network.name.clone(),
                        ip: *ip,
                        kind: ReservationKind::Static,
                    });
                }
            }
        }

        // Then addresses instances already hold, while still valid.
        let mut unassigned: Vec<(usize, usize, String)> = Vec::new();
        for (j, job) in plan.jobs.iter_mut().enumerate() {
            for job_network in &job.networks {
                let network = networks.get(&job_network.name).ok_or_else(|| {
                    PlannerError::lookup(
                        ResolutionKind::Network,
                        job_network.name.clone(),
                        networks.keys().cloned().collect(),
                    )
                })?;
                for (i, instance) in job.instances.iter_mut().enumerate() {
                    if instance.ip_on(&job_network.name).is_some() {
                        continue;
                    }
                    let kept = existing_ip(instance.existing.as_ref(), &job_network.name)
                        .filter(|ip| network.is_dynamic(*ip) && !taken.is_taken(&job_network.name, *ip));
                    match kept {
                        Some(ip) => {
                            taken.reserve(stage, &job_network.name, ip, instance.name())?;
                            instance.reservations.push(NetworkReservation {
                                network: job_network.name.clone(),
                                ip,
                                kind: ReservationKind::Dynamic,
                            });
                        }
                        None => unassigned.push((j, i, job_network.name.clone())),
                    }
                }
            }
        }

        // Everything else gets the lowest free dynamic address.
        for (j, i, network_name) in unassigned {
            let instance = &mut plan.jobs[j].instances[i];
            let ip = networks
                .get(&network_name)
                .and_then(|network| network.allocate_dynamic(taken.in_use(&network_name)))
                .ok_or_else(|| {
                    PlannerError::binding(
                        stage,
                        format!("no free IPs left on network '{network_name}' for {}", instance.name()),
                    )
                })?;
            taken.reserve(stage, &network_name, ip, instance.name())?;
            instance.reservations.push(NetworkReservation {
                network: network_name,
                ip,
                kind: ReservationKind::Dynamic,
            });
        }

        plan.mark_completed(stage);
        Ok(())
    }

    // ── DNS ────────────────────────────────────────────────────────

    pub fn bind_dns(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        ensure_ready(plan, BindingStage::Dns)?;

        let deployment = dns_label(&plan.name);
        let mut records = Vec::new();
        for instance in plan.instances() {
            for reservation in &instance.reservations {
                records.push(DnsRecord {
                    name: format!(
                        "{}.{}.{}.{}.{}",
                        instance.index,
                        dns_label(&instance.job),
                        dns_label(&reservation.network),
                        deployment,
                        self.dns_domain
                    ),
                    ip: reservation.ip,
                    deployment: plan.name.clone(),
                });
            }
        }

        self.collaborators.dns.publish(&plan.name, &records)?;
        info!(deployment = %plan.name, records = records.len(), "dns records published");
        plan.dns_records = records;
        plan.mark_completed(BindingStage::Dns);
        Ok(())
    }
}

/// Addresses handed out so far, per network, with the instance holding each.
#[derive(Debug, Default)]
struct AddressBook {
    networks: BTreeMap<String, BTreeMap<Ipv4Addr, String>>,
    empty: BTreeSet<Ipv4Addr>,
    in_use: BTreeMap<String, BTreeSet<Ipv4Addr>>,
}

impl AddressBook {
    fn reserve(&mut self, stage: BindingStage, network: &str, ip: Ipv4Addr, holder: String) -> PlannerResult<()> {
        let held = self.networks.entry(network.to_string()).or_default();
        if let Some(other) = held.get(&ip) {
            return Err(PlannerError::binding(
                stage,
                format!("IP {ip} on network '{network}' is claimed by both {other} and {holder}"),
            ));
        }
        held.insert(ip, holder);
        self.in_use.entry(network.to_string()).or_default().insert(ip);
        Ok(())
    }

    fn is_taken(&self, network: &str, ip: Ipv4Addr) -> bool {
        self.networks.get(network).is_some_and(|held| held.contains_key(&ip))
    }

    fn in_use(&self, network: &str) -> &BTreeSet<Ipv4Addr> {
        self.in_use.get(network).unwrap_or(&self.empty)
    }
}

/// Fail with [`PlannerError::StageOrder`] unless every prerequisite of
/// `stage` has completed.
pub(crate) fn ensure_ready(plan: &DeploymentPlan, stage: BindingStage) -> PlannerResult<()> {
    match stage
        .prerequisites()
        .iter()
        .find(|prerequisite| !plan.is_completed(**prerequisite))
    {
        Some(missing) => Err(PlannerError::StageOrder {
            stage,
            missing: *missing,
        }),
        None => Ok(()),
    }
}

/// Add `name` and everything it builds against to `packages`.
fn collect_package(
    release: &ResolvedRelease,
    name: &str,
    packages: &mut BTreeMap<String, BoundPackage>,
) -> PlannerResult<()> {
    let key = format!("{}/{}", release.record.name, name);
    if packages.contains_key(&key) {
        return Ok(());
    }
    let lookup_failed = || {
        PlannerError::lookup(
            ResolutionKind::Package,
            name,
            release.record.packages.iter().map(|p| p.name.clone()).collect(),
        )
    };
    let record = release.record.package(name).ok_or_else(lookup_failed)?;
    let fingerprint = release.fingerprints.get(name).ok_or_else(lookup_failed)?;

    let mut dependencies = Vec::with_capacity(record.dependencies.len());
    for dependency in &record.dependencies {
        let fp = release
            .fingerprints
            .get(dependency)
            .ok_or_else(|| {
                PlannerError::lookup(ResolutionKind::Package, dependency.clone(), Vec::new())
            })?;
        dependencies.push(fp.clone());
    }
    dependencies.sort();

    packages.insert(
        key,
        BoundPackage {
            name: record.name.clone(),
            release: release.record.name.clone(),
            version: record.version.clone(),
            fingerprint: fingerprint.clone(),
            dependencies,
        },
    );
    for dependency in &record.dependencies {
        collect_package(release, dependency, packages)?;
    }
    Ok(())
}

/// Overlay `overlay` onto `base`; nested objects merge, anything else replaces.
pub fn deep_merge(base: &mut Properties, overlay: &Properties) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => deep_merge(existing, incoming),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn vm_binding(instance: &Instance, state: InstanceState, resource_pool: &str) -> VmBinding {
    if state == InstanceState::Detached {
        return VmBinding::Detached;
    }
    match instance.existing.as_ref().and_then(|r| r.vm_cid.as_ref()) {
        Some(vm_cid) if !instance.recreate => VmBinding::Existing {
            vm_cid: vm_cid.clone(),
        },
        _ => VmBinding::PendingAllocation {
            resource_pool: resource_pool.to_string(),
        },
    }
}

/// The existing disk, if it already has the requested size.
fn reusable_disk(existing: Option<&InstanceRecord>, size_mb: u64) -> Option<DiskBinding> {
    let record = existing?;
    let disk_cid = record.disk_cid.clone()?;
    (record.disk_size_mb == size_mb).then(|| DiskBinding {
        size_mb,
        datastore: record.datastore.clone(),
        disk_cid: Some(disk_cid),
    })
}

fn existing_ip(existing: Option<&InstanceRecord>, network: &str) -> Option<Ipv4Addr> {
    existing.and_then(|r| r.ips.get(network).copied())
}

/// Lower-case DNS label with `_` mapped to `-`.
fn dns_label(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}
