//! Builds a [`DeploymentPlan`] from a migrated, validated manifest.
//!
//! Parsing only checks that the manifest is internally consistent; nothing
//! is looked up in the fleet and nothing is bound.

use std::collections::{BTreeMap, BTreeSet};

use fleet_core::{
    CloudConfig, CompilationSpec, DeploymentManifest, InstanceState, JobSpec, NetworkSpec,
    PlanOptions, ReleaseSpec, ResourcePoolSpec,
};
use fleetgrid_state::DeploymentRecord;
use tracing::debug;

use crate::error::{PlannerError, PlannerResult};
use crate::network::Network;
use crate::plan::{DeploymentPlan, Instance, Job, JobTemplate, PlanAttrs, ResourcePool};

#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentSpecParser;

impl DeploymentSpecParser {
    pub fn parse(
        attrs: PlanAttrs,
        manifest: &DeploymentManifest,
        cloud_config: Option<&CloudConfig>,
        record: DeploymentRecord,
        options: PlanOptions,
    ) -> PlannerResult<DeploymentPlan> {
        let (network_specs, pool_specs, compilation) = match cloud_config {
            Some(_) if manifest.defines_cloud_sections() => {
                return Err(parse_error(
                    "manifest must not define networks, resource_pools or compilation when a cloud config is used",
                ));
            }
            Some(cloud) => (&cloud.networks, &cloud.resource_pools, cloud.compilation.clone()),
            None => (
                &manifest.networks,
                &manifest.resource_pools,
                manifest.compilation.clone(),
            ),
        };

        let networks = parse_networks(network_specs)?;
        let resource_pools = parse_resource_pools(pool_specs, &networks)?;
        let release_specs = parse_releases(&manifest.releases)?;
        let compilation = parse_compilation(compilation, &networks)?;
        check_renames(&manifest.jobs, &options)?;
        let states = parse_job_states(&manifest.jobs, &options)?;

        let mut seen = BTreeSet::new();
        let mut jobs = Vec::with_capacity(manifest.jobs.len());
        for spec in &manifest.jobs {
            if !seen.insert(spec.name.as_str()) {
                return Err(parse_error(format!("duplicate job name '{}'", spec.name)));
            }
            let state = states.get(spec.name.as_str()).copied().unwrap_or_default();
            jobs.push(parse_job(spec, state, &release_specs, &resource_pools, &networks)?);
        }

        debug!(
            deployment = %attrs.name,
            jobs = jobs.len(),
            networks = networks.len(),
            resource_pools = resource_pools.len(),
            "deployment manifest parsed"
        );

        Ok(DeploymentPlan::new(
            attrs,
            record,
            options,
            release_specs,
            jobs,
            resource_pools,
            networks,
            compilation,
        ))
    }
}

fn parse_error(message: impl Into<String>) -> PlannerError {
    PlannerError::Parse(message.into())
}

fn parse_networks(specs: &[NetworkSpec]) -> PlannerResult<BTreeMap<String, Network>> {
    let mut networks = BTreeMap::new();
    for spec in specs {
        let network = Network::from_spec(spec)
            .map_err(|e| parse_error(format!("network '{}': {e}", spec.name)))?;
        if networks.insert(spec.name.clone(), network).is_some() {
            return Err(parse_error(format!("duplicate network name '{}'", spec.name)));
        }
    }
    Ok(networks)
}

fn parse_resource_pools(
    specs: &[ResourcePoolSpec],
    networks: &BTreeMap<String, Network>,
) -> PlannerResult<BTreeMap<String, ResourcePool>> {
    let mut pools = BTreeMap::new();
    for spec in specs {
        if !networks.contains_key(&spec.network) {
            return Err(parse_error(format!(
                "resource pool '{}' references an unknown network '{}'",
                spec.name, spec.network
            )));
        }
        if pools
            .insert(spec.name.clone(), ResourcePool::new(spec.clone()))
            .is_some()
        {
            return Err(parse_error(format!("duplicate resource pool name '{}'", spec.name)));
        }
    }
    Ok(pools)
}

fn parse_releases(specs: &[ReleaseSpec]) -> PlannerResult<Vec<ReleaseSpec>> {
    let mut seen = BTreeSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(parse_error(format!("duplicate release name '{}'", spec.name)));
        }
    }
    Ok(specs.to_vec())
}

fn parse_compilation(
    compilation: Option<CompilationSpec>,
    networks: &BTreeMap<String, Network>,
) -> PlannerResult<CompilationSpec> {
    let compilation = compilation.unwrap_or_default();
    if let Some(network) = compilation
        .network
        .as_deref()
        .filter(|n| !networks.contains_key(*n))
    {
        return Err(parse_error(format!(
            "compilation refers to an unknown network '{network}'"
        )));
    }
    Ok(compilation)
}

/// Renames map an old job name to the name it now has in the manifest.
fn check_renames(jobs: &[JobSpec], options: &PlanOptions) -> PlannerResult<()> {
    let names: BTreeSet<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
    let mut targets = BTreeSet::new();
    for (old, new) in &options.job_rename {
        if names.contains(old.as_str()) {
            return Err(parse_error(format!(
                "cannot rename '{old}' to '{new}': '{old}' is still used by a job"
            )));
        }
        if !names.contains(new.as_str()) {
            return Err(parse_error(format!(
                "cannot rename '{old}' to '{new}': no job named '{new}'"
            )));
        }
        if !targets.insert(new.as_str()) {
            return Err(parse_error(format!(
                "more than one job is renamed to '{new}'"
            )));
        }
    }
    Ok(())
}

fn parse_job_states<'a>(
    jobs: &[JobSpec],
    options: &'a PlanOptions,
) -> PlannerResult<BTreeMap<&'a str, InstanceState>> {
    let mut states = BTreeMap::new();
    for (job, state) in &options.job_states {
        if !jobs.iter().any(|j| &j.name == job) {
            return Err(parse_error(format!("job state given for unknown job '{job}'")));
        }
        let state: InstanceState = state
            .parse()
            .map_err(|e: String| parse_error(format!("job '{job}': {e}")))?;
        states.insert(job.as_str(), state);
    }
    Ok(states)
}

fn parse_job(
    spec: &JobSpec,
    state: InstanceState,
    releases: &[ReleaseSpec],
    pools: &BTreeMap<String, ResourcePool>,
    networks: &BTreeMap<String, Network>,
) -> PlannerResult<Job> {
    let name = &spec.name;
    if !pools.contains_key(&spec.resource_pool) {
        return Err(parse_error(format!(
            "job '{name}' references an unknown resource pool '{}'",
            spec.resource_pool
        )));
    }
    if spec.templates.is_empty() {
        return Err(parse_error(format!("job '{name}' has no templates")));
    }

    let templates = spec
        .templates
        .iter()
        .map(|template| {
            let release = match (&template.release, releases) {
                (Some(release), _) if releases.iter().any(|r| &r.name == release) => release.clone(),
                (Some(release), _) => {
                    return Err(parse_error(format!(
                        "template '{}' of job '{name}' references an unknown release '{release}'",
                        template.name
                    )));
                }
                (None, [only]) => only.name.clone(),
                (None, []) => {
                    return Err(parse_error("manifest has no releases".to_string()));
                }
                (None, _) => {
                    return Err(parse_error(format!(
                        "template '{}' of job '{name}' must name a release: the manifest has more than one",
                        template.name
                    )));
                }
            };
            Ok(JobTemplate {
                name: template.name.clone(),
                release,
            })
        })
        .collect::<PlannerResult<Vec<_>>>()?;

    for job_network in &spec.networks {
        let Some(network) = networks.get(&job_network.name) else {
            return Err(parse_error(format!(
                "job '{name}' references an unknown network '{}'",
                job_network.name
            )));
        };
        if job_network.static_ips.len() > spec.instances as usize {
            return Err(parse_error(format!(
                "job '{name}' has {} instances but {} static IPs on network '{}'",
                spec.instances,
                job_network.static_ips.len(),
                job_network.name
            )));
        }
        if let Some(ip) = job_network.static_ips.iter().find(|ip| !network.is_static(**ip)) {
            return Err(parse_error(format!(
                "job '{name}' static IP {ip} is not in a static range of network '{}'",
                job_network.name
            )));
        }
    }

    Ok(Job {
        name: name.clone(),
        templates,
        resource_pool: spec.resource_pool.clone(),
        networks: spec.networks.clone(),
        persistent_disk_mb: spec.persistent_disk,
        properties: spec.properties.clone(),
        state,
        instances: (0..spec.instances).map(|i| Instance::new(name, i)).collect(),
        stemcell: None,
        bound_templates: Vec::new(),
        packages: BTreeMap::new(),
        merged_properties: None,
    })
}
