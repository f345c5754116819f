use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use fleet_core::{CloudConfig, InstanceState, PlanOptions, load_document};
use fleetgrid_placement::{DatacenterPlacerFactory, PlacerFactory};
use fleetgrid_planner::{
    Collaborators, CompileTask, CompiledBlob, PackageCompiler, PlannerFactory, TracingProgress,
};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{load_config, load_inventory, no_placement, open_store, parse_pairs};

pub struct PlanArgs {
    pub config: String,
    pub manifest: String,
    pub cloud_config: Option<String>,
    pub inventory: Option<String>,
    pub recreate: bool,
    pub job_states: Vec<String>,
    pub renames: Vec<String>,
    pub bind: bool,
}

/// Records compiled packages without building anything.
///
/// The blob id is derived from the package fingerprint and stemcell, so
/// repeated plans land on the same cache entries.
pub struct DigestCompiler;

impl PackageCompiler for DigestCompiler {
    fn compile(&self, task: &CompileTask) -> anyhow::Result<CompiledBlob> {
        let mut hasher = Sha256::new();
        hasher.update(task.fingerprint.as_bytes());
        hasher.update(b"\0");
        hasher.update(task.stemcell.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Ok(CompiledBlob {
            blob_id: format!("blob-{}", &digest[..16]),
            sha1: digest,
        })
    }
}

pub fn plan_options(args: &PlanArgs) -> anyhow::Result<PlanOptions> {
    let job_states = parse_pairs(&args.job_states)?;
    for state in job_states.values() {
        state.parse::<InstanceState>().map_err(anyhow::Error::msg)?;
    }
    Ok(PlanOptions {
        recreate: args.recreate,
        job_states,
        job_rename: parse_pairs(&args.renames)?,
    })
}

pub async fn plan(args: PlanArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let options = plan_options(&args)?;

    let manifest = load_document(Path::new(&args.manifest))
        .with_context(|| format!("reading manifest {}", args.manifest))?;
    let cloud_config: Option<CloudConfig> = match &args.cloud_config {
        Some(path) => {
            let value = load_document(Path::new(path)).with_context(|| format!("reading cloud config {path}"))?;
            Some(serde_json::from_value(value)?)
        }
        None => None,
    };

    let placer: Arc<dyn PlacerFactory> = match (&args.inventory, config.datacenters.first()) {
        (Some(path), Some(datacenter)) => Arc::new(DatacenterPlacerFactory::new(
            datacenter.clone(),
            config.placement.clone(),
            Arc::new(load_inventory(path)?),
        )),
        _ => no_placement(),
    };

    let store = open_store(&config)?;
    let collaborators = Collaborators::from_store(
        store,
        Arc::new(DigestCompiler),
        placer,
        Arc::new(TracingProgress),
    );
    let factory = PlannerFactory::new(collaborators).with_dns_domain(config.dns.domain.clone());

    let plan = if args.bind {
        factory.planner(manifest, cloud_config.as_ref(), &options).await?
    } else {
        factory.planner_without_vm_binding(manifest, cloud_config.as_ref(), &options)?
    };
    info!(deployment = %plan.name, bound = plan.is_fully_bound(), "plan ready");

    println!("{}", serde_json::to_string_pretty(&plan.summary())?);
    Ok(())
}
