use std::sync::Arc;

use anyhow::Context;
use fleetgrid_placement::{Datacenter, DatastorePlacer};
use tracing::info;

use super::{load_config, load_inventory};

pub fn place(config_path: &str, inventory: &str, size_mb: u64, datacenter: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let dc_config = match datacenter {
        Some(name) => config
            .datacenter(name)
            .with_context(|| format!("datacenter '{name}' is not configured"))?,
        None => config
            .datacenters
            .first()
            .context("no datacenters configured")?,
    };

    let client = Arc::new(load_inventory(inventory)?);
    let datacenter = Datacenter::new(dc_config.clone(), &config.placement, client, "cli")?;
    let datastore = datacenter.pick_persistent_datastore(size_mb)?;
    info!(datastore = %datastore.name, size_mb, "datastore selected");

    println!("{}", serde_json::to_string_pretty(&datastore)?);
    Ok(())
}
