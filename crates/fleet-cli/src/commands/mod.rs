pub mod place;
pub mod plan;
pub mod seed;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use fleet_core::{FleetConfig, load_document};
use fleetgrid_placement::{DatastorePlacer, PlacementError, PlacementResult, PlacerFactory, StaticInventory};
use fleetgrid_state::StateStore;
use tracing::debug;

/// Load `fleet.toml`, falling back to defaults when the file is absent.
pub fn load_config(path: &str) -> anyhow::Result<FleetConfig> {
    let path = Path::new(path);
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(FleetConfig::default());
    }
    FleetConfig::from_file(path).with_context(|| format!("reading config {}", path.display()))
}

pub fn open_store(config: &FleetConfig) -> anyhow::Result<StateStore> {
    let path = &config.state.path;
    StateStore::open(path).with_context(|| format!("opening state store {}", path.display()))
}

pub fn load_inventory(path: &str) -> anyhow::Result<StaticInventory> {
    let value = load_document(Path::new(path)).with_context(|| format!("reading inventory {path}"))?;
    Ok(serde_json::from_value(value)?)
}

/// Split repeated `key=value` arguments into a map.
pub fn parse_pairs(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                Ok((key.to_string(), value.to_string()))
            }
            _ => anyhow::bail!("expected key=value, got '{pair}'"),
        })
        .collect()
}

/// Placer factory used when no datacenter or inventory is available.
///
/// Plans without persistent disks never ask for a placer.
pub struct NoPlacement;

impl PlacerFactory for NoPlacement {
    fn for_deployment(&self, _deployment_id: &str) -> PlacementResult<Box<dyn DatastorePlacer>> {
        Err(PlacementError::DatacenterNotFound(
            "no datacenter inventory configured (pass --inventory)".to_string(),
        ))
    }
}

pub fn no_placement() -> Arc<dyn PlacerFactory> {
    Arc::new(NoPlacement)
}
