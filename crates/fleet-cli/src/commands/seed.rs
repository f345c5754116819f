use std::path::Path;

use anyhow::Context;
use fleet_core::load_document;
use fleetgrid_state::{ReleaseVersionRecord, StateStore, StemcellRecord};
use tracing::info;

use super::{load_config, open_store};

/// Parse `name/version/cid`.
pub fn parse_stemcell(arg: &str) -> anyhow::Result<StemcellRecord> {
    let parts: Vec<&str> = arg.split('/').collect();
    match parts.as_slice() {
        [name, version, cid] if !name.is_empty() && !version.is_empty() && !cid.is_empty() => {
            Ok(StemcellRecord {
                name: name.to_string(),
                version: version.to_string(),
                cid: cid.to_string(),
                operating_system: String::new(),
                sha1: String::new(),
            })
        }
        _ => anyhow::bail!("expected stemcell as name/version/cid, got '{arg}'"),
    }
}

pub fn seed(config_path: &str, stemcells: &[String], releases: &[String]) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    seed_store(&store, stemcells, releases)
}

pub fn seed_store(store: &StateStore, stemcells: &[String], releases: &[String]) -> anyhow::Result<()> {
    for arg in stemcells {
        let stemcell = parse_stemcell(arg)?;
        store.put_stemcell(&stemcell)?;
        info!(stemcell = %stemcell.table_key(), cid = %stemcell.cid, "stemcell registered");
        println!("✓ Stemcell {}", stemcell.table_key());
    }

    for path in releases {
        let value = load_document(Path::new(path)).with_context(|| format!("reading release {path}"))?;
        let release: ReleaseVersionRecord =
            serde_json::from_value(value).with_context(|| format!("parsing release {path}"))?;
        store.put_release_version(&release)?;
        info!(
            release = %release.table_key(),
            packages = release.packages.len(),
            templates = release.templates.len(),
            "release version registered"
        );
        println!("✓ Release {}", release.table_key());
    }
    Ok(())
}
