//! Clusters and their datastores.

use std::collections::BTreeMap;

use fleet_core::config::ClusterConfig;
use regex::Regex;
use serde::Deserialize;

use crate::client::PropertyMap;
use crate::datastore::{Datastore, DiskKind};
use crate::error::{PlacementError, PlacementResult};

/// Datastore name patterns used to classify a cluster's storage.
#[derive(Debug, Clone)]
pub struct DatastorePatterns {
    pub ephemeral: Regex,
    pub persistent: Regex,
}

impl DatastorePatterns {
    pub fn new(ephemeral: &str, persistent: &str) -> PlacementResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| PlacementError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            ephemeral: compile(ephemeral)?,
            persistent: compile(persistent)?,
        })
    }

    /// Classifications matching `name`; a datastore may match both.
    pub fn classify(&self, name: &str) -> Vec<DiskKind> {
        let mut kinds = Vec::new();
        if self.ephemeral.is_match(name) {
            kinds.push(DiskKind::Ephemeral);
        }
        if self.persistent.is_match(name) {
            kinds.push(DiskKind::Persistent);
        }
        kinds
    }
}

#[derive(Debug, Deserialize)]
struct ClusterProperties {
    #[serde(default)]
    datastore: Vec<Datastore>,
    #[serde(rename = "summary.effectiveMemory", default)]
    effective_memory_mb: u64,
    #[serde(rename = "host.usedMemory", default)]
    used_memory_mb: u64,
}

/// A compute cluster inside one datacenter.
#[derive(Debug, Clone)]
pub struct Cluster {
    name: String,
    datacenter: String,
    config: ClusterConfig,
    mem_overcommit: f64,
    effective_memory_mb: u64,
    used_memory_mb: u64,
    ephemeral: BTreeMap<String, Datastore>,
    persistent: BTreeMap<String, Datastore>,
}

impl Cluster {
    /// Inventory properties fetched for every cluster.
    pub const PROPERTIES: [&'static str; 4] = [
        "name",
        "datastore",
        "summary.effectiveMemory",
        "host.usedMemory",
    ];

    pub fn new(
        datacenter: &str,
        name: &str,
        patterns: &DatastorePatterns,
        mem_overcommit: f64,
        config: ClusterConfig,
        properties: &PropertyMap,
    ) -> PlacementResult<Self> {
        let object = properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        let props: ClusterProperties = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| PlacementError::InvalidProperties {
                cluster: name.to_string(),
                reason: e.to_string(),
            })?;

        let mut ephemeral = BTreeMap::new();
        let mut persistent = BTreeMap::new();
        for datastore in props.datastore {
            for kind in patterns.classify(&datastore.name) {
                let target = match kind {
                    DiskKind::Ephemeral => &mut ephemeral,
                    DiskKind::Persistent => &mut persistent,
                };
                target.insert(datastore.name.clone(), datastore.clone());
            }
        }

        Ok(Self {
            name: name.to_string(),
            datacenter: datacenter.to_string(),
            config,
            mem_overcommit,
            effective_memory_mb: props.effective_memory_mb,
            used_memory_mb: props.used_memory_mb,
            ephemeral,
            persistent,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn resource_pool(&self) -> Option<&str> {
        self.config.resource_pool.as_deref()
    }

    pub fn persistent_datastores(&self) -> &BTreeMap<String, Datastore> {
        &self.persistent
    }

    pub fn ephemeral_datastores(&self) -> &BTreeMap<String, Datastore> {
        &self.ephemeral
    }

    /// Schedulable memory: effective memory scaled by overcommit, minus usage.
    pub fn free_memory_mb(&self) -> u64 {
        let schedulable = (self.effective_memory_mb as f64 * self.mem_overcommit) as u64;
        schedulable.saturating_sub(self.used_memory_mb)
    }
}
