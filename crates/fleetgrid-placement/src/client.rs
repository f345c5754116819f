//! Infrastructure client seam.
//!
//! The resource model only needs three inventory queries. They are a trait
//! so placement can be driven by a real virtualization API, or by the
//! [`StaticInventory`] snapshot used by the CLI and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::datastore::Datastore;
use crate::error::PlacementResult;

/// Opaque handle to an inventory object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedObject(pub String);

impl ManagedObject {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Inventory object types the resource model queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Datacenter,
    ClusterComputeResource,
}

/// Property name → value for one inventory object.
pub type PropertyMap = HashMap<String, Value>;

/// Narrow view of the virtualization API used by the resource model.
pub trait InfrastructureClient: Send + Sync {
    /// Resolve an inventory path (e.g. a datacenter name) to a handle.
    fn find_by_inventory_path(&self, path: &str) -> PlacementResult<Option<ManagedObject>>;

    /// Fetch `properties` for each of `objects`. Objects whose properties
    /// cannot be retrieved are absent from the result.
    fn get_properties(
        &self,
        objects: &[ManagedObject],
        kind: ObjectKind,
        properties: &[&str],
    ) -> PlacementResult<HashMap<ManagedObject, PropertyMap>>;

    /// List `(name, handle)` pairs of `kind` beneath `root`.
    fn get_managed_objects(
        &self,
        kind: ObjectKind,
        root: &ManagedObject,
    ) -> PlacementResult<Vec<(String, ManagedObject)>>;
}

// ── Static inventory ──────────────────────────────────────────────

/// A fixed inventory snapshot, loadable from JSON or TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticInventory {
    #[serde(default)]
    pub datacenters: Vec<InventoryDatacenter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDatacenter {
    pub name: String,
    #[serde(default)]
    pub clusters: Vec<InventoryCluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCluster {
    pub name: String,
    #[serde(default)]
    pub effective_memory_mb: u64,
    #[serde(default)]
    pub used_memory_mb: u64,
    #[serde(default)]
    pub datastores: Vec<Datastore>,
}

impl StaticInventory {
    fn datacenter_handle(name: &str) -> ManagedObject {
        ManagedObject(format!("datacenter-{name}"))
    }

    fn cluster_handle(datacenter: &str, cluster: &str) -> ManagedObject {
        ManagedObject(format!("cluster-{datacenter}-{cluster}"))
    }

    fn find_cluster(&self, handle: &ManagedObject) -> Option<&InventoryCluster> {
        self.datacenters.iter().find_map(|dc| {
            dc.clusters
                .iter()
                .find(|c| Self::cluster_handle(&dc.name, &c.name) == *handle)
        })
    }

    fn cluster_property(cluster: &InventoryCluster, property: &str) -> Option<Value> {
        match property {
            "name" => Some(json!(cluster.name)),
            "datastore" => serde_json::to_value(&cluster.datastores).ok(),
            "summary.effectiveMemory" => Some(json!(cluster.effective_memory_mb)),
            "host.usedMemory" => Some(json!(cluster.used_memory_mb)),
            _ => None,
        }
    }
}

impl InfrastructureClient for StaticInventory {
    fn find_by_inventory_path(&self, path: &str) -> PlacementResult<Option<ManagedObject>> {
        Ok(self
            .datacenters
            .iter()
            .find(|dc| dc.name == path)
            .map(|dc| Self::datacenter_handle(&dc.name)))
    }

    fn get_properties(
        &self,
        objects: &[ManagedObject],
        kind: ObjectKind,
        properties: &[&str],
    ) -> PlacementResult<HashMap<ManagedObject, PropertyMap>> {
        let mut result = HashMap::new();
        if kind != ObjectKind::ClusterComputeResource {
            return Ok(result);
        }
        for object in objects {
            let Some(cluster) = self.find_cluster(object) else {
                continue;
            };
            let values: PropertyMap = properties
                .iter()
                .filter_map(|p| Self::cluster_property(cluster, p).map(|v| (p.to_string(), v)))
                .collect();
            result.insert(object.clone(), values);
        }
        Ok(result)
    }

    fn get_managed_objects(
        &self,
        kind: ObjectKind,
        root: &ManagedObject,
    ) -> PlacementResult<Vec<(String, ManagedObject)>> {
        let objects = match kind {
            ObjectKind::Datacenter => self
                .datacenters
                .iter()
                .map(|dc| (dc.name.clone(), Self::datacenter_handle(&dc.name)))
                .collect(),
            ObjectKind::ClusterComputeResource => self
                .datacenters
                .iter()
                .filter(|dc| Self::datacenter_handle(&dc.name) == *root)
                .flat_map(|dc| {
                    dc.clusters
                        .iter()
                        .map(|c| (c.name.clone(), Self::cluster_handle(&dc.name, &c.name)))
                })
                .collect(),
        };
        Ok(objects)
    }
}
