//! Datacenter — root of the resource model.
//!
//! A datacenter is rebuilt from configuration plus live inventory. Its
//! clusters (and their datastores) are fetched fresh on every call, so a
//! placement always sees the current free-space snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use fleet_core::config::{DatacenterConfig, PlacementConfig};
use rand::Rng;
use tracing::debug;

use crate::client::{InfrastructureClient, ManagedObject, ObjectKind};
use crate::cluster::{Cluster, DatastorePatterns};
use crate::datastore::{Datastore, PlacementRequest};
use crate::error::{PlacementError, PlacementResult};
use crate::folder::Folder;
use crate::placer::{DatastorePlacer, PlacerFactory, pick_datastore};

pub struct Datacenter {
    config: DatacenterConfig,
    patterns: DatastorePatterns,
    client: Arc<dyn InfrastructureClient>,
    deployment_id: String,
    headroom_mb: u64,
}

impl Datacenter {
    /// Build a datacenter view for one deployment.
    ///
    /// `deployment_id` keys the per-deployment VM and template folders.
    pub fn new(
        config: DatacenterConfig,
        placement: &PlacementConfig,
        client: Arc<dyn InfrastructureClient>,
        deployment_id: impl Into<String>,
    ) -> PlacementResult<Self> {
        let patterns = DatastorePatterns::new(&config.ephemeral_pattern, &config.persistent_pattern)?;
        Ok(Self {
            config,
            patterns,
            client,
            deployment_id: deployment_id.into(),
            headroom_mb: placement.disk_headroom_mb,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn disk_path(&self) -> &str {
        &self.config.disk_path
    }

    pub fn headroom_mb(&self) -> u64 {
        self.headroom_mb
    }

    /// Inventory handle of the datacenter itself.
    pub fn mob(&self) -> PlacementResult<ManagedObject> {
        self.client
            .find_by_inventory_path(self.name())?
            .ok_or_else(|| PlacementError::DatacenterNotFound(self.name().to_string()))
    }

    // ── Folders ────────────────────────────────────────────────────

    pub fn vm_folder(&self) -> Folder {
        Folder::resolve(
            self.name(),
            &self.config.vm_folder,
            &self.deployment_id,
            self.config.use_sub_folder,
        )
    }

    pub fn master_vm_folder(&self) -> Folder {
        Folder::new(self.name(), &self.config.vm_folder)
    }

    pub fn template_folder(&self) -> Folder {
        Folder::resolve(
            self.name(),
            &self.config.template_folder,
            &self.deployment_id,
            self.config.use_sub_folder,
        )
    }

    pub fn master_template_folder(&self) -> Folder {
        Folder::new(self.name(), &self.config.template_folder)
    }

    /// Inventory path of a VM: `<datacenter>/vm/<folder>/<vm_cid>`.
    pub fn vm_path(&self, vm_cid: &str) -> String {
        [self.vm_folder().inventory_path().as_str(), vm_cid].join("/")
    }

    // ── Inventory ──────────────────────────────────────────────────

    /// Configured clusters, resolved against live inventory.
    pub fn clusters(&self) -> PlacementResult<Vec<Cluster>> {
        let handles = self.cluster_handles()?;

        let mut resolved = Vec::with_capacity(self.config.clusters.len());
        for name in self.config.clusters.keys() {
            let handle = handles
                .get(name)
                .ok_or_else(|| PlacementError::ClusterNotFound(name.clone()))?;
            resolved.push(handle.clone());
        }

        let properties = self.client.get_properties(
            &resolved,
            ObjectKind::ClusterComputeResource,
            &Cluster::PROPERTIES,
        )?;

        self.config
            .clusters
            .iter()
            .zip(&resolved)
            .map(|((name, cluster_config), handle)| {
                let props = properties
                    .get(handle)
                    .ok_or_else(|| PlacementError::PropertiesNotFound(name.clone()))?;
                Cluster::new(
                    self.name(),
                    name,
                    &self.patterns,
                    self.config.mem_overcommit,
                    cluster_config.clone(),
                    props,
                )
            })
            .collect()
    }

    /// Cluster handles under this datacenter, restricted to configured names.
    fn cluster_handles(&self) -> PlacementResult<HashMap<String, ManagedObject>> {
        let root = self.mob()?;
        let handles = self
            .client
            .get_managed_objects(ObjectKind::ClusterComputeResource, &root)?
            .into_iter()
            .filter(|(name, _)| self.config.clusters.contains_key(name))
            .collect();
        Ok(handles)
    }

    /// Persistent datastores across all clusters, keyed by name.
    ///
    /// When two clusters expose a datastore with the same name, the entry
    /// from the cluster declared later in configuration is kept.
    pub fn persistent_datastores(&self) -> PlacementResult<BTreeMap<String, Datastore>> {
        let mut datastores = BTreeMap::new();
        for cluster in self.clusters()? {
            for (name, datastore) in cluster.persistent_datastores() {
                if let Some(previous) = datastores.insert(name.clone(), datastore.clone()) {
                    debug!(
                        datastore = %name,
                        cluster = cluster.name(),
                        previous_free_mb = previous.free_space_mb,
                        "datastore shared between clusters, keeping later entry"
                    );
                }
            }
        }
        Ok(datastores)
    }

    /// Pick a persistent datastore for `size_mb` using the supplied RNG.
    pub fn pick_persistent_datastore_with<R>(&self, size_mb: u64, rng: &mut R) -> PlacementResult<Datastore>
    where
        R: Rng + ?Sized,
    {
        let datastores: Vec<Datastore> = self.persistent_datastores()?.into_values().collect();
        pick_datastore(
            &datastores,
            PlacementRequest::persistent(size_mb),
            self.headroom_mb,
            rng,
        )
    }
}

impl DatastorePlacer for Datacenter {
    fn pick_persistent_datastore(&self, size_mb: u64) -> PlacementResult<Datastore> {
        self.pick_persistent_datastore_with(size_mb, &mut rand::thread_rng())
    }
}

/// Builds a fresh [`Datacenter`] for every deployment.
#[derive(Clone)]
pub struct DatacenterPlacerFactory {
    config: DatacenterConfig,
    placement: PlacementConfig,
    client: Arc<dyn InfrastructureClient>,
}

impl DatacenterPlacerFactory {
    pub fn new(
        config: DatacenterConfig,
        placement: PlacementConfig,
        client: Arc<dyn InfrastructureClient>,
    ) -> Self {
        Self {
            config,
            placement,
            client,
        }
    }
}

impl PlacerFactory for DatacenterPlacerFactory {
    fn for_deployment(&self, deployment_id: &str) -> PlacementResult<Box<dyn DatastorePlacer>> {
        let datacenter = Datacenter::new(
            self.config.clone(),
            &self.placement,
            Arc::clone(&self.client),
            deployment_id,
        )?;
        Ok(Box::new(datacenter))
    }
}

impl fmt::Debug for Datacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datacenter")
            .field("name", &self.config.name)
            .field("deployment_id", &self.deployment_id)
            .field("headroom_mb", &self.headroom_mb)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PropertyMap, StaticInventory};
    use fleet_core::config::ClusterConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn dc_config(clusters: &[&str], use_sub_folder: bool) -> DatacenterConfig {
        DatacenterConfig {
            name: "dc1".to_string(),
            vm_folder: "vms".to_string(),
            template_folder: "templates".to_string(),
            disk_path: "disks".to_string(),
            use_sub_folder,
            ephemeral_pattern: "^eph".to_string(),
            persistent_pattern: "^pers".to_string(),
            mem_overcommit: 1.0,
            clusters: clusters
                .iter()
                .map(|c| (c.to_string(), ClusterConfig::default()))
                .collect(),
        }
    }

    fn inventory() -> StaticInventory {
        serde_json::from_value(json!({
            "datacenters": [{
                "name": "dc1",
                "clusters": [
                    {
                        "name": "a",
                        "datastores": [
                            { "name": "pers-shared", "free_space_mb": 10, "total_space_mb": 100 },
                            { "name": "pers-a", "free_space_mb": 100, "total_space_mb": 100 },
                            { "name": "eph-a", "free_space_mb": 900, "total_space_mb": 1000 }
                        ]
                    },
                    {
                        "name": "b",
                        "datastores": [
                            { "name": "pers-shared", "free_space_mb": 60, "total_space_mb": 100 },
                            { "name": "pers-b", "free_space_mb": 50, "total_space_mb": 100 }
                        ]
                    },
                    { "name": "unconfigured", "datastores": [] }
                ]
            }]
        }))
        .unwrap()
    }

    fn datacenter(clusters: &[&str], headroom_mb: u64) -> Datacenter {
        Datacenter::new(
            dc_config(clusters, true),
            &PlacementConfig { disk_headroom_mb: headroom_mb },
            Arc::new(inventory()),
            "abc-123",
        )
        .unwrap()
    }

    /// Inventory that lists clusters but never returns their properties.
    struct NoProperties(StaticInventory);

    impl InfrastructureClient for NoProperties {
        fn find_by_inventory_path(&self, path: &str) -> PlacementResult<Option<ManagedObject>> {
            self.0.find_by_inventory_path(path)
        }

        fn get_properties(
            &self,
            _objects: &[ManagedObject],
            _kind: ObjectKind,
            _properties: &[&str],
        ) -> PlacementResult<HashMap<ManagedObject, PropertyMap>> {
            Ok(HashMap::new())
        }

        fn get_managed_objects(
            &self,
            kind: ObjectKind,
            root: &ManagedObject,
        ) -> PlacementResult<Vec<(String, ManagedObject)>> {
            self.0.get_managed_objects(kind, root)
        }
    }

    #[test]
    fn folders_follow_sub_folder_setting() {
        let dc = datacenter(&["a"], 0);
        assert_eq!(dc.vm_folder().path(), "vms/abc-123");
        assert_eq!(dc.template_folder().path(), "templates/abc-123");
        assert_eq!(dc.master_vm_folder().path(), "vms");
        assert_eq!(dc.vm_path("vm-1"), "dc1/vm/vms/abc-123/vm-1");

        let shared = Datacenter::new(
            dc_config(&["a"], false),
            &PlacementConfig::default(),
            Arc::new(inventory()),
            "abc-123",
        )
        .unwrap();
        assert_eq!(shared.vm_folder().path(), "vms");
        assert_eq!(shared.template_folder(), shared.master_template_folder());
    }

    #[test]
    fn resolves_only_configured_clusters() {
        let dc = datacenter(&["a", "b"], 0);
        let clusters = dc.clusters().unwrap();
        let names: Vec<&str> = clusters.iter().map(Cluster::name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_cluster_is_an_error() {
        let dc = datacenter(&["a", "ghost"], 0);
        let err = dc.clusters().unwrap_err();
        assert!(matches!(err, PlacementError::ClusterNotFound(ref name) if name == "ghost"));
    }

    #[test]
    fn missing_properties_is_an_error() {
        let dc = Datacenter::new(
            dc_config(&["a"], false),
            &PlacementConfig::default(),
            Arc::new(NoProperties(inventory())),
            "abc-123",
        )
        .unwrap();
        let err = dc.clusters().unwrap_err();
        assert!(matches!(err, PlacementError::PropertiesNotFound(ref name) if name == "a"));
    }

    #[test]
    fn unknown_datacenter_is_an_error() {
        let mut config = dc_config(&["a"], false);
        config.name = "dc9".to_string();
        let dc = Datacenter::new(config, &PlacementConfig::default(), Arc::new(inventory()), "x").unwrap();
        assert!(matches!(dc.mob(), Err(PlacementError::DatacenterNotFound(_))));
    }

    #[test]
    fn later_cluster_wins_on_datastore_name_collision() {
        let dc = datacenter(&["a", "b"], 0);
        let datastores = dc.persistent_datastores().unwrap();

        assert_eq!(datastores.len(), 3);
        assert_eq!(datastores["pers-shared"].free_space_mb, 60);
        assert!(!datastores.contains_key("eph-a"));
    }

    #[test]
    fn collision_follows_declaration_order_not_name_order() {
        let dc = datacenter(&["b", "a"], 0);
        let names: Vec<String> = dc.clusters().unwrap().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let datastores = dc.persistent_datastores().unwrap();
        assert_eq!(datastores["pers-shared"].free_space_mb, 10);
    }

    #[test]
    fn picks_only_datastores_with_headroom() {
        let dc = datacenter(&["a", "b"], 20);
        let mut rng = StdRng::seed_from_u64(8);

        for _ in 0..500 {
            let picked = dc.pick_persistent_datastore_with(40, &mut rng).unwrap();
            assert!(picked.free_space_mb - 40 >= 20, "picked {}", picked.name);
        }
    }

    #[test]
    fn no_capacity_lists_every_persistent_candidate() {
        let dc = datacenter(&["a", "b"], 20);
        let err = dc.pick_persistent_datastore(500).unwrap_err();
        match err {
            PlacementError::NoCapacity(nc) => {
                let names: Vec<&str> = nc.candidates.iter().map(|d| d.name.as_str()).collect();
                assert_eq!(names, vec!["pers-a", "pers-b", "pers-shared"]);
            }
            other => panic!("expected NoCapacity, got {other:?}"),
        }
    }

    #[test]
    fn factory_builds_placer_per_deployment() {
        let factory = DatacenterPlacerFactory::new(
            dc_config(&["a", "b"], true),
            PlacementConfig { disk_headroom_mb: 0 },
            Arc::new(inventory()),
        );
        let placer = factory.for_deployment("deployment-7").unwrap();
        let picked = placer.pick_persistent_datastore(10).unwrap();
        assert!(picked.name.starts_with("pers-"));
    }

    #[test]
    fn factory_rejects_bad_patterns() {
        let mut config = dc_config(&["a"], false);
        config.persistent_pattern = "(".to_string();
        let factory = DatacenterPlacerFactory::new(config, PlacementConfig::default(), Arc::new(inventory()));
        assert!(matches!(
            factory.for_deployment("x"),
            Err(PlacementError::InvalidPattern { .. })
        ));
    }
}
