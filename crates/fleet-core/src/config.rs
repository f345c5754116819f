//! fleet.toml configuration parser.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Free-space margin (MB) a datastore must keep beyond a requested disk.
pub const DEFAULT_DISK_HEADROOM_MB: u64 = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub datacenters: Vec<DatacenterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fleet-state.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default = "default_headroom")]
    pub disk_headroom_mb: u64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            disk_headroom_mb: DEFAULT_DISK_HEADROOM_MB,
        }
    }
}

fn default_headroom() -> u64 {
    DEFAULT_DISK_HEADROOM_MB
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub domain: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain: "fleet".to_string(),
        }
    }
}

/// One datacenter the placement engine may place disks in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterConfig {
    pub name: String,
    pub vm_folder: String,
    pub template_folder: String,
    pub disk_path: String,
    /// Nest VM/template folders under a per-deployment sub-folder.
    #[serde(default)]
    pub use_sub_folder: bool,
    /// Regex matched against datastore names for ephemeral disks.
    pub ephemeral_pattern: String,
    /// Regex matched against datastore names for persistent disks.
    pub persistent_pattern: String,
    #[serde(default = "default_overcommit")]
    pub mem_overcommit: f64,
    #[serde(default)]
    pub clusters: ClusterMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    #[serde(default)]
    pub resource_pool: Option<String>,
}

/// Configured clusters in declaration order.
///
/// Order matters: when two clusters expose a datastore with the same name,
/// the cluster declared later wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMap(Vec<(String, ClusterConfig)>);

impl ClusterMap {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ClusterConfig> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(name, _)| name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClusterConfig)> {
        self.0.iter().map(|(name, config)| (name, config))
    }

    /// Add a cluster; a repeated name replaces the earlier entry in place.
    pub fn insert(&mut self, name: String, config: ClusterConfig) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = config,
            None => self.0.push((name, config)),
        }
    }
}

impl FromIterator<(String, ClusterConfig)> for ClusterMap {
    fn from_iter<I: IntoIterator<Item = (String, ClusterConfig)>>(iter: I) -> Self {
        let mut map = ClusterMap::default();
        for (name, config) in iter {
            map.insert(name, config);
        }
        map
    }
}

impl Serialize for ClusterMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, config) in &self.0 {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ClusterMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ClusterMapVisitor;

        impl<'de> Visitor<'de> for ClusterMapVisitor {
            type Value = ClusterMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of cluster name to cluster settings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ClusterMap, A::Error> {
                let mut map = ClusterMap::default();
                while let Some((name, config)) = access.next_entry::<String, ClusterConfig>()? {
                    map.insert(name, config);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ClusterMapVisitor)
    }
}

fn default_overcommit() -> f64 {
    1.0
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn datacenter(&self, name: &str) -> Option<&DatacenterConfig> {
        self.datacenters.iter().find(|dc| dc.name == name)
    }
}

/// Read a JSON or TOML document (chosen by extension) as a JSON value.
pub fn load_document(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)?;
    let value = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    Ok(value)
}
