//! Deployment manifest and cloud config documents.
//!
//! These are the already-migrated, already-validated shapes. Raw input
//! arrives as `serde_json::Value` and is only deserialized into these
//! types after the migrator and validator have run.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Free-form property tree attached to deployments, pools, and jobs.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Release version marker that resolves to the newest uploaded version.
pub const LATEST_VERSION: &str = "latest";

const DEFAULT_COMPILATION_WORKERS: usize = 4;

// ── Manifest ──────────────────────────────────────────────────────

/// A parsed deployment manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentManifest {
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub releases: Vec<ReleaseSpec>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub resource_pools: Vec<ResourcePoolSpec>,
    #[serde(default)]
    pub compilation: Option<CompilationSpec>,
}

/// A release referenced by name and version (or `latest`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub name: String,
    pub version: String,
}

impl ReleaseSpec {
    pub fn is_latest(&self) -> bool {
        self.version == LATEST_VERSION
    }
}

/// A job: a set of templates run on `instances` identical VMs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    pub instances: u32,
    pub resource_pool: String,
    #[serde(default)]
    pub networks: Vec<JobNetworkSpec>,
    /// Persistent disk size in MB; zero means no disk.
    #[serde(default)]
    pub persistent_disk: u64,
    #[serde(default)]
    pub properties: Properties,
}

/// A job template, optionally pinned to a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateSpec {
    pub name: String,
    #[serde(default)]
    pub release: Option<String>,
}

/// A job's membership in a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobNetworkSpec {
    pub name: String,
    /// Static IPs, assigned to instances by index.
    #[serde(default)]
    pub static_ips: Vec<Ipv4Addr>,
    /// Properties (`dns`, `gateway`) this network provides by default.
    #[serde(default)]
    pub default: Vec<String>,
}

/// A manual network made of one or more subnets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
}

/// A subnet. `reserved` and `static` entries are single IPs or
/// `"a.b.c.d - e.f.g.h"` ranges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubnetSpec {
    pub range: String,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub reserved: Vec<String>,
    #[serde(default, rename = "static")]
    pub static_ips: Vec<String>,
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub cloud_properties: Properties,
}

/// A resource pool: VM shape, stemcell, and network for job instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourcePoolSpec {
    pub name: String,
    pub network: String,
    pub stemcell: StemcellSpec,
    /// Declared VM count; `None` sizes the pool to its jobs.
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub cloud_properties: Properties,
    #[serde(default)]
    pub properties: Properties,
}

/// A stemcell reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StemcellSpec {
    pub name: String,
    pub version: String,
}

impl StemcellSpec {
    /// `name/version`, used as the stemcell half of compile keys.
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Compilation VM settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilationSpec {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub reuse_compilation_vms: bool,
    #[serde(default)]
    pub cloud_properties: Properties,
}

impl Default for CompilationSpec {
    fn default() -> Self {
        Self {
            workers: DEFAULT_COMPILATION_WORKERS,
            network: None,
            reuse_compilation_vms: false,
            cloud_properties: Properties::new(),
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_COMPILATION_WORKERS
}

// ── Cloud config ──────────────────────────────────────────────────

/// Infrastructure-level sections shared by every deployment.
///
/// When present, these replace the manifest's own `networks`,
/// `resource_pools`, and `compilation` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudConfig {
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub resource_pools: Vec<ResourcePoolSpec>,
    #[serde(default)]
    pub compilation: Option<CompilationSpec>,
}

impl DeploymentManifest {
    /// Whether the manifest carries any section a cloud config owns.
    pub fn defines_cloud_sections(&self) -> bool {
        !self.networks.is_empty() || !self.resource_pools.is_empty() || self.compilation.is_some()
    }
}
