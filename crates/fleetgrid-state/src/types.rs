//! Domain types for the FleetGrid state store.
//!
//! These types represent the persisted state of the fleet: which
//! deployments exist, which instances they run, and what content
//! (stemcells, releases, compiled packages) has been uploaded or built.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Unique identifier for a deployment record.
pub type DeploymentId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// Persistent identity of a deployment, long-lived across deploys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    /// Canonical deployment name.
    pub name: String,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: u64,
}

// ── Instance ──────────────────────────────────────────────────────

/// An instance the fleet currently runs for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub deployment_id: DeploymentId,
    pub job: String,
    pub index: u32,
    /// Cloud id of the VM, if one was created.
    pub vm_cid: Option<String>,
    /// Network name → IP currently held by the instance.
    #[serde(default)]
    pub ips: BTreeMap<String, Ipv4Addr>,
    /// Cloud id of the attached persistent disk.
    #[serde(default)]
    pub disk_cid: Option<String>,
    #[serde(default)]
    pub disk_size_mb: u64,
    /// Datastore holding the persistent disk.
    #[serde(default)]
    pub datastore: Option<String>,
}

impl InstanceRecord {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}:{}/{}", self.deployment_id, self.job, self.index)
    }
}

// ── Stemcell ──────────────────────────────────────────────────────

/// An uploaded stemcell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StemcellRecord {
    pub name: String,
    pub version: String,
    /// Cloud id of the stemcell image.
    pub cid: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub sha1: String,
}

impl StemcellRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

// ── Release ───────────────────────────────────────────────────────

/// One uploaded version of a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseVersionRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
    #[serde(default)]
    pub templates: Vec<TemplateRecord>,
}

/// A package source blob within a release version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub sha1: String,
    /// Names of packages (same release) this one builds against.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A job template within a release version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateRecord {
    pub name: String,
    pub version: String,
    pub sha1: String,
    /// Names of packages the template needs at runtime.
    #[serde(default)]
    pub packages: Vec<String>,
}

impl ReleaseVersionRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    pub fn package(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn template(&self, name: &str) -> Option<&TemplateRecord> {
        self.templates.iter().find(|t| t.name == name)
    }
}

// ── Compiled package ──────────────────────────────────────────────

/// A package compiled against a specific stemcell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompiledPackageRecord {
    pub package: String,
    /// Content fingerprint of the package source and its dependencies.
    pub fingerprint: String,
    /// Stemcell in `name/version` form.
    pub stemcell: String,
    pub blob_id: String,
    pub sha1: String,
}

impl CompiledPackageRecord {
    pub fn table_key(&self) -> String {
        compiled_package_key(&self.fingerprint, &self.stemcell)
    }
}

/// Key for a (fingerprint, stemcell) compilation pair.
pub fn compiled_package_key(fingerprint: &str, stemcell: &str) -> String {
    format!("{fingerprint}:{stemcell}")
}

// ── DNS ───────────────────────────────────────────────────────────

/// A published A record for a bound instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub ip: Ipv4Addr,
    pub deployment: String,
}

impl DnsRecord {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.deployment, self.name)
    }
}

/// Compare dotted version strings numerically where both segments are
/// numbers (`"10" > "9"`), lexically otherwise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-', '+']);
    let mut right = b.split(['.', '-', '+']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
