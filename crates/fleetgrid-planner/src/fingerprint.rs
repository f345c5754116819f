//! Content fingerprints for release packages.
//!
//! A package's fingerprint covers its own source blob and, transitively,
//! every package it builds against. Two packages with equal fingerprints
//! produce identical compiled output for a given stemcell.

use std::collections::{BTreeMap, BTreeSet};

use fleetgrid_state::{PackageRecord, ReleaseVersionRecord};
use sha2::{Digest, Sha256};

use crate::error::{PlannerError, PlannerResult, ResolutionKind};
use crate::stage::BindingStage;

/// Fingerprint every package of `release`, keyed by package name.
pub fn release_fingerprints(release: &ReleaseVersionRecord) -> PlannerResult<BTreeMap<String, String>> {
    let mut done = BTreeMap::new();
    for package in &release.packages {
        fingerprint(release, package, &mut done, &mut BTreeSet::new())?;
    }
    Ok(done)
}

fn fingerprint(
    release: &ReleaseVersionRecord,
    package: &PackageRecord,
    done: &mut BTreeMap<String, String>,
    visiting: &mut BTreeSet<String>,
) -> PlannerResult<String> {
    if let Some(fp) = done.get(&package.name) {
        return Ok(fp.clone());
    }
    if !visiting.insert(package.name.clone()) {
        return Err(PlannerError::binding(
            BindingStage::Releases,
            format!(
                "release {}/{} has a dependency cycle through package '{}'",
                release.name, release.version, package.name
            ),
        ));
    }

    let mut dependencies = package.dependencies.clone();
    dependencies.sort();
    dependencies.dedup();

    let mut hasher = Sha256::new();
    hasher.update(package.name.as_bytes());
    hasher.update(b"\0");
    hasher.update(package.version.as_bytes());
    hasher.update(b"\0");
    hasher.update(package.sha1.as_bytes());
    for name in &dependencies {
        let dependency = release.package(name).ok_or_else(|| {
            PlannerError::lookup(
                ResolutionKind::Package,
                name.clone(),
                release.packages.iter().map(|p| p.name.clone()).collect(),
            )
        })?;
        let dep_fp = fingerprint(release, dependency, done, visiting)?;
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(dep_fp.as_bytes());
    }

    let fp = hex::encode(hasher.finalize());
    visiting.remove(&package.name);
    done.insert(package.name.clone(), fp.clone());
    Ok(fp)
}
