//! Manifest pre-processing: migration, validation, name canonicalization.
//!
//! Raw manifests arrive as JSON values. They are migrated to the current
//! shape, validated as a whole (every violation reported at once), and only
//! then deserialized into [`fleet_core::DeploymentManifest`].

use std::net::Ipv4Addr;

use serde_json::{Map, Value, json};

use crate::error::{PlannerError, PlannerResult};

/// Rewrites older manifest shapes into the current one.
pub trait ManifestMigrator: Send + Sync {
    fn migrate(&self, manifest: Value) -> PlannerResult<Value>;
}

/// Checks a migrated manifest, reporting every violation.
pub trait ManifestValidator: Send + Sync {
    fn validate(&self, manifest: &Value) -> PlannerResult<()>;
}

/// Maps a user-supplied deployment name to its stored form.
pub trait Canonicalizer: Send + Sync {
    fn canonical(&self, name: &str) -> PlannerResult<String>;
}

// ── Migration ─────────────────────────────────────────────────────

/// Lifts legacy singular keys into their list forms:
/// `release: {..}` becomes `releases: [{..}]` and a job's
/// `template: "x"` becomes `templates: [{name: "x"}]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMigrator;

impl ManifestMigrator for DefaultMigrator {
    fn migrate(&self, mut manifest: Value) -> PlannerResult<Value> {
        let Some(root) = manifest.as_object_mut() else {
            return Ok(manifest);
        };

        if let Some(release) = root.remove("release") {
            if root.contains_key("releases") {
                return Err(PlannerError::Validation(vec![
                    "manifest defines both 'release' and 'releases'".to_string(),
                ]));
            }
            root.insert("releases".to_string(), Value::Array(vec![release]));
        }

        if let Some(Value::Array(jobs)) = root.get_mut("jobs") {
            for job in jobs.iter_mut().filter_map(Value::as_object_mut) {
                migrate_job_template(job)?;
            }
        }

        Ok(manifest)
    }
}

fn migrate_job_template(job: &mut Map<String, Value>) -> PlannerResult<()> {
    let Some(template) = job.remove("template") else {
        return Ok(());
    };
    if job.contains_key("templates") {
        let name = job.get("name").and_then(Value::as_str).unwrap_or("?");
        return Err(PlannerError::Validation(vec![format!(
            "job '{name}' defines both 'template' and 'templates'"
        )]));
    }
    let templates = match template {
        Value::String(name) => vec![json!({ "name": name })],
        Value::Array(names) => names
            .into_iter()
            .map(|n| match n {
                Value::String(name) => json!({ "name": name }),
                other => other,
            })
            .collect(),
        other => vec![other],
    };
    job.insert("templates".to_string(), Value::Array(templates));
    Ok(())
}

// ── Validation ────────────────────────────────────────────────────

/// Structural checks over the migrated manifest.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl ManifestValidator for SchemaValidator {
    fn validate(&self, manifest: &Value) -> PlannerResult<()> {
        let mut violations = Vec::new();

        let Some(root) = manifest.as_object() else {
            return Err(PlannerError::Validation(vec![
                "manifest must be an object".to_string(),
            ]));
        };

        match root.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => {}
            Some(Value::String(_)) => violations.push("name must not be empty".to_string()),
            Some(_) => violations.push("name must be a string".to_string()),
            None => violations.push("name is required".to_string()),
        }

        if root.get("properties").is_some_and(|props| !props.is_object()) {
            violations.push("properties must be an object".to_string());
        }

        for (i, release) in list(root, "releases", &mut violations).iter().enumerate() {
            let at = format!("releases[{i}]");
            require_str(release, "name", &at, &mut violations);
            require_str(release, "version", &at, &mut violations);
        }

        for (i, job) in list(root, "jobs", &mut violations).iter().enumerate() {
            let at = match job.get("name").and_then(Value::as_str) {
                Some(name) => format!("jobs[{i}] ({name})"),
                None => format!("jobs[{i}]"),
            };
            validate_job(job, &at, &mut violations);
        }

        for (i, network) in list(root, "networks", &mut violations).iter().enumerate() {
            let at = format!("networks[{i}]");
            require_str(network, "name", &at, &mut violations);
            for (j, subnet) in nested_list(network, "subnets", &at, &mut violations).iter().enumerate() {
                require_str(subnet, "range", &format!("{at}.subnets[{j}]"), &mut violations);
            }
        }

        for (i, pool) in list(root, "resource_pools", &mut violations).iter().enumerate() {
            let at = format!("resource_pools[{i}]");
            require_str(pool, "name", &at, &mut violations);
            require_str(pool, "network", &at, &mut violations);
            match pool.get("stemcell") {
                Some(stemcell @ Value::Object(_)) => {
                    let at = format!("{at}.stemcell");
                    require_str(stemcell, "name", &at, &mut violations);
                    require_str(stemcell, "version", &at, &mut violations);
                }
                Some(_) => violations.push(format!("{at}.stemcell must be an object")),
                None => violations.push(format!("{at}.stemcell is required")),
            }
        }

        if let Some(compilation) = root.get("compilation") {
            match compilation.get("workers") {
                None => {}
                Some(w) if w.as_u64().is_some_and(|w| w > 0) => {}
                Some(_) => violations.push("compilation.workers must be a positive integer".to_string()),
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(PlannerError::Validation(violations))
        }
    }
}

fn validate_job(job: &Value, at: &str, violations: &mut Vec<String>) {
    if !job.is_object() {
        violations.push(format!("{at} must be an object"));
        return;
    }
    require_str(job, "name", at, violations);
    require_str(job, "resource_pool", at, violations);
    match job.get("instances") {
        Some(n) if n.as_u64().is_some_and(|n| n <= u64::from(u32::MAX)) => {}
        Some(_) => violations.push(format!("{at}.instances must be a non-negative integer")),
        None => violations.push(format!("{at}.instances is required")),
    }
    if job.get("persistent_disk").is_some_and(|disk| disk.as_u64().is_none()) {
        violations.push(format!("{at}.persistent_disk must be a non-negative integer"));
    }
    for (i, template) in nested_list(job, "templates", at, violations).iter().enumerate() {
        require_str(template, "name", &format!("{at}.templates[{i}]"), violations);
    }
    for (i, network) in nested_list(job, "networks", at, violations).iter().enumerate() {
        let net_at = format!("{at}.networks[{i}]");
        require_str(network, "name", &net_at, violations);
        if let Some(ips) = network.get("static_ips") {
            let valid = ips.as_array().is_some_and(|ips| {
                ips.iter()
                    .all(|ip| ip.as_str().is_some_and(|s| s.parse::<Ipv4Addr>().is_ok()))
            });
            if !valid {
                violations.push(format!("{net_at}.static_ips must be a list of IPv4 addresses"));
            }
        }
    }
}

fn list<'a>(root: &'a Map<String, Value>, key: &str, violations: &mut Vec<String>) -> &'a [Value] {
    match root.get(key) {
        None => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            violations.push(format!("{key} must be a list"));
            &[]
        }
    }
}

fn nested_list<'a>(value: &'a Value, key: &str, at: &str, violations: &mut Vec<String>) -> &'a [Value] {
    match value.get(key) {
        None => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            violations.push(format!("{at}.{key} must be a list"));
            &[]
        }
    }
}

fn require_str(value: &Value, key: &str, at: &str, violations: &mut Vec<String>) {
    match value.get(key) {
        Some(Value::String(_)) => {}
        Some(_) => violations.push(format!("{at}.{key} must be a string")),
        None => violations.push(format!("{at}.{key} is required")),
    }
}

// ── Canonicalization ──────────────────────────────────────────────

/// Lower-cases, maps `_` to `-`, and drops anything outside `[a-z0-9-]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCanonicalizer;

impl Canonicalizer for DefaultCanonicalizer {
    fn canonical(&self, name: &str) -> PlannerResult<String> {
        let canonical: String = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' { '-' } else { c })
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
            .collect();
        if canonical.is_empty() {
            return Err(PlannerError::Validation(vec![format!(
                "deployment name '{name}' has no valid characters"
            )]));
        }
        if canonical.starts_with('-') {
            return Err(PlannerError::Validation(vec![format!(
                "deployment name '{name}' must start with a letter or digit"
            )]));
        }
        Ok(canonical)
    }
}
