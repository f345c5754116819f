//! Planner factory — the entry point from a raw manifest to a bound plan.

use std::sync::Arc;

use fleet_core::{CloudConfig, DeploymentManifest, PlanOptions};
use serde_json::Value;
use tracing::info;

use crate::assembler::{Assembler, DEFAULT_DNS_DOMAIN};
use crate::collaborators::Collaborators;
use crate::compile::PackageCompileStep;
use crate::error::{PlannerError, PlannerResult};
use crate::manifest::{
    Canonicalizer, DefaultCanonicalizer, DefaultMigrator, ManifestMigrator, ManifestValidator,
    SchemaValidator,
};
use crate::parser::DeploymentSpecParser;
use crate::plan::{DeploymentPlan, PlanAttrs};
use crate::progress::{track, track_and_log};
use crate::stage::BindingStage;

/// Builds deployment plans from raw manifests.
///
/// Holds no per-request state; one factory serves any number of requests.
#[derive(Clone)]
pub struct PlannerFactory {
    migrator: Arc<dyn ManifestMigrator>,
    validator: Arc<dyn ManifestValidator>,
    canonicalizer: Arc<dyn Canonicalizer>,
    collaborators: Collaborators,
    dns_domain: String,
}

impl PlannerFactory {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            migrator: Arc::new(DefaultMigrator),
            validator: Arc::new(SchemaValidator),
            canonicalizer: Arc::new(DefaultCanonicalizer),
            collaborators,
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
        }
    }

    pub fn with_migrator(mut self, migrator: Arc<dyn ManifestMigrator>) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ManifestValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn with_dns_domain(mut self, domain: impl Into<String>) -> Self {
        self.dns_domain = domain.into();
        self
    }

    pub fn assembler(&self) -> Assembler {
        Assembler::new(self.collaborators.clone(), self.dns_domain.clone())
    }

    pub fn compile_step(&self) -> PackageCompileStep {
        PackageCompileStep::new(
            Arc::clone(&self.collaborators.compiler),
            Arc::clone(&self.collaborators.compiled_packages),
            Arc::clone(&self.collaborators.progress),
        )
    }

    /// Migrate, validate and parse `manifest` into an unbound plan.
    ///
    /// The deployment record is looked up (or created) under the
    /// canonical name, tracked as the "Binding deployment" task.
    pub fn planner_without_vm_binding(
        &self,
        manifest: Value,
        cloud_config: Option<&CloudConfig>,
        options: &PlanOptions,
    ) -> PlannerResult<DeploymentPlan> {
        let migrated = self.migrator.migrate(manifest)?;
        self.validator.validate(&migrated)?;
        let manifest: DeploymentManifest =
            serde_json::from_value(migrated).map_err(|e| PlannerError::Parse(e.to_string()))?;

        let name = self.canonicalizer.canonical(&manifest.name)?;
        let progress = self.collaborators.progress.as_ref();
        let record = track(progress, "Binding deployment", || {
            self.collaborators.deployments.find_or_create_by_name(&name)
        })?;
        info!(deployment = %name, id = %record.id, "deployment record bound");

        let attrs = PlanAttrs {
            name,
            properties: manifest.properties.clone(),
        };
        DeploymentSpecParser::parse(attrs, &manifest, cloud_config, record, options.clone())
    }

    /// Build a fully bound plan: parse, run every binding stage, compile
    /// packages, and publish DNS.
    pub async fn planner(
        &self,
        manifest: Value,
        cloud_config: Option<&CloudConfig>,
        options: &PlanOptions,
    ) -> PlannerResult<DeploymentPlan> {
        let mut plan = self.planner_without_vm_binding(manifest, cloud_config, options)?;
        let assembler = self.assembler();
        let progress = Arc::clone(&self.collaborators.progress);

        progress.begin_stage("Preparing deployment", BindingStage::PREPARE.len());
        for stage in BindingStage::PREPARE {
            track_and_log(progress.as_ref(), stage.label(), || assembler.run(stage, &mut plan))?;
        }

        self.compile_step().run(&mut plan).await?;

        progress.begin_stage("Preparing DNS", 1);
        track_and_log(progress.as_ref(), BindingStage::Dns.label(), || {
            assembler.bind_dns(&mut plan)
        })?;

        info!(
            deployment = %plan.name,
            instances = plan.instances().count(),
            obsolete = plan.obsolete_instances.len(),
            "deployment plan bound"
        );
        Ok(plan)
    }
}
