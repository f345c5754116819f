//! Package compilation step.
//!
//! Every bound package is compiled once per (fingerprint, stemcell) pair.
//! Pairs already in the compiled-package cache are reused. The rest are
//! compiled in dependency waves: a package only starts once everything it
//! builds against is available. Within a wave at most `compilation.workers`
//! tasks run at once on tokio's blocking pool.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fleetgrid_state::{CompiledPackageRecord, StemcellRecord, compiled_package_key};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::assembler::ensure_ready;
use crate::collaborators::{CompileTask, CompiledPackageCache, PackageCompiler};
use crate::error::{PlannerError, PlannerResult};
use crate::plan::DeploymentPlan;
use crate::progress::{ProgressTracker, track, track_and_log};
use crate::stage::BindingStage;

#[derive(Clone)]
pub struct PackageCompileStep {
    compiler: Arc<dyn PackageCompiler>,
    cache: Arc<dyn CompiledPackageCache>,
    progress: Arc<dyn ProgressTracker>,
}

impl PackageCompileStep {
    pub fn new(
        compiler: Arc<dyn PackageCompiler>,
        cache: Arc<dyn CompiledPackageCache>,
        progress: Arc<dyn ProgressTracker>,
    ) -> Self {
        Self {
            compiler,
            cache,
            progress,
        }
    }

    /// One task per unique (fingerprint, stemcell) pair across all jobs,
    /// keyed by [`compiled_package_key`].
    pub fn tasks(plan: &DeploymentPlan) -> BTreeMap<String, CompileTask> {
        let mut tasks = BTreeMap::new();
        for job in &plan.jobs {
            let Some(stemcell) = job.stemcell.as_ref().map(StemcellRecord::table_key) else {
                continue;
            };
            for package in job.packages.values() {
                tasks
                    .entry(compiled_package_key(&package.fingerprint, &stemcell))
                    .or_insert_with(|| CompileTask {
                        package: package.name.clone(),
                        release: package.release.clone(),
                        version: package.version.clone(),
                        fingerprint: package.fingerprint.clone(),
                        stemcell: stemcell.clone(),
                        dependencies: package.dependencies.clone(),
                    });
            }
        }
        tasks
    }

    pub async fn run(&self, plan: &mut DeploymentPlan) -> PlannerResult<()> {
        let stage = BindingStage::CompilePackages;
        let (mut compiled, pending) =
            track_and_log(self.progress.as_ref(), "Finding compiled packages", || {
                ensure_ready(plan, stage)?;
                self.partition_cached(plan)
            })?;

        info!(
            deployment = %plan.name,
            cached = compiled.len(),
            to_compile = pending.len(),
            "compiling packages"
        );
        if !pending.is_empty() {
            self.progress.begin_stage(stage.label(), pending.len());
        }

        let workers = plan.compilation.workers.max(1);
        if let Err(e) = self.compile_pending(pending, &mut compiled, workers).await {
            error!(deployment = %plan.name, error = %e, "package compilation failed");
            return Err(e);
        }

        plan.compiled_packages = compiled;
        plan.mark_completed(stage);
        Ok(())
    }

    /// Split the plan's tasks into cache hits and tasks still to compile.
    fn partition_cached(
        &self,
        plan: &DeploymentPlan,
    ) -> PlannerResult<(BTreeMap<String, CompiledPackageRecord>, BTreeMap<String, CompileTask>)> {
        let mut compiled = BTreeMap::new();
        let mut pending = BTreeMap::new();
        for (key, task) in Self::tasks(plan) {
            match self.cache.find_compiled(&task.fingerprint, &task.stemcell)? {
                Some(record) => {
                    compiled.insert(key, record);
                }
                None => {
                    pending.insert(key, task);
                }
            }
        }
        Ok((compiled, pending))
    }

    /// Compile `pending` in dependency waves, adding results to `compiled`.
    async fn compile_pending(
        &self,
        mut pending: BTreeMap<String, CompileTask>,
        compiled: &mut BTreeMap<String, CompiledPackageRecord>,
        workers: usize,
    ) -> PlannerResult<()> {
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, task)| {
                    task.dependencies
                        .iter()
                        .all(|dep| compiled.contains_key(&compiled_package_key(dep, &task.stemcell)))
                })
                .map(|(key, _)| key.clone())
                .collect();

            if ready.is_empty() {
                let blocked: BTreeSet<&str> = pending.values().map(|t| t.package.as_str()).collect();
                let first = pending.values().next();
                return Err(PlannerError::Compilation {
                    package: blocked.into_iter().collect::<Vec<_>>().join(", "),
                    stemcell: first.map(|t| t.stemcell.clone()).unwrap_or_default(),
                    reason: "dependencies can never be satisfied".to_string(),
                });
            }

            let wave: Vec<CompileTask> = ready.iter().filter_map(|key| pending.remove(key)).collect();
            debug!(tasks = wave.len(), workers, "starting compile wave");
            for record in self.compile_wave(wave, workers).await? {
                self.cache.store_compiled(&record)?;
                compiled.insert(record.table_key(), record);
            }
        }
        Ok(())
    }

    async fn compile_wave(&self, wave: Vec<CompileTask>, workers: usize) -> PlannerResult<Vec<CompiledPackageRecord>> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();

        for task in wave {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| compilation_error(&task, e.to_string()))?;
            let compiler = Arc::clone(&self.compiler);
            let progress = Arc::clone(&self.progress);
            set.spawn_blocking(move || {
                let _permit = permit;
                let label = format!("{}/{} for {}", task.package, task.version, task.stemcell);
                let result = track(progress.as_ref(), &label, || compiler.compile(&task));
                (task, result)
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (task, result) = joined.map_err(|e| PlannerError::Compilation {
                package: "unknown".to_string(),
                stemcell: "unknown".to_string(),
                reason: format!("compile task did not finish: {e}"),
            })?;
            let blob = result.map_err(|e| compilation_error(&task, format!("{e:#}")))?;
            debug!(package = %task.package, stemcell = %task.stemcell, blob = %blob.blob_id, "package compiled");
            records.push(CompiledPackageRecord {
                package: task.package,
                fingerprint: task.fingerprint,
                stemcell: task.stemcell,
                blob_id: blob.blob_id,
                sha1: blob.sha1,
            });
        }
        Ok(records)
    }
}

fn compilation_error(task: &CompileTask, reason: String) -> PlannerError {
    PlannerError::Compilation {
        package: task.package.clone(),
        stemcell: task.stemcell.clone(),
        reason,
    }
}
