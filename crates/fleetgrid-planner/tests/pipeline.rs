//! End-to-end planning against an in-memory fleet store and a static
//! inventory.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fleet_core::config::{ClusterConfig, ClusterMap, DatacenterConfig, PlacementConfig};
use fleet_core::{InstanceState, PlanOptions};
use fleetgrid_placement::{DatacenterPlacerFactory, PlacementError, StaticInventory};
use fleetgrid_planner::{
    BindingStage, Collaborators, CompileTask, CompiledBlob, PackageCompiler, PlannerError,
    PlannerFactory, ProgressEvent, RecordingProgress, ResolutionKind, StemcellManager, VmBinding,
};
use fleetgrid_planner::plan::ReservationKind;
use fleetgrid_state::{
    InstanceRecord, PackageRecord, ReleaseVersionRecord, StateError, StateResult, StateStore,
    StemcellRecord, TemplateRecord,
};
use serde_json::{Value, json};

#[derive(Default)]
struct CountingCompiler {
    calls: AtomicUsize,
}

impl PackageCompiler for CountingCompiler {
    fn compile(&self, task: &CompileTask) -> anyhow::Result<CompiledBlob> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompiledBlob {
            blob_id: format!("blob-{}-{}", task.package, task.stemcell),
            sha1: format!("sha-{}", task.fingerprint),
        })
    }
}

struct Fixture {
    store: StateStore,
    compiler: Arc<CountingCompiler>,
    progress: Arc<RecordingProgress>,
    factory: PlannerFactory,
}

fn seed(store: &StateStore) {
    store
        .put_stemcell(&StemcellRecord {
            name: "ubuntu".to_string(),
            version: "1".to_string(),
            cid: "sc-1".to_string(),
            operating_system: "ubuntu-jammy".to_string(),
            sha1: "abc".to_string(),
        })
        .unwrap();

    let package = |name: &str, deps: &[&str]| PackageRecord {
        name: name.to_string(),
        version: "1".to_string(),
        sha1: format!("{name}-sha"),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    };
    for version in ["2", "10"] {
        store
            .put_release_version(&ReleaseVersionRecord {
                name: "cf".to_string(),
                version: version.to_string(),
                packages: vec![
                    package("ruby", &[]),
                    package("nginx", &[]),
                    package("app", &["ruby"]),
                    package("postgres", &[]),
                ],
                templates: vec![
                    TemplateRecord {
                        name: "web".to_string(),
                        version: "1".to_string(),
                        sha1: "web-sha".to_string(),
                        packages: vec!["nginx".to_string(), "app".to_string()],
                    },
                    TemplateRecord {
                        name: "database".to_string(),
                        version: "1".to_string(),
                        sha1: "db-sha".to_string(),
                        packages: vec!["postgres".to_string()],
                    },
                ],
            })
            .unwrap();
    }
}

fn inventory() -> StaticInventory {
    serde_json::from_value(json!({
        "datacenters": [{
            "name": "dc1",
            "clusters": [
                { "name": "c1", "datastores": [
                    { "name": "pers-small", "free_space_mb": 1500, "total_space_mb": 10000 },
                    { "name": "pers-big", "free_space_mb": 50000, "total_space_mb": 100000 }
                ] },
                { "name": "c2", "datastores": [
                    { "name": "pers-other", "free_space_mb": 30000, "total_space_mb": 100000 }
                ] }
            ]
        }]
    }))
    .unwrap()
}

fn datacenter() -> DatacenterConfig {
    DatacenterConfig {
        name: "dc1".to_string(),
        vm_folder: "vms".to_string(),
        template_folder: "templates".to_string(),
        disk_path: "disks".to_string(),
        use_sub_folder: true,
        ephemeral_pattern: "^eph".to_string(),
        persistent_pattern: "^pers".to_string(),
        mem_overcommit: 1.0,
        clusters: ClusterMap::from_iter([
            ("c1".to_string(), ClusterConfig::default()),
            ("c2".to_string(), ClusterConfig::default()),
        ]),
    }
}

fn fixture_with(store: StateStore) -> Fixture {
    seed(&store);
    let compiler = Arc::new(CountingCompiler::default());
    let progress = Arc::new(RecordingProgress::new());
    let placer = Arc::new(DatacenterPlacerFactory::new(
        datacenter(),
        PlacementConfig::default(),
        Arc::new(inventory()),
    ));
    let collaborators = Collaborators::from_store(store.clone(), compiler.clone(), placer, progress.clone());
    Fixture {
        store,
        compiler,
        progress,
        factory: PlannerFactory::new(collaborators),
    }
}

fn fixture() -> Fixture {
    fixture_with(StateStore::open_in_memory().unwrap())
}

fn manifest() -> Value {
    json!({
        "name": "Shop_Front",
        "properties": { "region": "eu", "nginx": { "workers": 2, "port": 80 } },
        "release": { "name": "cf", "version": "latest" },
        "networks": [{ "name": "default", "subnets": [{
            "range": "10.0.0.0/24",
            "gateway": "10.0.0.1",
            "reserved": ["10.0.0.2 - 10.0.0.9"],
            "static": ["10.0.0.100 - 10.0.0.110"]
        }] }],
        "resource_pools": [{
            "name": "small", "network": "default",
            "stemcell": { "name": "ubuntu", "version": "1" },
            "properties": { "nginx": { "workers": 4 } }
        }],
        "compilation": { "workers": 2, "network": "default" },
        "jobs": [
            {
                "name": "web", "template": "web", "instances": 2, "resource_pool": "small",
                "networks": [{ "name": "default" }],
                "properties": { "nginx": { "port": 8080 } }
            },
            {
                "name": "db", "templates": [{ "name": "database" }], "instances": 1,
                "resource_pool": "small", "persistent_disk": 2048,
                "networks": [{ "name": "default", "static_ips": ["10.0.0.100"] }]
            }
        ]
    })
}

#[tokio::test]
async fn full_binding_resolves_every_instance() {
    let fx = fixture();
    let plan = fx
        .factory
        .planner(manifest(), None, &PlanOptions::default())
        .await
        .unwrap();

    assert_eq!(plan.name, "shop-front");
    assert!(plan.is_fully_bound());
    for stage in BindingStage::PREPARE {
        assert!(plan.is_completed(stage), "{stage} not completed");
    }
    assert!(plan.is_completed(BindingStage::CompilePackages));
    assert!(plan.is_completed(BindingStage::Dns));

    // `latest` resolves numerically: 10 > 2.
    assert_eq!(plan.releases["cf"].record.version, "10");

    for instance in plan.instances() {
        assert!(matches!(instance.vm, VmBinding::PendingAllocation { ref resource_pool } if resource_pool == "small"));
    }
    let web = plan.job("web").unwrap();
    assert_eq!(web.stemcell.as_ref().unwrap().cid, "sc-1");
    assert_eq!(web.bound_templates[0].name, "web");
    let packages: Vec<&str> = web.packages.values().map(|p| p.name.as_str()).collect();
    assert_eq!(packages, vec!["app", "nginx", "ruby"]);

    // job > resource pool > global
    let props = web.merged_properties.as_ref().unwrap();
    assert_eq!(props["region"], json!("eu"));
    assert_eq!(props["nginx"], json!({ "workers": 4, "port": 8080 }));

    // Static first, then the lowest free dynamic addresses.
    let db = plan.job("db").unwrap();
    assert_eq!(db.instances[0].ip_on("default"), Some(Ipv4Addr::new(10, 0, 0, 100)));
    assert_eq!(web.instances[0].ip_on("default"), Some(Ipv4Addr::new(10, 0, 0, 10)));
    assert_eq!(web.instances[1].ip_on("default"), Some(Ipv4Addr::new(10, 0, 0, 11)));

    // The 1500 MB datastore cannot keep 1024 MB headroom after a 2048 MB disk.
    let disk = db.instances[0].disk.as_ref().unwrap();
    assert_eq!(disk.size_mb, 2048);
    assert_ne!(disk.datastore.as_deref(), Some("pers-small"));
    assert!(web.instances.iter().all(|i| i.disk.is_none()));

    // ruby, nginx, app, postgres on one stemcell.
    assert_eq!(plan.compiled_packages.len(), 4);
    assert_eq!(fx.compiler.calls.load(Ordering::SeqCst), 4);

    let names: Vec<&str> = plan.dns_records.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"0.db.default.shop-front.fleet"));
    assert!(names.contains(&"1.web.default.shop-front.fleet"));
    assert_eq!(fx.store.list_dns_records("shop-front").unwrap().len(), 3);

    assert_eq!(
        fx.progress.stages(),
        vec!["Preparing deployment", "Compiling packages", "Preparing DNS"]
    );
    let finished = fx.progress.finished_tasks();
    assert!(finished.contains(&"Binding deployment".to_string()));
    assert!(finished.contains(&"Binding instance networks".to_string()));
    assert!(finished.contains(&"Binding DNS".to_string()));
}

#[tokio::test]
async fn second_plan_reuses_record_and_compiled_packages() {
    let fx = fixture();
    let first = fx.factory.planner(manifest(), None, &PlanOptions::default()).await.unwrap();
    let second = fx.factory.planner(manifest(), None, &PlanOptions::default()).await.unwrap();

    assert_eq!(first.record, second.record);
    assert_eq!(second.compiled_packages.len(), 4);
    assert_eq!(fx.compiler.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn templates_before_stemcells_is_rejected() {
    let fx = fixture();
    let mut plan = fx
        .factory
        .planner_without_vm_binding(manifest(), None, &PlanOptions::default())
        .unwrap();
    let assembler = fx.factory.assembler();

    assembler.bind_releases(&mut plan).unwrap();
    let err = assembler.bind_templates(&mut plan).unwrap_err();
    assert!(matches!(
        err,
        PlannerError::StageOrder { stage: BindingStage::Templates, missing: BindingStage::Stemcells }
    ));
    assert!(!plan.is_completed(BindingStage::Templates));
}

#[tokio::test]
async fn compile_step_reports_early_failures_as_a_task() {
    let fx = fixture();
    let mut plan = fx
        .factory
        .planner_without_vm_binding(manifest(), None, &PlanOptions::default())
        .unwrap();

    let err = fx.factory.compile_step().run(&mut plan).await.unwrap_err();
    assert!(matches!(err, PlannerError::StageOrder { stage: BindingStage::CompilePackages, .. }));

    let failed = fx.progress.events().into_iter().any(|event| {
        matches!(event, ProgressEvent::Finished { ref task, error: Some(_) } if task == "Finding compiled packages")
    });
    assert!(failed);
    assert_eq!(fx.compiler.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn rerunning_a_stage_does_not_duplicate_bindings() {
    let fx = fixture();
    let mut plan = fx
        .factory
        .planner_without_vm_binding(manifest(), None, &PlanOptions::default())
        .unwrap();
    let assembler = fx.factory.assembler();
    for stage in BindingStage::PREPARE {
        assembler.run(stage, &mut plan).unwrap();
    }
    let before: Vec<_> = plan.instances().map(|i| i.reservations.clone()).collect();

    assembler.bind_instance_networks(&mut plan).unwrap();
    assembler.bind_templates(&mut plan).unwrap();

    let after: Vec<_> = plan.instances().map(|i| i.reservations.clone()).collect();
    assert_eq!(before, after);
    assert_eq!(plan.job("web").unwrap().bound_templates.len(), 1);
}

#[tokio::test]
async fn static_ip_collision_fails_network_binding() {
    let fx = fixture();
    let mut m = manifest();
    m["jobs"][0]["networks"] = json!([{ "name": "default", "static_ips": ["10.0.0.100", "10.0.0.101"] }]);

    let err = fx.factory.planner(m, None, &PlanOptions::default()).await.unwrap_err();
    match err {
        PlannerError::Binding { stage, reason } => {
            assert_eq!(stage, BindingStage::InstanceNetworks);
            assert!(reason.contains("10.0.0.100"), "{reason}");
        }
        other => panic!("expected binding error, got {other:?}"),
    }
}

#[tokio::test]
async fn pool_smaller_than_demand_fails_resource_pool_binding() {
    let fx = fixture();
    let mut m = manifest();
    m["resource_pools"][0]["size"] = json!(2);

    let err = fx.factory.planner(m, None, &PlanOptions::default()).await.unwrap_err();
    match err {
        PlannerError::Binding { stage, reason } => {
            assert_eq!(stage, BindingStage::ResourcePools);
            assert!(reason.contains("size 2 but jobs need 3 VMs"), "{reason}");
        }
        other => panic!("expected binding error, got {other:?}"),
    }
}

#[test]
fn pool_on_unknown_network_is_rejected_before_binding() {
    let fx = fixture();
    let mut m = manifest();
    m["resource_pools"][0]["network"] = json!("nope");

    let err = fx
        .factory
        .planner_without_vm_binding(m, None, &PlanOptions::default())
        .unwrap_err();
    match err {
        PlannerError::Parse(message) => assert!(message.contains("unknown network 'nope'"), "{message}"),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn pool_network_is_looked_up_when_binding_pools() {
    let fx = fixture();
    let mut plan = fx
        .factory
        .planner_without_vm_binding(manifest(), None, &PlanOptions::default())
        .unwrap();
    plan.networks.remove("default");
    let assembler = fx.factory.assembler();
    assembler.bind_releases(&mut plan).unwrap();
    assembler.bind_existing_deployment(&mut plan).unwrap();

    let err = assembler.bind_resource_pools(&mut plan).unwrap_err();
    match err {
        PlannerError::Lookup { kind, name, available } => {
            assert_eq!(kind, ResolutionKind::Network);
            assert_eq!(name, "default");
            assert!(available.is_empty());
        }
        other => panic!("expected lookup error, got {other:?}"),
    }
    assert!(!plan.is_completed(BindingStage::ResourcePools));
}

#[tokio::test]
async fn fewer_static_ips_than_instances_fill_in_dynamically() {
    let fx = fixture();
    let mut m = manifest();
    m["jobs"][0]["networks"] = json!([{ "name": "default", "static_ips": ["10.0.0.105"] }]);

    let plan = fx.factory.planner(m, None, &PlanOptions::default()).await.unwrap();

    let web = plan.job("web").unwrap();
    let first = &web.instances[0].reservations[0];
    assert_eq!(first.ip, Ipv4Addr::new(10, 0, 0, 105));
    assert_eq!(first.kind, ReservationKind::Static);
    let second = &web.instances[1].reservations[0];
    assert_eq!(second.ip, Ipv4Addr::new(10, 0, 0, 10));
    assert_eq!(second.kind, ReservationKind::Dynamic);
}

#[tokio::test]
async fn missing_stemcell_lists_available() {
    let fx = fixture();
    let mut m = manifest();
    m["resource_pools"][0]["stemcell"]["version"] = json!("9");

    let err = fx.factory.planner(m, None, &PlanOptions::default()).await.unwrap_err();
    match err {
        PlannerError::Lookup { kind, name, available } => {
            assert_eq!(kind, ResolutionKind::Stemcell);
            assert_eq!(name, "ubuntu/9");
            assert_eq!(available, vec!["ubuntu/1".to_string()]);
        }
        other => panic!("expected lookup error, got {other:?}"),
    }
}

/// Finds nothing and cannot list what it has.
struct UnlistableStemcells;

impl StemcellManager for UnlistableStemcells {
    fn find_by_name_and_version(&self, _name: &str, _version: &str) -> StateResult<Option<StemcellRecord>> {
        Ok(None)
    }

    fn list(&self) -> StateResult<Vec<StemcellRecord>> {
        Err(StateError::Read("stemcells table unavailable".to_string()))
    }
}

#[tokio::test]
async fn stemcell_listing_failure_is_not_swallowed() {
    let store = StateStore::open_in_memory().unwrap();
    seed(&store);
    let placer = Arc::new(DatacenterPlacerFactory::new(
        datacenter(),
        PlacementConfig::default(),
        Arc::new(inventory()),
    ));
    let mut collaborators = Collaborators::from_store(
        store,
        Arc::new(CountingCompiler::default()),
        placer,
        Arc::new(RecordingProgress::new()),
    );
    collaborators.stemcells = Arc::new(UnlistableStemcells);

    let err = PlannerFactory::new(collaborators)
        .planner(manifest(), None, &PlanOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlannerError::State(StateError::Read(_))), "{err:?}");
}

#[tokio::test]
async fn oversized_disk_reports_no_capacity() {
    let fx = fixture();
    let mut m = manifest();
    m["jobs"][1]["persistent_disk"] = json!(60000);

    let err = fx.factory.planner(m, None, &PlanOptions::default()).await.unwrap_err();
    match err {
        PlannerError::Placement(PlacementError::NoCapacity(nc)) => {
            assert_eq!(nc.size_mb, 60000);
            assert_eq!(nc.candidates.len(), 3);
        }
        other => panic!("expected no capacity, got {other:?}"),
    }
}

#[tokio::test]
async fn existing_instances_are_kept_renamed_or_obsoleted() {
    let store = StateStore::open_in_memory().unwrap();
    let record = store.find_or_create_deployment("shop-front").unwrap();
    let existing = |job: &str, index: u32, ip: &str| InstanceRecord {
        deployment_id: record.id.clone(),
        job: job.to_string(),
        index,
        vm_cid: Some(format!("vm-{job}-{index}")),
        ips: BTreeMap::from([("default".to_string(), ip.parse().unwrap())]),
        disk_cid: None,
        disk_size_mb: 0,
        datastore: None,
    };
    // `frontend` was renamed to `web`; `worker` no longer exists.
    store.put_instance(&existing("frontend", 1, "10.0.0.50")).unwrap();
    store.put_instance(&existing("worker", 0, "10.0.0.60")).unwrap();
    let fx = fixture_with(store);

    let options = PlanOptions {
        job_rename: BTreeMap::from([("frontend".to_string(), "web".to_string())]),
        ..Default::default()
    };
    let plan = fx.factory.planner(manifest(), None, &options).await.unwrap();

    let web = plan.job("web").unwrap();
    assert_eq!(
        web.instances[1].vm,
        VmBinding::Existing {
            vm_cid: "vm-frontend-1".to_string()
        }
    );
    assert_eq!(web.instances[1].ip_on("default"), Some(Ipv4Addr::new(10, 0, 0, 50)));
    assert!(matches!(web.instances[0].vm, VmBinding::PendingAllocation { .. }));

    let obsolete: Vec<&str> = plan.obsolete_instances.iter().map(|r| r.job.as_str()).collect();
    assert_eq!(obsolete, vec!["worker"]);
}

#[tokio::test]
async fn recreate_and_detached_states() {
    let store = StateStore::open_in_memory().unwrap();
    let record = store.find_or_create_deployment("shop-front").unwrap();
    store
        .put_instance(&InstanceRecord {
            deployment_id: record.id.clone(),
            job: "web".to_string(),
            index: 0,
            vm_cid: Some("vm-web-0".to_string()),
            ips: BTreeMap::new(),
            disk_cid: None,
            disk_size_mb: 0,
            datastore: None,
        })
        .unwrap();
    let fx = fixture_with(store);

    let options = PlanOptions {
        job_states: BTreeMap::from([
            ("web".to_string(), InstanceState::Recreate.to_string()),
            ("db".to_string(), InstanceState::Detached.to_string()),
        ]),
        ..Default::default()
    };
    let plan = fx.factory.planner(manifest(), None, &options).await.unwrap();

    let web = plan.job("web").unwrap();
    assert!(web.instances[0].recreate);
    assert!(matches!(web.instances[0].vm, VmBinding::PendingAllocation { .. }));
    assert_eq!(plan.job("db").unwrap().instances[0].vm, VmBinding::Detached);
}

#[tokio::test]
async fn invalid_manifest_reports_all_violations() {
    let fx = fixture();
    let err = fx
        .factory
        .planner(json!({ "jobs": [{ "name": "web" }] }), None, &PlanOptions::default())
        .await
        .unwrap_err();
    match err {
        PlannerError::Validation(violations) => assert!(violations.len() >= 3, "{violations:?}"),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(fx.store.list_deployments().unwrap().is_empty());
}
