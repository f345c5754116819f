//! StateStore — redb-backed fleet state for FleetGrid.
//!
//! Provides typed operations over deployment records, instances,
//! stemcells, release versions, compiled packages, and DNS records. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            DEPLOYMENTS,
            INSTANCES,
            STEMCELLS,
            RELEASES,
            COMPILED_PACKAGES,
            DNS_RECORDS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON access ────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = encode(key, value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T = decode(key, guard.value())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan_prefix<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T = decode(key.value(), value.value())?;
                results.push(record);
            }
        }
        Ok(results)
    }

    fn delete_prefix(&self, table: JsonTable, prefix: &str) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            remove_prefix(&mut table, prefix)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Return the record for `name`, creating it if it does not exist.
    ///
    /// Lookup and creation happen in one write transaction, so concurrent
    /// callers with the same name observe the same identity.
    pub fn find_or_create_deployment(&self, name: &str) -> StateResult<DeploymentRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let existing = table
                .get(name)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            if let Some(bytes) = existing {
                let record: DeploymentRecord = decode(name, &bytes)?;
                return Ok(record);
            }

            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let next = sequences
                .get(DEPLOYMENT_SEQUENCE)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0)
                + 1;
            sequences
                .insert(DEPLOYMENT_SEQUENCE, next)
                .map_err(map_err!(Write))?;

            let record = DeploymentRecord {
                id: format!("deployment-{next}"),
                name: name.to_string(),
                created_at: epoch_secs(),
            };
            let value = encode(name, &record)?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        info!(deployment = %record.name, id = %record.id, "deployment record created");
        Ok(record)
    }

    /// Get a deployment record by canonical name.
    pub fn get_deployment(&self, name: &str) -> StateResult<Option<DeploymentRecord>> {
        self.get_json(DEPLOYMENTS, name)
    }

    /// List all deployment records.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        self.scan_prefix(DEPLOYMENTS, "")
    }

    /// Delete a deployment record and its instances. Returns true if it existed.
    pub fn delete_deployment(&self, name: &str) -> StateResult<bool> {
        let Some(record) = self.get_deployment(name)? else {
            return Ok(false);
        };
        self.delete_instances_for_deployment(&record.id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, "deployment deleted");
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, record: &InstanceRecord) -> StateResult<()> {
        self.put_json(INSTANCES, &record.table_key(), record)
    }

    /// List all instances recorded for a deployment id.
    pub fn list_instances_for_deployment(
        &self,
        deployment_id: &str,
    ) -> StateResult<Vec<InstanceRecord>> {
        self.scan_prefix(INSTANCES, &format!("{deployment_id}:"))
    }

    /// Delete all instances for a deployment. Returns number deleted.
    pub fn delete_instances_for_deployment(&self, deployment_id: &str) -> StateResult<u32> {
        self.delete_prefix(INSTANCES, &format!("{deployment_id}:"))
    }

    // ── Stemcells ──────────────────────────────────────────────────

    pub fn put_stemcell(&self, stemcell: &StemcellRecord) -> StateResult<()> {
        self.put_json(STEMCELLS, &stemcell.table_key(), stemcell)?;
        debug!(name = %stemcell.name, version = %stemcell.version, "stemcell stored");
        Ok(())
    }

    pub fn get_stemcell(&self, name: &str, version: &str) -> StateResult<Option<StemcellRecord>> {
        self.get_json(STEMCELLS, &format!("{name}/{version}"))
    }

    pub fn list_stemcells(&self) -> StateResult<Vec<StemcellRecord>> {
        self.scan_prefix(STEMCELLS, "")
    }

    // ── Releases ───────────────────────────────────────────────────

    pub fn put_release_version(&self, release: &ReleaseVersionRecord) -> StateResult<()> {
        self.put_json(RELEASES, &release.table_key(), release)?;
        debug!(name = %release.name, version = %release.version, "release version stored");
        Ok(())
    }

    pub fn get_release_version(
        &self,
        name: &str,
        version: &str,
    ) -> StateResult<Option<ReleaseVersionRecord>> {
        self.get_json(RELEASES, &format!("{name}/{version}"))
    }

    /// All uploaded versions of one release.
    pub fn list_release_versions(&self, name: &str) -> StateResult<Vec<ReleaseVersionRecord>> {
        self.scan_prefix(RELEASES, &format!("{name}/"))
    }

    /// All uploaded versions of every release.
    pub fn list_releases(&self) -> StateResult<Vec<ReleaseVersionRecord>> {
        self.scan_prefix(RELEASES, "")
    }

    // ── Compiled packages ──────────────────────────────────────────

    pub fn put_compiled_package(&self, record: &CompiledPackageRecord) -> StateResult<()> {
        self.put_json(COMPILED_PACKAGES, &record.table_key(), record)
    }

    pub fn get_compiled_package(
        &self,
        fingerprint: &str,
        stemcell: &str,
    ) -> StateResult<Option<CompiledPackageRecord>> {
        self.get_json(COMPILED_PACKAGES, &compiled_package_key(fingerprint, stemcell))
    }

    // ── DNS ────────────────────────────────────────────────────────

    /// Replace every DNS record of `deployment` with `records`.
    ///
    /// Removal and inserts share one write transaction: on any error the
    /// previous records stay in place untouched.
    pub fn replace_dns_records(&self, deployment: &str, records: &[DnsRecord]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
            let removed = remove_prefix(&mut table, &format!("{deployment}:"))?;
            for record in records {
                if record.deployment != deployment {
                    return Err(StateError::ForeignRecord {
                        record: record.name.clone(),
                        owner: record.deployment.clone(),
                        deployment: deployment.to_string(),
                    });
                }
                let key = record.table_key();
                let value = encode(&key, record)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            removed
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%deployment, removed, published = records.len(), "dns records replaced");
        Ok(())
    }

    pub fn list_dns_records(&self, deployment: &str) -> StateResult<Vec<DnsRecord>> {
        self.scan_prefix(DNS_RECORDS, &format!("{deployment}:"))
    }
}

/// Remove every key starting with `prefix` inside an open write transaction.
fn remove_prefix(table: &mut Table<'_, &'static str, &'static [u8]>, prefix: &str) -> StateResult<u32> {
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            keys.push(key.value().to_string());
        }
    }
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u32)
}

fn encode<T: Serialize>(key: &str, value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StateError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    fn test_instance(deployment_id: &str, job: &str, index: u32) -> InstanceRecord {
        InstanceRecord {
            deployment_id: deployment_id.to_string(),
            job: job.to_string(),
            index,
            vm_cid: Some(format!("vm-{job}-{index}")),
            ips: BTreeMap::from([("default".to_string(), Ipv4Addr::new(10, 0, 0, 10 + index as u8))]),
            disk_cid: None,
            disk_size_mb: 0,
            datastore: None,
        }
    }

    fn test_release(version: &str) -> ReleaseVersionRecord {
        ReleaseVersionRecord {
            name: "cf".to_string(),
            version: version.to_string(),
            packages: vec![PackageRecord {
                name: "ruby".to_string(),
                version: "2.3".to_string(),
                sha1: "abc".to_string(),
                dependencies: vec![],
            }],
            templates: vec![TemplateRecord {
                name: "router".to_string(),
                version: "1".to_string(),
                sha1: "def".to_string(),
                packages: vec!["ruby".to_string()],
            }],
        }
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn find_or_create_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();

        let first = store.find_or_create_deployment("cf").unwrap();
        let second = store.find_or_create_deployment("cf").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_deployments().unwrap().len(), 1);
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let store = StateStore::open_in_memory().unwrap();

        let a = store.find_or_create_deployment("cf").unwrap();
        let b = store.find_or_create_deployment("redis").unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.get_deployment("redis").unwrap(), Some(b));
    }

    #[test]
    fn delete_deployment_removes_instances() {
        let store = StateStore::open_in_memory().unwrap();
        let record = store.find_or_create_deployment("cf").unwrap();
        store.put_instance(&test_instance(&record.id, "router", 0)).unwrap();

        assert!(store.delete_deployment("cf").unwrap());
        assert!(!store.delete_deployment("cf").unwrap());
        assert!(store.list_instances_for_deployment(&record.id).unwrap().is_empty());
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn instances_are_scoped_to_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("deployment-1", "router", 0)).unwrap();
        store.put_instance(&test_instance("deployment-1", "router", 1)).unwrap();
        store.put_instance(&test_instance("deployment-12", "nats", 0)).unwrap();

        let instances = store.list_instances_for_deployment("deployment-1").unwrap();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| i.job == "router"));
    }

    #[test]
    fn instance_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut inst = test_instance("deployment-1", "router", 0);
        store.put_instance(&inst).unwrap();

        inst.vm_cid = Some("vm-replacement".to_string());
        store.put_instance(&inst).unwrap();

        let instances = store.list_instances_for_deployment("deployment-1").unwrap();
        assert_eq!(instances, vec![inst]);
    }

    // ── Stemcells and releases ─────────────────────────────────────

    #[test]
    fn stemcell_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let stemcell = StemcellRecord {
            name: "ubuntu-trusty".to_string(),
            version: "3421.11".to_string(),
            cid: "sc-1".to_string(),
            operating_system: "ubuntu-trusty".to_string(),
            sha1: "abc".to_string(),
        };

        store.put_stemcell(&stemcell).unwrap();

        assert_eq!(store.get_stemcell("ubuntu-trusty", "3421.11").unwrap(), Some(stemcell));
        assert!(store.get_stemcell("ubuntu-trusty", "1").unwrap().is_none());
        assert_eq!(store.list_stemcells().unwrap().len(), 1);
    }

    #[test]
    fn release_versions_listed_by_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_release_version(&test_release("1")).unwrap();
        store.put_release_version(&test_release("2")).unwrap();

        assert_eq!(store.list_release_versions("cf").unwrap().len(), 2);
        assert!(store.list_release_versions("c").unwrap().is_empty());
        assert_eq!(store.get_release_version("cf", "2").unwrap(), Some(test_release("2")));
    }

    // ── Compiled packages and DNS ──────────────────────────────────

    #[test]
    fn compiled_package_keyed_by_fingerprint_and_stemcell() {
        let store = StateStore::open_in_memory().unwrap();
        let record = CompiledPackageRecord {
            package: "ruby".to_string(),
            fingerprint: "f00".to_string(),
            stemcell: "ubuntu/1".to_string(),
            blob_id: "blob-1".to_string(),
            sha1: "abc".to_string(),
        };
        store.put_compiled_package(&record).unwrap();

        assert_eq!(store.get_compiled_package("f00", "ubuntu/1").unwrap(), Some(record));
        assert!(store.get_compiled_package("f00", "ubuntu/2").unwrap().is_none());
    }

    #[test]
    fn dns_records_are_replaced_per_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        let record = |name: &str, deployment: &str| DnsRecord {
            name: name.to_string(),
            ip: Ipv4Addr::new(10, 0, 0, 5),
            deployment: deployment.to_string(),
        };

        store
            .replace_dns_records("cf", &[record("0.router.default.cf.fleet", "cf")])
            .unwrap();
        store
            .replace_dns_records("redis", &[record("0.redis.default.redis.fleet", "redis")])
            .unwrap();
        store
            .replace_dns_records("cf", &[record("1.router.default.cf.fleet", "cf")])
            .unwrap();

        let cf = store.list_dns_records("cf").unwrap();
        assert_eq!(cf.len(), 1);
        assert_eq!(cf[0].name, "1.router.default.cf.fleet");
        assert_eq!(store.list_dns_records("redis").unwrap().len(), 1);
    }

    #[test]
    fn failed_dns_replace_leaves_previous_records() {
        let store = StateStore::open_in_memory().unwrap();
        let record = |name: &str, deployment: &str| DnsRecord {
            name: name.to_string(),
            ip: Ipv4Addr::new(10, 0, 0, 5),
            deployment: deployment.to_string(),
        };
        store
            .replace_dns_records(
                "cf",
                &[record("0.router.default.cf.fleet", "cf"), record("1.router.default.cf.fleet", "cf")],
            )
            .unwrap();

        // The second record fails after the old ones were removed and the
        // first new one was inserted; none of that may be committed.
        let err = store
            .replace_dns_records(
                "cf",
                &[record("2.router.default.cf.fleet", "cf"), record("0.redis.default.redis.fleet", "redis")],
            )
            .unwrap_err();
        assert!(matches!(err, StateError::ForeignRecord { ref owner, .. } if owner == "redis"));

        let names: Vec<String> = store
            .list_dns_records("cf")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["0.router.default.cf.fleet", "1.router.default.cf.fleet"]);
        assert!(store.list_dns_records("redis").unwrap().is_empty());
    }

    #[test]
    fn unreadable_record_names_its_key() {
        let err = decode::<DnsRecord>("cf:0.router", b"not json").unwrap_err();
        assert!(err.to_string().contains("'cf:0.router'"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let created = {
            let store = StateStore::open(&db_path).unwrap();
            store.find_or_create_deployment("cf").unwrap()
        };

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.find_or_create_deployment("cf").unwrap(), created);
        let next = store.find_or_create_deployment("redis").unwrap();
        assert_ne!(next.id, created.id);
    }
}
