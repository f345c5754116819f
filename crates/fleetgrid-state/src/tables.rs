//! redb table definitions for the FleetGrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types).

use redb::TableDefinition;

/// Deployment records keyed by canonical deployment name.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Instance records keyed by `{deployment_id}:{job}/{index}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Stemcells keyed by `{name}/{version}`.
pub const STEMCELLS: TableDefinition<&str, &[u8]> = TableDefinition::new("stemcells");

/// Release versions keyed by `{name}/{version}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Compiled packages keyed by `{fingerprint}:{stemcell_name}/{stemcell_version}`.
pub const COMPILED_PACKAGES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("compiled_packages");

/// DNS records keyed by `{deployment}:{fqdn}`.
pub const DNS_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("dns_records");

/// Counters (deployment id sequence).
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Sequence key for deployment ids.
pub const DEPLOYMENT_SEQUENCE: &str = "deployment_id";
