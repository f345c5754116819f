//! fleetgrid-state — embedded fleet state store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds everything the planner
//! reconciles a manifest against: deployment records, the instances a
//! deployment currently runs, uploaded stemcells and release versions,
//! compiled packages, and published DNS records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{deployment_id}:{job}/{index}`, `{name}/{version}`)
//! enable prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across concurrent deployment requests.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
