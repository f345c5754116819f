//! FleetGrid resource model and persistent disk placement.
//!
//! A [`Datacenter`] owns [`Cluster`]s, a cluster owns [`Datastore`]s. The
//! model is rebuilt from live inventory (through an injected
//! [`InfrastructureClient`]) on every query and never cached. Placement
//! reads that snapshot and recommends a datastore; it reserves nothing.
//!
//! # Components
//!
//! - **`selector`** — Weighted random choice over weighted candidates
//! - **`filter`** — Headroom filter over datastores
//! - **`placer`** — Filter + selector composition for persistent disks
//! - **`datacenter`** / **`cluster`** / **`datastore`** — Inventory model
//! - **`folder`** — VM and template folder resolution
//! - **`client`** — Infrastructure client trait and a static inventory

pub mod client;
pub mod cluster;
pub mod datacenter;
pub mod datastore;
pub mod error;
pub mod filter;
pub mod folder;
pub mod placer;
pub mod selector;

pub use client::{InfrastructureClient, ManagedObject, ObjectKind, PropertyMap, StaticInventory};
pub use cluster::Cluster;
pub use datacenter::{Datacenter, DatacenterPlacerFactory};
pub use datastore::{Datastore, DiskKind, PlacementRequest};
pub use error::{NoCapacity, PlacementError, PlacementResult};
pub use filter::{filter_by_headroom, has_headroom};
pub use folder::Folder;
pub use placer::{DatastorePlacer, PlacerFactory, pick_datastore};
pub use selector::weighted_random;
