//! fleet-core — shared types for the FleetGrid deployment planner.
//!
//! - **`manifest`** — deployment manifest and cloud config documents
//! - **`config`** — `fleet.toml` planner configuration
//! - **`net`** — IPv4 subnet and range arithmetic
//! - **`types`** — plan options and desired instance states

pub mod config;
pub mod manifest;
pub mod net;
pub mod types;

pub use config::{ClusterMap, FleetConfig, load_document};
pub use manifest::*;
pub use net::{Ipv4Cidr, NetError};
pub use types::*;
