//! Persistent disk placement — capacity filter composed with weighted selection.
//!
//! Placement reads a point-in-time snapshot of free space and recommends a
//! datastore. Nothing is reserved: two concurrent placements may pick the
//! same datastore. The headroom margin absorbs that race until the disk is
//! actually created.

use rand::Rng;
use tracing::debug;

use crate::datastore::{Datastore, PlacementRequest};
use crate::error::{NoCapacity, PlacementError, PlacementResult};
use crate::filter::filter_by_headroom;
use crate::selector::weighted_random;

/// Something that can place a persistent disk of a given size.
pub trait DatastorePlacer: Send + Sync {
    fn pick_persistent_datastore(&self, size_mb: u64) -> PlacementResult<Datastore>;
}

/// Builds a placer scoped to one deployment.
///
/// Called once per plan so folder resolution sees the deployment id and
/// every placement query reads fresh inventory.
pub trait PlacerFactory: Send + Sync {
    fn for_deployment(&self, deployment_id: &str) -> PlacementResult<Box<dyn DatastorePlacer>>;
}

/// Eligible datastores paired with their selection weight (free space).
pub fn weigh_candidates(
    datastores: &[Datastore],
    size_mb: u64,
    headroom_mb: u64,
) -> Vec<(&Datastore, u64)> {
    filter_by_headroom(datastores, size_mb, headroom_mb)
        .into_iter()
        .map(|ds| (ds, ds.free_space_mb))
        .collect()
}

/// Choose a datastore for `request` among `datastores`.
///
/// Fails with [`PlacementError::NoCapacity`] listing every candidate when
/// none keeps `headroom_mb` free after the disk is placed.
pub fn pick_datastore<R>(
    datastores: &[Datastore],
    request: PlacementRequest,
    headroom_mb: u64,
    rng: &mut R,
) -> PlacementResult<Datastore>
where
    R: Rng + ?Sized,
{
    let weighted = weigh_candidates(datastores, request.size_mb, headroom_mb);

    debug!(
        kind = %request.kind,
        size_mb = request.size_mb,
        "looking for a datastore"
    );
    debug!(
        all = ?datastores.iter().map(Datastore::debug_info).collect::<Vec<_>>(),
        "all datastores"
    );
    debug!(
        available = ?weighted.iter().map(|(ds, _)| ds.debug_info()).collect::<Vec<_>>(),
        "datastores with enough space"
    );

    match weighted_random(&weighted, rng) {
        Some(selected) => {
            debug!(datastore = %selected.name, "selected datastore");
            Ok((*selected).clone())
        }
        None => Err(PlacementError::NoCapacity(NoCapacity {
            kind: request.kind,
            size_mb: request.size_mb,
            headroom_mb,
            candidates: datastores.to_vec(),
        })),
    }
}
