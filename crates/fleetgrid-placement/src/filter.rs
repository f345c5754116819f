//! Capacity filter: keep datastores that stay above headroom after a disk lands.

use crate::datastore::Datastore;

/// Whether `free_space - size >= headroom` holds for `datastore`.
pub fn has_headroom(datastore: &Datastore, size_mb: u64, headroom_mb: u64) -> bool {
    datastore
        .free_space_mb
        .checked_sub(size_mb)
        .is_some_and(|left| left >= headroom_mb)
}

/// Narrow `datastores` to those with room for `size_mb` plus headroom.
pub fn filter_by_headroom<'a, I>(datastores: I, size_mb: u64, headroom_mb: u64) -> Vec<&'a Datastore>
where
    I: IntoIterator<Item = &'a Datastore>,
{
    datastores
        .into_iter()
        .filter(|ds| has_headroom(ds, size_mb, headroom_mb))
        .collect()
}
