//! Concurrent cache of the latest raw snapshot per tile position.
//!
//! Every change is announced to subscribed [`TileListener`]s while the
//! changed entry is still locked, so listeners observe the events of one
//! position in exactly the order the changes were applied. Events for
//! different positions carry no ordering guarantee.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use farland_coords::TilePos;
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::snapshot::Snapshot;

/// Receives change notifications from a [`TileCache`].
///
/// Callbacks run while the cache entry is locked. They must return quickly
/// and must not call back into the cache.
pub trait TileListener<S, const D: usize>: Send + Sync {
    /// A snapshot arrived for a position that had none.
    fn tile_added(&self, snapshot: &Arc<S>);

    /// A snapshot replaced an existing one.
    fn tile_modified(&self, snapshot: &Arc<S>);

    /// The snapshot at `pos` was unloaded.
    fn tile_removed(&self, pos: TilePos<D>);
}

/// Point-in-time cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached snapshots.
    pub tile_count: usize,
    /// Number of cached snapshots that carry data.
    pub non_empty_count: usize,
}

type SharedListener<S, const D: usize> = Arc<dyn TileListener<S, D>>;

/// Holds one snapshot per position and notifies listeners of every change.
pub struct TileCache<S, const D: usize> {
    tiles: DashMap<TilePos<D>, Arc<S>>,
    listeners: RwLock<Vec<SharedListener<S, D>>>,
}

impl<S: Snapshot<D>, const D: usize> TileCache<S, D> {
    /// Creates an empty cache with no listeners.
    pub fn new() -> Self {
        Self {
            tiles: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn listeners(&self) -> Vec<SharedListener<S, D>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores `snapshot`, replacing any previous one at its position.
    ///
    /// Fires `tile_added` and returns `true` if the position was not cached,
    /// otherwise fires `tile_modified` and returns `false`.
    pub fn receive_tile(&self, snapshot: S) -> bool {
        let pos = snapshot.pos();
        let snapshot = Arc::new(snapshot);
        let listeners = self.listeners();

        match self.tiles.entry(pos) {
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&snapshot));
                trace!("Tile {pos} modified");
                for listener in &listeners {
                    listener.tile_modified(&snapshot);
                }
                false
            }
            Entry::Vacant(entry) => {
                let _guard = entry.insert(Arc::clone(&snapshot));
                trace!("Tile {pos} added");
                for listener in &listeners {
                    listener.tile_added(&snapshot);
                }
                true
            }
        }
    }

    /// Removes the snapshot at `pos`, firing `tile_removed`.
    ///
    /// Returns `false` without firing anything if nothing was cached there.
    pub fn unload_tile(&self, pos: TilePos<D>) -> bool {
        let listeners = self.listeners();
        match self.tiles.entry(pos) {
            Entry::Occupied(entry) => {
                for listener in &listeners {
                    listener.tile_removed(pos);
                }
                entry.remove();
                trace!("Tile {pos} unloaded");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Subscribes `listener`. With `replay_existing`, it first receives a
    /// `tile_added` for every snapshot currently cached.
    ///
    /// Tiles changing concurrently with the replay may be reported twice.
    pub fn add_listener(
        &self,
        listener: SharedListener<S, D>,
        replay_existing: bool,
    ) -> Result<(), CacheError> {
        {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if listeners.iter().any(|l| same_listener(l, &listener)) {
                return Err(CacheError::DuplicateListener);
            }
            listeners.push(Arc::clone(&listener));
        }

        if replay_existing {
            let mut replayed = 0usize;
            for entry in self.tiles.iter() {
                listener.tile_added(entry.value());
                replayed += 1;
            }
            debug!("Replayed {replayed} cached tiles to new listener");
        }
        Ok(())
    }

    /// Unsubscribes `listener`. With `notify_removal`, it then receives a
    /// `tile_removed` for every position currently cached.
    pub fn remove_listener(
        &self,
        listener: &SharedListener<S, D>,
        notify_removal: bool,
    ) -> Result<(), CacheError> {
        {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let index = listeners
                .iter()
                .position(|l| same_listener(l, listener))
                .ok_or(CacheError::UnknownListener)?;
            listeners.remove(index);
        }

        if notify_removal {
            for entry in self.tiles.iter() {
                listener.tile_removed(*entry.key());
            }
        }
        Ok(())
    }

    /// Snapshot currently cached at `pos`.
    ///
    /// A miss is not an error: the tile may simply not have arrived yet, or
    /// may have been unloaded while the caller was working.
    #[must_use]
    pub fn get_cached(&self, pos: &TilePos<D>) -> Option<Arc<S>> {
        self.tiles.get(pos).map(|entry| Arc::clone(entry.value()))
    }

    /// [`get_cached`](Self::get_cached) for each position, in order.
    #[must_use]
    pub fn get_cached_batch(&self, positions: &[TilePos<D>]) -> Vec<Option<Arc<S>>> {
        positions.iter().map(|pos| self.get_cached(pos)).collect()
    }

    #[must_use]
    pub fn contains(&self, pos: &TilePos<D>) -> bool {
        self.tiles.contains_key(pos)
    }

    /// Every cached position. Concurrent changes may or may not be reflected.
    #[must_use]
    pub fn positions(&self) -> Vec<TilePos<D>> {
        self.tiles.iter().map(|entry| *entry.key()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Counts cached snapshots.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.tiles.iter() {
            stats.tile_count += 1;
            if !entry.value().is_empty() {
                stats.non_empty_count += 1;
            }
        }
        stats
    }

    /// Unloads every cached snapshot, firing `tile_removed` for each.
    pub fn clear(&self) {
        let positions = self.positions();
        let mut unloaded = 0usize;
        for pos in positions {
            if self.unload_tile(pos) {
                unloaded += 1;
            }
        }
        debug!("Cleared tile cache, unloaded {unloaded} tiles");
    }
}

impl<S: Snapshot<D>, const D: usize> Default for TileCache<S, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity comparison that ignores vtable pointers.
fn same_listener<S, const D: usize>(a: &SharedListener<S, D>, b: &SharedListener<S, D>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
