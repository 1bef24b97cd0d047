//! Cache-driven bake pipeline.
//!
//! [`BakePipeline`] subscribes to a [`TileCache`]. Every added or modified
//! tile schedules a bake for each cached output position that reads it,
//! keyed by that output on a [`KeyedExecutor`], so bakes of one position
//! never race and commit in submission order. An unloaded tile schedules an
//! exclusive removal barrier on its own key and re-bakes its other dependents.
//!
//! Listeners may not call back into the cache, so the scheduler keeps its own
//! set of cached positions, updated from the same events. A bake that still
//! finds its tile gone aborts.
//!
//! Workers never touch the tree. Results travel as [`TreeUpdate`]s over a
//! channel and are committed by the tree owner through [`TreeUpdateQueue`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashSet;
use farland_cache::{Snapshot, TileCache, TileListener};
use farland_coords::TilePos;
use farland_tree::LodTree;
use tracing::{debug, error, info, trace, warn};

use crate::baker::Baker;
use crate::error::PipelineError;
use crate::keyed::{ExecutorHandle, KeyedExecutor, panic_message};

/// Tuning for a [`BakePipeline`].
#[derive(Clone, Debug)]
pub struct BakeSettings {
    /// Worker threads. `0` picks one less than the number of CPUs.
    pub worker_threads: usize,
    /// Coarsest level that gets baked. Outputs above it are skipped.
    pub max_level: u8,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_level: 8,
        }
    }
}

impl BakeSettings {
    /// Worker count with `0` resolved against the machine.
    pub fn resolved_threads(&self) -> usize {
        match self.worker_threads {
            0 => num_cpus::get().saturating_sub(1).max(1),
            n => n,
        }
    }
}

/// A change for the tree owner to commit.
#[derive(Debug)]
pub enum TreeUpdate<P, const D: usize> {
    /// Store a payload, or mark the position baked-but-empty.
    Put(TilePos<D>, Option<P>),
    /// Drop the node at the position.
    Remove(TilePos<D>),
}

impl<P, const D: usize> TreeUpdate<P, D> {
    pub fn pos(&self) -> TilePos<D> {
        match self {
            Self::Put(pos, _) | Self::Remove(pos) => *pos,
        }
    }
}

/// Owner-side end of the update channel.
pub struct TreeUpdateQueue<P, const D: usize> {
    updates: Receiver<TreeUpdate<P, D>>,
}

impl<P, const D: usize> TreeUpdateQueue<P, D> {
    /// Commits up to `limit` queued updates to `tree` (`0` = all of them).
    ///
    /// Returns the number of updates applied.
    pub fn apply(&self, tree: &mut LodTree<P, D>, limit: usize) -> usize {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut applied = 0;
        while applied < limit {
            let Ok(update) = self.updates.try_recv() else {
                break;
            };
            match update {
                TreeUpdate::Put(pos, payload) => {
                    tree.put_render_data(pos, payload);
                }
                TreeUpdate::Remove(pos) => {
                    tree.remove_node(pos);
                }
            }
            applied += 1;
        }
        applied
    }

    /// Drops every queued update, releasing payloads through the tree's destructor.
    pub fn discard_pending(&self, tree: &mut LodTree<P, D>) -> usize {
        let mut discarded = 0;
        while let Ok(update) = self.updates.try_recv() {
            if let TreeUpdate::Put(_, Some(payload)) = update {
                tree.release_payload(payload);
            }
            discarded += 1;
        }
        discarded
    }

    /// Number of updates waiting to be applied.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.updates.len()
    }
}

/// Counters since the pipeline started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BakeStats {
    /// Bake jobs submitted.
    pub scheduled: u64,
    /// Bakes that produced a payload.
    pub completed: u64,
    /// Bakes that produced an empty result.
    pub empty: u64,
    /// Bakes abandoned because their tile was no longer cached.
    pub aborted: u64,
    /// Bakes or neighborhood lookups that panicked.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    empty: AtomicU64,
    aborted: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BakeStats {
        BakeStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every bake job.
struct BakeContext<S, B, const D: usize>
where
    B: Baker<D>,
{
    cache: Arc<TileCache<S, D>>,
    baker: B,
    updates: Sender<TreeUpdate<B::Output, D>>,
    counters: Counters,
    max_level: u8,
}

impl<S, B, const D: usize> BakeContext<S, B, D>
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    fn commit(&self, update: TreeUpdate<B::Output, D>) {
        // The owner may already be gone during teardown.
        let _ = self.updates.send(update);
    }

    fn bake(&self, pos: TilePos<D>) {
        match catch_unwind(AssertUnwindSafe(|| self.run_bake(pos))) {
            Ok(BakeOutcome::Aborted) => {
                trace!("Bake of {pos} aborted: tile no longer cached");
                Counters::bump(&self.counters.aborted);
            }
            Ok(BakeOutcome::Baked(Some(output))) => {
                Counters::bump(&self.counters.completed);
                self.commit(TreeUpdate::Put(pos, Some(output)));
            }
            Ok(BakeOutcome::Baked(None)) => {
                Counters::bump(&self.counters.empty);
                self.commit(TreeUpdate::Put(pos, None));
            }
            Err(panic) => {
                Counters::bump(&self.counters.failed);
                error!("Baking {pos} panicked: {}", panic_message(&*panic));
            }
        }
    }

    fn run_bake(&self, pos: TilePos<D>) -> BakeOutcome<B::Output> {
        let inputs = self.baker.bake_inputs(pos);
        let snapshots = self.cache.get_cached_batch(&inputs);

        let Some(primary) = snapshots.first().and_then(Option::as_ref) else {
            return BakeOutcome::Aborted;
        };
        if primary.is_empty() {
            return BakeOutcome::Baked(None);
        }

        let tiles: Vec<Option<S::Tile>> = snapshots
            .iter()
            .map(|snapshot| snapshot.as_ref().and_then(|s| s.decode()))
            .collect();
        BakeOutcome::Baked(self.baker.bake(pos, &tiles))
    }
}

enum BakeOutcome<O> {
    /// The tile was unloaded before the bake ran.
    Aborted,
    Baked(Option<O>),
}

/// Cache listener turning tile events into executor jobs.
struct Scheduler<S, B, const D: usize>
where
    B: Baker<D>,
{
    ctx: Arc<BakeContext<S, B, D>>,
    executor: ExecutorHandle<TilePos<D>>,
    /// Positions currently in the cache, as reported by its events.
    cached: DashSet<TilePos<D>>,
}

impl<S, B, const D: usize> Scheduler<S, B, D>
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    /// Cached outputs of `src` up to the max level.
    fn outputs(&self, src: TilePos<D>) -> Vec<TilePos<D>> {
        let baker = &self.ctx.baker;
        let outputs = match catch_unwind(AssertUnwindSafe(|| baker.bake_outputs(src))) {
            Ok(outputs) => outputs,
            Err(panic) => {
                Counters::bump(&self.ctx.counters.failed);
                error!("Listing outputs of {src} panicked: {}", panic_message(&*panic));
                return Vec::new();
            }
        };
        let max_level = self.ctx.max_level;
        outputs
            .into_iter()
            .filter(|pos| pos.level() <= max_level && self.cached.contains(pos))
            .collect()
    }

    fn schedule_bake(&self, pos: TilePos<D>) {
        let ctx = Arc::clone(&self.ctx);
        if self.executor.submit(pos, Box::new(move || ctx.bake(pos))) {
            Counters::bump(&self.ctx.counters.scheduled);
        }
    }

    fn tile_changed(&self, src: TilePos<D>) {
        self.cached.insert(src);
        let outputs = self.outputs(src);
        for pos in &outputs {
            self.schedule_bake(*pos);
        }
        debug!("Tile {src} changed, scheduled {} bakes", outputs.len());
    }
}

impl<S, B, const D: usize> TileListener<S, D> for Scheduler<S, B, D>
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    fn tile_added(&self, snapshot: &Arc<S>) {
        self.tile_changed(snapshot.pos());
    }

    fn tile_modified(&self, snapshot: &Arc<S>) {
        self.tile_changed(snapshot.pos());
    }

    fn tile_removed(&self, src: TilePos<D>) {
        self.cached.remove(&src);
        if src.level() <= self.ctx.max_level {
            let ctx = Arc::clone(&self.ctx);
            self.executor.submit_exclusive(
                src,
                Box::new(move || ctx.commit(TreeUpdate::Remove(src))),
            );
        }
        // Dependents stop reading the unloaded tile.
        for pos in self.outputs(src) {
            self.schedule_bake(pos);
        }
        debug!("Tile {src} removed");
    }
}

/// Background bake workers attached to a tile cache.
pub struct BakePipeline<S, B, const D: usize>
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    ctx: Arc<BakeContext<S, B, D>>,
    listener: Option<Arc<dyn TileListener<S, D>>>,
    executor: KeyedExecutor<TilePos<D>>,
}

impl<S, B, const D: usize> BakePipeline<S, B, D>
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    /// Starts the workers and subscribes to `cache`.
    ///
    /// Tiles already cached are replayed, so they get baked too. Returns the
    /// pipeline together with the queue the tree owner drains.
    pub fn new(
        cache: Arc<TileCache<S, D>>,
        baker: B,
        settings: &BakeSettings,
    ) -> Result<(Self, TreeUpdateQueue<B::Output, D>), PipelineError> {
        let threads = settings.resolved_threads();
        let executor = KeyedExecutor::new("bake-worker", threads)?;
        let (update_tx, update_rx) = unbounded();

        let ctx = Arc::new(BakeContext {
            cache: Arc::clone(&cache),
            baker,
            updates: update_tx,
            counters: Counters::default(),
            max_level: settings.max_level,
        });
        let listener: Arc<dyn TileListener<S, D>> = Arc::new(Scheduler {
            ctx: Arc::clone(&ctx),
            executor: executor.handle(),
            cached: DashSet::new(),
        });
        cache.add_listener(Arc::clone(&listener), true)?;

        info!(
            "Bake pipeline started: {threads} workers, max level {}",
            settings.max_level
        );
        let pipeline = Self {
            ctx,
            listener: Some(listener),
            executor,
        };
        Ok((pipeline, TreeUpdateQueue { updates: update_rx }))
    }

    /// The cache this pipeline listens to.
    #[must_use]
    pub fn cache(&self) -> &Arc<TileCache<S, D>> {
        &self.ctx.cache
    }

    #[must_use]
    pub fn stats(&self) -> BakeStats {
        self.ctx.counters.snapshot()
    }

    /// Returns `true` if no bake or removal job is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.executor.is_idle()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.executor.worker_count()
    }

    /// Detaches from the cache, discards queued jobs and joins the workers.
    ///
    /// Updates already sent stay in the [`TreeUpdateQueue`].
    pub fn shutdown(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if let Err(e) = self.ctx.cache.remove_listener(&listener, false) {
            warn!("Bake pipeline was not attached to its cache: {e}");
        }
        self.executor.shutdown();
        let stats = self.stats();
        info!(
            "Bake pipeline stopped: {} completed, {} empty, {} aborted, {} failed",
            stats.completed, stats.empty, stats.aborted, stats.failed
        );
    }
}

impl<S, B, const D: usize> Drop for BakePipeline<S, B, D>
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
