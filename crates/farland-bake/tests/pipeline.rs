//! End-to-end tests: tile cache events flowing through real bake workers into an LOD tree.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use farland_bake::{BakePipeline, BakeSettings, Baker, TreeUpdateQueue};
use farland_cache::{Snapshot, TileCache, TileSnapshot};
use farland_coords::{InfiniteFrustum, TilePos, TilePos2};
use farland_tree::{LodTree, SelectionOutput};

fn settings(max_level: u8) -> BakeSettings {
    BakeSettings {
        worker_threads: 4,
        max_level,
    }
}

fn wait_idle<S, B, const D: usize>(pipeline: &BakePipeline<S, B, D>)
where
    S: Snapshot<D>,
    B: Baker<D, Tile = S::Tile>,
{
    let start = Instant::now();
    while !pipeline.is_idle() {
        assert!(start.elapsed().as_secs() < 10, "Timed out waiting for bake workers");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn select_all<P, const D: usize>(tree: &LodTree<P, D>) -> Vec<TilePos<D>> {
    let mut output = SelectionOutput::new();
    tree.select(&InfiniteFrustum, |_: &TilePos<D>| false, &mut output);
    output.iter().filter_map(|id| tree.position(id)).collect()
}

/// Bakes a tile into its own value.
struct ValueBaker;

impl<const D: usize> Baker<D> for ValueBaker {
    type Tile = Arc<u32>;
    type Output = u32;

    fn bake(&self, _pos: TilePos<D>, inputs: &[Option<Arc<u32>>]) -> Option<u32> {
        inputs[0].as_deref().copied()
    }
}

/// Reports each bake start and sleeps while baking value `1`.
struct SlowFirstBaker {
    started: Sender<u32>,
}

impl Baker<2> for SlowFirstBaker {
    type Tile = Arc<u32>;
    type Output = u32;

    fn bake(&self, _pos: TilePos2, inputs: &[Option<Arc<u32>>]) -> Option<u32> {
        let value = inputs[0].as_deref().copied()?;
        let _ = self.started.send(value);
        if value == 1 {
            std::thread::sleep(Duration::from_millis(50));
        }
        Some(value)
    }
}

/// Blocks bakes of one position until the test opens the gate.
struct GatedBaker {
    gated: TilePos2,
    started: Sender<()>,
    gate: Receiver<()>,
}

impl Baker<2> for GatedBaker {
    type Tile = Arc<u32>;
    type Output = u32;

    fn bake(&self, pos: TilePos2, inputs: &[Option<Arc<u32>>]) -> Option<u32> {
        if pos == self.gated {
            let _ = self.started.send(());
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
        }
        inputs[0].as_deref().copied()
    }
}

fn tracked_tree<const D: usize>() -> (LodTree<u32, D>, Arc<Mutex<Vec<u32>>>) {
    let released = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&released);
    let tree = LodTree::with_release(16, 4, move |p| sink.lock().unwrap().push(p));
    (tree, released)
}

fn drain<const D: usize>(updates: &TreeUpdateQueue<u32, D>, tree: &mut LodTree<u32, D>) {
    updates.apply(tree, 0);
}

#[test]
fn test_single_level_zero_tile_selects_only_itself() {
    let cache = Arc::new(TileCache::<TileSnapshot<u32, 2>, 2>::new());
    let (pipeline, updates) =
        BakePipeline::new(Arc::clone(&cache), ValueBaker, &settings(6)).unwrap();
    let pos = TilePos2::new(0, [3, -7]);
    cache.receive_tile(TileSnapshot::new(pos, 9));
    wait_idle(&pipeline);

    let (mut tree, _) = tracked_tree::<2>();
    drain(&updates, &mut tree);
    assert_eq!(select_all(&tree), vec![pos]);
}

#[test]
fn test_two_siblings_replace_their_parent() {
    let cache = Arc::new(TileCache::<TileSnapshot<u32, 1>, 1>::new());
    let (pipeline, updates) =
        BakePipeline::new(Arc::clone(&cache), ValueBaker, &settings(6)).unwrap();
    let left = TilePos::new(0, [0]);
    let right = TilePos::new(0, [1]);
    let parent = TilePos::new(1, [0]);
    cache.receive_tile(TileSnapshot::new(parent, 3));
    cache.receive_tile(TileSnapshot::new(left, 1));
    cache.receive_tile(TileSnapshot::new(right, 2));
    wait_idle(&pipeline);

    let (mut tree, _) = tracked_tree::<1>();
    drain(&updates, &mut tree);
    assert!(tree.get(&parent).is_some());
    assert!(!tree.is_selectable(&parent));
    assert_eq!(select_all(&tree), vec![left, right]);

    // Unloading one sibling brings the parent back.
    cache.unload_tile(right);
    wait_idle(&pipeline);
    drain(&updates, &mut tree);
    assert_eq!(select_all(&tree), vec![left, parent]);
}

#[test]
fn test_complete_quad_replaces_parent() {
    let cache = Arc::new(TileCache::<TileSnapshot<u32, 2>, 2>::new());
    let (pipeline, updates) =
        BakePipeline::new(Arc::clone(&cache), ValueBaker, &settings(6)).unwrap();
    let parent = TilePos2::new(1, [2, 2]);
    cache.receive_tile(TileSnapshot::new(parent, 5));
    for child in parent.children() {
        cache.receive_tile(TileSnapshot::new(child, 1));
    }
    wait_idle(&pipeline);

    let (mut tree, _) = tracked_tree::<2>();
    drain(&updates, &mut tree);
    let mut got = select_all(&tree);
    got.sort();
    let mut expected: Vec<_> = parent.children().collect();
    expected.sort();
    assert_eq!(got, expected);
}

#[test]
fn test_same_position_commits_in_submission_order() {
    let cache = Arc::new(TileCache::<TileSnapshot<u32, 2>, 2>::new());
    let (started_tx, started_rx) = unbounded();
    let baker = SlowFirstBaker {
        started: started_tx,
    };
    let (pipeline, updates) = BakePipeline::new(Arc::clone(&cache), baker, &settings(6)).unwrap();
    let pos = TilePos2::new(0, [0, 0]);

    cache.receive_tile(TileSnapshot::new(pos, 1));
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    cache.receive_tile(TileSnapshot::new(pos, 2));
    wait_idle(&pipeline);

    let (mut tree, released) = tracked_tree::<2>();
    drain(&updates, &mut tree);
    let id = tree.get(&pos).unwrap();
    assert_eq!(tree.payload(id), Some(&2));
    // The slow first result was committed, then overwritten by the second.
    assert_eq!(*released.lock().unwrap(), vec![1]);
}

#[test]
fn test_unload_during_bake_never_leaves_payload() {
    for delay_us in [0u64, 50, 500, 2_000] {
        let cache = Arc::new(TileCache::<TileSnapshot<u32, 2>, 2>::new());
        let gated = TilePos2::new(0, [4, 4]);
        let (started_tx, started_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded(1);
        let baker = GatedBaker {
            gated,
            started: started_tx,
            gate: gate_rx,
        };
        let (pipeline, updates) =
            BakePipeline::new(Arc::clone(&cache), baker, &settings(6)).unwrap();
        let (mut tree, _) = tracked_tree::<2>();

        cache.receive_tile(TileSnapshot::new(gated, 7));
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("bake should start");

        // Release the in-flight bake concurrently with the unload.
        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_micros(delay_us));
            let _ = gate_tx.send(());
        });
        assert!(cache.unload_tile(gated));
        opener.join().unwrap();

        wait_idle(&pipeline);
        drain(&updates, &mut tree);
        assert!(tree.get(&gated).is_none(), "payload survived unload (delay {delay_us}us)");

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(updates.pending(), 0);
    }
}

#[test]
fn test_concurrent_churn_settles_to_empty_tree() {
    let cache = Arc::new(TileCache::<TileSnapshot<u32, 2>, 2>::new());
    let (pipeline, updates) =
        BakePipeline::new(Arc::clone(&cache), ValueBaker, &settings(2)).unwrap();

    let producers: Vec<_> = (0..4u32)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    let level = (i % 3) as u8;
                    let x = ((i * 7 + t) % 6) as i32;
                    let z = ((i * 3 + t * 5) % 6) as i32;
                    let pos = TilePos2::new(level, [x, z]);
                    if (i + t) % 4 == 0 {
                        cache.unload_tile(pos);
                    } else {
                        cache.receive_tile(TileSnapshot::new(pos, i + 1));
                    }
                }
            })
        })
        .collect();

    let (mut tree, _) = tracked_tree::<2>();
    for producer in producers {
        while !producer.is_finished() {
            updates.apply(&mut tree, 64);
            std::thread::sleep(Duration::from_micros(100));
        }
        producer.join().unwrap();
    }

    wait_idle(&pipeline);
    drain(&updates, &mut tree);
    assert!(!tree.is_empty());

    cache.clear();
    wait_idle(&pipeline);
    drain(&updates, &mut tree);
    assert!(tree.is_empty(), "{} nodes left after unloading everything", tree.len());
    assert_eq!(pipeline.stats().failed, 0);
}
