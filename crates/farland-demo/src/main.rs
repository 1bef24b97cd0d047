//! Headless demo driving the farland bake pipeline over synthetic terrain.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p farland-demo -- --frames 300 --workers 4`.

mod heightmap;

use std::f64::consts::TAU;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use farland_bake::{BakePipeline, BakeSettings, PipelineError};
use farland_cache::TileCache;
use farland_config::{CliArgs, Config, default_config_dir};
use farland_coords::{TileAabb, TilePos2};
use farland_tree::{HAS_DATA, LodTree, SelectionOutput};
use tracing::{debug, error, info};

use heightmap::{HeightmapSnapshot, TerrainBaker, TerrainGenerator, TerrainParams, TerrainPatch};

const FRAME_TIME: Duration = Duration::from_millis(16);

/// Half-width of the observer's view box in level-0 tiles.
const VIEW_RADIUS_TILES: i64 = 6;

/// Frames between progress reports.
const REPORT_EVERY: u32 = 30;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config
        .debug
        .log_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("logs"));
    farland_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<(), PipelineError> {
    let tree_config = &config.tree;
    let demo = &config.demo;

    let cache: Arc<TileCache<HeightmapSnapshot, 2>> = Arc::new(TileCache::new());
    let settings = BakeSettings {
        worker_threads: config.bake.worker_threads,
        max_level: tree_config.max_level,
    };
    let (mut pipeline, updates) = BakePipeline::new(Arc::clone(&cache), TerrainBaker, &settings)?;

    let released = Arc::new(AtomicUsize::new(0));
    let release_counter = Arc::clone(&released);
    let mut tree = LodTree::with_release(
        tree_config.root_level,
        tree_config.tile_shift,
        move |_: TerrainPatch| {
            release_counter.fetch_add(1, Ordering::Relaxed);
        },
    );

    let generator = TerrainGenerator::new(
        TerrainParams {
            seed: demo.seed,
            ..Default::default()
        },
        tree_config.tile_shift,
    );

    let started = Instant::now();
    let mut streamed = 0;
    for level in 0..=tree_config.max_level {
        for pos in TerrainGenerator::level_positions(demo.world_radius_tiles, level) {
            if pos.is_valid(tree_config.root_level) {
                cache.receive_tile(generator.generate(pos));
                streamed += 1;
            }
        }
    }
    let cache_stats = cache.stats();
    info!(
        "Streamed {streamed} tiles ({} with terrain) in {:.1?}",
        cache_stats.non_empty_count,
        started.elapsed()
    );

    let mut selection = SelectionOutput::new();
    let mut unloaded: Vec<TilePos2> = Vec::new();
    let tile_size = 1i64 << tree_config.tile_shift;

    for frame in 0..demo.frames {
        let applied = updates.apply(&mut tree, config.bake.max_updates_per_frame);

        let view = observer_view(frame, demo.frames, demo.world_radius_tiles, tile_size);
        selection.clear();
        tree.select(&view, |_: &TilePos2| false, &mut selection);
        let vertices: usize = selection
            .iter()
            .filter_map(|id| tree.payload(id))
            .map(|patch| patch.vertex_count)
            .sum();
        debug!(
            "Frame {frame}: applied {applied} updates, selected {} nodes ({vertices} vertices)",
            selection.len()
        );

        if demo.unload_every > 0 && frame > 0 && frame % demo.unload_every == 0 {
            for pos in unloaded.drain(..) {
                cache.receive_tile(generator.generate(pos));
            }
            let column = unload_column(frame / demo.unload_every, demo.world_radius_tiles);
            unloaded = cache
                .positions()
                .into_iter()
                .filter(|pos| pos.level() == 0 && pos.coord(0) == column)
                .collect();
            for pos in &unloaded {
                cache.unload_tile(*pos);
            }
            info!("Frame {frame}: unloaded {} tiles in column {column}", unloaded.len());
        }

        if frame % REPORT_EVERY == 0 {
            let stats = pipeline.stats();
            info!(
                "Frame {frame}: tree {} nodes, {} pending updates, {} bakes completed, {} selected",
                tree.len(),
                updates.pending(),
                stats.completed,
                selection.len()
            );
        }

        std::thread::sleep(FRAME_TIME);
    }

    pipeline.shutdown();
    let discarded = updates.discard_pending(&mut tree);

    let mut with_data = 0;
    tree.for_each(HAS_DATA, |_, _, _, _| with_data += 1);
    let live = tree.len();
    let stats = pipeline.stats();
    drop(tree);

    info!(
        "Done: {} bakes scheduled, {} failed, {discarded} updates discarded",
        stats.scheduled, stats.failed
    );
    info!(
        "Released {} payloads from {live} tree nodes ({with_data} with payload)",
        released.load(Ordering::Relaxed)
    );
    Ok(())
}

/// Box around an observer circling the world center.
fn observer_view(frame: u32, frames: u32, radius_tiles: u32, tile_size: i64) -> TileAabb<2> {
    let angle = TAU * f64::from(frame) / f64::from(frames.max(1));
    let orbit = f64::from(radius_tiles) * tile_size as f64 * 0.5;
    let center = [(angle.cos() * orbit) as i64, (angle.sin() * orbit) as i64];
    let half = VIEW_RADIUS_TILES * tile_size;
    TileAabb::new(
        [center[0] - half, center[1] - half],
        [center[0] + half, center[1] + half],
    )
}

/// Level-0 column swept by the `round`-th unload.
fn unload_column(round: u32, radius_tiles: u32) -> i32 {
    let width = (radius_tiles * 2).max(1);
    (round % width) as i32 - radius_tiles as i32
}
