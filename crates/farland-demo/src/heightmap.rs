//! Synthetic heightmap tiles and the baker that turns them into terrain patches.
//!
//! Every level gets its own source tiles sampled at that level's resolution,
//! so a coarse tile is a downsampled view of the same fBm terrain. Tiles that
//! lie entirely below sea level are published as empty.

use farland_bake::Baker;
use farland_cache::TileSnapshot;
use farland_coords::TilePos2;
use noise::{NoiseFn, Simplex};

/// Samples along one edge of a tile. Adjacent tiles share their border row.
pub const TILE_SAMPLES: usize = 17;

/// Same-level tiles read besides the primary.
const SAME_LEVEL_NEIGHBORS: u8 = 3;

/// Snapshot type stored in the demo cache.
pub type HeightmapSnapshot = TileSnapshot<Heightmap, 2>;

/// Noise parameters for the generated world.
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub octaves: u32,
    /// Frequency of the broadest octave, in cycles per world unit.
    pub base_frequency: f64,
    /// Amplitude of the broadest octave, in world units.
    pub amplitude: f64,
    /// Tiles whose highest sample is below this are empty.
    pub sea_level: f32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 5,
            base_frequency: 1.0 / 512.0,
            amplitude: 120.0,
            sea_level: -20.0,
        }
    }
}

/// A square grid of `TILE_SAMPLES` x `TILE_SAMPLES` heights, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Heightmap {
    samples: Vec<f32>,
}

impl Heightmap {
    #[must_use]
    pub fn height(&self, x: usize, y: usize) -> f32 {
        self.samples[y * TILE_SAMPLES + x]
    }

    /// Lowest and highest sample.
    #[must_use]
    pub fn range(&self) -> (f32, f32) {
        self.samples
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &h| (lo.min(h), hi.max(h)))
    }
}

/// Deterministic fBm terrain source.
pub struct TerrainGenerator {
    noise: Simplex,
    params: TerrainParams,
    tile_shift: u8,
}

impl TerrainGenerator {
    pub fn new(params: TerrainParams, tile_shift: u8) -> Self {
        Self {
            noise: Simplex::new(params.seed),
            params,
            tile_shift,
        }
    }

    /// Height at a world coordinate.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;

        for _ in 0..self.params.octaves {
            total += self.noise.get([x * frequency, y * frequency]) * amplitude;
            frequency *= 2.0;
            amplitude *= 0.5;
        }

        total
    }

    /// Builds the snapshot for `pos`, empty when the tile is all ocean.
    pub fn generate(&self, pos: TilePos2) -> HeightmapSnapshot {
        let bounds = pos.bounding_box(self.tile_shift);
        let spacing = bounds.extents()[0] as f64 / (TILE_SAMPLES - 1) as f64;
        let origin = [bounds.min[0] as f64, bounds.min[1] as f64];

        let mut samples = Vec::with_capacity(TILE_SAMPLES * TILE_SAMPLES);
        for y in 0..TILE_SAMPLES {
            for x in 0..TILE_SAMPLES {
                let wx = origin[0] + x as f64 * spacing;
                let wy = origin[1] + y as f64 * spacing;
                samples.push(self.sample(wx, wy) as f32);
            }
        }

        let heightmap = Heightmap { samples };
        if heightmap.range().1 < self.params.sea_level {
            TileSnapshot::empty(pos)
        } else {
            TileSnapshot::new(pos, heightmap)
        }
    }

    /// Every tile position at `level` covering a square of `radius_tiles`
    /// level-0 tiles around the origin.
    pub fn level_positions(radius_tiles: u32, level: u8) -> Vec<TilePos2> {
        let step = 1i64 << level;
        let extent = ((i64::from(radius_tiles) + step - 1) / step) as i32;
        let mut positions = Vec::new();
        for y in -extent..extent {
            for x in -extent..extent {
                positions.push(TilePos2::new(level, [x, y]));
            }
        }
        positions
    }
}

/// Render-ready summary of a baked tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainPatch {
    pub vertex_count: usize,
    pub min_height: f32,
    pub max_height: f32,
    /// Edges with no same-level neighbor, closed with a skirt.
    pub skirt_edges: u8,
    /// Whether the parent tile was available for geomorphing.
    pub has_parent: bool,
}

/// Bakes a heightmap and its right/top neighbors into a [`TerrainPatch`].
#[derive(Default)]
pub struct TerrainBaker;

impl Baker<2> for TerrainBaker {
    type Tile = std::sync::Arc<Heightmap>;
    type Output = TerrainPatch;

    fn bake(&self, pos: TilePos2, inputs: &[Option<Self::Tile>]) -> Option<TerrainPatch> {
        let primary = inputs.first()?.as_ref()?;
        let (mut min_height, mut max_height) = primary.range();

        // Inputs near the coordinate edge are fewer, so match them by position.
        let mut present_neighbors = 0u8;
        let mut has_parent = false;
        for (input, tile) in self.bake_inputs(pos).iter().zip(inputs).skip(1) {
            let Some(tile) = tile else {
                continue;
            };
            if input.level() > pos.level() {
                has_parent = true;
                continue;
            }
            let (lo, hi) = tile.range();
            min_height = min_height.min(lo);
            max_height = max_height.max(hi);
            present_neighbors += 1;
        }
        let skirt_edges = SAME_LEVEL_NEIGHBORS - present_neighbors;

        Some(TerrainPatch {
            vertex_count: TILE_SAMPLES * TILE_SAMPLES + usize::from(skirt_edges) * TILE_SAMPLES,
            min_height,
            max_height,
            skirt_edges,
            has_parent,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
