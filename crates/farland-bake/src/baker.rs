//! The bake function and the dependency neighborhoods around it.
//!
//! A tile at `p` is baked from the `2^D` same-level tiles `p + {0,1}^D` plus
//! the `2^D` tiles one level up that surround its parent. Levels refine 2:1,
//! so [`default_bake_outputs`] is the exact inverse of [`default_bake_inputs`]:
//! every output that reads `s` lists `s` among its inputs and vice versa.

use farland_coords::{TilePos, offsets};

/// Turns cached raw tiles into render payloads.
///
/// Implementations must be pure and may be called concurrently for
/// different positions.
pub trait Baker<const D: usize>: Send + Sync + 'static {
    /// Decoded input tile, matching the cache's snapshot type.
    type Tile;
    /// Render payload stored in the tree.
    type Output: Send + 'static;

    /// Positions whose payload may read the raw tile at `src`.
    fn bake_outputs(&self, src: TilePos<D>) -> Vec<TilePos<D>> {
        default_bake_outputs(src)
    }

    /// Raw tiles the payload at `pos` is baked from. The first entry must be `pos`.
    fn bake_inputs(&self, pos: TilePos<D>) -> Vec<TilePos<D>> {
        default_bake_inputs(pos)
    }

    /// Bakes the payload for `pos`.
    ///
    /// `inputs` lines up with [`bake_inputs`](Self::bake_inputs); entries are
    /// `None` where the tile is not cached or is empty. Returning `None` marks
    /// `pos` as baked but empty.
    fn bake(&self, pos: TilePos<D>, inputs: &[Option<Self::Tile>]) -> Option<Self::Output>;
}

/// `pos` first, then the rest of `pos + {0,1}^D`, then `parent + {0,1}^D` one level up.
///
/// Neighbors past the edge of the `i32` coordinate range are left out, so the
/// list is shorter for tiles on that edge.
pub fn default_bake_inputs<const D: usize>(pos: TilePos<D>) -> Vec<TilePos<D>> {
    let parent = pos.parent();
    let unit = offsets::<D>(0, 1);
    let mut inputs = Vec::with_capacity(unit.len() * 2);
    inputs.extend(unit.iter().filter_map(|&o| pos.offset(o)));
    inputs.extend(unit.iter().filter_map(|&o| parent.offset(o)));
    inputs
}

/// `src - {0,1}^D` at the same level, then `2 * src + {-2..=1}^D` one level down.
///
/// Positions outside the `i32` coordinate range are left out.
pub fn default_bake_outputs<const D: usize>(src: TilePos<D>) -> Vec<TilePos<D>> {
    let mut outputs: Vec<_> = offsets::<D>(-1, 0)
        .into_iter()
        .rev()
        .filter_map(|o| src.offset(o))
        .collect();
    if src.level() > 0 {
        let finer = offsets::<D>(-2, 1)
            .into_iter()
            .filter_map(|o| finer_pos(src, o));
        outputs.extend(finer);
    }
    outputs
}

/// `2 * src + delta` one level down, if every axis fits in `i32`.
fn finer_pos<const D: usize>(src: TilePos<D>, delta: [i32; D]) -> Option<TilePos<D>> {
    let mut coords = [0; D];
    for (axis, c) in coords.iter_mut().enumerate() {
        let wide = 2 * i64::from(src.coord(axis)) + i64::from(delta[axis]);
        *c = i32::try_from(wide).ok()?;
    }
    Some(TilePos::new(src.level() - 1, coords))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use farland_coords::{TilePos2, TilePos3};

    use super::*;

    #[test]
    fn test_inputs_start_with_self() {
        let pos = TilePos2::new(2, [5, -3]);
        let inputs = default_bake_inputs(pos);
        assert_eq!(inputs.len(), 8);
        assert_eq!(inputs[0], pos);
        assert!(inputs[..4].iter().all(|p| p.level() == 2));
        assert!(inputs[4..].iter().all(|p| p.level() == 3));
        assert_eq!(inputs[4], pos.parent());
    }

    #[test]
    fn test_outputs_start_with_self() {
        let src = TilePos3::new(1, [0, 4, -4]);
        let outputs = default_bake_outputs(src);
        assert_eq!(outputs[0], src);
        assert_eq!(outputs.len(), 8 + 64);
        assert_eq!(default_bake_outputs(TilePos3::new(0, [1, 1, 1])).len(), 8);
    }

    #[test]
    fn test_outputs_are_inverse_of_inputs() {
        for src in [
            TilePos2::new(0, [0, 0]),
            TilePos2::new(1, [3, -2]),
            TilePos2::new(4, [-1, -1]),
        ] {
            let outputs = default_bake_outputs(src);
            for out in &outputs {
                assert!(default_bake_inputs(*out).contains(&src), "{out} does not read {src}");
            }

            // Every position around src that reads it must be listed.
            for level in src.level().saturating_sub(1)..=src.level() {
                let scale = 1 << (src.level() - level);
                let center = src.coords().map(|c| c * scale);
                for o in offsets::<2>(-4, 4) {
                    let Some(p) = TilePos2::new(level, center).offset(o) else {
                        continue;
                    };
                    if default_bake_inputs(p).contains(&src) {
                        assert!(outputs.contains(&p), "{p} reads {src} but is not an output");
                    }
                }
            }
        }
    }

    #[test]
    fn test_neighborhoods_at_coordinate_limits() {
        let max = TilePos2::new(0, [i32::MAX, 0]);
        let inputs = default_bake_inputs(max);
        assert_eq!(inputs[0], max);
        // [MAX, 0] and [MAX, 1] at level 0, then the four around the parent.
        assert_eq!(inputs.len(), 2 + 4);
        assert!(inputs[2..].iter().all(|p| p.level() == 1));

        let min = TilePos2::new(0, [i32::MIN, 0]);
        let outputs = default_bake_outputs(min);
        assert_eq!(outputs, vec![min, TilePos2::new(0, [i32::MIN, -1])]);

        // Half of the finer block under a coarse edge tile is out of range.
        let coarse = TilePos2::new(1, [-(1 << 30), (1 << 30) - 1]);
        let outputs = default_bake_outputs(coarse);
        assert_eq!(outputs[0], coarse);
        assert_eq!(outputs.len(), 4 + 8);
        for out in &outputs {
            assert!(default_bake_inputs(*out).contains(&coarse), "{out} does not read {coarse}");
        }
    }
}
