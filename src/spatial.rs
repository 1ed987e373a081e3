//! Pure spatial math: world ↔ chunk coordinate mapping, box-to-chunk-set
//! enumeration, neighborhood enumeration.
//!
//! Everything here is stateless; the horizontal chunk size is a per-layer
//! parameter while the vertical extent is the global [`CHUNK_HEIGHT`].

use crate::types::{Aabb, ChunkKey, Vec3};

/// Vertical chunk extent in world units, independent of horizontal size.
pub const CHUNK_HEIGHT: f32 = 256.0;

/// Epsilon that keeps a box whose max lands exactly on a chunk boundary
/// from counting the next cell.
const BOUNDARY_EPSILON: f32 = 1e-4;

/// Map a world position to its chunk cell.
///
/// `world_to_chunk({32, 256, 32}, 32) == (1, 1, 1)`;
/// `world_to_chunk({-1, -1, -1}, s) == (-1, -1, -1)`.
pub fn world_to_chunk(pos: Vec3, chunk_size: f32) -> (i32, i32, i32) {
    (
        (pos.x / chunk_size).floor() as i32,
        (pos.y / CHUNK_HEIGHT).floor() as i32,
        (pos.z / chunk_size).floor() as i32,
    )
}

/// World-space origin (minimum corner) of a chunk cell.
pub fn chunk_to_world(cx: i32, cy: i32, cz: i32, chunk_size: f32) -> Vec3 {
    Vec3::new(
        cx as f32 * chunk_size,
        cy as f32 * CHUNK_HEIGHT,
        cz as f32 * chunk_size,
    )
}

/// World-space center of a chunk cell.
pub fn chunk_center(cx: i32, cy: i32, cz: i32, chunk_size: f32) -> Vec3 {
    chunk_to_world(cx, cy, cz, chunk_size)
        + Vec3::new(chunk_size * 0.5, CHUNK_HEIGHT * 0.5, chunk_size * 0.5)
}

/// Inclusive cell range covered by `[min, max)` on one axis.
///
/// A narrow box that straddles the origin on the axis with a span smaller
/// than the cell size clamps to the origin cell; a convenience for small
/// local volumes, which otherwise would always count two cells.
fn axis_cells(min: f32, max: f32, size: f32) -> (i32, i32) {
    if min < 0.0 && max > 0.0 && (max - min) < size {
        return (0, 0);
    }
    let lo = (min / size).floor() as i32;
    let hi = (((max - BOUNDARY_EPSILON).max(min)) / size).floor() as i32;
    (lo, hi.max(lo))
}

/// Enumerate chunk cells whose half-open extent overlaps `bounds`.
pub fn intersecting_chunks(layer_id: &str, bounds: &Aabb, chunk_size: f32) -> Vec<ChunkKey> {
    let (x0, x1) = axis_cells(bounds.min.x, bounds.max.x, chunk_size);
    let (y0, y1) = axis_cells(bounds.min.y, bounds.max.y, CHUNK_HEIGHT);
    let (z0, z1) = axis_cells(bounds.min.z, bounds.max.z, chunk_size);

    let mut out = Vec::new();
    for cx in x0..=x1 {
        for cy in y0..=y1 {
            for cz in z0..=z1 {
                out.push(ChunkKey::new(layer_id, cx, cy, cz));
            }
        }
    }
    out
}

/// Enumerate the inclusive cube `[-r..r]³` around `center`.
/// `r = 0` yields just the center; `r = 1` yields 27 cells.
pub fn neighbors(center: (i32, i32, i32), r: i32) -> Vec<(i32, i32, i32)> {
    let r = r.max(0);
    let (cx, cy, cz) = center;
    let mut out = Vec::with_capacity(((2 * r + 1) as usize).pow(3));
    for dx in -r..=r {
        for dy in -r..=r {
            for dz in -r..=r {
                out.push((cx + dx, cy + dy, cz + dz));
            }
        }
    }
    out
}

/// Chunk neighborhood covering a world-space radius around a position.
///
/// The world radius converts to a chunk radius via `ceil(r / chunk_size)`.
pub fn chunks_in_radius(
    layer_id: &str,
    center_pos: Vec3,
    r_world: f32,
    chunk_size: f32,
) -> Vec<ChunkKey> {
    let center = world_to_chunk(center_pos, chunk_size);
    let r = (r_world.max(0.0) / chunk_size).ceil() as i32;
    neighbors(center, r)
        .into_iter()
        .map(|(cx, cy, cz)| ChunkKey::new(layer_id, cx, cy, cz))
        .collect()
}
