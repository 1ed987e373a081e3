//! Core world types shared across all modules.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Entities are addressed by stable, opaque string ids everywhere.
pub type EntityId = String;

/// Sessions (connected clients) are likewise addressed by string ids.
pub type SessionId = String;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction; zero-length input stays zero.
    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len <= f32::EPSILON {
            Self::zero()
        } else {
            Self::new(self.x / len, self.y / len, self.z / len)
        }
    }

    pub fn scale(&self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*other - *self).length()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Axis-aligned bounding box
// ---------------------------------------------------------------------------

/// Axis-aligned box with `min` component-wise ≤ `max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box of `half` half-extents centered at `center`.
    pub fn centered(center: Vec3, half: Vec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max).scale(0.5)
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min).scale(0.5)
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Minkowski expansion: grow each face outward by `half`.
    pub fn expanded(&self, half: Vec3) -> Self {
        Self {
            min: self.min - half,
            max: self.max + half,
        }
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

// ---------------------------------------------------------------------------
// Chunk addressing
// ---------------------------------------------------------------------------

/// Address of one spatial cell: layer id plus integer chunk coordinates.
///
/// The canonical string form is `"<layer>:<cx>,<cy>,<cz>"` and round-trips
/// bit-exactly through [`ChunkKey::from_str`]. Layer ids therefore must not
/// contain `:`.
///
/// The wire object form is `{layerId, cx, cy, cz}`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkKey {
    pub layer_id: String,
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkKey {
    pub fn new(layer_id: impl Into<String>, cx: i32, cy: i32, cz: i32) -> Self {
        Self {
            layer_id: layer_id.into(),
            cx,
            cy,
            cz,
        }
    }

    pub fn coords(&self) -> (i32, i32, i32) {
        (self.cx, self.cy, self.cz)
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{},{},{}", self.layer_id, self.cx, self.cy, self.cz)
    }
}

/// Parse error for the canonical chunk-key string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid chunk key '{0}'")]
pub struct ChunkKeyParseError(pub String);

impl FromStr for ChunkKey {
    type Err = ChunkKeyParseError;

    /// Accepts exactly the strings matched by
    /// `^([^:]+):(-?\d+),(-?\d+),(-?\d+)$`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ChunkKeyParseError(s.to_owned());

        let (layer, coords) = s.split_once(':').ok_or_else(err)?;
        if layer.is_empty() || coords.contains(':') {
            return Err(err());
        }

        let mut parts = coords.split(',');
        let mut next = || -> Result<i32, ChunkKeyParseError> {
            let raw = parts.next().ok_or_else(err)?;
            // `i32::from_str` also admits a leading '+', which the canonical
            // form does not.
            if raw.is_empty() || raw.starts_with('+') {
                return Err(err());
            }
            raw.parse::<i32>().map_err(|_| err())
        };

        let cx = next()?;
        let cy = next()?;
        let cz = next()?;
        if parts.next().is_some() {
            return Err(err());
        }

        Ok(ChunkKey::new(layer, cx, cy, cz))
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldStats {
    pub entities: usize,
    pub players: usize,
    pub layers: usize,
    pub loaded_chunks: usize,
    pub retained_chunks: usize,
    pub sessions: usize,
    pub total_ticks: u64,
}
