//! Point and tile-addressing types for the elevation map.

use serde::{Deserialize, Serialize};

/// A single LiDAR return in the shared world frame (meters).
///
/// X and Z span the ground plane; Y is elevation (Y-up). Immutable after
/// parse; points with non-finite coordinates are rejected at integration
/// time, not here.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct LidarPoint {
    /// X coordinate in meters
    pub x: f32,
    /// Elevation in meters
    pub y: f32,
    /// Z coordinate in meters
    pub z: f32,
}

impl LidarPoint {
    /// Create a new point
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when all three coordinates are finite
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Integer tile coordinate in the x/z plane.
///
/// Tile (tx, tz) covers the half-open square
/// `[tx*tile_size, (tx+1)*tile_size) x [tz*tile_size, (tz+1)*tile_size)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TileKey {
    /// Tile index along X
    pub tx: i32,
    /// Tile index along Z
    pub tz: i32,
}

impl TileKey {
    /// Create a new tile key
    #[inline]
    pub fn new(tx: i32, tz: i32) -> Self {
        Self { tx, tz }
    }

    /// Tile containing the world position (x, z)
    #[inline]
    pub fn from_world(x: f32, z: f32, tile_size: f32) -> Self {
        Self {
            tx: (x / tile_size).floor() as i32,
            tz: (z / tile_size).floor() as i32,
        }
    }

    /// World-space origin (minimum corner) of this tile
    #[inline]
    pub fn origin(&self, tile_size: f32) -> (f32, f32) {
        (self.tx as f32 * tile_size, self.tz as f32 * tile_size)
    }
}

/// Result of a ground elevation query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundSample {
    /// Estimated ground elevation (running cell mean)
    pub elevation: f32,
    /// Sample count backing the estimate, saturated at the configured cap
    pub confidence: u16,
}
