//! Fundamental types shared across the map and its consumers.

mod point;

pub use point::{GroundSample, LidarPoint, TileKey};
