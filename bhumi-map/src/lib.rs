//! # Bhumi-Map: Tiled Quadtree Elevation Mapping
//!
//! A persistent 2.5D elevation map fed by LiDAR point scans from mobile
//! sensor platforms. The world's x/z plane is divided into fixed-size
//! square tiles, each backed by an adaptive quadtree of per-cell elevation
//! statistics. An agree/disagree update policy separates measurement noise
//! from genuine terrain change, and dirty tiles are exported as dense
//! height grids under a per-frame byte budget.
//!
//! ## Quick Start
//!
//! ```rust
//! use bhumi_map::{ElevationMap, core::LidarPoint};
//!
//! let mut map = ElevationMap::default();
//! map.integrate_scan(&[LidarPoint::new(0.5, 1.2, 0.5)], 0.0);
//!
//! for update in map.consume_dirty_tiles_budgeted(10 * 1024 * 1024) {
//!     // hand update.heights to the renderer
//!     assert_eq!(update.heights.len(), 129 * 129);
//! }
//!
//! let ground = map.get_ground_at(0.5, 0.5).unwrap();
//! assert!((ground.elevation - 1.2).abs() < 1e-6);
//! ```
//!
//! ## Data Flow
//!
//! ```text
//!   completed scan (Vec<LidarPoint>, timestamp)
//!            │ integrate_scan()
//!            ▼
//!   ┌──────────────────┐    per point: tile lookup (lazy create),
//!   │   ElevationMap   │    quadtree descent (lazy split), then the
//!   │  BTreeMap<TileKey│    agree / disagree / gray-zone cell policy
//!   │       -> Tile>   │
//!   └────────┬─────────┘
//!            │ consume_dirty_tiles[_budgeted]()
//!            ▼
//!   TileUpdate { key, tile_size, heights: 129 x 129 }  -> renderer
//! ```
//!
//! ## Coordinate Frame
//!
//! World coordinates are meters with Y up: X and Z span the ground plane
//! and `LidarPoint::y` is elevation. Tile (tx, tz) covers
//! `[tx*tile_size, (tx+1)*tile_size)` on each ground axis.
//!
//! ## Concurrency
//!
//! The map is intentionally single-threaded: the fusion driver serializes
//! `integrate_scan`, the consume calls, and `get_ground_at`. Wrap it in a
//! lock externally if concurrent reads are needed.

pub mod cell;
pub mod config;
pub mod core;
pub mod map;
pub mod quadtree;
pub mod tile;

pub use config::{ConfigError, ElevationConfig};
pub use map::{ElevationMap, ElevationStats, TileUpdate};
