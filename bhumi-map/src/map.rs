//! The tiled elevation map: scan integration, dirty-tile export, queries.

use std::collections::BTreeMap;

use crate::cell::IntegrationParams;
use crate::config::{ConfigError, ElevationConfig};
use crate::core::{GroundSample, LidarPoint, TileKey};
use crate::tile::Tile;

/// A rebuilt height grid for one tile, ready for upload.
#[derive(Clone, Debug)]
pub struct TileUpdate {
    pub key: TileKey,
    pub tile_size: f32,
    /// `n^2` elevations, row-major, `heights[j * n + i]` (see
    /// [`Tile::build_height_grid`])
    pub heights: Vec<f32>,
}

/// Map-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElevationStats {
    pub num_tiles: usize,
    /// Leaf nodes across all tile quadtrees, valid or not
    pub num_leaves: usize,
}

/// Persistent 2.5D elevation field over the x/z plane.
///
/// Tiles are created lazily on the first point that falls inside them and
/// persist for the life of the map. Not thread-safe for concurrent
/// mutation; the fusion driver serializes `integrate_scan` with the
/// consume/query calls.
pub struct ElevationMap {
    config: ElevationConfig,
    params: IntegrationParams,
    max_depth: usize,
    grid_n: usize,
    tiles: BTreeMap<TileKey, Tile>,
    /// Budgeted drains resume after this key so early tiles cannot starve
    /// later ones
    drain_cursor: Option<TileKey>,
}

impl ElevationMap {
    /// Build a map from validated configuration
    pub fn new(config: ElevationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            params: IntegrationParams::from(&config),
            max_depth: config.max_depth(),
            grid_n: config.grid_n_vertices(),
            config,
            tiles: BTreeMap::new(),
            drain_cursor: None,
        })
    }

    /// Vertex count along one edge of an exported height grid
    #[inline]
    pub fn grid_n_vertices(&self) -> usize {
        self.grid_n
    }

    /// Tile side length in meters
    #[inline]
    pub fn tile_size(&self) -> f32 {
        self.config.tile_size
    }

    /// Fold a completed scan into the map.
    ///
    /// `now_seconds` is the scan timestamp and drives the disagree window.
    /// Points with non-finite coordinates are skipped; the rest of the scan
    /// proceeds.
    pub fn integrate_scan(&mut self, points: &[LidarPoint], now_seconds: f64) {
        let params = self.params;
        let tile_size = self.config.tile_size;
        for p in points {
            if !p.is_finite() {
                continue;
            }
            let key = TileKey::from_world(p.x, p.z, tile_size);
            let tile = self.get_or_create_tile(key);
            tile.integrate_point(p, now_seconds, &params);
        }
    }

    fn get_or_create_tile(&mut self, key: TileKey) -> &mut Tile {
        let tile_size = self.config.tile_size;
        let max_depth = self.max_depth;
        self.tiles.entry(key).or_insert_with(|| {
            let (ox, oz) = key.origin(tile_size);
            log::debug!(
                "creating tile ({}, {}) at origin ({}, {})",
                key.tx,
                key.tz,
                ox,
                oz
            );
            Tile::new(ox, oz, tile_size, max_depth)
        })
    }

    /// Rebuild and return every dirty tile, clearing the dirty flags.
    pub fn consume_dirty_tiles(&mut self) -> Vec<TileUpdate> {
        let grid_n = self.grid_n;
        let tile_size = self.config.tile_size;
        self.tiles
            .iter_mut()
            .filter(|(_, tile)| tile.is_dirty())
            .map(|(&key, tile)| {
                tile.clear_dirty();
                TileUpdate {
                    key,
                    tile_size,
                    heights: tile.build_height_grid(grid_n),
                }
            })
            .collect()
    }

    /// Budgeted variant: rebuild at most `max(1, max_bytes / bytes_per_tile)`
    /// dirty tiles this call; the rest stay dirty for a later call.
    ///
    /// Selection walks tile keys in order, resuming after the last tile the
    /// previous call exported, so a continuously-dirty tile early in the map
    /// cannot starve the tail.
    pub fn consume_dirty_tiles_budgeted(&mut self, max_bytes: usize) -> Vec<TileUpdate> {
        let per_tile = self.grid_n * self.grid_n * std::mem::size_of::<f32>();
        let budget = (max_bytes / per_tile).max(1);

        let dirty: Vec<TileKey> = self.dirty_keys_from_cursor();
        let grid_n = self.grid_n;
        let tile_size = self.config.tile_size;

        let mut updates = Vec::with_capacity(budget.min(dirty.len()));
        for key in dirty {
            if updates.len() == budget {
                break;
            }
            if let Some(tile) = self.tiles.get_mut(&key) {
                tile.clear_dirty();
                updates.push(TileUpdate {
                    key,
                    tile_size,
                    heights: tile.build_height_grid(grid_n),
                });
                self.drain_cursor = Some(key);
            }
        }
        updates
    }

    /// Dirty tile keys in key order, rotated to start just past the cursor
    fn dirty_keys_from_cursor(&self) -> Vec<TileKey> {
        let mut after: Vec<TileKey> = Vec::new();
        let mut before: Vec<TileKey> = Vec::new();
        for (&key, tile) in &self.tiles {
            if !tile.is_dirty() {
                continue;
            }
            match self.drain_cursor {
                Some(cursor) if key <= cursor => before.push(key),
                _ => after.push(key),
            }
        }
        after.extend(before);
        after
    }

    /// Ground elevation and confidence under (x, z), if observed.
    pub fn get_ground_at(&self, x: f32, z: f32) -> Option<GroundSample> {
        if !(x.is_finite() && z.is_finite()) {
            return None;
        }
        let key = TileKey::from_world(x, z, self.config.tile_size);
        let tile = self.tiles.get(&key)?;
        let cell = tile.cell_at(x, z);
        if cell.is_valid() {
            Some(GroundSample {
                elevation: cell.z_mean,
                confidence: cell.n,
            })
        } else {
            None
        }
    }

    /// Tile and leaf counts for external observability and eviction policies
    pub fn get_stats(&self) -> ElevationStats {
        ElevationStats {
            num_tiles: self.tiles.len(),
            num_leaves: self.tiles.values().map(Tile::leaf_count).sum(),
        }
    }
}

impl Default for ElevationMap {
    fn default() -> Self {
        // the default configuration always validates
        Self::new(ElevationConfig::default()).expect("default config is valid")
    }
}
