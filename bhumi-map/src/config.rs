//! Elevation map configuration.
//!
//! Every parameter has a working default, so `ElevationConfig::default()`
//! (or an absent `[elevation]` section in a daemon config file) yields the
//! standard 32 m tiles at 0.25 m cell resolution.

use serde::Deserialize;
use thiserror::Error;

/// Configuration validation failure
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("tile_size must be positive (got {0})")]
    TileSize(f32),

    #[error("base_cell_resolution must be positive and at most tile_size (got {0})")]
    CellResolution(f32),

    #[error("tau_accept ({accept}) must be below tau_replace ({replace})")]
    ThresholdOrder { accept: f32, replace: f32 },

    #[error("n_sat must be at least 1 (got {0})")]
    SampleCap(u16),
}

/// Tuning parameters for the elevation map.
///
/// Thresholds are in meters, windows in seconds.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ElevationConfig {
    /// Side length of a square tile in meters
    #[serde(default = "default_tile_size")]
    pub tile_size: f32,

    /// Target cell edge length at maximum quadtree refinement
    #[serde(default = "default_cell_resolution")]
    pub base_cell_resolution: f32,

    /// Deviation at or below which a sample agrees with the cell mean
    #[serde(default = "default_tau_accept")]
    pub tau_accept: f32,

    /// Deviation at or above which a sample disagrees (remap candidate)
    #[serde(default = "default_tau_replace")]
    pub tau_replace: f32,

    /// Disagree hits within the window required to remap a confident cell
    #[serde(default = "default_k_confirm")]
    pub k_confirm: u8,

    /// Saturation cap on the per-cell sample count
    #[serde(default = "default_n_sat")]
    pub n_sat: u16,

    /// Below this sample count a single disagreement remaps the cell
    #[serde(default = "default_n_conf")]
    pub n_conf: u16,

    /// Mean movement that marks a cell dirty for re-export
    #[serde(default = "default_tau_upload")]
    pub tau_upload: f32,

    /// Seconds within which disagree hits accumulate
    #[serde(default = "default_disagree_window")]
    pub disagree_window: f64,
}

fn default_tile_size() -> f32 {
    32.0
}
fn default_cell_resolution() -> f32 {
    0.25
}
fn default_tau_accept() -> f32 {
    0.25
}
fn default_tau_replace() -> f32 {
    0.7
}
fn default_k_confirm() -> u8 {
    3
}
fn default_n_sat() -> u16 {
    20
}
fn default_n_conf() -> u16 {
    5
}
fn default_tau_upload() -> f32 {
    0.06
}
fn default_disagree_window() -> f64 {
    1.0
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            base_cell_resolution: default_cell_resolution(),
            tau_accept: default_tau_accept(),
            tau_replace: default_tau_replace(),
            k_confirm: default_k_confirm(),
            n_sat: default_n_sat(),
            n_conf: default_n_conf(),
            tau_upload: default_tau_upload(),
            disagree_window: default_disagree_window(),
        }
    }
}

impl ElevationConfig {
    /// Check parameter sanity
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tile_size > 0.0) || !self.tile_size.is_finite() {
            return Err(ConfigError::TileSize(self.tile_size));
        }
        if !(self.base_cell_resolution > 0.0) || self.base_cell_resolution > self.tile_size {
            return Err(ConfigError::CellResolution(self.base_cell_resolution));
        }
        if self.tau_accept >= self.tau_replace {
            return Err(ConfigError::ThresholdOrder {
                accept: self.tau_accept,
                replace: self.tau_replace,
            });
        }
        if self.n_sat == 0 {
            return Err(ConfigError::SampleCap(self.n_sat));
        }
        Ok(())
    }

    /// Quadtree depth needed so a leaf edge is at most `base_cell_resolution`.
    ///
    /// The cell count along a tile edge is the smallest power of two covering
    /// `tile_size / base_cell_resolution`; defaults give 2^7 = 128 cells.
    pub fn max_depth(&self) -> usize {
        let cells_per_edge = (self.tile_size / self.base_cell_resolution).round() as u32;
        let mut depth = 0usize;
        let mut covered = 1u32;
        while covered < cells_per_edge && depth < 10 {
            covered <<= 1;
            depth += 1;
        }
        depth
    }

    /// Vertex count along one edge of an exported height grid (2^depth + 1)
    pub fn grid_n_vertices(&self) -> usize {
        (1usize << self.max_depth()) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let cfg = ElevationConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.max_depth(), 7);
        assert_eq!(cfg.grid_n_vertices(), 129);
    }

    #[test]
    fn test_coarser_resolution() {
        let cfg = ElevationConfig {
            base_cell_resolution: 1.0,
            ..ElevationConfig::default()
        };
        assert_eq!(cfg.max_depth(), 5);
        assert_eq!(cfg.grid_n_vertices(), 33);
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let cfg = ElevationConfig {
            tau_accept: 0.8,
            tau_replace: 0.7,
            ..ElevationConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_tile() {
        let cfg = ElevationConfig {
            tile_size: 0.0,
            ..ElevationConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::TileSize(_))));
    }
}
