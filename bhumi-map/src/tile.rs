//! A single map tile: one quadtree over a square world region.

use crate::cell::{ElevCell, IntegrationParams};
use crate::core::LidarPoint;
use crate::quadtree::{child_index, descend_center, QuadNode};

/// Square tile of the elevation map.
///
/// The footprint is `[origin_x, origin_x + size) x [origin_z, origin_z +
/// size)`. `dirty` is set whenever any cell change warrants a re-export and
/// cleared by the map when the tile's height grid is consumed.
#[derive(Clone, Debug)]
pub struct Tile {
    origin_x: f32,
    origin_z: f32,
    size: f32,
    max_depth: usize,
    dirty: bool,
    root: QuadNode,
}

impl Tile {
    pub fn new(origin_x: f32, origin_z: f32, size: f32, max_depth: usize) -> Self {
        Self {
            origin_x,
            origin_z,
            size,
            max_depth,
            dirty: false,
            root: QuadNode::default(),
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Leaves currently allocated in this tile's quadtree
    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    /// Fold one point into the cell under (p.x, p.z), marking the tile dirty
    /// when the cell reports a renderer-visible change.
    pub fn integrate_point(&mut self, p: &LidarPoint, now: f64, params: &IntegrationParams) {
        let cell = self.locate_leaf_mut(p.x, p.z);
        if cell.integrate(p.y, now, params) {
            self.dirty = true;
        }
    }

    /// Walk to the max-depth leaf containing (x, z), splitting leaves on the
    /// way down. Fresh children clone the parent cell, so refinement never
    /// discards an estimate.
    pub fn locate_leaf_mut(&mut self, x: f32, z: f32) -> &mut ElevCell {
        let mut cx = self.origin_x + self.size * 0.5;
        let mut cz = self.origin_z + self.size * 0.5;
        let mut half = self.size * 0.5;
        let mut node = &mut self.root;
        for _ in 0..self.max_depth {
            node.split();
            let idx = child_index(x, z, cx, cz);
            half *= 0.5;
            descend_center(idx, &mut cx, &mut cz, half);
            node = match node {
                QuadNode::Internal(children) => &mut children[idx],
                // split() above guarantees an internal node
                QuadNode::Leaf(_) => unreachable!(),
            };
        }
        match node {
            QuadNode::Leaf(cell) => cell,
            // splits are bounded by max_depth, so the walk ends on a leaf
            QuadNode::Internal(_) => unreachable!(),
        }
    }

    /// Read-only elevation lookup at (x, z): the deepest existing node's
    /// cell, without refining the tree.
    pub fn cell_at(&self, x: f32, z: f32) -> &ElevCell {
        match self.descend(x, z) {
            QuadNode::Leaf(cell) => cell,
            // descend() only stops early on a leaf
            QuadNode::Internal(_) => unreachable!(),
        }
    }

    fn descend(&self, x: f32, z: f32) -> &QuadNode {
        let mut cx = self.origin_x + self.size * 0.5;
        let mut cz = self.origin_z + self.size * 0.5;
        let mut half = self.size * 0.5;
        let mut node = &self.root;
        for _ in 0..self.max_depth {
            match node {
                QuadNode::Leaf(_) => return node,
                QuadNode::Internal(children) => {
                    let idx = child_index(x, z, cx, cz);
                    half *= 0.5;
                    descend_center(idx, &mut cx, &mut cz, half);
                    node = &children[idx];
                }
            }
        }
        node
    }

    /// Build the dense `n_vertices x n_vertices` height grid covering the
    /// tile, row-major with `grid[j * n + i]` at world position
    /// `(origin_x + i*step, origin_z + j*step)`.
    ///
    /// A vertex samples the leaf mean under it; vertices over unobserved
    /// leaves export 0.0, and a vertex that stops on an internal node (a
    /// path not refined to full depth) exports the mean of the subtree's
    /// valid leaves.
    pub fn build_height_grid(&self, n_vertices: usize) -> Vec<f32> {
        let mut heights = vec![0.0f32; n_vertices * n_vertices];
        let step = self.size / (n_vertices - 1) as f32;
        for j in 0..n_vertices {
            let z = self.origin_z + j as f32 * step;
            for i in 0..n_vertices {
                let x = self.origin_x + i as f32 * step;
                heights[j * n_vertices + i] = match self.descend(x, z) {
                    QuadNode::Leaf(cell) => {
                        if cell.is_valid() {
                            cell.z_mean
                        } else {
                            0.0
                        }
                    }
                    node @ QuadNode::Internal(_) => node.valid_leaf_mean(),
                };
            }
        }
        heights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElevationConfig;

    fn params() -> IntegrationParams {
        IntegrationParams::from(&ElevationConfig::default())
    }

    fn default_tile() -> Tile {
        let cfg = ElevationConfig::default();
        Tile::new(0.0, 0.0, cfg.tile_size, cfg.max_depth())
    }

    #[test]
    fn test_integration_refines_path_to_max_depth() {
        let mut tile = default_tile();
        assert_eq!(tile.leaf_count(), 1);

        tile.integrate_point(&LidarPoint::new(0.1, 5.0, 0.1), 0.0, &params());
        // each split along the 7-level path turns one leaf into four
        assert_eq!(tile.leaf_count(), 1 + 3 * 7);
        assert!(tile.is_dirty());

        let cell = tile.cell_at(0.1, 0.1);
        assert!(cell.is_valid());
        assert_eq!(cell.z_mean, 5.0);
    }

    #[test]
    fn test_separate_cells_for_distant_points() {
        let mut tile = default_tile();
        let p = params();
        tile.integrate_point(&LidarPoint::new(0.1, 1.0, 0.1), 0.0, &p);
        tile.integrate_point(&LidarPoint::new(31.0, 9.0, 31.0), 0.0, &p);

        assert_eq!(tile.cell_at(0.1, 0.1).z_mean, 1.0);
        assert_eq!(tile.cell_at(31.0, 31.0).z_mean, 9.0);
    }

    #[test]
    fn test_height_grid_samples_observed_cells() {
        let cfg = ElevationConfig::default();
        let mut tile = default_tile();
        tile.integrate_point(&LidarPoint::new(0.1, 0.0, 0.1), 0.0, &params());
        tile.integrate_point(&LidarPoint::new(1.0, 0.0, 1.0), 0.0, &params());

        let n = cfg.grid_n_vertices();
        let grid = tile.build_height_grid(n);
        assert_eq!(grid.len(), n * n);
        // vertex (0, 0) sits over the observed origin cell
        assert!(grid[0].abs() < 1e-6);
        // a far, never-observed corner exports 0.0
        assert_eq!(grid[n * n - 1], 0.0);
    }

    #[test]
    fn test_height_grid_boundary_vertex_uses_east_cells() {
        let cfg = ElevationConfig::default();
        let mut tile = default_tile();
        // easternmost cell column of the tile
        tile.integrate_point(&LidarPoint::new(31.9, 4.0, 0.1), 0.0, &params());

        let n = cfg.grid_n_vertices();
        let grid = tile.build_height_grid(n);
        // the i = n-1 vertex of row 0 lies on the east edge and samples that column
        assert_eq!(grid[n - 1], 4.0);
    }

    #[test]
    fn test_clear_dirty() {
        let mut tile = default_tile();
        tile.integrate_point(&LidarPoint::new(0.1, 5.0, 0.1), 0.0, &params());
        assert!(tile.is_dirty());
        tile.clear_dirty();
        assert!(!tile.is_dirty());
    }
}
