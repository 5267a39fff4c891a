//! End-to-end scenarios for the elevation map: noisy agreement, terrain
//! change detection, upload debouncing, and budgeted export.

use bhumi_map::core::LidarPoint;
use bhumi_map::{ElevationMap, TileUpdate};

fn at(y: f32) -> Vec<LidarPoint> {
    vec![LidarPoint::new(0.1, y, 0.1)]
}

#[test]
fn test_agree_then_remap() {
    let mut map = ElevationMap::default();

    // 30 noisy samples around 5.0 build a saturated, confident cell
    for i in 0..30 {
        let y = 5.0 + if i % 2 == 0 { 0.05 } else { -0.05 };
        map.integrate_scan(&at(y), 0.0);
    }
    let ground = map.get_ground_at(0.1, 0.1).unwrap();
    assert!((ground.elevation - 5.0).abs() < 0.1);
    assert_eq!(ground.confidence, 20);

    // three disagreeing samples inside the one-second window flip the cell
    map.integrate_scan(&at(7.0), 0.0);
    map.integrate_scan(&at(7.0), 0.3);
    let mid = map.get_ground_at(0.1, 0.1).unwrap();
    assert!((mid.elevation - 5.0).abs() < 0.1, "two hits must not remap");

    map.integrate_scan(&at(7.0), 0.6);
    let after = map.get_ground_at(0.1, 0.1).unwrap();
    assert_eq!(after.elevation, 7.0);
    assert_eq!(after.confidence, 1);
}

#[test]
fn test_fresh_cell_remaps_but_confirmed_cell_rejects_outlier() {
    let mut map = ElevationMap::default();

    // a single observation leaves the cell low-confidence; one
    // disagreement is enough to flip it
    map.integrate_scan(&at(7.0), 0.0);
    map.integrate_scan(&at(5.0), 0.1);
    assert_eq!(map.get_ground_at(0.1, 0.1).unwrap().elevation, 5.0);

    // rebuild confidence past n_conf, then a single outlier must not flip
    for _ in 0..6 {
        map.integrate_scan(&at(5.0), 0.2);
    }
    map.integrate_scan(&at(7.0), 0.3);
    assert_eq!(map.get_ground_at(0.1, 0.1).unwrap().elevation, 5.0);
}

#[test]
fn test_upload_debounce_across_consume() {
    let mut map = ElevationMap::default();
    map.integrate_scan(&at(5.0), 0.0);
    assert_eq!(map.consume_dirty_tiles().len(), 1);

    // small agreeing nudges whose cumulative mean movement stays inside
    // tau_upload must not re-dirty the tile
    map.integrate_scan(&at(5.01), 0.0);
    map.integrate_scan(&at(5.01), 0.0);
    assert!(map.consume_dirty_tiles().is_empty());

    // pushing the mean past tau_upload re-dirties it
    for _ in 0..30 {
        map.integrate_scan(&at(5.2), 0.0);
    }
    assert_eq!(map.consume_dirty_tiles().len(), 1);
}

#[test]
fn test_budgeted_export_drains_in_rounds() {
    let mut map = ElevationMap::default();
    for i in 0..50 {
        let x = i as f32 * 32.0 + 1.0;
        map.integrate_scan(&[LidarPoint::new(x, 1.0, 1.0)], 0.0);
    }

    // 129^2 vertices * 4 bytes = 66_564 bytes per tile -> 3 tiles fit
    let mut seen: Vec<TileUpdate> = Vec::new();
    let mut rounds = 0;
    loop {
        let batch = map.consume_dirty_tiles_budgeted(200_000);
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 3);
        seen.extend(batch);
        rounds += 1;
        assert!(rounds < 100, "drain must terminate");
    }
    assert_eq!(seen.len(), 50);
    assert_eq!(rounds, 17); // ceil(50 / 3)

    // every tile exported exactly once
    let mut keys: Vec<_> = seen.iter().map(|u| u.key).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 50);
}

#[test]
fn test_single_scan_tile_geometry() {
    let mut map = ElevationMap::default();
    map.integrate_scan(
        &[LidarPoint::new(0.0, 0.0, 0.0), LidarPoint::new(1.0, 0.0, 1.0)],
        1.0,
    );

    let updates = map.consume_dirty_tiles();
    assert_eq!(updates.len(), 1);
    let up = &updates[0];
    assert_eq!(up.tile_size, 32.0);

    let n = map.grid_n_vertices();
    assert_eq!(up.heights.len(), n * n);
    // both observed points sit at elevation 0
    assert!(up.heights[0].abs() < 1e-6);
    let j = ((1.0 / 32.0) * (n - 1) as f32) as usize;
    assert!(up.heights[j * n + j].abs() < 1e-6);
}
