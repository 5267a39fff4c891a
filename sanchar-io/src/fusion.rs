//! Single-threaded fusion driver
//!
//! Ties the pipeline together on one thread: drain typed deliveries from
//! the receiver channel, feed lidar chunks to the assembler, integrate
//! completed scans into the elevation map, and export dirty tiles under
//! the per-frame byte budget. The fusion path never blocks on I/O and has
//! no internal suspension; each `tick` does a bounded amount of work and
//! returns.

use std::sync::Arc;

use bhumi_map::{ElevationMap, TileUpdate};
use crossbeam_channel::Receiver;

use crate::assembler::ScanAssembler;
use crate::clock::Clock;
use crate::net::Delivery;

/// Consumer of rebuilt tile height grids (the renderer boundary).
pub trait TileSink {
    fn submit(&mut self, update: TileUpdate);
}

/// Sink that only logs what it would upload; stands in for a renderer.
#[derive(Default)]
pub struct LogSink;

impl TileSink for LogSink {
    fn submit(&mut self, update: TileUpdate) {
        log::debug!(
            "tile ({}, {}) exported: {} vertices",
            update.key.tx,
            update.key.tz,
            update.heights.len()
        );
    }
}

/// What one fusion tick accomplished
#[derive(Clone, Copy, Debug, Default)]
pub struct TickReport {
    pub deliveries: usize,
    pub lidar_chunks: usize,
    pub completed_scans: usize,
    pub points_integrated: usize,
    pub tiles_exported: usize,
    pub bytes_exported: usize,
}

/// The fusion pipeline: channel -> assembler -> elevation map -> sink.
pub struct FusionPipeline {
    rx: Receiver<Delivery>,
    assembler: Arc<ScanAssembler>,
    map: ElevationMap,
    clock: Arc<dyn Clock>,
    upload_budget_bytes: usize,
}

impl FusionPipeline {
    pub fn new(
        rx: Receiver<Delivery>,
        assembler: Arc<ScanAssembler>,
        map: ElevationMap,
        clock: Arc<dyn Clock>,
        upload_budget_bytes: usize,
    ) -> Self {
        Self {
            rx,
            assembler,
            map,
            clock,
            upload_budget_bytes,
        }
    }

    /// The elevation map, for queries and stats
    pub fn map(&self) -> &ElevationMap {
        &self.map
    }

    /// Run one fusion frame.
    ///
    /// Completed scans integrate with their own scan timestamp, so the
    /// disagree window tracks sensor time rather than arrival time.
    pub fn tick(&mut self, sink: &mut dyn TileSink) -> TickReport {
        let mut report = TickReport::default();

        while let Ok(delivery) = self.rx.try_recv() {
            report.deliveries += 1;
            if let Delivery::LidarChunk {
                rover,
                header,
                points,
            } = delivery
            {
                self.assembler.add_chunk(rover, &header, &points);
                report.lidar_chunks += 1;
            }
            // Pose and telemetry deliveries only feed the per-rover stream
            // tables, which the receiver already updated on accept.
        }

        self.assembler.maintenance(self.clock.now_seconds());

        for scan in self.assembler.retrieve_completed() {
            report.completed_scans += 1;
            report.points_integrated += scan.points.len();
            self.map.integrate_scan(&scan.points, scan.timestamp);
        }

        for update in self.map.consume_dirty_tiles_budgeted(self.upload_budget_bytes) {
            report.tiles_exported += 1;
            report.bytes_exported += update.heights.len() * std::mem::size_of::<f32>();
            sink.submit(update);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::net::wire::LidarChunkHeader;
    use bhumi_map::core::LidarPoint;
    use crossbeam_channel::bounded;

    #[derive(Default)]
    struct VecSink(Vec<TileUpdate>);

    impl TileSink for VecSink {
        fn submit(&mut self, update: TileUpdate) {
            self.0.push(update);
        }
    }

    #[test]
    fn test_tick_runs_chunk_to_tile() {
        let (tx, rx) = bounded(16);
        let clock = Arc::new(ManualClock::new(0.0));
        let assembler = Arc::new(ScanAssembler::new(clock.clone() as Arc<dyn Clock>));
        let mut pipeline = FusionPipeline::new(
            rx,
            assembler,
            ElevationMap::default(),
            clock as Arc<dyn Clock>,
            10 * 1024 * 1024,
        );

        tx.send(Delivery::LidarChunk {
            rover: 1,
            header: LidarChunkHeader {
                timestamp: 1.0,
                chunk_index: 0,
                total_chunks: 1,
                points_in_chunk: 2,
            },
            points: vec![LidarPoint::new(0.0, 0.0, 0.0), LidarPoint::new(1.0, 0.0, 1.0)],
        })
        .unwrap();

        let mut sink = VecSink::default();
        let report = pipeline.tick(&mut sink);

        assert_eq!(report.lidar_chunks, 1);
        assert_eq!(report.completed_scans, 1);
        assert_eq!(report.points_integrated, 2);
        assert_eq!(report.tiles_exported, 1);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].heights.len(), 129 * 129);

        // the map retains the fused ground
        assert!(pipeline.map().get_ground_at(1.0, 1.0).is_some());

        // nothing new: the next tick is a no-op
        let quiet = pipeline.tick(&mut sink);
        assert_eq!(quiet.deliveries, 0);
        assert_eq!(quiet.tiles_exported, 0);
    }

    #[test]
    fn test_incomplete_scan_does_not_integrate() {
        let (tx, rx) = bounded(16);
        let clock = Arc::new(ManualClock::new(0.0));
        let assembler = Arc::new(ScanAssembler::new(clock.clone() as Arc<dyn Clock>));
        let mut pipeline = FusionPipeline::new(
            rx,
            assembler,
            ElevationMap::default(),
            clock as Arc<dyn Clock>,
            10 * 1024 * 1024,
        );

        tx.send(Delivery::LidarChunk {
            rover: 1,
            header: LidarChunkHeader {
                timestamp: 1.0,
                chunk_index: 0,
                total_chunks: 2,
                points_in_chunk: 1,
            },
            points: vec![LidarPoint::new(0.5, 1.0, 0.5)],
        })
        .unwrap();

        let mut sink = VecSink::default();
        let report = pipeline.tick(&mut sink);
        assert_eq!(report.completed_scans, 0);
        assert!(pipeline.map().get_ground_at(0.5, 0.5).is_none());
    }
}
