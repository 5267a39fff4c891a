//! Scan reassembly from chunked LiDAR datagrams
//!
//! Rovers split each scan into chunks of at most
//! [`MAX_POINTS_PER_CHUNK`](crate::net::wire::MAX_POINTS_PER_CHUNK) points.
//! The assembler collects chunks keyed by (rover, scan timestamp) until all
//! have arrived, then promotes the set to a [`CompletedScan`]. Partials
//! whose first chunk is older than the timeout are evicted: a lossy link
//! produces fewer completed scans but never blocks the pipeline.
//!
//! The scan timestamp is opaque, supplied by the sender, and compared
//! bit-exactly; it is the scan identifier, not a time.
//!
//! All operations serialize on one internal mutex with short critical
//! sections, so `add_chunk` may be called from any receiver thread while
//! the fusion thread runs `retrieve_completed` and `maintenance`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bhumi_map::core::LidarPoint;

use crate::clock::Clock;
use crate::net::wire::{LidarChunkHeader, MAX_POINTS_PER_CHUNK};
use crate::net::RoverId;

/// Default eviction age for incomplete scans, seconds from first arrival
pub const PARTIAL_TIMEOUT: f64 = 0.2;

/// Default cap on the optional global terrain mirror
pub const DEFAULT_MAX_GLOBAL_POINTS: usize = 2_000_000;

/// A fully reassembled scan, produced exactly once per (rover, timestamp)
#[derive(Clone, Debug)]
pub struct CompletedScan {
    pub rover: RoverId,
    pub timestamp: f64,
    /// Points in chunk-acceptance order (within a chunk, transmitted order)
    pub points: Vec<LidarPoint>,
}

/// Partial-scan identity: rover plus bit-exact scan timestamp
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct ScanKey {
    rover: RoverId,
    timestamp_bits: u64,
}

impl ScanKey {
    fn new(rover: RoverId, timestamp: f64) -> Self {
        Self {
            rover,
            timestamp_bits: timestamp.to_bits(),
        }
    }
}

struct PartialScan {
    first_arrival: f64,
    total_chunks: u32,
    received: Vec<bool>,
    received_count: u32,
    points: Vec<LidarPoint>,
}

#[derive(Default)]
struct State {
    partials: HashMap<ScanKey, PartialScan>,
    completed: Vec<CompletedScan>,
    store_global_points: bool,
    max_global_points: usize,
    global_terrain: Vec<LidarPoint>,
}

/// Chunk collector with timeout-based partial eviction.
pub struct ScanAssembler {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    partial_timeout: f64,
}

impl ScanAssembler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(clock, PARTIAL_TIMEOUT)
    }

    pub fn with_timeout(clock: Arc<dyn Clock>, partial_timeout: f64) -> Self {
        Self {
            state: Mutex::new(State {
                max_global_points: DEFAULT_MAX_GLOBAL_POINTS,
                ..State::default()
            }),
            clock,
            partial_timeout,
        }
    }

    /// Add one chunk.
    ///
    /// The first chunk observed for a key fixes `total_chunks`; later chunks
    /// that disagree with it, duplicate an already-received index, or carry
    /// an out-of-range index are dropped while the partial is retained.
    pub fn add_chunk(&self, rover: RoverId, header: &LidarChunkHeader, points: &[LidarPoint]) {
        if header.total_chunks == 0 || header.chunk_index >= header.total_chunks {
            log::warn!(
                "rover {} chunk {}/{} rejected: inconsistent header",
                rover,
                header.chunk_index,
                header.total_chunks
            );
            return;
        }

        let key = ScanKey::new(rover, header.timestamp);
        let now = self.clock.now_seconds();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let partial = state.partials.entry(key).or_insert_with(|| PartialScan {
            first_arrival: now,
            total_chunks: header.total_chunks,
            received: vec![false; header.total_chunks as usize],
            received_count: 0,
            points: Vec::with_capacity(header.total_chunks as usize * MAX_POINTS_PER_CHUNK),
        });

        if header.total_chunks != partial.total_chunks {
            // first observation is authoritative
            log::warn!(
                "rover {} scan {}: conflicting total_chunks {} (expected {})",
                rover,
                header.timestamp,
                header.total_chunks,
                partial.total_chunks
            );
            return;
        }
        let idx = header.chunk_index as usize;
        if partial.received[idx] {
            log::debug!(
                "rover {} scan {}: duplicate chunk {}",
                rover,
                header.timestamp,
                header.chunk_index
            );
            return;
        }

        partial.received[idx] = true;
        partial.received_count += 1;
        partial.points.extend_from_slice(points);
        let complete = partial.received_count == partial.total_chunks;

        if complete {
            let Some(partial) = state.partials.remove(&key) else {
                return;
            };
            let scan = CompletedScan {
                rover,
                timestamp: header.timestamp,
                points: partial.points,
            };
            if state.store_global_points {
                Self::mirror_points(&mut state, &scan.points);
            }
            log::trace!(
                "rover {} scan {} completed with {} points",
                rover,
                header.timestamp,
                scan.points.len()
            );
            state.completed.push(scan);
        }
    }

    /// Move all completed scans out of the assembler
    pub fn retrieve_completed(&self) -> Vec<CompletedScan> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.completed)
    }

    /// Evict partial scans whose first chunk is older than the timeout.
    ///
    /// Evicted scans are discarded; no points are delivered and a later
    /// chunk for the same key starts a fresh partial.
    pub fn maintenance(&self, now_seconds: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let timeout = self.partial_timeout;
        state.partials.retain(|key, partial| {
            let keep = now_seconds - partial.first_arrival <= timeout;
            if !keep {
                log::warn!(
                    "rover {} scan {}: evicted with {}/{} chunks",
                    key.rover,
                    f64::from_bits(key.timestamp_bits),
                    partial.received_count,
                    partial.total_chunks
                );
            }
            keep
        });
    }

    /// Count of partial scans currently awaiting chunks
    pub fn pending_partials(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .partials
            .len()
    }

    /// Enable or disable mirroring completed scans into the global buffer
    pub fn set_store_global_points(&self, enable: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.store_global_points = enable;
    }

    /// Cap on the global terrain mirror; oldest points are dropped first
    pub fn set_max_global_points(&self, max_points: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.max_global_points = max_points;
    }

    /// Snapshot of the global terrain mirror
    pub fn global_terrain(&self) -> Vec<LidarPoint> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .global_terrain
            .clone()
    }

    fn mirror_points(state: &mut State, points: &[LidarPoint]) {
        state.global_terrain.extend_from_slice(points);
        let max = state.max_global_points;
        if max > 0 && state.global_terrain.len() > max {
            let drop = state.global_terrain.len() - max;
            state.global_terrain.drain(..drop);
        }
    }
}
