//! SancharIO - Rover fleet ingestion and LiDAR fusion
//!
//! The network half of the fusion pipeline. Per-rover UDP receivers parse
//! pose, lidar-chunk, and telemetry datagrams and hand typed deliveries to
//! a single fusion thread, which reassembles chunked scans and folds them
//! into a [`bhumi_map::ElevationMap`].
//!
//! ```text
//!  rover 1..N ──UDP──► FleetReceiver (thread per rover x stream)
//!                          │ bounded channel of Delivery
//!                          ▼
//!                    FusionPipeline (single thread)
//!                          │ add_chunk / maintenance
//!                          ▼
//!                     ScanAssembler ── CompletedScan ──► ElevationMap
//!                                                            │
//!                                        dirty TileUpdates ◄─┘
//!                                        (byte-budgeted, to TileSink)
//! ```

pub mod assembler;
pub mod clock;
pub mod config;
pub mod error;
pub mod fusion;
pub mod net;

pub use config::Config;
pub use error::{Error, Result};
