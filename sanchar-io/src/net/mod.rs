//! Rover-facing network layer: wire codecs and the per-stream UDP
//! receivers.

pub mod receiver;
pub mod wire;

pub use receiver::{FleetReceiver, RoverEndpoints, RoverStats, StreamTimestamps};
pub use wire::{LidarChunkHeader, PosePacket, TelemetryPacket};

use bhumi_map::core::LidarPoint;

/// Rover identifier (1-based over the configured fleet)
pub type RoverId = u8;

/// The three inbound stream kinds a rover publishes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Pose,
    Lidar,
    Telemetry,
}

impl StreamKind {
    /// Short label for logging and thread names
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Pose => "pose",
            StreamKind::Lidar => "lidar",
            StreamKind::Telemetry => "telemetry",
        }
    }
}

/// A parsed, length-validated message handed from a receiver thread to the
/// fusion thread.
#[derive(Clone, Debug)]
pub enum Delivery {
    Pose {
        rover: RoverId,
        pose: PosePacket,
    },
    LidarChunk {
        rover: RoverId,
        header: LidarChunkHeader,
        points: Vec<LidarPoint>,
    },
    Telemetry {
        rover: RoverId,
        telemetry: TelemetryPacket,
    },
}
