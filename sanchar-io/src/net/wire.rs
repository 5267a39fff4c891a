//! Rover datagram wire format
//!
//! One UDP datagram carries exactly one message; there is no framing beyond
//! the datagram boundary. All multi-byte fields are little-endian IEEE-754
//! or two's-complement, packed with no padding.
//!
//! ```text
//! Pose (32 bytes):
//! ┌──────────────┬───────────────────┬───────────────────────┐
//! │ f64 timestamp│ f32 x, y, z       │ f32 rot x, y, z (deg) │
//! └──────────────┴───────────────────┴───────────────────────┘
//!
//! Lidar chunk (20 + 12*n bytes):
//! ┌──────────────┬────────────┬─────────────┬──────────────┬───────────┐
//! │ f64 timestamp│ u32 chunk  │ u32 total   │ u32 points n │ n * (f32  │
//! │              │     index  │     chunks  │              │  x, y, z) │
//! └──────────────┴────────────┴─────────────┴──────────────┴───────────┘
//!
//! Telemetry (9 bytes):
//! ┌──────────────┬─────────────────┐
//! │ f64 timestamp│ u8 button_states│
//! └──────────────┴─────────────────┘
//! ```
//!
//! A datagram is accepted only when its length matches the declared layout
//! exactly; anything else is malformed and dropped by the receiver without
//! touching stream timestamps.

use std::fmt;

use bhumi_map::core::LidarPoint;

use crate::error::{Error, Result};

/// Maximum LiDAR points a single chunk may carry
pub const MAX_POINTS_PER_CHUNK: usize = 100;

/// Pose message length on the wire
pub const POSE_PACKET_LEN: usize = 32;

/// Lidar chunk header length on the wire (points follow)
pub const LIDAR_HEADER_LEN: usize = 20;

/// Bytes per point on the wire (three f32)
pub const LIDAR_POINT_LEN: usize = 12;

/// Telemetry message length on the wire
pub const TELEMETRY_PACKET_LEN: usize = 9;

/// A rover pose sample. Consumed for stream-timestamp bookkeeping only;
/// fusion does not use poses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PosePacket {
    pub timestamp: f64,
    pub position: [f32; 3],
    /// Euler rotation in degrees, x/y/z order
    pub rotation_deg: [f32; 3],
}

/// Header of one LiDAR scan chunk.
///
/// `timestamp` is the scan identifier: every chunk of a scan bears the same
/// sender-supplied value, compared bit-exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LidarChunkHeader {
    pub timestamp: f64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub points_in_chunk: u32,
}

/// A rover telemetry sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryPacket {
    pub timestamp: f64,
    pub buttons: Buttons,
}

/// Button states, bits 0..=3
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Buttons(pub u8);

impl Buttons {
    /// Number of buttons a rover reports
    pub const COUNT: u8 = 4;

    /// True when button `index` (0-based) is pressed
    #[inline]
    pub fn pressed(&self, index: u8) -> bool {
        index < Self::COUNT && self.0 & (1 << index) != 0
    }

    /// True when no button is pressed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 & 0x0F == 0
    }
}

impl fmt::Display for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for i in 0..Self::COUNT {
            if self.pressed(i) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "B{}", i + 1)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[inline]
fn f64_le(b: &[u8]) -> f64 {
    f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

#[inline]
fn f32_le(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Parse a pose datagram
pub fn parse_pose(bytes: &[u8]) -> Result<PosePacket> {
    if bytes.len() != POSE_PACKET_LEN {
        return Err(Error::MalformedPacket(format!(
            "pose length {} (expected {})",
            bytes.len(),
            POSE_PACKET_LEN
        )));
    }
    Ok(PosePacket {
        timestamp: f64_le(&bytes[0..]),
        position: [f32_le(&bytes[8..]), f32_le(&bytes[12..]), f32_le(&bytes[16..])],
        rotation_deg: [
            f32_le(&bytes[20..]),
            f32_le(&bytes[24..]),
            f32_le(&bytes[28..]),
        ],
    })
}

/// Encode a pose datagram
pub fn encode_pose(pose: &PosePacket) -> [u8; POSE_PACKET_LEN] {
    let mut buf = [0u8; POSE_PACKET_LEN];
    buf[0..8].copy_from_slice(&pose.timestamp.to_le_bytes());
    for (i, v) in pose.position.iter().enumerate() {
        buf[8 + i * 4..12 + i * 4].copy_from_slice(&v.to_le_bytes());
    }
    for (i, v) in pose.rotation_deg.iter().enumerate() {
        buf[20 + i * 4..24 + i * 4].copy_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Parse a lidar chunk datagram.
///
/// The header is parsed first; the datagram is accepted only when its total
/// length equals `LIDAR_HEADER_LEN + points_in_chunk * LIDAR_POINT_LEN` and
/// the header is internally consistent.
pub fn parse_lidar(bytes: &[u8]) -> Result<(LidarChunkHeader, Vec<LidarPoint>)> {
    if bytes.len() < LIDAR_HEADER_LEN {
        return Err(Error::MalformedPacket(format!(
            "lidar length {} below header size {}",
            bytes.len(),
            LIDAR_HEADER_LEN
        )));
    }
    let header = LidarChunkHeader {
        timestamp: f64_le(&bytes[0..]),
        chunk_index: u32_le(&bytes[8..]),
        total_chunks: u32_le(&bytes[12..]),
        points_in_chunk: u32_le(&bytes[16..]),
    };
    if header.total_chunks == 0 {
        return Err(Error::MalformedPacket("lidar total_chunks is zero".into()));
    }
    if header.chunk_index >= header.total_chunks {
        return Err(Error::MalformedPacket(format!(
            "lidar chunk_index {} out of range (total {})",
            header.chunk_index, header.total_chunks
        )));
    }
    let count = header.points_in_chunk as usize;
    if count > MAX_POINTS_PER_CHUNK {
        return Err(Error::MalformedPacket(format!(
            "lidar chunk carries {} points (cap {})",
            count, MAX_POINTS_PER_CHUNK
        )));
    }
    let expected = LIDAR_HEADER_LEN + count * LIDAR_POINT_LEN;
    if bytes.len() != expected {
        return Err(Error::MalformedPacket(format!(
            "lidar length {} (expected {} for {} points)",
            bytes.len(),
            expected,
            count
        )));
    }

    let mut points = Vec::with_capacity(count);
    for i in 0..count {
        let base = LIDAR_HEADER_LEN + i * LIDAR_POINT_LEN;
        points.push(LidarPoint {
            x: f32_le(&bytes[base..]),
            y: f32_le(&bytes[base + 4..]),
            z: f32_le(&bytes[base + 8..]),
        });
    }
    Ok((header, points))
}

/// Encode a lidar chunk datagram. `header.points_in_chunk` is taken from
/// `points.len()`, not from the header argument.
pub fn encode_lidar(header: &LidarChunkHeader, points: &[LidarPoint]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LIDAR_HEADER_LEN + points.len() * LIDAR_POINT_LEN);
    buf.extend_from_slice(&header.timestamp.to_le_bytes());
    buf.extend_from_slice(&header.chunk_index.to_le_bytes());
    buf.extend_from_slice(&header.total_chunks.to_le_bytes());
    buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
    for p in points {
        buf.extend_from_slice(&p.x.to_le_bytes());
        buf.extend_from_slice(&p.y.to_le_bytes());
        buf.extend_from_slice(&p.z.to_le_bytes());
    }
    buf
}

/// Parse a telemetry datagram
pub fn parse_telemetry(bytes: &[u8]) -> Result<TelemetryPacket> {
    if bytes.len() != TELEMETRY_PACKET_LEN {
        return Err(Error::MalformedPacket(format!(
            "telemetry length {} (expected {})",
            bytes.len(),
            TELEMETRY_PACKET_LEN
        )));
    }
    Ok(TelemetryPacket {
        timestamp: f64_le(&bytes[0..]),
        buttons: Buttons(bytes[8]),
    })
}

/// Encode a telemetry datagram
pub fn encode_telemetry(telem: &TelemetryPacket) -> [u8; TELEMETRY_PACKET_LEN] {
    let mut buf = [0u8; TELEMETRY_PACKET_LEN];
    buf[0..8].copy_from_slice(&telem.timestamp.to_le_bytes());
    buf[8] = telem.buttons.0;
    buf
}
