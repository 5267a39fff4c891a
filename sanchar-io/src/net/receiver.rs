//! Per-rover UDP stream receivers
//!
//! One socket and one thread per (rover, stream kind). Each thread drains
//! its endpoint, validates datagram length against the declared layout,
//! records the embedded timestamp, and pushes a typed [`Delivery`] into a
//! bounded channel drained by the fusion thread.
//!
//! Ingress never blocks fusion: when the channel is full the datagram is
//! dropped and counted, exactly like a lost packet. Malformed datagrams are
//! dropped before any bookkeeping, so a corrupt sender cannot advance its
//! own stream timestamps.
//!
//! Shutdown is cooperative: sockets carry a read timeout so every loop
//! observes the stop flag within ~100 ms.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};

use crate::error::{Error, Result};
use crate::net::wire;
use crate::net::{Delivery, RoverId, StreamKind};

/// Largest datagram any stream can legally carry (lidar: 20 + 100*12 bytes),
/// rounded up
const MAX_DATAGRAM: usize = 2048;

/// Socket read timeout; bounds how long shutdown can take
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Delay before the single automatic command-send retry
const COMMAND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Inbound and command endpoints for one rover
#[derive(Clone, Copy, Debug)]
pub struct RoverEndpoints {
    pub rover: RoverId,
    pub pose: SocketAddr,
    pub lidar: SocketAddr,
    pub telemetry: SocketAddr,
    pub command: SocketAddr,
}

/// Most recently observed message timestamps per stream (sender timebase,
/// last-writer-wins). A trailing observability signal, not part of fusion
/// correctness.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StreamTimestamps {
    pub pose: f64,
    pub lidar: f64,
    pub telemetry: f64,
}

/// Per-rover traffic counters
#[derive(Clone, Copy, Debug, Default)]
pub struct RoverStats {
    pub pose_packets: u64,
    pub lidar_chunks: u64,
    pub telemetry_packets: u64,
    pub malformed: u64,
    /// Accepted datagrams dropped because the fusion channel was full
    pub dropped_deliveries: u64,
}

/// Timestamp and counter tables shared between receiver threads and callers
#[derive(Default)]
struct FleetTables {
    timestamps: Mutex<HashMap<RoverId, StreamTimestamps>>,
    stats: Mutex<HashMap<RoverId, RoverStats>>,
}

impl FleetTables {
    fn record_accepted(&self, rover: RoverId, kind: StreamKind, timestamp: f64) {
        let mut table = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let entry = table.entry(rover).or_default();
        match kind {
            StreamKind::Pose => entry.pose = timestamp,
            StreamKind::Lidar => entry.lidar = timestamp,
            StreamKind::Telemetry => entry.telemetry = timestamp,
        }

        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(rover).or_default();
        match kind {
            StreamKind::Pose => entry.pose_packets += 1,
            StreamKind::Lidar => entry.lidar_chunks += 1,
            StreamKind::Telemetry => entry.telemetry_packets += 1,
        }
    }

    fn record_malformed(&self, rover: RoverId) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.entry(rover).or_default().malformed += 1;
    }

    fn record_dropped(&self, rover: RoverId) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.entry(rover).or_default().dropped_deliveries += 1;
    }
}

/// Resolved bind addresses of one rover's inbound sockets (useful when the
/// configuration asked for ephemeral ports)
#[derive(Clone, Copy, Debug)]
pub struct BoundEndpoints {
    pub rover: RoverId,
    pub pose: SocketAddr,
    pub lidar: SocketAddr,
    pub telemetry: SocketAddr,
}

/// Owner of all per-rover receiver threads and the outbound command socket.
pub struct FleetReceiver {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    tables: Arc<FleetTables>,
    command_socket: UdpSocket,
    command_endpoints: HashMap<RoverId, SocketAddr>,
    bound: Vec<BoundEndpoints>,
    offline_after: f64,
}

impl FleetReceiver {
    /// Bind every endpoint and spawn the receive threads.
    ///
    /// `running` is shared with the caller; clearing it stops every loop at
    /// its next datagram boundary. `offline_after` is the pose-staleness
    /// threshold for [`FleetReceiver::is_rover_online`].
    pub fn start(
        endpoints: &[RoverEndpoints],
        tx: Sender<Delivery>,
        running: Arc<AtomicBool>,
        offline_after: f64,
    ) -> Result<Self> {
        let tables = Arc::new(FleetTables::default());
        let command_socket = UdpSocket::bind("0.0.0.0:0")?;
        let mut command_endpoints = HashMap::new();
        let mut threads = Vec::with_capacity(endpoints.len() * 3);
        let mut bound = Vec::with_capacity(endpoints.len());

        for ep in endpoints {
            command_endpoints.insert(ep.rover, ep.command);

            let streams = [
                (StreamKind::Pose, ep.pose),
                (StreamKind::Lidar, ep.lidar),
                (StreamKind::Telemetry, ep.telemetry),
            ];
            let mut resolved = [ep.pose, ep.lidar, ep.telemetry];
            for (slot, (kind, addr)) in resolved.iter_mut().zip(streams) {
                let socket = UdpSocket::bind(addr)?;
                socket.set_read_timeout(Some(READ_TIMEOUT))?;
                *slot = socket.local_addr()?;

                let rover = ep.rover;
                let thread_tx = tx.clone();
                let thread_running = Arc::clone(&running);
                let thread_tables = Arc::clone(&tables);
                let handle = thread::Builder::new()
                    .name(format!("{}-{}", kind.label(), rover))
                    .spawn(move || {
                        run_stream(socket, rover, kind, thread_tx, thread_running, thread_tables)
                    })
                    .map_err(Error::Io)?;
                threads.push(handle);
            }
            bound.push(BoundEndpoints {
                rover: ep.rover,
                pose: resolved[0],
                lidar: resolved[1],
                telemetry: resolved[2],
            });
        }

        log::info!(
            "fleet receiver started: {} rovers, {} stream threads",
            endpoints.len(),
            threads.len()
        );
        Ok(Self {
            running,
            threads,
            tables,
            command_socket,
            command_endpoints,
            bound,
            offline_after,
        })
    }

    /// Resolved inbound bind addresses, in the order the endpoints were given
    pub fn local_endpoints(&self) -> &[BoundEndpoints] {
        &self.bound
    }

    /// Snapshot of the last-seen stream timestamps for one rover
    pub fn stream_timestamps(&self, rover: RoverId) -> Option<StreamTimestamps> {
        self.tables
            .timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&rover)
            .copied()
    }

    /// Snapshot of one rover's traffic counters
    pub fn stats(&self, rover: RoverId) -> Option<RoverStats> {
        self.tables
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&rover)
            .copied()
    }

    /// Derived liveness signal: the rover's pose stream has been seen and is
    /// fresher than the offline threshold. `now` is in the sender timebase.
    pub fn is_rover_online(&self, rover: RoverId, now: f64) -> bool {
        match self.stream_timestamps(rover) {
            Some(ts) => ts.pose > 0.0 && now - ts.pose < self.offline_after,
            None => false,
        }
    }

    /// Write a single command byte to the rover's command endpoint.
    ///
    /// One automatic retry after a short delay; the second failure is
    /// returned to the caller.
    pub fn send_command(&self, rover: RoverId, command: u8) -> Result<()> {
        let addr = self
            .command_endpoints
            .get(&rover)
            .ok_or_else(|| Error::Other(format!("no command endpoint for rover {}", rover)))?;
        match self.command_socket.send_to(&[command], addr) {
            Ok(_) => Ok(()),
            Err(first) => {
                log::warn!(
                    "command send to rover {} failed ({}), retrying",
                    rover,
                    first
                );
                thread::sleep(COMMAND_RETRY_DELAY);
                self.command_socket.send_to(&[command], addr)?;
                Ok(())
            }
        }
    }

    /// Stop every receive loop and join the threads
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.threads {
            if handle.join().is_err() {
                log::error!("receiver thread panicked during shutdown");
            }
        }
        log::info!("fleet receiver stopped");
    }
}

fn run_stream(
    socket: UdpSocket,
    rover: RoverId,
    kind: StreamKind,
    tx: Sender<Delivery>,
    running: Arc<AtomicBool>,
    tables: Arc<FleetTables>,
) {
    log::info!("{} receiver started for rover {}", kind.label(), rover);
    let mut buf = [0u8; MAX_DATAGRAM];

    while running.load(Ordering::Relaxed) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                log::error!("{} socket error for rover {}: {}", kind.label(), rover, e);
                thread::sleep(READ_TIMEOUT);
                continue;
            }
        };

        let parsed = parse_datagram(rover, kind, &buf[..len]);
        match parsed {
            Ok((timestamp, delivery)) => {
                tables.record_accepted(rover, kind, timestamp);
                match tx.try_send(delivery) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tables.record_dropped(rover);
                        log::trace!("fusion channel full, dropped {} datagram", kind.label());
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        log::debug!("fusion channel closed, {} receiver exiting", kind.label());
                        break;
                    }
                }
            }
            Err(e) => {
                tables.record_malformed(rover);
                log::warn!("rover {} {}: {}", rover, kind.label(), e);
            }
        }
    }

    log::info!("{} receiver stopped for rover {}", kind.label(), rover);
}

fn parse_datagram(rover: RoverId, kind: StreamKind, bytes: &[u8]) -> Result<(f64, Delivery)> {
    match kind {
        StreamKind::Pose => {
            let pose = wire::parse_pose(bytes)?;
            Ok((pose.timestamp, Delivery::Pose { rover, pose }))
        }
        StreamKind::Lidar => {
            let (header, points) = wire::parse_lidar(bytes)?;
            Ok((
                header.timestamp,
                Delivery::LidarChunk {
                    rover,
                    header,
                    points,
                },
            ))
        }
        StreamKind::Telemetry => {
            let telemetry = wire::parse_telemetry(bytes)?;
            Ok((telemetry.timestamp, Delivery::Telemetry { rover, telemetry }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_record_per_stream() {
        let tables = FleetTables::default();
        tables.record_accepted(1, StreamKind::Pose, 10.0);
        tables.record_accepted(1, StreamKind::Lidar, 11.0);
        tables.record_accepted(2, StreamKind::Telemetry, 12.0);

        let ts = tables.timestamps.lock().unwrap();
        assert_eq!(ts[&1].pose, 10.0);
        assert_eq!(ts[&1].lidar, 11.0);
        assert_eq!(ts[&1].telemetry, 0.0);
        assert_eq!(ts[&2].telemetry, 12.0);
        drop(ts);

        let stats = tables.stats.lock().unwrap();
        assert_eq!(stats[&1].pose_packets, 1);
        assert_eq!(stats[&1].lidar_chunks, 1);
        assert_eq!(stats[&2].telemetry_packets, 1);
    }

    #[test]
    fn test_malformed_counts_without_timestamp() {
        let tables = FleetTables::default();
        tables.record_malformed(3);
        tables.record_malformed(3);

        assert_eq!(tables.stats.lock().unwrap()[&3].malformed, 2);
        assert!(tables.timestamps.lock().unwrap().get(&3).is_none());
    }

    #[test]
    fn test_parse_datagram_dispatch() {
        let pose = wire::PosePacket {
            timestamp: 2.0,
            position: [0.0; 3],
            rotation_deg: [0.0; 3],
        };
        let (ts, delivery) = parse_datagram(1, StreamKind::Pose, &wire::encode_pose(&pose)).unwrap();
        assert_eq!(ts, 2.0);
        assert!(matches!(delivery, Delivery::Pose { rover: 1, .. }));

        // a pose-sized datagram on the telemetry stream is malformed
        assert!(parse_datagram(1, StreamKind::Telemetry, &wire::encode_pose(&pose)).is_err());
    }
}
