//! Daemon configuration loading from TOML
//!
//! Every field has a working default, so an empty file (or no file at all)
//! runs a three-rover fleet on the conventional ports. Example:
//!
//! ```toml
//! [fleet]
//! rover_count = 5
//! bind_host = "0.0.0.0"
//! command_host = "127.0.0.1"
//! pose_base_port = 9000        # rover i's stream arrives on base + i
//! lidar_base_port = 10000
//! telemetry_base_port = 11000
//! command_base_port = 8000
//! offline_after_s = 1.0
//!
//! # Per-rover exceptions to the port convention (all fields optional).
//! [[fleet.rover]]
//! id = 2
//! lidar_port = 40000
//! command_host = "10.0.0.7"
//!
//! [assembler]
//! partial_timeout_s = 0.2
//! store_global_points = false
//! max_global_points = 2000000
//!
//! [fusion]
//! upload_budget_bytes = 10485760   # 10 MB of height grids per frame
//! tick_interval_ms = 16
//! channel_capacity = 1024
//! stats_interval_s = 5
//!
//! [elevation]
//! tile_size = 32.0
//! base_cell_resolution = 0.25
//! tau_accept = 0.25
//! tau_replace = 0.7
//! ```
//!
//! Port convention: for rover id i in 1..=rover_count, the pose endpoint is
//! `pose_base_port + i`, and likewise for lidar, telemetry, and command. A
//! `[[fleet.rover]]` entry replaces any of the derived ports or hosts for
//! one rover; fields it leaves out keep the convention.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::net::{RoverEndpoints, RoverId};
use bhumi_map::ElevationConfig;

/// Fleet size and endpoint layout
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Number of rovers; ids are 1..=rover_count
    #[serde(default = "default_rover_count")]
    pub rover_count: u8,

    /// Address the inbound stream sockets bind to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Address rover command endpoints live on
    #[serde(default = "default_command_host")]
    pub command_host: String,

    #[serde(default = "default_pose_base_port")]
    pub pose_base_port: u16,

    #[serde(default = "default_lidar_base_port")]
    pub lidar_base_port: u16,

    #[serde(default = "default_telemetry_base_port")]
    pub telemetry_base_port: u16,

    #[serde(default = "default_command_base_port")]
    pub command_base_port: u16,

    /// Pose staleness after which a rover counts as offline
    #[serde(default = "default_offline_after")]
    pub offline_after_s: f64,

    /// Per-rover exceptions to the port convention (`[[fleet.rover]]`)
    #[serde(default, rename = "rover")]
    pub rover_overrides: Vec<RoverOverride>,
}

/// Explicit endpoint overrides for one rover. Absent fields keep the
/// derived convention.
#[derive(Debug, Clone, Deserialize)]
pub struct RoverOverride {
    /// Rover id this entry applies to (1..=rover_count)
    pub id: u8,

    #[serde(default)]
    pub pose_port: Option<u16>,

    #[serde(default)]
    pub lidar_port: Option<u16>,

    #[serde(default)]
    pub telemetry_port: Option<u16>,

    #[serde(default)]
    pub command_port: Option<u16>,

    /// Bind this rover's inbound stream sockets on a different address
    #[serde(default)]
    pub bind_host: Option<String>,

    /// Send this rover's commands to a different address
    #[serde(default)]
    pub command_host: Option<String>,
}

fn default_rover_count() -> u8 {
    3
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_command_host() -> String {
    "127.0.0.1".to_string()
}
fn default_pose_base_port() -> u16 {
    9000
}
fn default_lidar_base_port() -> u16 {
    10000
}
fn default_telemetry_base_port() -> u16 {
    11000
}
fn default_command_base_port() -> u16 {
    8000
}
fn default_offline_after() -> f64 {
    1.0
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            rover_count: default_rover_count(),
            bind_host: default_bind_host(),
            command_host: default_command_host(),
            pose_base_port: default_pose_base_port(),
            lidar_base_port: default_lidar_base_port(),
            telemetry_base_port: default_telemetry_base_port(),
            command_base_port: default_command_base_port(),
            offline_after_s: default_offline_after(),
            rover_overrides: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Expand the port convention into concrete per-rover endpoints,
    /// applying any `[[fleet.rover]]` overrides.
    pub fn endpoints(&self) -> Result<Vec<RoverEndpoints>> {
        let default_bind = parse_host("bind_host", &self.bind_host)?;
        let default_command = parse_host("command_host", &self.command_host)?;

        let mut overrides: HashMap<u8, &RoverOverride> = HashMap::new();
        for ov in &self.rover_overrides {
            if ov.id == 0 || ov.id > self.rover_count {
                return Err(Error::Config(format!(
                    "rover override id {} outside 1..={}",
                    ov.id, self.rover_count
                )));
            }
            if overrides.insert(ov.id, ov).is_some() {
                return Err(Error::Config(format!(
                    "duplicate rover override for id {}",
                    ov.id
                )));
            }
        }

        (1..=self.rover_count)
            .map(|id| {
                let ov = overrides.get(&id).copied();
                let bind_ip = match ov.and_then(|o| o.bind_host.as_deref()) {
                    Some(host) => parse_host("bind_host", host)?,
                    None => default_bind,
                };
                let command_ip = match ov.and_then(|o| o.command_host.as_deref()) {
                    Some(host) => parse_host("command_host", host)?,
                    None => default_command,
                };
                Ok(RoverEndpoints {
                    rover: id as RoverId,
                    pose: SocketAddr::new(
                        bind_ip,
                        self.port_for(ov.and_then(|o| o.pose_port), self.pose_base_port, id)?,
                    ),
                    lidar: SocketAddr::new(
                        bind_ip,
                        self.port_for(ov.and_then(|o| o.lidar_port), self.lidar_base_port, id)?,
                    ),
                    telemetry: SocketAddr::new(
                        bind_ip,
                        self.port_for(
                            ov.and_then(|o| o.telemetry_port),
                            self.telemetry_base_port,
                            id,
                        )?,
                    ),
                    command: SocketAddr::new(
                        command_ip,
                        self.port_for(
                            ov.and_then(|o| o.command_port),
                            self.command_base_port,
                            id,
                        )?,
                    ),
                })
            })
            .collect()
    }

    fn port_for(&self, explicit: Option<u16>, base: u16, id: u8) -> Result<u16> {
        match explicit {
            Some(port) => Ok(port),
            None => base
                .checked_add(id as u16)
                .ok_or_else(|| Error::Config(format!("port {} + {} overflows", base, id))),
        }
    }
}

fn parse_host(field: &str, host: &str) -> Result<IpAddr> {
    host.parse()
        .map_err(|_| Error::Config(format!("invalid {} '{}'", field, host)))
}

/// Scan assembly tuning
#[derive(Debug, Clone, Deserialize)]
pub struct AssemblerConfig {
    /// Seconds from first chunk arrival before an incomplete scan is dropped
    #[serde(default = "default_partial_timeout")]
    pub partial_timeout_s: f64,

    /// Mirror completed scans into the global terrain buffer
    #[serde(default)]
    pub store_global_points: bool,

    /// Cap on the mirror buffer; oldest points are dropped first
    #[serde(default = "default_max_global_points")]
    pub max_global_points: usize,
}

fn default_partial_timeout() -> f64 {
    0.2
}
fn default_max_global_points() -> usize {
    2_000_000
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            partial_timeout_s: default_partial_timeout(),
            store_global_points: false,
            max_global_points: default_max_global_points(),
        }
    }
}

/// Fusion loop pacing and budgets
#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// Height-grid bytes exported to the sink per frame
    #[serde(default = "default_upload_budget")]
    pub upload_budget_bytes: usize,

    /// Target fusion frame interval
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Bounded delivery channel depth between receivers and fusion
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Seconds between periodic stats log lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval_s: u64,
}

fn default_upload_budget() -> usize {
    10 * 1024 * 1024
}
fn default_tick_interval() -> u64 {
    16
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_stats_interval() -> u64 {
    5
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            upload_budget_bytes: default_upload_budget(),
            tick_interval_ms: default_tick_interval(),
            channel_capacity: default_channel_capacity(),
            stats_interval_s: default_stats_interval(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fleet: FleetConfig,

    #[serde(default)]
    pub assembler: AssemblerConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub elevation: ElevationConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read config: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = basic_toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fleet.rover_count == 0 {
            return Err(Error::Config("rover_count must be at least 1".to_string()));
        }
        if self.assembler.partial_timeout_s <= 0.0 {
            return Err(Error::Config(
                "partial_timeout_s must be positive".to_string(),
            ));
        }
        if self.fusion.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        self.elevation.validate()?;
        // fail early on unparseable hosts instead of at socket bind
        self.fleet.endpoints()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.fleet.rover_count, 3);
        assert_eq!(config.assembler.partial_timeout_s, 0.2);
        assert_eq!(config.fusion.upload_budget_bytes, 10 * 1024 * 1024);
        assert_eq!(config.elevation.tile_size, 32.0);
    }

    #[test]
    fn test_port_convention() {
        let config = Config::from_toml("").unwrap();
        let endpoints = config.fleet.endpoints().unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].rover, 1);
        assert_eq!(endpoints[0].pose.port(), 9001);
        assert_eq!(endpoints[0].lidar.port(), 10001);
        assert_eq!(endpoints[0].telemetry.port(), 11001);
        assert_eq!(endpoints[0].command.port(), 8001);
        assert_eq!(endpoints[2].pose.port(), 9003);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_toml(
            r#"
            [fleet]
            rover_count = 1
            bind_host = "127.0.0.1"
            pose_base_port = 20000

            [elevation]
            base_cell_resolution = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.fleet.rover_count, 1);
        assert_eq!(config.elevation.base_cell_resolution, 0.5);
        let endpoints = config.fleet.endpoints().unwrap();
        assert_eq!(endpoints[0].pose.port(), 20001);
        assert!(endpoints[0].pose.ip().is_loopback());
    }

    #[test]
    fn test_per_rover_override() {
        let config = Config::from_toml(
            r#"
            [fleet]
            rover_count = 2

            [[fleet.rover]]
            id = 2
            lidar_port = 40000
            command_host = "10.0.0.7"
            "#,
        )
        .unwrap();
        let endpoints = config.fleet.endpoints().unwrap();

        // rover 1 keeps the convention everywhere
        assert_eq!(endpoints[0].lidar.port(), 10001);
        assert_eq!(endpoints[0].command.ip().to_string(), "127.0.0.1");

        // rover 2 gets the overridden fields, convention for the rest
        assert_eq!(endpoints[1].lidar.port(), 40000);
        assert_eq!(endpoints[1].pose.port(), 9002);
        assert_eq!(endpoints[1].telemetry.port(), 11002);
        assert_eq!(endpoints[1].command.port(), 8002);
        assert_eq!(endpoints[1].command.ip().to_string(), "10.0.0.7");
    }

    #[test]
    fn test_override_bind_host_applies_to_streams() {
        let config = Config::from_toml(
            r#"
            [fleet]
            rover_count = 1

            [[fleet.rover]]
            id = 1
            bind_host = "127.0.0.1"
            "#,
        )
        .unwrap();
        let endpoints = config.fleet.endpoints().unwrap();
        assert!(endpoints[0].pose.ip().is_loopback());
        assert!(endpoints[0].lidar.ip().is_loopback());
        assert!(endpoints[0].telemetry.ip().is_loopback());
    }

    #[test]
    fn test_rejects_override_for_unknown_rover() {
        let toml = r#"
            [fleet]
            rover_count = 2

            [[fleet.rover]]
            id = 5
            pose_port = 30000
        "#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_duplicate_override() {
        let toml = r#"
            [fleet]
            rover_count = 2

            [[fleet.rover]]
            id = 1
            pose_port = 30000

            [[fleet.rover]]
            id = 1
            pose_port = 30001
        "#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_zero_rovers() {
        assert!(Config::from_toml("[fleet]\nrover_count = 0\n").is_err());
    }

    #[test]
    fn test_rejects_bad_host() {
        assert!(Config::from_toml("[fleet]\nbind_host = \"not a host\"\n").is_err());
    }

    #[test]
    fn test_rejects_bad_elevation() {
        let toml = "[elevation]\ntau_accept = 0.9\ntau_replace = 0.7\n";
        assert!(Config::from_toml(toml).is_err());
    }
}
