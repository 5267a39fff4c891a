//! SancharIO - rover fleet LiDAR fusion daemon

use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sanchar_io::assembler::ScanAssembler;
use sanchar_io::clock::{Clock, MonotonicClock};
use sanchar_io::config::Config;
use sanchar_io::error::Error;
use sanchar_io::fusion::{FusionPipeline, LogSink};
use sanchar_io::net::FleetReceiver;
use sanchar_io::Result;

use bhumi_map::ElevationMap;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("SancharIO v0.2.0 starting...");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/sanchario.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
        Config::load(&config_path)?
    } else {
        log::warn!("Config {} not found, using defaults", config_path);
        Config::default()
    };

    let endpoints = config.fleet.endpoints()?;
    log::info!(
        "Fleet: {} rovers, pose ports {}..={}",
        config.fleet.rover_count,
        config.fleet.pose_base_port + 1,
        config.fleet.pose_base_port + config.fleet.rover_count as u16
    );

    // Shutdown flag shared with every receiver thread
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let (tx, rx) = crossbeam_channel::bounded(config.fusion.channel_capacity);
    let receiver = FleetReceiver::start(
        &endpoints,
        tx,
        Arc::clone(&running),
        config.fleet.offline_after_s,
    )?;

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let assembler = Arc::new(ScanAssembler::with_timeout(
        Arc::clone(&clock),
        config.assembler.partial_timeout_s,
    ));
    assembler.set_store_global_points(config.assembler.store_global_points);
    assembler.set_max_global_points(config.assembler.max_global_points);

    let map = ElevationMap::new(config.elevation)?;
    let mut pipeline = FusionPipeline::new(
        rx,
        Arc::clone(&assembler),
        map,
        Arc::clone(&clock),
        config.fusion.upload_budget_bytes,
    );
    let mut sink = LogSink;

    let tick_interval = Duration::from_millis(config.fusion.tick_interval_ms);
    let stats_interval = Duration::from_secs(config.fusion.stats_interval_s);
    let mut last_stats = Instant::now();

    log::info!("SancharIO running. Press Ctrl-C to stop.");

    while running.load(Ordering::Relaxed) {
        let frame_start = Instant::now();
        let report = pipeline.tick(&mut sink);

        if report.completed_scans > 0 {
            log::debug!(
                "tick: {} scans ({} points), {} tiles exported ({} bytes)",
                report.completed_scans,
                report.points_integrated,
                report.tiles_exported,
                report.bytes_exported
            );
        }

        if last_stats.elapsed() >= stats_interval {
            let stats = pipeline.map().get_stats();
            log::info!(
                "map: {} tiles, {} leaves; {} partial scans pending",
                stats.num_tiles,
                stats.num_leaves,
                assembler.pending_partials()
            );
            for ep in receiver.local_endpoints() {
                if let Some(s) = receiver.stats(ep.rover) {
                    log::info!(
                        "rover {}: {} pose / {} lidar / {} telemetry packets, {} malformed",
                        ep.rover,
                        s.pose_packets,
                        s.lidar_chunks,
                        s.telemetry_packets,
                        s.malformed
                    );
                }
            }
            last_stats = Instant::now();
        }

        if let Some(rest) = tick_interval.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("Shutting down...");
    receiver.stop();

    let stats = pipeline.map().get_stats();
    log::info!(
        "SancharIO stopped ({} tiles, {} leaves mapped)",
        stats.num_tiles,
        stats.num_leaves
    );
    Ok(())
}
