//! Vehicle Safety - Main Entry Point
//!
//! Runs the full pipeline against a simulated controller and a synthetic
//! detector that reports an approaching pedestrian. Pass a TOML file as the
//! first argument to override the defaults.

use fcw::{AlertLevel, BoundingBox, Detection};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};
use vehicle_safety::{init_logging, run_simulator, SafetyConfig, SafetySystem};
use vesc_protocol::SimulatedVesc;

/// Box height grows each frame until the pedestrian "passes"
async fn synthetic_detector(detection_tx: mpsc::Sender<Vec<Detection>>) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut height = 20.0;
    loop {
        interval.tick().await;
        let detection = Detection::new("person", 0.89, BoundingBox::new(320.0, 240.0, 0.4 * height, height));
        if detection_tx.send(vec![detection]).await.is_err() {
            break;
        }
        height = if height >= 300.0 { 20.0 } else { height + 2.0 };
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = SafetyConfig::load(path.as_deref())?;
    init_logging(&config.logging)?;

    info!("=== VESC Safety v{} ===", env!("CARGO_PKG_VERSION"));

    let capacity = config.runtime.channel_capacity.max(1);
    let (bus_tx, bus_rx) = mpsc::channel(capacity);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (detection_tx, detection_rx) = mpsc::channel(capacity);
    let (sim_shutdown_tx, sim_shutdown_rx) = watch::channel(false);

    let mut vesc = SimulatedVesc::new(config.simulator.controller_id);
    vesc.set_rpm(config.simulator.initial_rpm);
    let simulator = tokio::spawn(run_simulator(
        vesc,
        config.simulator.status_hz,
        bus_tx,
        command_rx,
        sim_shutdown_rx,
    ));

    let system = SafetySystem::spawn(config.clone(), bus_rx, command_tx, detection_rx);
    let connected = system
        .wait_for_discovery(&[config.simulator.controller_id])
        .await?;
    info!("Controllers online: {:?}", connected);

    let detector = tokio::spawn(synthetic_detector(detection_tx));
    let mut assessments = system.assessments();
    let mut report = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = report.tick() => {
                for telemetry in system.registry().reports(Instant::now()) {
                    match serde_json::to_string(&telemetry) {
                        Ok(json) => info!("Telemetry: {}", json),
                        Err(e) => warn!("Failed to serialize report: {}", e),
                    }
                }
                info!("Registry stats: {:?}", system.registry().stats());
            }
            changed = assessments.changed() => {
                if changed.is_err() {
                    break;
                }
                let assessment = assessments.borrow_and_update().clone();
                if assessment.alert_level != AlertLevel::Safe {
                    info!(
                        "Risk {:?}: distance {:.2} m, ttc {:.2} s",
                        assessment.alert_level, assessment.distance_m, assessment.ttc_s
                    );
                }
            }
        }
    }

    detector.abort();
    system.shutdown().await?;
    sim_shutdown_tx.send_replace(true);
    let vesc = simulator.await?;
    info!("Simulated motor stopped at {:.0} rpm", vesc.rpm());

    Ok(())
}
