//! Simulated CAN bus
//!
//! Connects a [`SimulatedVesc`] to the runtime's frame channels in place of
//! a real transport.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use vesc_protocol::{CanFrame, SimulatedVesc};

const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_PERIOD: Duration = Duration::from_secs(60);

/// Broadcast period for a status rate, bounded to [1 ms, 60 s]
fn status_period(hz: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / hz)
        .unwrap_or(MAX_PERIOD)
        .clamp(MIN_PERIOD, MAX_PERIOD)
}

/// Broadcast status frames at `status_hz` and apply incoming commands until
/// `shutdown` or either channel closes. Returns the node for inspection.
pub async fn run_simulator(
    mut vesc: SimulatedVesc,
    status_hz: f64,
    bus_tx: mpsc::Sender<CanFrame>,
    mut command_rx: mpsc::Receiver<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) -> SimulatedVesc {
    let hz = if status_hz.is_finite() && status_hz > 0.0 {
        status_hz
    } else {
        50.0
    };
    let period = status_period(hz);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Simulated bus running for controller {} at {} Hz",
        vesc.controller_id(),
        hz
    );

    'bus: loop {
        tokio::select! {
            _ = interval.tick() => {
                vesc.step(period);
                for frame in vesc.status_frames() {
                    if bus_tx.send(frame).await.is_err() {
                        warn!("Bus receiver closed, stopping simulator");
                        break 'bus;
                    }
                }
            }
            command = command_rx.recv() => match command {
                Some(frame) => {
                    vesc.receive(&frame);
                }
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Simulated bus for controller {} stopped", vesc.controller_id());
    vesc
}
