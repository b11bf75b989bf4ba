//! Safety System Runtime

use crate::config::SafetyConfig;
use crate::SafetyError;
use actuation::{Accepted, ActuationController, Rejected};
use fcw::{AlertGate, AlertLevel, Detection, DetectionFilter, RiskAssessment, RiskEngine};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::{ConnectionState, ControllerRegistry, TelemetrySnapshot};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vesc_protocol::{ActuationRequest, CanFrame, ControllerId};

/// Handle to the running loops
pub struct SafetySystem {
    config: SafetyConfig,
    registry: Arc<ControllerRegistry>,
    actuation: Arc<ActuationController>,
    shutdown_tx: watch::Sender<bool>,
    assessment_rx: watch::Receiver<RiskAssessment>,
    tasks: Vec<JoinHandle<()>>,
}

impl SafetySystem {
    /// Start the ingestion, control, sweep and evaluation loops.
    ///
    /// `bus_rx` carries frames received from the CAN bus, `command_tx`
    /// takes frames to transmit and `detection_rx` one detector output per
    /// camera frame. Must be called from within a tokio runtime.
    pub fn spawn(
        config: SafetyConfig,
        bus_rx: mpsc::Receiver<CanFrame>,
        command_tx: mpsc::Sender<CanFrame>,
        detection_rx: mpsc::Receiver<Vec<Detection>>,
    ) -> Self {
        info!("Starting safety system");
        let registry = Arc::new(ControllerRegistry::new(config.registry.clone()));
        let actuation = Arc::new(ActuationController::new(
            config.actuation.clone(),
            registry.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (assessment_tx, assessment_rx) = watch::channel(RiskAssessment::safe());

        let evaluator = Evaluator {
            engine: RiskEngine::new(config.fcw.clone()),
            filter: DetectionFilter::from_config(&config.fcw),
            gate: AlertGate::new(config.alert.clone()),
            target: config.runtime.target_controller,
            registry: registry.clone(),
            actuation: actuation.clone(),
        };

        let tasks = vec![
            tokio::spawn(ingest_loop(
                registry.clone(),
                bus_rx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(actuation.clone().run(command_tx, shutdown_rx.clone())),
            tokio::spawn(sweep_loop(
                registry.clone(),
                Duration::from_millis(config.registry.sweep_interval_ms.max(1)),
                config.runtime.purge_lost,
                shutdown_rx.clone(),
            )),
            tokio::spawn(evaluation_loop(
                evaluator,
                detection_rx,
                assessment_tx,
                shutdown_rx,
            )),
        ];

        Self {
            config,
            registry,
            actuation,
            shutdown_tx,
            assessment_rx,
            tasks,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    pub fn actuation(&self) -> &Arc<ActuationController> {
        &self.actuation
    }

    /// Latest risk assessment, updated once per detector frame
    pub fn assessments(&self) -> watch::Receiver<RiskAssessment> {
        self.assessment_rx.clone()
    }

    /// Queue an actuation request for the next control tick
    pub fn submit(
        &self,
        controller_id: ControllerId,
        request: ActuationRequest,
    ) -> Result<Accepted, Rejected> {
        self.actuation.submit(controller_id, request)
    }

    /// Wait until every id in `expected` is connected, or until the
    /// discovery window has elapsed. With an empty `expected` this waits
    /// for the full window and returns whatever was found.
    pub async fn wait_for_discovery(
        &self,
        expected: &[ControllerId],
    ) -> Result<BTreeSet<ControllerId>, SafetyError> {
        let poll = Duration::from_millis(self.config.registry.sweep_interval_ms.max(1));
        loop {
            let connected = self.registry.list_connected();
            let missing: Vec<ControllerId> = expected
                .iter()
                .copied()
                .filter(|id| !connected.contains(id))
                .collect();

            if !expected.is_empty() && missing.is_empty() {
                info!("Discovered expected controllers {:?}", connected);
                return Ok(connected);
            }
            if self.registry.is_discovery_settled(Instant::now()) {
                if !missing.is_empty() {
                    warn!("Discovery settled without controllers {:?}", missing);
                    return Err(SafetyError::ControllersMissing(missing));
                }
                info!("Discovery settled with controllers {:?}", connected);
                return Ok(connected);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop every loop. Active brake sequences are aborted with a zero
    /// current command before the control loop exits.
    pub async fn shutdown(self) -> Result<(), SafetyError> {
        info!("Shutting down safety system");
        self.shutdown_tx.send_replace(true);
        for task in self.tasks {
            task.await?;
        }
        info!("Safety system stopped");
        Ok(())
    }
}

fn stopping(changed: Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

async fn ingest_loop(
    registry: Arc<ControllerRegistry>,
    mut bus_rx: mpsc::Receiver<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting CAN ingestion loop");
    loop {
        tokio::select! {
            frame = bus_rx.recv() => match frame {
                Some(frame) => {
                    // failures are logged and counted by the registry
                    let _ = registry.ingest(&frame, Instant::now());
                }
                None => {
                    info!("CAN receive channel closed");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if stopping(changed, &shutdown) {
                    break;
                }
            }
        }
    }
    info!("CAN ingestion loop stopped");
}

async fn sweep_loop(
    registry: Arc<ControllerRegistry>,
    period: Duration,
    purge_lost: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let transitions = registry.sweep(Instant::now());
                if purge_lost && transitions.iter().any(|t| t.to == ConnectionState::Lost) {
                    registry.purge_lost();
                }
            }
            changed = shutdown.changed() => {
                if stopping(changed, &shutdown) {
                    break;
                }
            }
        }
    }
}

async fn evaluation_loop(
    mut evaluator: Evaluator,
    mut detection_rx: mpsc::Receiver<Vec<Detection>>,
    assessment_tx: watch::Sender<RiskAssessment>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting evaluation loop");
    loop {
        tokio::select! {
            detections = detection_rx.recv() => match detections {
                Some(detections) => {
                    let assessment = evaluator.evaluate(detections, Instant::now());
                    assessment_tx.send_replace(assessment);
                }
                None => {
                    info!("Detection channel closed");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if stopping(changed, &shutdown) {
                    break;
                }
            }
        }
    }
    info!(
        "Evaluation loop stopped after {} alerts ({} suppressed)",
        evaluator.gate.fire_count(),
        evaluator.gate.suppressed_count()
    );
}

/// One detector frame through filter, risk engine, alert gate and brake
/// request
struct Evaluator {
    engine: RiskEngine,
    filter: DetectionFilter,
    gate: AlertGate,
    target: Option<ControllerId>,
    registry: Arc<ControllerRegistry>,
    actuation: Arc<ActuationController>,
}

impl Evaluator {
    fn target(&self) -> Option<ControllerId> {
        self.target
            .or_else(|| self.registry.list_connected().into_iter().next())
    }

    fn evaluate(&mut self, detections: Vec<Detection>, now: Instant) -> RiskAssessment {
        let detections = self.filter.apply(detections);
        let target = self.target();
        let telemetry = match target {
            Some(id) => {
                if self.registry.connection_state(id) == Some(ConnectionState::Stale) {
                    debug!("Evaluating against stale telemetry of controller {}", id);
                }
                self.registry.get_snapshot(id).unwrap_or_default()
            }
            None => TelemetrySnapshot::default(),
        };

        let assessment = self.engine.assess_frame(&detections, &telemetry);
        if assessment.alert_level == AlertLevel::Safe {
            return assessment;
        }

        self.gate.try_fire(assessment.alert_level, now);

        if let (Some(id), Some(request)) = (target, assessment.to_request()) {
            match self.actuation.submit_at(id, request, now) {
                Ok(accepted) => info!(
                    "Brake requested for controller {}: {:?} (ttc {:.2} s)",
                    id, accepted.request, assessment.ttc_s
                ),
                Err(e) => debug!("Brake for controller {} not applied: {}", id, e),
            }
        }
        assessment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcw::BoundingBox;
    use vesc_protocol::StatusMessage;

    fn evaluator(target: Option<ControllerId>) -> Evaluator {
        let config = SafetyConfig::default();
        let registry = Arc::new(ControllerRegistry::default());
        let actuation = Arc::new(ActuationController::new(
            config.actuation.clone(),
            registry.clone(),
        ));
        Evaluator {
            engine: RiskEngine::new(config.fcw.clone()),
            filter: DetectionFilter::from_config(&config.fcw),
            gate: AlertGate::new(config.alert.clone()),
            target,
            registry,
            actuation,
        }
    }

    fn moving(registry: &ControllerRegistry, id: ControllerId, rpm: i32) {
        let status = StatusMessage::Status1 {
            rpm,
            motor_current: 2.0,
            duty_cycle: 0.3,
        };
        registry.on_status(id, &status, Instant::now());
    }

    fn person(height: f64, confidence: f64) -> Detection {
        Detection::new("person", confidence, BoundingBox::new(100.0, 80.0, 30.0, height))
    }

    #[test]
    fn test_target_defaults_to_lowest_connected() {
        let evaluator = evaluator(None);
        assert_eq!(evaluator.target(), None);
        moving(&evaluator.registry, 74, 0);
        moving(&evaluator.registry, 2, 0);
        assert_eq!(evaluator.target(), Some(2));
    }

    #[test]
    fn test_warning_submits_brake() {
        let mut evaluator = evaluator(Some(74));
        moving(&evaluator.registry, 74, 900);

        let assessment = evaluator.evaluate(vec![person(50.0, 0.9)], Instant::now());
        assert_eq!(assessment.alert_level, AlertLevel::Warning);
        assert_eq!(evaluator.gate.fire_count(), 1);

        // queued brake blocks a second one
        assert!(matches!(
            evaluator.actuation.submit(74, assessment.to_request().unwrap()),
            Err(Rejected::BusyRamping { .. })
        ));
    }

    #[test]
    fn test_low_confidence_is_ignored() {
        let mut evaluator = evaluator(Some(74));
        moving(&evaluator.registry, 74, 900);

        let assessment = evaluator.evaluate(vec![person(50.0, 0.4)], Instant::now());
        assert_eq!(assessment, RiskAssessment::safe());
        assert_eq!(evaluator.gate.fire_count(), 0);
        assert!(evaluator.actuation.state(74).is_none());
    }

    #[test]
    fn test_unknown_target_still_assesses() {
        let mut evaluator = evaluator(Some(9));
        moving(&evaluator.registry, 74, 900);

        // no telemetry for 9, so no speed and no risk
        let assessment = evaluator.evaluate(vec![person(50.0, 0.9)], Instant::now());
        assert_eq!(assessment.alert_level, AlertLevel::Safe);
    }
}
