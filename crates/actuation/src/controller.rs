//! Actuation Controller and Control Loop

use crate::state::{ActuationState, Phase};
use crate::{ActuationConfig, Rejected};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use telemetry_store::ControllerRegistry;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vesc_protocol::{encode, encode_command, ActuationRequest, CanFrame, ControllerId, MotorCommand};

/// A request that will be applied on the next tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accepted {
    /// The request after clamping
    pub request: ActuationRequest,
    /// True if clamping changed the submitted values
    pub clamped: bool,
}

/// Per-controller actuation slot.
///
/// `pending` is written by submitters, `state` only by the control tick.
/// Both paths take `pending` before `state`.
#[derive(Default)]
struct Slot {
    pending: Mutex<Vec<ActuationRequest>>,
    state: RwLock<ActuationState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Bounded actuation for every controller in the registry
pub struct ActuationController {
    config: ActuationConfig,
    registry: Arc<ControllerRegistry>,
    slots: RwLock<HashMap<ControllerId, Arc<Slot>>>,
}

impl ActuationController {
    /// Create a controller that addresses ids known to `registry`
    pub fn new(config: ActuationConfig, registry: Arc<ControllerRegistry>) -> Self {
        info!("Creating actuation controller with config: {:?}", config);
        Self {
            config,
            registry,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Controller configuration
    pub fn config(&self) -> &ActuationConfig {
        &self.config
    }

    fn slot(&self, controller_id: ControllerId) -> Arc<Slot> {
        if let Some(slot) = read(&self.slots).get(&controller_id) {
            return slot.clone();
        }
        write(&self.slots).entry(controller_id).or_default().clone()
    }

    /// Current state of a controller's brake sequence
    pub fn state(&self, controller_id: ControllerId) -> Option<ActuationState> {
        read(&self.slots)
            .get(&controller_id)
            .map(|slot| read(&slot.state).clone())
    }

    /// Queue a request for the next tick
    pub fn submit(
        &self,
        controller_id: ControllerId,
        request: ActuationRequest,
    ) -> Result<Accepted, Rejected> {
        self.submit_at(controller_id, request, Instant::now())
    }

    /// Queue a request, evaluating cooldown against `now`
    pub fn submit_at(
        &self,
        controller_id: ControllerId,
        request: ActuationRequest,
        now: Instant,
    ) -> Result<Accepted, Rejected> {
        let bounded = request.clamped();
        if bounded.adjusted {
            warn!(
                "Request {:?} for controller {} clamped to {:?}",
                request, controller_id, bounded.value
            );
        }
        let request = bounded.value;

        // a stop must reach any controller that still has actuation state
        if let Err(e) = self.registry.ensure_addressable(controller_id) {
            let has_state = read(&self.slots).contains_key(&controller_id);
            if !(request.is_emergency_stop() && has_state) {
                warn!("Rejecting {:?}: {}", request, e);
                return Err(Rejected::UnknownController(controller_id));
            }
            warn!("Sending stop to controller {} although {}", controller_id, e);
        }

        let slot = self.slot(controller_id);
        let mut pending = lock(&slot.pending);
        let state = read(&slot.state);

        if request.is_emergency_stop() {
            if state.phase.is_active() || pending.iter().any(|r| r.is_brake()) {
                warn!(
                    "Emergency stop for controller {} during {:?}",
                    controller_id, state.phase
                );
            }
            pending.clear();
        } else {
            let brake_queued = pending.iter().any(|r| r.is_brake());
            if request.is_brake() {
                if brake_queued {
                    return Err(Rejected::BusyRamping {
                        phase: Phase::RampingUp,
                    });
                }
                if let Err(e) = state.check_brake_allowed(now) {
                    debug!("Brake for controller {} rejected: {}", controller_id, e);
                    return Err(e);
                }
            } else if state.phase.is_active() || brake_queued {
                return Err(Rejected::BusyRamping { phase: state.phase });
            }
        }

        pending.push(request);
        Ok(Accepted {
            request,
            clamped: bounded.adjusted,
        })
    }

    /// Run one control period: apply queued requests, advance every brake
    /// sequence and return the frames to send.
    pub fn tick(&self, now: Instant) -> Vec<CanFrame> {
        let period = self.config.tick_period();
        let slots: Vec<(ControllerId, Arc<Slot>)> = read(&self.slots)
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut frames = Vec::new();
        for (controller_id, slot) in slots {
            let requests: Vec<ActuationRequest> = lock(&slot.pending).drain(..).collect();
            let mut state = write(&slot.state);
            let before = state.phase;

            for request in &requests {
                match *request {
                    ActuationRequest::SetBrakeCurrent {
                        current_a,
                        ramp_time_s,
                    } => {
                        info!(
                            "Controller {} brake to {:.2} A over {:.1} s",
                            controller_id, current_a, ramp_time_s
                        );
                        state.start_brake(current_a, ramp_time_s);
                    }
                    _ if request.is_emergency_stop() => {
                        let command = request.command();
                        if state.phase.is_active() {
                            info!(
                                "Controller {} stopped, {:?} -> Idle",
                                controller_id, state.phase
                            );
                        }
                        state.emergency_stop(command);
                        frames.push(encode_command(&command, controller_id));
                    }
                    _ => {
                        state.record_command(request.command());
                        frames.push(encode(request, controller_id));
                    }
                }
            }

            if let Some(command) = state.tick(now, period, &self.config) {
                frames.push(encode_command(&command, controller_id));
            }

            if state.phase != before {
                debug!(
                    "Controller {} phase {:?} -> {:?}",
                    controller_id, before, state.phase
                );
            }
        }

        frames
    }

    /// Abort every active brake sequence; returns one stop frame per
    /// controller that was braking
    pub fn stop_all(&self) -> Vec<CanFrame> {
        let slots: Vec<(ControllerId, Arc<Slot>)> = read(&self.slots)
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut frames = Vec::new();
        for (controller_id, slot) in slots {
            lock(&slot.pending).clear();
            let mut state = write(&slot.state);
            if state.phase.is_active() {
                let command = MotorCommand::Current(0.0);
                state.emergency_stop(command);
                frames.push(encode_command(&command, controller_id));
                info!("Controller {} brake aborted on shutdown", controller_id);
            }
        }
        frames
    }

    /// Drive the control tick until `shutdown` flips to true or the frame
    /// channel closes
    pub async fn run(
        self: Arc<Self>,
        frame_tx: mpsc::Sender<CanFrame>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting control loop at {} Hz", self.config.tick_hz);
        let mut interval = tokio::time::interval(self.config.tick_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for frame in self.tick(Instant::now()) {
                        if frame_tx.send(frame).await.is_err() {
                            warn!("Command channel closed, stopping control loop");
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for frame in self.stop_all() {
            if frame_tx.send(frame).await.is_err() {
                warn!(
                    "Stop for controller {} not delivered, command channel closed",
                    frame.controller_id()
                );
            }
        }
        info!("Control loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use telemetry_store::ConnectionState;
    use vesc_protocol::{decode, Decoded, StatusMessage};

    const ID: ControllerId = 74;

    fn setup() -> (Arc<ControllerRegistry>, ActuationController) {
        let registry = Arc::new(ControllerRegistry::default());
        registry.on_status(
            ID,
            &StatusMessage::Status1 {
                rpm: 900,
                motor_current: 0.0,
                duty_cycle: 0.3,
            },
            Instant::now(),
        );
        let controller = ActuationController::new(ActuationConfig::default(), registry.clone());
        (registry, controller)
    }

    fn brake(current_a: f64, ramp_time_s: f64) -> ActuationRequest {
        ActuationRequest::SetBrakeCurrent {
            current_a,
            ramp_time_s,
        }
    }

    fn commands(frames: &[CanFrame]) -> Vec<MotorCommand> {
        frames
            .iter()
            .map(|f| match decode(f) {
                Ok(Decoded::CommandAck { command, .. }) => command,
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    /// Tick until the controller reaches `phase`, returning the time reached
    fn run_until(controller: &ActuationController, mut now: Instant, phase: Phase) -> Instant {
        let period = controller.config().tick_period();
        for _ in 0..1000 {
            if controller.state(ID).map(|s| s.phase) == Some(phase) {
                return now;
            }
            now += period;
            controller.tick(now);
        }
        panic!("never reached {:?}", phase);
    }

    #[test]
    fn test_unknown_controller_rejected() {
        let (_, controller) = setup();
        assert_eq!(
            controller.submit(2, ActuationRequest::SetCurrent(1.0)),
            Err(Rejected::UnknownController(2))
        );
    }

    #[test]
    fn test_clamp_reported_back() {
        let (_, controller) = setup();
        let accepted = controller.submit(ID, brake(40.0, 20.0)).unwrap();
        assert!(accepted.clamped);
        assert_eq!(accepted.request, brake(10.0, 10.0));
    }

    #[test]
    fn test_one_frame_per_tick_while_active() {
        let (_, controller) = setup();
        let mut now = Instant::now();
        controller.submit_at(ID, brake(5.0, 3.0), now).unwrap();

        let period = controller.config().tick_period();
        for _ in 0..50 {
            let frames = controller.tick(now);
            assert_eq!(frames.len(), 1);
            now += period;
        }
    }

    #[test]
    fn test_brake_rejected_while_ramping_and_queued() {
        let (_, controller) = setup();
        let now = Instant::now();
        controller.submit_at(ID, brake(5.0, 3.0), now).unwrap();
        assert!(matches!(
            controller.submit_at(ID, brake(5.0, 3.0), now),
            Err(Rejected::BusyRamping { .. })
        ));

        controller.tick(now);
        assert_eq!(
            controller.submit_at(ID, brake(2.0, 3.0), now),
            Err(Rejected::BusyRamping {
                phase: Phase::RampingUp
            })
        );
        // non-zero throttle is refused too
        assert!(controller
            .submit_at(ID, ActuationRequest::SetDutyCycle(0.4), now)
            .is_err());
    }

    #[test]
    fn test_brake_during_cooldown_rejected_without_frames() {
        let (_, controller) = setup();
        let start = Instant::now();
        controller.submit_at(ID, brake(4.0, 3.0), start).unwrap();
        controller.tick(start);
        let now = run_until(&controller, start, Phase::Cooldown);

        let result = controller.submit_at(ID, brake(4.0, 3.0), now);
        assert!(matches!(result, Err(Rejected::CooldownActive { .. })));

        let period = controller.config().tick_period();
        assert!(controller.tick(now + period).is_empty());
    }

    #[test]
    fn test_brake_accepted_after_cooldown() {
        let (_, controller) = setup();
        let start = Instant::now();
        controller.submit_at(ID, brake(4.0, 3.0), start).unwrap();
        controller.tick(start);
        let now = run_until(&controller, start, Phase::Cooldown);
        let later = now + controller.config().cooldown_duration();

        assert!(controller.submit_at(ID, brake(4.0, 3.0), later).is_ok());
    }

    #[test]
    fn test_emergency_stop_preempts_ramp() {
        let (_, controller) = setup();
        let period = controller.config().tick_period();
        let mut now = Instant::now();
        controller.submit_at(ID, brake(8.0, 5.0), now).unwrap();
        for _ in 0..5 {
            controller.tick(now);
            now += period;
        }
        assert_eq!(controller.state(ID).unwrap().phase, Phase::RampingUp);

        controller
            .submit_at(ID, ActuationRequest::SetDutyCycle(0.0), now)
            .unwrap();
        let frames = controller.tick(now);

        assert_eq!(commands(&frames), vec![MotorCommand::Duty(0.0)]);
        let state = controller.state(ID).unwrap();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.cooldown_until, None);

        // no cooldown after an emergency stop
        assert!(controller.submit_at(ID, brake(2.0, 3.0), now).is_ok());
    }

    #[test]
    fn test_drive_commands_are_single_frames() {
        let (_, controller) = setup();
        let now = Instant::now();
        controller
            .submit_at(ID, ActuationRequest::SetCurrent(15.0), now)
            .unwrap();

        let frames = controller.tick(now);
        assert_eq!(commands(&frames), vec![MotorCommand::Current(10.0)]);
        assert!(controller.tick(now + Duration::from_millis(100)).is_empty());
    }

    #[test]
    fn test_stop_all_only_touches_active() {
        let (_, controller) = setup();
        let now = Instant::now();
        controller.submit_at(ID, brake(5.0, 3.0), now).unwrap();
        controller.tick(now);

        let frames = controller.stop_all();
        assert_eq!(commands(&frames), vec![MotorCommand::Current(0.0)]);
        assert!(controller.stop_all().is_empty());
    }

    #[test]
    fn test_stale_controller_accepts_requests() {
        let (registry, controller) = setup();
        let now = Instant::now() + Duration::from_millis(150);
        registry.sweep(now);
        assert_eq!(registry.connection_state(ID), Some(ConnectionState::Stale));

        assert!(controller
            .submit_at(ID, ActuationRequest::SetDutyCycle(0.2), now)
            .is_ok());
        assert_eq!(
            commands(&controller.tick(now)),
            vec![MotorCommand::Duty(0.2)]
        );
        assert!(controller.submit_at(ID, brake(4.0, 3.0), now).is_ok());
        controller.tick(now);
        assert_eq!(controller.state(ID).unwrap().phase, Phase::RampingUp);

        controller
            .submit_at(ID, ActuationRequest::STOP, now)
            .unwrap();
        assert_eq!(
            commands(&controller.tick(now)),
            vec![MotorCommand::Duty(0.0)]
        );
        assert_eq!(controller.state(ID).unwrap().phase, Phase::Idle);
    }

    #[test]
    fn test_stop_reaches_lost_controller_mid_brake() {
        let (registry, controller) = setup();
        let period = controller.config().tick_period();
        let start = Instant::now();
        let mut now = start;
        controller.submit_at(ID, brake(8.0, 10.0), now).unwrap();
        for _ in 0..25 {
            controller.tick(now);
            now += period;
        }
        registry.sweep(start + Duration::from_millis(2500));
        assert_eq!(registry.connection_state(ID), Some(ConnectionState::Lost));
        assert_eq!(controller.state(ID).unwrap().phase, Phase::RampingUp);

        // only a stop gets through
        assert_eq!(
            controller.submit_at(ID, ActuationRequest::SetDutyCycle(0.2), now),
            Err(Rejected::UnknownController(ID))
        );
        controller
            .submit_at(ID, ActuationRequest::STOP, now)
            .unwrap();

        let frames = controller.tick(now);
        assert_eq!(commands(&frames), vec![MotorCommand::Duty(0.0)]);
        assert_eq!(controller.state(ID).unwrap().phase, Phase::Idle);
        assert!(controller.tick(now + period).is_empty());
    }

    #[test]
    fn test_stop_to_unseen_controller_rejected() {
        let (_, controller) = setup();
        assert_eq!(
            controller.submit_at(9, ActuationRequest::STOP, Instant::now()),
            Err(Rejected::UnknownController(9))
        );
        assert!(controller.state(9).is_none());
    }

    #[test]
    fn test_zero_current_stops_hold_and_release() {
        for phase in [Phase::Holding, Phase::Releasing] {
            let (_, controller) = setup();
            let now = Instant::now();
            controller.submit_at(ID, brake(5.0, 3.0), now).unwrap();
            controller.tick(now);
            let now = run_until(&controller, now, phase);

            controller
                .submit_at(ID, ActuationRequest::SetCurrent(0.0), now)
                .unwrap();
            let frames = controller.tick(now);

            assert_eq!(commands(&frames), vec![MotorCommand::Current(0.0)]);
            let state = controller.state(ID).unwrap();
            assert_eq!(state.phase, Phase::Idle);
            assert_eq!(state.cooldown_until, None);
        }
    }

    #[test]
    fn test_stop_during_cooldown_keeps_cooldown() {
        let (_, controller) = setup();
        let start = Instant::now();
        controller.submit_at(ID, brake(4.0, 3.0), start).unwrap();
        controller.tick(start);
        let now = run_until(&controller, start, Phase::Cooldown);

        controller
            .submit_at(ID, ActuationRequest::SetCurrent(0.0), now)
            .unwrap();
        let frames = controller.tick(now);
        assert_eq!(commands(&frames), vec![MotorCommand::Current(0.0)]);
        assert_eq!(controller.state(ID).unwrap().phase, Phase::Cooldown);

        assert!(matches!(
            controller.submit_at(ID, brake(4.0, 3.0), now + Duration::from_millis(100)),
            Err(Rejected::CooldownActive { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_returns_when_channel_closed() {
        let (_, controller) = setup();
        let controller = Arc::new(controller);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        controller.submit(ID, brake(3.0, 3.0)).unwrap();
        controller.tick(Instant::now());
        drop(frame_rx);
        shutdown_tx.send(true).unwrap();

        controller.clone().run(frame_tx, shutdown_rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_emits_ramp_and_stops() {
        let (_, controller) = setup();
        let controller = Arc::new(controller);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        controller.submit(ID, brake(3.0, 3.0)).unwrap();
        let handle = tokio::spawn(controller.clone().run(frame_tx, shutdown_rx));

        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(frame_rx.recv().await.unwrap());
        }
        let values: Vec<f64> = commands(&received)
            .into_iter()
            .map(|c| match c {
                MotorCommand::BrakeCurrent(a) => a,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert!(values.windows(2).all(|w| w[1] > w[0]));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let mut tail = Vec::new();
        while let Ok(frame) = frame_rx.try_recv() {
            tail.push(frame);
        }
        assert_eq!(commands(&tail).last(), Some(&MotorCommand::Current(0.0)));
    }
}
