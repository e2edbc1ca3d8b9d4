//! The edge-side detection loop.
//!
//! One [`DetectionRunner`] owns one camera stream: it paces frames to the
//! target rate, feeds every Nth frame through the three detector profiles,
//! and publishes whatever alerts fire. Publishing is fire-and-forget through
//! [`AlertTransport`], so a dead broker never stalls frame processing. The
//! runner also listens on the control topic and forwards decoded commands
//! to the device's actuator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use crate::alert::{Alert, ControlAction, ControlMessage, Severity, TRIP_ALERT_TYPE};
use crate::detector::profiles::{
    DrowsinessConfig, DrowsinessDetector, EdgeIdentity, FrameFeatures, GazeConfig, GazeDetector,
    HelpGestureConfig, HelpGestureDetector,
};
use crate::error::GuardResult;
use crate::transport::{AlertTransport, Subscription};

/// Frame feed seam. The camera and the landmark inference live behind it.
pub trait FrameSource: Send {
    /// Produces the next frame's features.
    ///
    /// Returning `None` closes the loop (camera gone). A frame where
    /// nothing was detected is all-`None` features, not `None`: the loop
    /// skips it and the detectors keep their state. Implementations should
    /// return within roughly a frame interval so the loop stays stoppable.
    fn next_frame(&mut self) -> Option<FrameFeatures>;
}

/// Device output seam for broker-driven commands (buzzer, LED).
pub trait Actuator: Send {
    /// Applies one command.
    fn apply(&mut self, action: ControlAction);
}

/// Actuator that ignores every command. For devices without outputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullActuator;

impl Actuator for NullActuator {
    fn apply(&mut self, _action: ControlAction) {}
}

/// Edge loop tuning.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Frame pacing target.
    pub target_fps: u32,
    /// Process every Nth frame; the rest only pace the loop.
    pub process_every: u32,
    /// Identity stamped onto published alerts.
    pub identity: EdgeIdentity,
    /// Eye-closure profile tuning.
    pub drowsiness: DrowsinessConfig,
    /// Gaze profile tuning.
    pub gaze: GazeConfig,
    /// Help-gesture profile tuning.
    pub help: HelpGestureConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            target_fps: 15,
            process_every: 2,
            identity: EdgeIdentity::default(),
            drowsiness: DrowsinessConfig::default(),
            gaze: GazeConfig::default(),
            help: HelpGestureConfig::default(),
        }
    }
}

/// Handle to a running edge loop.
pub struct DetectionRunner {
    identity: EdgeIdentity,
    transport: Arc<AlertTransport>,
    controls_registered: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    frames_seen: Arc<AtomicU64>,
    frames_processed: Arc<AtomicU64>,
    emitted_alerts: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionRunner {
    /// Spawns the loop over a frame source and an actuator.
    ///
    /// # Errors
    ///
    /// Fails when a profile's tuning is invalid or when the transport
    /// cannot open the control subscription.
    pub fn start(
        source: Box<dyn FrameSource>,
        actuator: Box<dyn Actuator>,
        transport: Arc<AlertTransport>,
        config: EdgeConfig,
    ) -> GuardResult<Self> {
        let drowsiness = DrowsinessDetector::new(config.drowsiness, config.identity.clone())?;
        let gaze = GazeDetector::new(config.gaze, config.identity.clone())?;
        let help = HelpGestureDetector::new(config.help, config.identity.clone())?;
        let controls = transport.subscribe(transport.control_topic())?;
        let controls_registered = controls.registered_flag();

        let stop = Arc::new(AtomicBool::new(false));
        let frames_seen = Arc::new(AtomicU64::new(0));
        let frames_processed = Arc::new(AtomicU64::new(0));
        let emitted_alerts = Arc::new(AtomicU64::new(0));

        let edge_loop = EdgeLoop {
            source,
            actuator,
            transport: Arc::clone(&transport),
            controls,
            drowsiness,
            gaze,
            help,
            target_fps: config.target_fps.max(1),
            process_every: u64::from(config.process_every.max(1)),
            stop: Arc::clone(&stop),
            frames_seen: Arc::clone(&frames_seen),
            frames_processed: Arc::clone(&frames_processed),
            emitted_alerts: Arc::clone(&emitted_alerts),
        };

        let join = thread::Builder::new()
            .name("driveguard-edge".to_string())
            .spawn(move || edge_loop.run())
            .expect("failed to spawn driveguard edge worker");

        Ok(Self {
            identity: config.identity,
            transport,
            controls_registered,
            stop,
            frames_seen,
            frames_processed,
            emitted_alerts,
            join: Mutex::new(Some(join)),
        })
    }

    /// The physical trip trigger: publishes a TRIP alert carrying this
    /// device's identity. The coordinator toggles the trip server-side.
    ///
    /// # Errors
    ///
    /// Fails only when the alert cannot be serialized.
    pub fn trip_button(&self) -> GuardResult<()> {
        let alert = self.identity.stamp(Alert::new(
            TRIP_ALERT_TYPE,
            Severity::Low,
            "Solicitud de inicio o fin de viaje",
        ));
        self.transport.publish_alert(&alert)
    }

    /// True once the control subscription is live at the transport worker.
    ///
    /// The subscription registers asynchronously after [`DetectionRunner::start`]
    /// returns; device commands published before that are not delivered.
    #[must_use]
    pub fn controls_ready(&self) -> bool {
        self.controls_registered.load(Ordering::Acquire)
    }

    /// Frames pulled from the source.
    #[must_use]
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }

    /// Frames that went through the detectors.
    #[must_use]
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Alerts the detectors fired.
    #[must_use]
    pub fn emitted_alerts(&self) -> u64 {
        self.emitted_alerts.load(Ordering::Relaxed)
    }

    /// Stops the loop and joins the worker. Idempotent; also runs on drop.
    /// When this returns, the frame source has been released.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!("edge worker panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for DetectionRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EdgeLoop {
    source: Box<dyn FrameSource>,
    actuator: Box<dyn Actuator>,
    transport: Arc<AlertTransport>,
    controls: Subscription,
    drowsiness: DrowsinessDetector,
    gaze: GazeDetector,
    help: HelpGestureDetector,
    target_fps: u32,
    process_every: u64,
    stop: Arc<AtomicBool>,
    frames_seen: Arc<AtomicU64>,
    frames_processed: Arc<AtomicU64>,
    emitted_alerts: Arc<AtomicU64>,
}

impl EdgeLoop {
    fn run(mut self) {
        let frame_budget = Duration::from_secs_f64(1.0 / f64::from(self.target_fps));
        let mut frame_index: u64 = 0;
        info!(
            "edge loop started: {} fps target, processing every {} frames",
            self.target_fps, self.process_every
        );

        while !self.stop.load(Ordering::Acquire) {
            let frame_started = Instant::now();

            let Some(features) = self.source.next_frame() else {
                info!("frame source closed, edge loop ending");
                break;
            };
            self.frames_seen.fetch_add(1, Ordering::Relaxed);
            frame_index += 1;

            if frame_index % self.process_every == 0 {
                self.frames_processed.fetch_add(1, Ordering::Relaxed);
                self.process(&features);
            }

            self.pump_controls();

            // Pace to the frame budget; a slow frame simply runs late.
            if let Some(rest) = frame_budget.checked_sub(frame_started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    fn process(&mut self, features: &FrameFeatures) {
        let at = Utc::now();
        let fired = [
            self.drowsiness.observe(features, at),
            self.gaze.observe(features, at),
            self.help.observe(features, at),
        ];
        for alert in fired.into_iter().flatten() {
            self.emitted_alerts.fetch_add(1, Ordering::Relaxed);
            debug!("detector fired {} ({})", alert.alert_type, alert.severity);
            if let Err(err) = self.transport.publish_alert(&alert) {
                warn!("alert publish failed: {err}");
            }
        }
    }

    fn pump_controls(&mut self) {
        loop {
            // Zero timeout: drain whatever queued since the last frame.
            let Ok(event) = self.controls.recv_timeout(Duration::ZERO) else {
                return;
            };
            match serde_json::from_slice::<ControlMessage>(&event.payload) {
                Ok(msg) => {
                    debug!("applying control action {}", msg.action);
                    self.actuator.apply(msg.action);
                }
                Err(err) => warn!("undecodable control payload dropped: {err}"),
            }
        }
    }
}
