//! Detector profiles for the monitored driver states.
//!
//! Each profile wraps one [`TemporalConditionDetector`] with the reference
//! tuning for its signal and turns a sustained condition into a ready-to-
//! publish [`Alert`] stamped with the edge device's identity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, Severity};
use crate::detector::temporal::{
    DetectorConfig, MissingSignalPolicy, Sample, TemporalConditionDetector, Trigger,
};
use crate::error::ValidationError;
use crate::fleet::{DriverId, VehicleId};
use crate::trip::TripId;

/// Alert type emitted by the drowsiness profile.
pub const DROWSINESS_ALERT_TYPE: &str = "DROWSINESS";

/// Alert type emitted by the gaze profile.
pub const LOOKING_AWAY_ALERT_TYPE: &str = "LOOKING-AWAY";

/// Alert type emitted by the help-gesture profile.
pub const HELP_ALERT_TYPE: &str = "HELP";

/// Per-frame output of the opaque feature extractor.
///
/// The extractor itself (landmark inference) lives outside this crate; a
/// [`FrameSource`](crate::detector::FrameSource) produces these.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameFeatures {
    /// Eye aspect ratio; lower means more closed. `None` without a face.
    pub ear: Option<f32>,

    /// Horizontal gaze offset from straight ahead; negative is left.
    /// `None` without a face.
    pub gaze_offset: Option<f32>,

    /// Closed fingers counted on the raised hand. `None` without a hand.
    pub closed_fingers: Option<f32>,
}

/// Correlation identity an edge device stamps onto its alerts.
///
/// Whatever the device knows about its session goes here; the coordinator
/// resolves the rest (or rejects the alert when nothing resolves).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeIdentity {
    /// The running trip, once known.
    pub trip_id: Option<TripId>,
    /// The driver behind the wheel.
    pub driver_id: Option<DriverId>,
    /// The vehicle the device is mounted in.
    pub vehicle_id: Option<VehicleId>,
    /// Fallback driver lookup key.
    pub driver_name: Option<String>,
    /// Fallback vehicle lookup key.
    pub vehicle_plate: Option<String>,
}

impl EdgeIdentity {
    /// Copies this identity onto an alert.
    #[must_use]
    pub fn stamp(&self, mut alert: Alert) -> Alert {
        alert.trip_id = self.trip_id;
        alert.driver_id = self.driver_id;
        alert.vehicle_id = self.vehicle_id;
        alert.driver_name = self.driver_name.clone();
        alert.vehicle_plate = self.vehicle_plate.clone();
        alert
    }
}

/// Tuning for the eye-closure profile.
#[derive(Debug, Clone)]
pub struct DrowsinessConfig {
    /// EAR below this counts as closed eyes.
    pub ear_threshold: f32,
    /// Smoothing window length.
    pub window: usize,
    /// How long the eyes must stay closed.
    pub sustain: Duration,
}

impl Default for DrowsinessConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.215,
            window: DetectorConfig::DEFAULT_WINDOW,
            sustain: Duration::seconds(3),
        }
    }
}

/// Watches the eye aspect ratio for sustained closure.
#[derive(Debug)]
pub struct DrowsinessDetector {
    inner: TemporalConditionDetector,
    identity: EdgeIdentity,
}

impl DrowsinessDetector {
    /// Creates the profile.
    ///
    /// # Errors
    ///
    /// Rejects invalid tuning, same as [`TemporalConditionDetector::new`].
    pub fn new(config: DrowsinessConfig, identity: EdgeIdentity) -> Result<Self, ValidationError> {
        let inner = TemporalConditionDetector::new(DetectorConfig {
            window: config.window,
            trigger: Trigger::Below {
                threshold: config.ear_threshold,
            },
            sustain: config.sustain,
            missing_policy: MissingSignalPolicy::HoldLast,
        })?;
        Ok(Self { inner, identity })
    }

    /// Feeds one frame; returns the alert to publish when the sustained
    /// condition fires.
    pub fn observe(&mut self, features: &FrameFeatures, at: DateTime<Utc>) -> Option<Alert> {
        let detection = self.inner.update(Sample {
            value: features.ear,
            at,
        });
        if !detection.should_alert {
            return None;
        }
        Some(self.identity.stamp(Alert::new(
            DROWSINESS_ALERT_TYPE,
            Severity::High,
            "Driver is drowsy",
        )))
    }

    /// Clears the episode, e.g. when the stream restarts.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Which way the driver is looking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GazeDirection {
    /// Offset left of the band.
    Left,
    /// Within the band.
    Center,
    /// Offset right of the band.
    Right,
}

/// Tuning for the gaze-deviation profile.
#[derive(Debug, Clone)]
pub struct GazeConfig {
    /// Offset value for looking straight ahead.
    pub center: f32,
    /// Deviation beyond this, either side, counts as looking away.
    pub half_width: f32,
    /// Smoothing window length.
    pub window: usize,
    /// How long the gaze must stay off-center.
    pub sustain: Duration,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            center: 0.0,
            half_width: 0.15,
            window: DetectorConfig::DEFAULT_WINDOW,
            sustain: Duration::seconds(2),
        }
    }
}

/// Watches the gaze offset for sustained deviation to either side.
#[derive(Debug)]
pub struct GazeDetector {
    inner: TemporalConditionDetector,
    center: f32,
    half_width: f32,
    identity: EdgeIdentity,
}

impl GazeDetector {
    /// Creates the profile.
    ///
    /// # Errors
    ///
    /// Rejects invalid tuning, same as [`TemporalConditionDetector::new`].
    pub fn new(config: GazeConfig, identity: EdgeIdentity) -> Result<Self, ValidationError> {
        let inner = TemporalConditionDetector::new(DetectorConfig {
            window: config.window,
            trigger: Trigger::OutsideBand {
                center: config.center,
                half_width: config.half_width,
            },
            sustain: config.sustain,
            missing_policy: MissingSignalPolicy::HoldLast,
        })?;
        Ok(Self {
            inner,
            center: config.center,
            half_width: config.half_width,
            identity,
        })
    }

    /// Classifies an offset against the configured band.
    #[must_use]
    pub fn direction_of(&self, offset: f32) -> GazeDirection {
        if offset < self.center - self.half_width {
            GazeDirection::Left
        } else if offset > self.center + self.half_width {
            GazeDirection::Right
        } else {
            GazeDirection::Center
        }
    }

    /// Feeds one frame; returns the alert to publish when the sustained
    /// condition fires. The message names the side the driver looked to.
    pub fn observe(&mut self, features: &FrameFeatures, at: DateTime<Utc>) -> Option<Alert> {
        let detection = self.inner.update(Sample {
            value: features.gaze_offset,
            at,
        });
        if !detection.should_alert {
            return None;
        }
        let smoothed = detection.smoothed?;
        let message = match self.direction_of(smoothed) {
            GazeDirection::Left => "Driver looking left",
            // A fired alert is outside the band, so center cannot happen;
            // classify it as right rather than invent a fourth message.
            GazeDirection::Center | GazeDirection::Right => "Driver looking right",
        };
        Some(self.identity.stamp(Alert::new(
            LOOKING_AWAY_ALERT_TYPE,
            Severity::Medium,
            message,
        )))
    }

    /// Clears the episode.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Tuning for the help-gesture profile.
#[derive(Debug, Clone)]
pub struct HelpGestureConfig {
    /// Closed fingers needed for a fist.
    pub finger_count: f32,
    /// How long the fist must be held.
    pub sustain: Duration,
}

impl Default for HelpGestureConfig {
    fn default() -> Self {
        Self {
            finger_count: 4.0,
            sustain: Duration::milliseconds(1500),
        }
    }
}

/// Watches for a held fist, the driver's silent call for help.
///
/// Unlike the face profiles this one smooths nothing (window of one) and
/// resets whenever the hand leaves the frame.
#[derive(Debug)]
pub struct HelpGestureDetector {
    inner: TemporalConditionDetector,
    identity: EdgeIdentity,
}

impl HelpGestureDetector {
    /// Creates the profile.
    ///
    /// # Errors
    ///
    /// Rejects invalid tuning, same as [`TemporalConditionDetector::new`].
    pub fn new(config: HelpGestureConfig, identity: EdgeIdentity) -> Result<Self, ValidationError> {
        let inner = TemporalConditionDetector::new(DetectorConfig {
            window: 1,
            trigger: Trigger::AtLeast {
                count: config.finger_count,
            },
            sustain: config.sustain,
            missing_policy: MissingSignalPolicy::Reset,
        })?;
        Ok(Self { inner, identity })
    }

    /// Feeds one frame; returns the alert to publish when the gesture has
    /// been held long enough.
    pub fn observe(&mut self, features: &FrameFeatures, at: DateTime<Utc>) -> Option<Alert> {
        let detection = self.inner.update(Sample {
            value: features.closed_fingers,
            at,
        });
        if !detection.should_alert {
            return None;
        }
        Some(self.identity.stamp(Alert::new(
            HELP_ALERT_TYPE,
            Severity::Critical,
            "Driver signaled for help",
        )))
    }

    /// Clears the episode.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}
