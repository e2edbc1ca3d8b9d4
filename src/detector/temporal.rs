//! The debounce state machine shared by every detector profile.
//!
//! A [`TemporalConditionDetector`] smooths a scalar signal over a sliding
//! window, compares the smoothed value against a configurable trigger, and
//! fires at most one alert per contiguous episode: the condition must hold
//! for the configured sustain duration before `should_alert` goes true, and
//! the detector re-arms only after the condition clears.
//!
//! Time comes from the samples themselves, not the wall clock, so the state
//! machine is deterministic under test.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::error::ValidationError;

/// One observation handed to a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The extracted scalar, or `None` when the extractor saw nothing this
    /// frame (no face, no hand).
    pub value: Option<f32>,

    /// When the frame was captured.
    pub at: DateTime<Utc>,
}

impl Sample {
    /// A sample carrying a value.
    #[must_use]
    pub const fn new(value: f32, at: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            at,
        }
    }

    /// A frame with no signal.
    #[must_use]
    pub const fn missing(at: DateTime<Utc>) -> Self {
        Self { value: None, at }
    }
}

/// How the smoothed value is compared to decide the condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Active while the smoothed value sits strictly below the threshold.
    /// Used for eye closure, where a low aspect ratio means closed eyes.
    Below {
        /// The boundary value.
        threshold: f32,
    },

    /// Active while the smoothed value leaves the symmetric band around
    /// `center`. Used for gaze deviation in either direction.
    OutsideBand {
        /// The band midpoint.
        center: f32,
        /// Half the band width; the condition is inactive within
        /// `center ± half_width`.
        half_width: f32,
    },

    /// Active while the smoothed value reaches `count` or more. Used for
    /// the closed-finger count of the help gesture.
    AtLeast {
        /// The minimum triggering value.
        count: f32,
    },
}

impl Trigger {
    fn is_active(self, smoothed: f32) -> bool {
        match self {
            Self::Below { threshold } => smoothed < threshold,
            Self::OutsideBand { center, half_width } => (smoothed - center).abs() > half_width,
            Self::AtLeast { count } => smoothed >= count,
        }
    }

    fn validate(self) -> Result<(), ValidationError> {
        let finite = match self {
            Self::Below { threshold } => threshold.is_finite(),
            Self::OutsideBand { center, half_width } => {
                center.is_finite() && half_width.is_finite() && half_width >= 0.0
            }
            Self::AtLeast { count } => count.is_finite(),
        };
        if finite {
            Ok(())
        } else {
            Err(ValidationError::InvalidDetectorConfig {
                reason: "trigger thresholds must be finite".to_string(),
            })
        }
    }
}

/// What a detector does with a frame that carries no signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSignalPolicy {
    /// Keep the last smoothed value and the episode state untouched. A
    /// momentary face-tracking dropout must not reset a drowsiness episode.
    HoldLast,

    /// Clear the window and the episode entirely. A lost hand cannot
    /// sustain a fist, so the gesture detector starts over.
    Reset,
}

/// Tuning for one detector instance.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Sliding-window length in samples.
    pub window: usize,

    /// The condition being watched.
    pub trigger: Trigger,

    /// How long the condition must hold before the alert fires.
    pub sustain: Duration,

    /// Behavior on frames with no signal.
    pub missing_policy: MissingSignalPolicy,
}

impl DetectorConfig {
    /// Default window length.
    pub const DEFAULT_WINDOW: usize = 5;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.window == 0 {
            return Err(ValidationError::InvalidDetectorConfig {
                reason: "window must hold at least one sample".to_string(),
            });
        }
        if self.sustain <= Duration::zero() {
            return Err(ValidationError::InvalidDetectorConfig {
                reason: "sustain duration must be positive".to_string(),
            });
        }
        self.trigger.validate()
    }
}

/// The outcome of feeding one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Mean of the last `min(window, received)` samples; `None` until the
    /// first valid sample arrives (or after a reset).
    pub smoothed: Option<f32>,

    /// Whether the condition currently holds.
    pub active: bool,

    /// True exactly once per sustained episode.
    pub should_alert: bool,
}

impl Detection {
    const IDLE: Self = Self {
        smoothed: None,
        active: false,
        should_alert: false,
    };
}

/// Debounced edge-triggered condition detector.
///
/// Owned exclusively by one signal stream; never shared across detectors.
#[derive(Debug)]
pub struct TemporalConditionDetector {
    config: DetectorConfig,
    window: VecDeque<f32>,
    smoothed: Option<f32>,
    onset: Option<DateTime<Utc>>,
    alert_sent: bool,
}

impl TemporalConditionDetector {
    /// Creates a detector.
    ///
    /// # Errors
    ///
    /// Rejects configurations with an empty window, a non-positive sustain
    /// duration, or non-finite trigger thresholds.
    pub fn new(config: DetectorConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            window: VecDeque::with_capacity(config.window),
            config,
            smoothed: None,
            onset: None,
            alert_sent: false,
        })
    }

    /// Feeds one sample and reports the detector's decision.
    ///
    /// Non-finite values are ignored: the previous smoothed value is
    /// retained and evaluated against the sample's timestamp. Missing
    /// values follow the configured [`MissingSignalPolicy`].
    pub fn update(&mut self, sample: Sample) -> Detection {
        match sample.value {
            Some(value) if value.is_finite() => {
                if self.window.len() == self.config.window {
                    self.window.pop_front();
                }
                self.window.push_back(value);
                #[allow(clippy::cast_precision_loss)]
                let mean = self.window.iter().sum::<f32>() / self.window.len() as f32;
                self.smoothed = Some(mean);
            }
            // Malformed sample: keep the previous smoothed value.
            Some(_) => {}
            None => match self.config.missing_policy {
                MissingSignalPolicy::HoldLast => {
                    // No evaluation without a signal. Report the held state;
                    // the episode neither advances nor clears.
                    return Detection {
                        smoothed: self.smoothed,
                        active: self.onset.is_some(),
                        should_alert: false,
                    };
                }
                MissingSignalPolicy::Reset => {
                    self.reset();
                    return Detection::IDLE;
                }
            },
        }

        let Some(smoothed) = self.smoothed else {
            return Detection::IDLE;
        };

        if self.config.trigger.is_active(smoothed) {
            let onset = *self.onset.get_or_insert(sample.at);
            let mut should_alert = false;
            if !self.alert_sent && sample.at.signed_duration_since(onset) >= self.config.sustain {
                self.alert_sent = true;
                should_alert = true;
            }
            Detection {
                smoothed: Some(smoothed),
                active: true,
                should_alert,
            }
        } else {
            // Condition cleared: drop the episode and re-arm.
            self.onset = None;
            self.alert_sent = false;
            Detection {
                smoothed: Some(smoothed),
                active: false,
                should_alert: false,
            }
        }
    }

    /// Clears the window and any in-flight episode.
    pub fn reset(&mut self) {
        self.window.clear();
        self.smoothed = None;
        self.onset = None;
        self.alert_sent = false;
    }

    /// True while an episode is running (condition active).
    #[must_use]
    pub const fn in_episode(&self) -> bool {
        self.onset.is_some()
    }

    /// The configuration this detector runs with.
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
