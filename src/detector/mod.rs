//! Edge-side driver-state detection.
//!
//! Raw landmark inference happens outside this crate; what arrives here is
//! one [`FrameFeatures`] per frame. The [`temporal`] state machine debounces
//! a single scalar signal, the [`profiles`] instantiate it for drowsiness,
//! gaze deviation, and the help gesture, and the [`runner`] drives all three
//! from a frame source on a dedicated thread.

pub mod profiles;
pub mod runner;
pub mod temporal;

pub use profiles::{
    DrowsinessConfig, DrowsinessDetector, EdgeIdentity, FrameFeatures, GazeConfig, GazeDetector,
    GazeDirection, HelpGestureConfig, HelpGestureDetector, DROWSINESS_ALERT_TYPE, HELP_ALERT_TYPE,
    LOOKING_AWAY_ALERT_TYPE,
};
pub use runner::{Actuator, DetectionRunner, EdgeConfig, FrameSource, NullActuator};
pub use temporal::{
    Detection, DetectorConfig, MissingSignalPolicy, Sample, TemporalConditionDetector, Trigger,
};
