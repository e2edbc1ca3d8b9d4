//! # DriveGuard - Driver-State Monitoring Pipeline
//!
//! DriveGuard turns per-frame driver features into debounced safety alerts,
//! moves them over a pub/sub broker, and drives trip lifecycle and alert
//! persistence on the backend. Video inference stays outside the crate; the
//! pipeline starts at scalar features and ends at store rows, notifications
//! and device commands.
//!
//! ## Core Concepts
//!
//! - **Detector**: A debounced edge trigger over one smoothed signal
//! - **Alert**: The wire unit between edge devices and the backend
//! - **Trip**: A driver/vehicle journey, toggled by `TRIP` alerts
//! - **Coordinator**: The single consumer that logs, toggles and notifies
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driveguard::{DrowsinessConfig, DrowsinessDetector, EdgeIdentity, FrameFeatures};
//! use chrono::Utc;
//!
//! // Build the eye-closure detector with stock tuning
//! let mut detector = DrowsinessDetector::new(DrowsinessConfig::default(), EdgeIdentity::default())?;
//!
//! // Feed one frame's features; an alert fires once the episode sustains
//! let features = FrameFeatures { ear: Some(0.14), ..FrameFeatures::default() };
//! if let Some(alert) = detector.observe(&features, Utc::now()) {
//!     transport.publish_alert(&alert)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain types
pub mod alert;
pub mod assignment;
pub mod error;
pub mod fleet;
pub mod time;
pub mod trip;

// Persistence and notifications
pub mod notify;
pub mod store;

// Pipeline: edge detection, transport, ingestion, coordination
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod ingest;
pub mod transport;

// Re-export primary types at crate root for convenience
pub use alert::{
    Alert, AlertRecord, AlertRecordId, ControlAction, ControlMessage, Severity, TRIP_ALERT_TYPE,
};
pub use assignment::{Assignment, AssignmentId};
pub use config::Settings;
pub use coordinator::{AlertOutcome, CoordinatorConfig, TripLifecycleCoordinator};
pub use detector::{
    Actuator, Detection, DetectionRunner, DetectorConfig, DrowsinessConfig, DrowsinessDetector,
    EdgeConfig, EdgeIdentity, FrameFeatures, FrameSource, GazeConfig, GazeDetector,
    HelpGestureConfig, HelpGestureDetector, MissingSignalPolicy, NullActuator, Sample,
    TemporalConditionDetector, Trigger,
};
pub use error::{
    ConflictError, GuardError, GuardResult, NotFoundError, TransportError, ValidationError,
};
pub use fleet::{Driver, DriverId, Vehicle, VehicleId};
pub use ingest::AlertIngestor;
pub use notify::{
    Notification, NotificationDispatcher, NotificationSink, NotifyError, RecordingSink,
};
pub use store::{
    AssignmentStore, FleetStore, InMemoryAssignmentStore, InMemoryFleetStore, InMemoryStores,
    InMemoryTripStore, StoreError, TripStore,
};
pub use time::TimeRange;
pub use transport::{
    AlertTransport, BrokerClient, BrokerConnection, BrokerEvent, InMemoryBroker, Subscription,
    SubscriptionId, TransportConfig,
};
pub use trip::{PlanId, Trip, TripId, TripKey, TripPlan, TripStatus};
