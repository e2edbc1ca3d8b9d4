//! Error types for DriveGuard.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages
//! at every boundary of the pipeline.

use thiserror::Error;

use crate::fleet::{DriverId, VehicleId};
use crate::store::StoreError;
use crate::trip::TripId;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Alert type '{alert_type}' requires a trip_id")]
    MissingTripId {
        alert_type: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Unknown severity '{value}'")]
    InvalidSeverity {
        value: String,
    },

    #[error("Invalid detector configuration: {reason}")]
    InvalidDetectorConfig {
        reason: String,
    },
}

/// Lookup failures for fleet and trip identities.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("Driver not found: {name}")]
    Driver {
        name: String,
    },

    #[error("Vehicle not found: {plate}")]
    Vehicle {
        plate: String,
    },

    #[error("Trip not found: {id}")]
    Trip {
        id: TripId,
    },
}

/// Conflicts with current fleet state.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("Driver {driver_id} already has an active assignment with vehicle {vehicle_plate}")]
    DriverAlreadyAssigned {
        driver_id: DriverId,
        vehicle_plate: String,
    },

    #[error("Vehicle {vehicle_id} is already assigned to driver {driver_name}")]
    VehicleAlreadyAssigned {
        vehicle_id: VehicleId,
        driver_name: String,
    },

    #[error("Trip {trip_id} is already in progress for this driver and vehicle")]
    TripAlreadyActive {
        trip_id: TripId,
    },
}

/// Transport errors for broker communication.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Failed to serialize payload: {message}")]
    SerializationFailed {
        message: String,
    },

    #[error("Failed to deserialize payload: {message}")]
    DeserializationFailed {
        message: String,
    },

    #[error("Receive timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Subscription stream closed")]
    StreamClosed,
}

/// Top-level error type for DriveGuard.
///
/// This enum encompasses all possible errors that can occur
/// when running the monitoring pipeline.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GuardError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a lookup failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a conflict error.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            // Bad input and stale lookups won't change on retry.
            Self::Validation(_) | Self::NotFound(_) | Self::Conflict(_) => false,
            Self::Transport(e) => matches!(
                e,
                TransportError::ConnectionFailed { .. }
                    | TransportError::NotConnected
                    | TransportError::Timeout { .. }
            ),
            Self::Store(e) => e.is_transient(),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for DriveGuard operations.
pub type GuardResult<T> = Result<T, GuardError>;
