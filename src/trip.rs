//! Trips and trip plans.
//!
//! A trip is one driver taking one vehicle from an origin to a destination.
//! At most one trip per (driver, vehicle) pair may be in progress at a time;
//! the TRIP alert toggles between starting and finishing it. A trip plan is
//! a pre-registered origin/destination for a pair's next trip, consumed at
//! most once when that trip starts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fleet::{DriverId, VehicleId};
use crate::time::TimeRange;

/// Stable integer identifier for a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(i64);

impl TripId {
    /// Wraps a raw trip id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying integer.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TripId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Stable integer identifier for a trip plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(i64);

impl PlanId {
    /// Wraps a raw plan id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying integer.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (driver, vehicle) pair a trip belongs to.
///
/// Trip state is keyed by this pair: the single-active-trip invariant and
/// the coordinator's mutation serialization both apply per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripKey {
    /// The driver on the trip.
    pub driver_id: DriverId,

    /// The vehicle on the trip.
    pub vehicle_id: VehicleId,
}

impl TripKey {
    /// Creates a trip key.
    #[must_use]
    pub const fn new(driver_id: DriverId, vehicle_id: VehicleId) -> Self {
        Self {
            driver_id,
            vehicle_id,
        }
    }
}

impl fmt::Display for TripKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver {} / vehicle {}", self.driver_id, self.vehicle_id)
    }
}

/// Lifecycle state of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    /// The trip is running; its window is open-ended.
    InProgress,
    /// The trip ended; its window is closed.
    Finished,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// One driver taking one vehicle from an origin to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    /// Stable identifier.
    pub id: TripId,

    /// The driver on the trip.
    pub driver_id: DriverId,

    /// The vehicle on the trip.
    pub vehicle_id: VehicleId,

    /// Where the trip starts.
    pub origin: String,

    /// Where the trip is headed.
    pub destination: String,

    /// Started/ended window. Open-ended while in progress.
    pub window: TimeRange,

    /// Lifecycle state, kept consistent with `window`.
    pub status: TripStatus,
}

impl Trip {
    /// Starts a new trip at the given instant.
    #[must_use]
    pub fn start(
        id: TripId,
        key: TripKey,
        origin: impl Into<String>,
        destination: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            driver_id: key.driver_id,
            vehicle_id: key.vehicle_id,
            origin: origin.into(),
            destination: destination.into(),
            window: TimeRange::starting_at(started_at),
            status: TripStatus::InProgress,
        }
    }

    /// The (driver, vehicle) pair this trip belongs to.
    #[must_use]
    pub const fn key(&self) -> TripKey {
        TripKey::new(self.driver_id, self.vehicle_id)
    }

    /// Returns true while the trip is running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self.status, TripStatus::InProgress)
    }

    /// Finishes the trip now, closing its window.
    ///
    /// Finishing an already finished trip is a no-op.
    pub fn finish(&mut self) {
        if self.is_in_progress() {
            self.window.close_now();
            self.status = TripStatus::Finished;
        }
    }
}

/// A pre-registered origin/destination for a pair's next trip.
///
/// Plans are consumed at most once, oldest first, when a trip starts for
/// the (driver, vehicle) pair. A consumed plan keeps its consumption
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripPlan {
    /// Stable identifier.
    pub id: PlanId,

    /// The driver the plan belongs to.
    pub driver_id: DriverId,

    /// The vehicle the plan belongs to.
    pub vehicle_id: VehicleId,

    /// Planned origin.
    pub origin: String,

    /// Planned destination.
    pub destination: String,

    /// When the plan was registered.
    pub created_at: DateTime<Utc>,

    /// When the plan was consumed, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl TripPlan {
    /// Creates a pending plan.
    #[must_use]
    pub fn new(
        id: PlanId,
        key: TripKey,
        origin: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            id,
            driver_id: key.driver_id,
            vehicle_id: key.vehicle_id,
            origin: origin.into(),
            destination: destination.into(),
            created_at: Utc::now(),
            consumed_at: None,
        }
    }

    /// The (driver, vehicle) pair this plan belongs to.
    #[must_use]
    pub const fn key(&self) -> TripKey {
        TripKey::new(self.driver_id, self.vehicle_id)
    }

    /// Returns true if the plan has not been consumed yet.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.consumed_at.is_none()
    }
}
