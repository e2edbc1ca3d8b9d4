//! Abstract store traits for the trip lifecycle.
//!
//! These traits define the contract persistence backends must implement.
//! By using traits, we enable:
//! - In-memory backends for testing and embedded use
//! - SQL-backed backends for production
//! - Fakes that inject transient failures for retry tests

use thiserror::Error;

use crate::alert::{AlertRecord, Severity};
use crate::assignment::{Assignment, AssignmentId};
use crate::fleet::{Driver, DriverId, Vehicle, VehicleId};
use crate::trip::{Trip, TripId, TripKey, TripPlan};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Trip not found.
    #[error("Trip not found: {0}")]
    TripNotFound(TripId),

    /// Assignment not found.
    #[error("Assignment not found: {0}")]
    AssignmentNotFound(AssignmentId),

    /// An in-progress trip already exists for the pair.
    #[error("Trip {0} is already in progress for this pair")]
    TripAlreadyActive(TripId),

    /// The driver already has an open assignment.
    #[error("Driver {driver_id} already holds assignment {assignment_id}")]
    DriverAlreadyAssigned {
        /// The conflicting driver.
        driver_id: DriverId,
        /// The open assignment blocking the new one.
        assignment_id: AssignmentId,
    },

    /// The vehicle already has an open assignment.
    #[error("Vehicle {vehicle_id} already held by assignment {assignment_id}")]
    VehicleAlreadyAssigned {
        /// The conflicting vehicle.
        vehicle_id: VehicleId,
        /// The open assignment blocking the new one.
        assignment_id: AssignmentId,
    },

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The backend did not answer in time. Transient.
    #[error("Store operation timed out after {duration_ms}ms")]
    Timeout {
        /// How long the call waited.
        duration_ms: u64,
    },

    /// The backend is temporarily unreachable. Transient.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// What the backend reported.
        message: String,
    },

    /// Permanent backend failure.
    #[error("Store backend error: {message}")]
    Backend {
        /// What the backend reported.
        message: String,
    },
}

impl StoreError {
    /// Returns true for failures worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// Store trait for trips, trip plans, and the alert ledger.
///
/// # Invariants
/// - At most one `IN_PROGRESS` trip per (driver, vehicle) pair
/// - A plan is consumed at most once, oldest pending first
pub trait TripStore: Send + Sync {
    /// Starts a trip for the pair, returning the id of the most recently
    /// started in-progress trip for that pair.
    ///
    /// Backends that cannot return the inserted row's id directly recover
    /// it by that "most recent for the pair" query, which is unambiguous
    /// only while starts for a pair are serialized. The coordinator holds
    /// a per-pair lock across the call for exactly this reason.
    fn start_trip(
        &self,
        key: TripKey,
        origin: &str,
        destination: &str,
    ) -> Result<TripId, StoreError>;

    /// Finishes an in-progress trip, closing its window. Finishing an
    /// already finished trip is a no-op and returns the stored trip.
    fn end_trip(&self, trip_id: TripId) -> Result<Trip, StoreError>;

    /// Get a trip by id.
    fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>, StoreError>;

    /// Returns the in-progress trip for the pair, if any.
    fn get_active_trip(&self, key: TripKey) -> Result<Option<Trip>, StoreError>;

    /// Registers a plan for the pair's next trip.
    fn add_trip_plan(
        &self,
        key: TripKey,
        origin: &str,
        destination: &str,
    ) -> Result<TripPlan, StoreError>;

    /// Consumes the oldest pending plan for the pair, if any.
    /// The returned plan carries its consumption timestamp.
    fn consume_trip_plan(&self, key: TripKey) -> Result<Option<TripPlan>, StoreError>;

    /// Logs an alert against a trip. The store stamps the detection time.
    fn log_alert(
        &self,
        trip_id: TripId,
        alert_type: &str,
        severity: Severity,
        message: &str,
    ) -> Result<AlertRecord, StoreError>;

    /// Most recent alerts logged against a trip, newest first.
    fn alerts_for_trip(&self, trip_id: TripId, limit: usize)
        -> Result<Vec<AlertRecord>, StoreError>;
}

/// Store trait for driver/vehicle assignments.
///
/// # Invariants
/// - At most one open assignment per driver
/// - At most one open assignment per vehicle
pub trait AssignmentStore: Send + Sync {
    /// Opens an assignment. The store enforces both uniqueness invariants;
    /// its conflict answer is authoritative over any pre-check.
    fn create_assignment(
        &self,
        driver_id: DriverId,
        vehicle_id: VehicleId,
    ) -> Result<Assignment, StoreError>;

    /// Closes an assignment by ending its window, never deleting it.
    /// Closing a closed assignment is a no-op and returns the stored row.
    fn close_assignment(&self, id: AssignmentId) -> Result<Assignment, StoreError>;

    /// Get an assignment by id.
    fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError>;

    /// Returns the driver's open assignment, if any.
    fn active_for_driver(&self, driver_id: DriverId) -> Result<Option<Assignment>, StoreError>;

    /// Returns the vehicle's open assignment, if any.
    fn active_for_vehicle(&self, vehicle_id: VehicleId) -> Result<Option<Assignment>, StoreError>;
}

/// Store trait for the fleet registry.
pub trait FleetStore: Send + Sync {
    /// Registers a driver, minting its id.
    fn add_driver(&self, first_name: &str, last_name: &str) -> Result<Driver, StoreError>;

    /// Registers a vehicle, minting its id. Plates are unique after
    /// normalization (trim + lowercase).
    fn add_vehicle(&self, plate: &str) -> Result<Vehicle, StoreError>;

    /// Get a driver by id.
    fn get_driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError>;

    /// Get a vehicle by id.
    fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, StoreError>;

    /// Finds a driver by "first last" full name, normalized. When several
    /// drivers share a name, the first registered one wins.
    fn find_driver_by_name(&self, full_name: &str) -> Result<Option<Driver>, StoreError>;

    /// Finds a vehicle by plate, normalized.
    fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>, StoreError>;
}
