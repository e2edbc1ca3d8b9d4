//! Driver/vehicle assignments.
//!
//! An assignment records that a driver is responsible for a vehicle over a
//! window of time. The store enforces at most one open assignment per driver
//! and per vehicle; the coordinator pre-checks both sides to return friendly
//! conflicts before handing the pair to the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fleet::{DriverId, VehicleId};
use crate::time::TimeRange;

/// Stable integer identifier for an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(i64);

impl AssignmentId {
    /// Wraps a raw assignment id.
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

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A driver responsible for a vehicle over a window of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Stable identifier.
    pub id: AssignmentId,

    /// The assigned driver.
    pub driver_id: DriverId,

    /// The assigned vehicle.
    pub vehicle_id: VehicleId,

    /// Assigned from/to window. Open-ended while the assignment stands.
    pub window: TimeRange,
}

impl Assignment {
    /// Opens an assignment at the given instant.
    #[must_use]
    pub const fn open(
        id: AssignmentId,
        driver_id: DriverId,
        vehicle_id: VehicleId,
        assigned_from: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            driver_id,
            vehicle_id,
            window: TimeRange::starting_at(assigned_from),
        }
    }

    /// True while the assignment covers the current instant.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.window.is_active()
    }

    /// Closes the assignment now. Closing a closed assignment is a no-op.
    pub fn close(&mut self) {
        self.window.close_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_open_is_active() {
        let a = Assignment::open(
            AssignmentId::new(1),
            DriverId::new(1),
            VehicleId::new(2),
            Utc::now(),
        );
        assert!(a.is_active());
        assert!(a.window.is_open_ended());
    }

    #[test]
    fn test_assignment_close() {
        let mut a = Assignment::open(
            AssignmentId::new(1),
            DriverId::new(1),
            VehicleId::new(2),
            Utc::now(),
        );
        a.close();
        assert!(!a.window.is_open_ended());
        assert!(!a.is_active());
    }

    #[test]
    fn test_assignment_close_twice_keeps_first_end() {
        let mut a = Assignment::open(
            AssignmentId::new(1),
            DriverId::new(1),
            VehicleId::new(2),
            Utc::now(),
        );
        a.close();
        let first_end = a.window.to;

        a.close();
        assert_eq!(a.window.to, first_end);
    }
}
