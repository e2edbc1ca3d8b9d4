//! Fleet identities: drivers and vehicles.
//!
//! Drivers and vehicles are the stable identities every trip, assignment,
//! and alert attaches to. Ids are integers minted by the fleet store;
//! edge devices may instead carry a driver's full name or a vehicle plate
//! and let the coordinator resolve them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable integer identifier for a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(i64);

impl DriverId {
    /// Wraps a raw driver id.
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

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DriverId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Stable integer identifier for a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(i64);

impl VehicleId {
    /// Wraps a raw vehicle id.
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

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for VehicleId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A registered driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    /// Stable identifier.
    pub id: DriverId,

    /// Given name.
    pub first_name: String,

    /// Family name.
    pub last_name: String,
}

impl Driver {
    /// Creates a driver record.
    #[must_use]
    pub fn new(id: DriverId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// The display name edge devices send: "first last".
    ///
    /// Name resolution matches against this exact concatenation.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A registered vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Stable identifier.
    pub id: VehicleId,

    /// License plate. Plate lookup is case- and whitespace-insensitive.
    pub plate: String,
}

impl Vehicle {
    /// Creates a vehicle record.
    #[must_use]
    pub fn new(id: VehicleId, plate: impl Into<String>) -> Self {
        Self {
            id,
            plate: plate.into(),
        }
    }
}
