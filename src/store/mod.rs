//! Persistence seams for trips, assignments, and the fleet registry.
//!
//! The coordinator only ever talks to the traits in this module. The
//! in-memory implementations back tests, the simulation binary, and
//! embedded use; production backends implement the same contracts.

mod memory;
mod traits;

pub use memory::{InMemoryAssignmentStore, InMemoryFleetStore, InMemoryStores, InMemoryTripStore};
pub use traits::{AssignmentStore, FleetStore, StoreError, TripStore};
