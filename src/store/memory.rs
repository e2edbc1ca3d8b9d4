//! In-memory store backend.
//!
//! Thread-safe in-memory implementations of the store traits. Intended for
//! tests, the simulation binary, and embedded use, and as the reference for
//! the invariants production backends must enforce.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::Utc;

use crate::alert::{AlertRecord, AlertRecordId, Severity};
use crate::assignment::{Assignment, AssignmentId};
use crate::fleet::{Driver, DriverId, Vehicle, VehicleId};
use crate::store::traits::{AssignmentStore, FleetStore, StoreError, TripStore};
use crate::trip::{PlanId, Trip, TripId, TripKey, TripPlan};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend {
        message: format!("poisoned lock: {context}"),
    }
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

#[derive(Debug, Default)]
struct TripState {
    next_trip_id: i64,
    next_plan_id: i64,
    next_alert_id: i64,
    trips: HashMap<TripId, Trip>,
    active_by_key: HashMap<TripKey, TripId>,
    plans: HashMap<PlanId, TripPlan>,
    pending_by_key: HashMap<TripKey, BTreeSet<PlanId>>,
    alerts_by_trip: HashMap<TripId, Vec<AlertRecord>>,
}

/// In-memory trip, plan, and alert-ledger store.
#[derive(Debug, Default)]
pub struct InMemoryTripStore {
    state: RwLock<TripState>,
}

impl InMemoryTripStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TripStore for InMemoryTripStore {
    fn start_trip(
        &self,
        key: TripKey,
        origin: &str,
        destination: &str,
    ) -> Result<TripId, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("trip.start"))?;
        if let Some(existing) = state.active_by_key.get(&key) {
            return Err(StoreError::TripAlreadyActive(*existing));
        }

        state.next_trip_id += 1;
        let id = TripId::new(state.next_trip_id);
        let trip = Trip::start(id, key, origin, destination, Utc::now());
        state.trips.insert(id, trip);
        state.active_by_key.insert(key, id);

        // Recover the id the way backends without insert-returning do:
        // the most recently started in-progress trip for the pair. The
        // single-active invariant above makes this find exactly one row.
        state
            .trips
            .values()
            .filter(|t| t.key() == key && t.is_in_progress())
            .max_by(|a, b| a.window.from.cmp(&b.window.from).then(a.id.cmp(&b.id)))
            .map(|t| t.id)
            .ok_or_else(|| StoreError::Backend {
                message: "started trip vanished before id recovery".to_string(),
            })
    }

    fn end_trip(&self, trip_id: TripId) -> Result<Trip, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("trip.end"))?;
        let key = {
            let trip = state
                .trips
                .get_mut(&trip_id)
                .ok_or(StoreError::TripNotFound(trip_id))?;
            trip.finish();
            trip.key()
        };
        if state.active_by_key.get(&key) == Some(&trip_id) {
            state.active_by_key.remove(&key);
        }
        state
            .trips
            .get(&trip_id)
            .cloned()
            .ok_or(StoreError::TripNotFound(trip_id))
    }

    fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("trip.get"))?;
        Ok(state.trips.get(&trip_id).cloned())
    }

    fn get_active_trip(&self, key: TripKey) -> Result<Option<Trip>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("trip.active"))?;
        Ok(state
            .active_by_key
            .get(&key)
            .and_then(|id| state.trips.get(id))
            .cloned())
    }

    fn add_trip_plan(
        &self,
        key: TripKey,
        origin: &str,
        destination: &str,
    ) -> Result<TripPlan, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("plan.add"))?;
        state.next_plan_id += 1;
        let id = PlanId::new(state.next_plan_id);
        let plan = TripPlan::new(id, key, origin, destination);
        state.plans.insert(id, plan.clone());
        state.pending_by_key.entry(key).or_default().insert(id);
        Ok(plan)
    }

    fn consume_trip_plan(&self, key: TripKey) -> Result<Option<TripPlan>, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("plan.consume"))?;
        // Plan ids are minted in order, so the smallest pending id is the
        // oldest plan.
        let Some(id) = state
            .pending_by_key
            .get(&key)
            .and_then(|pending| pending.first().copied())
        else {
            return Ok(None);
        };

        if let Some(pending) = state.pending_by_key.get_mut(&key) {
            pending.remove(&id);
        }
        let Some(plan) = state.plans.get_mut(&id) else {
            return Err(StoreError::Backend {
                message: format!("pending plan {id} missing from plan table"),
            });
        };
        plan.consumed_at = Some(Utc::now());
        Ok(Some(plan.clone()))
    }

    fn log_alert(
        &self,
        trip_id: TripId,
        alert_type: &str,
        severity: Severity,
        message: &str,
    ) -> Result<AlertRecord, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("alert.log"))?;
        if !state.trips.contains_key(&trip_id) {
            return Err(StoreError::TripNotFound(trip_id));
        }

        state.next_alert_id += 1;
        let record = AlertRecord {
            id: AlertRecordId::new(state.next_alert_id),
            trip_id,
            alert_type: alert_type.to_string(),
            severity,
            message: message.to_string(),
            detected_at: Utc::now(),
        };
        state
            .alerts_by_trip
            .entry(trip_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn alerts_for_trip(
        &self,
        trip_id: TripId,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("alert.list"))?;
        if !state.trips.contains_key(&trip_id) {
            return Err(StoreError::TripNotFound(trip_id));
        }
        let Some(records) = state.alerts_by_trip.get(&trip_id) else {
            return Ok(Vec::new());
        };
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Debug, Default)]
struct AssignmentState {
    next_id: i64,
    assignments: HashMap<AssignmentId, Assignment>,
    active_by_driver: HashMap<DriverId, AssignmentId>,
    active_by_vehicle: HashMap<VehicleId, AssignmentId>,
}

/// In-memory assignment store.
#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    state: RwLock<AssignmentState>,
}

impl InMemoryAssignmentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn create_assignment(
        &self,
        driver_id: DriverId,
        vehicle_id: VehicleId,
    ) -> Result<Assignment, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("assignment.create"))?;
        if let Some(existing) = state.active_by_driver.get(&driver_id) {
            return Err(StoreError::DriverAlreadyAssigned {
                driver_id,
                assignment_id: *existing,
            });
        }
        if let Some(existing) = state.active_by_vehicle.get(&vehicle_id) {
            return Err(StoreError::VehicleAlreadyAssigned {
                vehicle_id,
                assignment_id: *existing,
            });
        }

        state.next_id += 1;
        let id = AssignmentId::new(state.next_id);
        let assignment = Assignment::open(id, driver_id, vehicle_id, Utc::now());
        state.assignments.insert(id, assignment.clone());
        state.active_by_driver.insert(driver_id, id);
        state.active_by_vehicle.insert(vehicle_id, id);
        Ok(assignment)
    }

    fn close_assignment(&self, id: AssignmentId) -> Result<Assignment, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("assignment.close"))?;
        let (driver_id, vehicle_id) = {
            let assignment = state
                .assignments
                .get_mut(&id)
                .ok_or(StoreError::AssignmentNotFound(id))?;
            assignment.close();
            (assignment.driver_id, assignment.vehicle_id)
        };
        if state.active_by_driver.get(&driver_id) == Some(&id) {
            state.active_by_driver.remove(&driver_id);
        }
        if state.active_by_vehicle.get(&vehicle_id) == Some(&id) {
            state.active_by_vehicle.remove(&vehicle_id);
        }
        state
            .assignments
            .get(&id)
            .cloned()
            .ok_or(StoreError::AssignmentNotFound(id))
    }

    fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("assignment.get"))?;
        Ok(state.assignments.get(&id).cloned())
    }

    fn active_for_driver(&self, driver_id: DriverId) -> Result<Option<Assignment>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("assignment.active_driver"))?;
        Ok(state
            .active_by_driver
            .get(&driver_id)
            .and_then(|id| state.assignments.get(id))
            .cloned())
    }

    fn active_for_vehicle(&self, vehicle_id: VehicleId) -> Result<Option<Assignment>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("assignment.active_vehicle"))?;
        Ok(state
            .active_by_vehicle
            .get(&vehicle_id)
            .and_then(|id| state.assignments.get(id))
            .cloned())
    }
}

#[derive(Debug, Default)]
struct FleetState {
    next_driver_id: i64,
    next_vehicle_id: i64,
    drivers: HashMap<DriverId, Driver>,
    vehicles: HashMap<VehicleId, Vehicle>,
    driver_by_name: HashMap<String, DriverId>,
    vehicle_by_plate: HashMap<String, VehicleId>,
}

/// In-memory fleet registry.
#[derive(Debug, Default)]
pub struct InMemoryFleetStore {
    state: RwLock<FleetState>,
}

impl InMemoryFleetStore {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FleetStore for InMemoryFleetStore {
    fn add_driver(&self, first_name: &str, last_name: &str) -> Result<Driver, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("fleet.add_driver"))?;
        state.next_driver_id += 1;
        let driver = Driver::new(DriverId::new(state.next_driver_id), first_name, last_name);
        let name_key = normalize_key(&driver.full_name());
        // First registered driver wins the name; lookups resolve to them.
        state.driver_by_name.entry(name_key).or_insert(driver.id);
        state.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    fn add_vehicle(&self, plate: &str) -> Result<Vehicle, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("fleet.add_vehicle"))?;
        let plate_key = normalize_key(plate);
        if plate_key.is_empty() {
            return Err(StoreError::Backend {
                message: "vehicle plate cannot be empty".to_string(),
            });
        }
        if state.vehicle_by_plate.contains_key(&plate_key) {
            return Err(StoreError::DuplicateKey(plate_key));
        }

        state.next_vehicle_id += 1;
        let vehicle = Vehicle::new(VehicleId::new(state.next_vehicle_id), plate.trim());
        state.vehicle_by_plate.insert(plate_key, vehicle.id);
        state.vehicles.insert(vehicle.id, vehicle.clone());
        Ok(vehicle)
    }

    fn get_driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("fleet.get_driver"))?;
        Ok(state.drivers.get(&id).cloned())
    }

    fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("fleet.get_vehicle"))?;
        Ok(state.vehicles.get(&id).cloned())
    }

    fn find_driver_by_name(&self, full_name: &str) -> Result<Option<Driver>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("fleet.find_driver"))?;
        Ok(state
            .driver_by_name
            .get(&normalize_key(full_name))
            .and_then(|id| state.drivers.get(id))
            .cloned())
    }

    fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("fleet.find_vehicle"))?;
        Ok(state
            .vehicle_by_plate
            .get(&normalize_key(plate))
            .and_then(|id| state.vehicles.get(id))
            .cloned())
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Trip, plan, and alert-ledger store.
    pub trips: InMemoryTripStore,
    /// Assignment store.
    pub assignments: InMemoryAssignmentStore,
    /// Fleet registry.
    pub fleet: InMemoryFleetStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(driver: i64, vehicle: i64) -> TripKey {
        TripKey::new(DriverId::new(driver), VehicleId::new(vehicle))
    }

    #[test]
    fn trip_start_end_and_active_index() {
        let store = InMemoryTripStore::new();
        let k = key(1, 2);

        let id = store.start_trip(k, "Depot", "Port").unwrap();
        let active = store.get_active_trip(k).unwrap().unwrap();
        assert_eq!(active.id, id);
        assert!(active.is_in_progress());
        assert_eq!(active.origin, "Depot");
        assert_eq!(active.destination, "Port");

        let ended = store.end_trip(id).unwrap();
        assert!(!ended.is_in_progress());
        assert!(store.get_active_trip(k).unwrap().is_none());

        // Ending again is a no-op returning the stored trip.
        let again = store.end_trip(id).unwrap();
        assert_eq!(again.window.to, ended.window.to);

        // A finished pair can start a fresh trip with a new id.
        let next = store.start_trip(k, "Port", "Depot").unwrap();
        assert_ne!(next, id);
    }

    #[test]
    fn trip_start_conflicts_while_active() {
        let store = InMemoryTripStore::new();
        let k = key(1, 2);

        let id = store.start_trip(k, "A", "B").unwrap();
        let err = store.start_trip(k, "A", "B");
        assert!(matches!(err, Err(StoreError::TripAlreadyActive(existing)) if existing == id));

        // A different pair is unaffected.
        assert!(store.start_trip(key(1, 3), "A", "B").is_ok());
    }

    #[test]
    fn trip_end_unknown_is_not_found() {
        let store = InMemoryTripStore::new();
        assert!(matches!(
            store.end_trip(TripId::new(99)),
            Err(StoreError::TripNotFound(_))
        ));
    }

    #[test]
    fn plan_consume_oldest_then_none() {
        let store = InMemoryTripStore::new();
        let pair = key(1, 2);

        let first = store.add_trip_plan(pair, "Depot", "Port").unwrap();
        let second = store.add_trip_plan(pair, "Port", "Airport").unwrap();
        assert!(first.is_pending());

        let consumed = store.consume_trip_plan(pair).unwrap().unwrap();
        assert_eq!(consumed.id, first.id);
        assert!(consumed.consumed_at.is_some());

        let consumed = store.consume_trip_plan(pair).unwrap().unwrap();
        assert_eq!(consumed.id, second.id);

        // Nothing left; consuming is not an error.
        assert!(store.consume_trip_plan(pair).unwrap().is_none());

        // Plans never leak across pairs, even for the same driver.
        assert!(store.consume_trip_plan(key(1, 3)).unwrap().is_none());
        assert!(store.consume_trip_plan(key(2, 2)).unwrap().is_none());
    }

    #[test]
    fn alert_log_and_listing() {
        let store = InMemoryTripStore::new();
        let id = store.start_trip(key(1, 2), "A", "B").unwrap();

        for n in 0..5 {
            store
                .log_alert(id, "DROWSINESS", Severity::High, &format!("episode {n}"))
                .unwrap();
        }

        let recent = store.alerts_for_trip(id, 3).unwrap();
        assert_eq!(recent.len(), 3);
        // Newest first.
        assert_eq!(recent[0].message, "episode 4");
        assert_eq!(recent[2].message, "episode 2");

        assert!(matches!(
            store.log_alert(TripId::new(99), "X", Severity::Low, "m"),
            Err(StoreError::TripNotFound(_))
        ));
        assert!(matches!(
            store.alerts_for_trip(TripId::new(99), 10),
            Err(StoreError::TripNotFound(_))
        ));
    }

    #[test]
    fn assignment_create_conflicts_and_close() {
        let store = InMemoryAssignmentStore::new();
        let (d1, d2) = (DriverId::new(1), DriverId::new(2));
        let (v1, v2) = (VehicleId::new(10), VehicleId::new(20));

        let a = store.create_assignment(d1, v1).unwrap();
        assert!(a.is_active());
        assert_eq!(store.active_for_driver(d1).unwrap().unwrap().id, a.id);
        assert_eq!(store.active_for_vehicle(v1).unwrap().unwrap().id, a.id);

        assert!(matches!(
            store.create_assignment(d1, v2),
            Err(StoreError::DriverAlreadyAssigned { driver_id, .. }) if driver_id == d1
        ));
        assert!(matches!(
            store.create_assignment(d2, v1),
            Err(StoreError::VehicleAlreadyAssigned { vehicle_id, .. }) if vehicle_id == v1
        ));

        let closed = store.close_assignment(a.id).unwrap();
        assert!(!closed.window.is_open_ended());
        assert!(store.active_for_driver(d1).unwrap().is_none());
        assert!(store.active_for_vehicle(v1).unwrap().is_none());

        // Both sides are free again.
        assert!(store.create_assignment(d1, v1).is_ok());
    }

    #[test]
    fn assignment_close_unknown_is_not_found() {
        let store = InMemoryAssignmentStore::new();
        assert!(matches!(
            store.close_assignment(AssignmentId::new(5)),
            Err(StoreError::AssignmentNotFound(_))
        ));
    }

    #[test]
    fn fleet_lookup_is_normalized() {
        let store = InMemoryFleetStore::new();
        let driver = store.add_driver("Ana", "Torres").unwrap();
        let vehicle = store.add_vehicle("ABC-123").unwrap();

        let found = store.find_driver_by_name("  ana torres ").unwrap().unwrap();
        assert_eq!(found.id, driver.id);

        let found = store.find_vehicle_by_plate("abc-123").unwrap().unwrap();
        assert_eq!(found.id, vehicle.id);

        assert!(store.find_driver_by_name("Luis Mora").unwrap().is_none());
        assert!(store.find_vehicle_by_plate("ZZZ-999").unwrap().is_none());
    }

    #[test]
    fn fleet_duplicate_plate_rejected() {
        let store = InMemoryFleetStore::new();
        store.add_vehicle("ABC-123").unwrap();
        assert!(matches!(
            store.add_vehicle(" abc-123 "),
            Err(StoreError::DuplicateKey(_))
        ));
    }

    #[test]
    fn fleet_duplicate_name_first_wins() {
        let store = InMemoryFleetStore::new();
        let first = store.add_driver("Ana", "Torres").unwrap();
        let second = store.add_driver("Ana", "Torres").unwrap();
        assert_ne!(first.id, second.id);

        let found = store.find_driver_by_name("Ana Torres").unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn stores_bundle_default() {
        let stores = InMemoryStores::new();
        assert!(stores
            .trips
            .get_active_trip(key(1, 2))
            .unwrap()
            .is_none());
        assert!(stores.fleet.get_driver(DriverId::new(1)).unwrap().is_none());
        assert!(stores
            .assignments
            .active_for_driver(DriverId::new(1))
            .unwrap()
            .is_none());
    }
}
