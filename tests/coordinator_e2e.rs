use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use driveguard::{
    Alert, AlertOutcome, AlertRecord, AssignmentStore, CoordinatorConfig, Driver, FleetStore,
    GuardError, InMemoryAssignmentStore, InMemoryFleetStore, InMemoryTripStore, Notification,
    NotificationDispatcher, NotificationSink, NotifyError, RecordingSink, Severity, StoreError,
    Trip, TripId, TripKey, TripLifecycleCoordinator, TripPlan, TripStatus, TripStore, Vehicle,
    TRIP_ALERT_TYPE,
};

/// Trip store that fails `log_alert` a configurable number of times before
/// delegating. Everything else passes straight through.
struct FlakyTripStore {
    inner: InMemoryTripStore,
    failures_left: AtomicU32,
    transient: bool,
    log_calls: AtomicU32,
}

impl FlakyTripStore {
    fn new(failures: u32, transient: bool) -> Self {
        Self {
            inner: InMemoryTripStore::new(),
            failures_left: AtomicU32::new(failures),
            transient,
            log_calls: AtomicU32::new(0),
        }
    }

    fn log_calls(&self) -> u32 {
        self.log_calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<StoreError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        if left != u32::MAX {
            self.failures_left.store(left - 1, Ordering::SeqCst);
        }
        Some(if self.transient {
            StoreError::Unavailable {
                message: "backend restarting".to_string(),
            }
        } else {
            StoreError::Backend {
                message: "constraint violation".to_string(),
            }
        })
    }
}

impl TripStore for FlakyTripStore {
    fn start_trip(
        &self,
        key: TripKey,
        origin: &str,
        destination: &str,
    ) -> Result<TripId, StoreError> {
        self.inner.start_trip(key, origin, destination)
    }

    fn end_trip(&self, trip_id: TripId) -> Result<Trip, StoreError> {
        self.inner.end_trip(trip_id)
    }

    fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>, StoreError> {
        self.inner.get_trip(trip_id)
    }

    fn get_active_trip(&self, key: TripKey) -> Result<Option<Trip>, StoreError> {
        self.inner.get_active_trip(key)
    }

    fn add_trip_plan(
        &self,
        key: TripKey,
        origin: &str,
        destination: &str,
    ) -> Result<TripPlan, StoreError> {
        self.inner.add_trip_plan(key, origin, destination)
    }

    fn consume_trip_plan(&self, key: TripKey) -> Result<Option<TripPlan>, StoreError> {
        self.inner.consume_trip_plan(key)
    }

    fn log_alert(
        &self,
        trip_id: TripId,
        alert_type: &str,
        severity: Severity,
        message: &str,
    ) -> Result<AlertRecord, StoreError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.inner.log_alert(trip_id, alert_type, severity, message)
    }

    fn alerts_for_trip(
        &self,
        trip_id: TripId,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        self.inner.alerts_for_trip(trip_id, limit)
    }
}

/// Sink that rejects every delivery.
struct RefusingSink {
    attempts: Mutex<Vec<Notification>>,
}

impl RefusingSink {
    fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().map_or(0, |a| a.len())
    }
}

impl NotificationSink for RefusingSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(notification.clone());
        }
        Err(NotifyError::Rejected { status: 503 })
    }
}

struct Backend {
    coordinator: TripLifecycleCoordinator,
    trips: Arc<InMemoryTripStore>,
    assignments: Arc<InMemoryAssignmentStore>,
    sink: Arc<RecordingSink>,
    driver: Driver,
    vehicle: Vehicle,
}

impl Backend {
    fn key(&self) -> TripKey {
        TripKey::new(self.driver.id, self.vehicle.id)
    }

    fn trip_alert(&self) -> Alert {
        let mut alert = Alert::new(
            TRIP_ALERT_TYPE,
            Severity::Low,
            "Solicitud de inicio o fin de viaje",
        );
        alert.driver_id = Some(self.driver.id);
        alert.vehicle_id = Some(self.vehicle.id);
        alert
    }
}

fn backend() -> Backend {
    let trips = Arc::new(InMemoryTripStore::new());
    let assignments = Arc::new(InMemoryAssignmentStore::new());
    let fleet = Arc::new(InMemoryFleetStore::new());
    let sink = Arc::new(RecordingSink::new());

    let driver = fleet.add_driver("Ana", "Torres").unwrap();
    let vehicle = fleet.add_vehicle("ABC-123").unwrap();

    let notifier = Arc::new(NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::clone(&trips) as Arc<dyn TripStore>,
        Arc::clone(&fleet) as Arc<dyn FleetStore>,
    ));
    let coordinator = TripLifecycleCoordinator::new(
        Arc::clone(&trips) as Arc<dyn TripStore>,
        Arc::clone(&assignments) as Arc<dyn AssignmentStore>,
        Arc::clone(&fleet) as Arc<dyn FleetStore>,
        notifier,
        fast_config(),
    );

    Backend {
        coordinator,
        trips,
        assignments,
        sink,
        driver,
        vehicle,
    }
}

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        store_retry_backoff: Duration::from_millis(1),
        ..CoordinatorConfig::default()
    }
}

#[test]
fn trip_toggle_cycles_through_start_and_end() {
    let b = backend();

    // No active trip: the first toggle starts one with placeholder route.
    let AlertOutcome::TripStarted { trip_id } = b.coordinator.handle_alert(&b.trip_alert()).unwrap()
    else {
        panic!("expected a started trip");
    };
    let trip = b.trips.get_trip(trip_id).unwrap().unwrap();
    assert_eq!(trip.status, TripStatus::InProgress);
    assert_eq!(trip.origin, "Origen automático");
    assert_eq!(trip.destination, "Destino asignado");
    assert!(trip.window.is_open_ended());

    // Same pair toggles again: the trip ends and its window closes.
    let AlertOutcome::TripEnded { trip_id: ended } =
        b.coordinator.handle_alert(&b.trip_alert()).unwrap()
    else {
        panic!("expected an ended trip");
    };
    assert_eq!(ended, trip_id);
    let trip = b.trips.get_trip(trip_id).unwrap().unwrap();
    assert_eq!(trip.status, TripStatus::Finished);
    assert!(trip.window.has_ended());

    // A third toggle starts a fresh trip rather than reviving the old one.
    let AlertOutcome::TripStarted { trip_id: second } =
        b.coordinator.handle_alert(&b.trip_alert()).unwrap()
    else {
        panic!("expected a second trip");
    };
    assert_ne!(second, trip_id);

    // Both starts and the end were logged in the trip's alert ledger.
    let first_ledger = b.trips.alerts_for_trip(trip_id, 10).unwrap();
    assert_eq!(first_ledger.len(), 2);
    assert!(first_ledger.iter().all(|r| r.alert_type == TRIP_ALERT_TYPE));
}

#[test]
fn pending_plan_supplies_the_route_once() {
    let b = backend();
    b.trips.add_trip_plan(b.key(), "Depot", "Port").unwrap();

    let AlertOutcome::TripStarted { trip_id } = b.coordinator.handle_alert(&b.trip_alert()).unwrap()
    else {
        panic!("expected a started trip");
    };
    let trip = b.trips.get_trip(trip_id).unwrap().unwrap();
    assert_eq!(trip.origin, "Depot");
    assert_eq!(trip.destination, "Port");

    // The plan was consumed: the next start falls back to placeholders.
    b.coordinator.handle_alert(&b.trip_alert()).unwrap();
    let AlertOutcome::TripStarted { trip_id: second } =
        b.coordinator.handle_alert(&b.trip_alert()).unwrap()
    else {
        panic!("expected a second trip");
    };
    let trip = b.trips.get_trip(second).unwrap().unwrap();
    assert_eq!(trip.origin, "Origen automático");
    assert_eq!(trip.destination, "Destino asignado");
}

#[test]
fn alert_route_overrides_the_plan() {
    let b = backend();
    b.trips.add_trip_plan(b.key(), "Depot", "Port").unwrap();

    let mut alert = b.trip_alert();
    alert.origin = Some("Terminal 4".to_string());
    alert.destination = Some("Hotel Centro".to_string());

    let AlertOutcome::TripStarted { trip_id } = b.coordinator.handle_alert(&alert).unwrap() else {
        panic!("expected a started trip");
    };
    let trip = b.trips.get_trip(trip_id).unwrap().unwrap();
    assert_eq!(trip.origin, "Terminal 4");
    assert_eq!(trip.destination, "Hotel Centro");

    // The plan is still gone even though the alert outranked it.
    assert!(b.trips.consume_trip_plan(b.key()).unwrap().is_none());
}

#[test]
fn generic_alert_without_trip_id_is_rejected_cleanly() {
    let b = backend();

    let alert = Alert::new("DROWSINESS", Severity::High, "Driver is drowsy");
    let err = b.coordinator.handle_alert(&alert).unwrap_err();
    assert!(err.is_validation(), "expected a validation error, got {err}");

    // Nothing was persisted and nothing went out.
    assert!(b.trips.get_trip(TripId::new(1)).unwrap().is_none());
    assert!(b.sink.delivered().is_empty());
}

#[test]
fn trip_notifications_carry_driver_context() {
    let b = backend();
    b.coordinator.handle_alert(&b.trip_alert()).unwrap();

    let delivered = b.sink.delivered();
    assert_eq!(delivered.len(), 1);
    let notification = &delivered[0];
    assert_eq!(
        notification.message,
        "Trip iniciado automáticamente por alerta TRIP"
    );
    assert_eq!(notification.driver_name.as_deref(), Some("Ana Torres"));
    assert_eq!(notification.vehicle_plate.as_deref(), Some("ABC-123"));

    let rendered = notification.render();
    assert!(rendered.starts_with("Alerta activada en DriveGuard"));
    assert!(rendered.contains("Conductor: Ana Torres"));
    assert!(rendered.contains("Vehiculo: ABC-123"));
}

/// Builds a coordinator over a flaky trip store. The notifier reads through
/// the same store; only `log_alert` is gated, so lookups stay reliable.
fn flaky_backend(store: Arc<FlakyTripStore>) -> (TripLifecycleCoordinator, TripId) {
    let assignments = Arc::new(InMemoryAssignmentStore::new());
    let fleet = Arc::new(InMemoryFleetStore::new());
    let sink = Arc::new(RecordingSink::new());

    let driver = fleet.add_driver("Ana", "Torres").unwrap();
    let vehicle = fleet.add_vehicle("ABC-123").unwrap();
    let trip_id = store
        .start_trip(TripKey::new(driver.id, vehicle.id), "Depot", "Port")
        .unwrap();

    let notifier = Arc::new(NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::clone(&store) as Arc<dyn TripStore>,
        Arc::clone(&fleet) as Arc<dyn FleetStore>,
    ));
    let coordinator = TripLifecycleCoordinator::new(
        store as Arc<dyn TripStore>,
        assignments as Arc<dyn AssignmentStore>,
        fleet as Arc<dyn FleetStore>,
        notifier,
        fast_config(),
    );
    (coordinator, trip_id)
}

fn drowsiness_alert(trip_id: TripId) -> Alert {
    let mut alert = Alert::new("DROWSINESS", Severity::High, "Driver is drowsy");
    alert.trip_id = Some(trip_id);
    alert
}

#[test]
fn transient_store_failure_is_retried() {
    let store = Arc::new(FlakyTripStore::new(2, true));
    let (coordinator, trip_id) = flaky_backend(Arc::clone(&store));

    let outcome = coordinator.handle_alert(&drowsiness_alert(trip_id)).unwrap();
    assert_eq!(outcome, AlertOutcome::Logged { trip_id });

    // Two failures, then the third attempt landed the row.
    assert_eq!(store.log_calls(), 3);
    let records = store.alerts_for_trip(trip_id, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].alert_type, "DROWSINESS");
}

#[test]
fn retry_budget_is_bounded() {
    let store = Arc::new(FlakyTripStore::new(u32::MAX, true));
    let (coordinator, trip_id) = flaky_backend(Arc::clone(&store));

    let err = coordinator
        .handle_alert(&drowsiness_alert(trip_id))
        .unwrap_err();
    assert!(
        matches!(err, GuardError::Store(StoreError::Unavailable { .. })),
        "expected the transient store error to surface, got {err}"
    );

    // Attempts stop at the configured budget.
    assert_eq!(store.log_calls(), fast_config().store_retry_attempts);
    assert!(store.alerts_for_trip(trip_id, 10).unwrap().is_empty());
}

#[test]
fn non_transient_store_failure_is_not_retried() {
    let store = Arc::new(FlakyTripStore::new(u32::MAX, false));
    let (coordinator, trip_id) = flaky_backend(Arc::clone(&store));

    let err = coordinator
        .handle_alert(&drowsiness_alert(trip_id))
        .unwrap_err();
    assert!(
        matches!(err, GuardError::Store(StoreError::Backend { .. })),
        "expected the backend error to surface, got {err}"
    );
    assert_eq!(store.log_calls(), 1);
}

#[test]
fn assignment_conflict_leaves_state_unchanged() {
    let b = backend();

    let assignment_id = b
        .coordinator
        .create_assignment(b.driver.id, b.vehicle.id)
        .unwrap();

    // The same pair conflicts on both sides; state stays put.
    let err = b
        .coordinator
        .create_assignment(b.driver.id, b.vehicle.id)
        .unwrap_err();
    assert!(err.is_conflict(), "expected a conflict, got {err}");
    let active = b.assignments.active_for_driver(b.driver.id).unwrap().unwrap();
    assert_eq!(active.id, assignment_id);

    // Closing frees both driver and vehicle for a fresh assignment.
    b.coordinator.close_assignment(assignment_id).unwrap();
    assert!(b.assignments.active_for_driver(b.driver.id).unwrap().is_none());
    let second = b
        .coordinator
        .create_assignment(b.driver.id, b.vehicle.id)
        .unwrap();
    assert_ne!(second, assignment_id);
}

#[test]
fn notifier_failure_never_blocks_handling() {
    let trips = Arc::new(InMemoryTripStore::new());
    let assignments = Arc::new(InMemoryAssignmentStore::new());
    let fleet = Arc::new(InMemoryFleetStore::new());
    let sink = Arc::new(RefusingSink::new());

    let driver = fleet.add_driver("Ana", "Torres").unwrap();
    let vehicle = fleet.add_vehicle("ABC-123").unwrap();
    let trip_id = trips
        .start_trip(TripKey::new(driver.id, vehicle.id), "Depot", "Port")
        .unwrap();

    let notifier = Arc::new(NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::clone(&trips) as Arc<dyn TripStore>,
        Arc::clone(&fleet) as Arc<dyn FleetStore>,
    ));
    let coordinator = TripLifecycleCoordinator::new(
        Arc::clone(&trips) as Arc<dyn TripStore>,
        assignments as Arc<dyn AssignmentStore>,
        fleet as Arc<dyn FleetStore>,
        notifier,
        fast_config(),
    );

    // The sink refuses, but the alert still lands in the ledger and the
    // caller sees success.
    let outcome = coordinator.handle_alert(&drowsiness_alert(trip_id)).unwrap();
    assert_eq!(outcome, AlertOutcome::Logged { trip_id });
    assert_eq!(sink.attempts(), 1);
    assert_eq!(trips.alerts_for_trip(trip_id, 10).unwrap().len(), 1);
}
