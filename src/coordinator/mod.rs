//! Alert-driven trip lifecycle control.
//!
//! The [`TripLifecycleCoordinator`] is the single consumer of decoded
//! alerts. Generic alerts are logged against their trip and forwarded to
//! the notifier. TRIP alerts toggle the pair's trip: end the active one,
//! or consume a pending plan and start a new one. Mutations for one
//! (driver, vehicle) pair are serialized behind a per-key lock so bursty
//! or duplicated delivery cannot double-start or double-end a trip;
//! different pairs proceed concurrently.
//!
//! Store calls retry transient failures a bounded number of times, then
//! surface the error to the caller. Nothing here blocks forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::alert::{Alert, ControlAction, Severity, TRIP_ALERT_TYPE};
use crate::assignment::AssignmentId;
use crate::error::{
    ConflictError, GuardError, GuardResult, NotFoundError, TransportError, ValidationError,
};
use crate::fleet::{DriverId, VehicleId};
use crate::notify::NotificationDispatcher;
use crate::store::{AssignmentStore, FleetStore, StoreError, TripStore};
use crate::transport::AlertTransport;
use crate::trip::{TripId, TripKey};

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Store calls per operation before a transient failure surfaces.
    pub store_retry_attempts: u32,
    /// Delay before the first retry. Doubles per attempt.
    pub store_retry_backoff: Duration,
    /// Origin used when neither plan nor alert provides one.
    pub placeholder_origin: String,
    /// Destination used when neither plan nor alert provides one.
    pub placeholder_destination: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(200),
            placeholder_origin: "Origen automático".to_string(),
            placeholder_destination: "Destino asignado".to_string(),
        }
    }
}

/// What handling one alert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// A generic alert was logged against its trip.
    Logged {
        /// The trip the alert was logged against.
        trip_id: TripId,
    },
    /// A TRIP alert started a trip for its pair.
    TripStarted {
        /// The new trip.
        trip_id: TripId,
    },
    /// A TRIP alert ended the pair's active trip.
    TripEnded {
        /// The finished trip.
        trip_id: TripId,
    },
}

/// Owns alert-driven trip state transitions and the assignment surface.
///
/// Holds no authoritative copy of any trip or assignment; every decision
/// reads the store under the pair's lock and mutates through it.
pub struct TripLifecycleCoordinator {
    trips: Arc<dyn TripStore>,
    assignments: Arc<dyn AssignmentStore>,
    fleet: Arc<dyn FleetStore>,
    notifier: Arc<NotificationDispatcher>,
    transport: Option<Arc<AlertTransport>>,
    config: CoordinatorConfig,
    key_locks: Mutex<HashMap<TripKey, Arc<Mutex<()>>>>,
}

impl TripLifecycleCoordinator {
    /// Creates a coordinator over the given stores and notifier.
    #[must_use]
    pub fn new(
        trips: Arc<dyn TripStore>,
        assignments: Arc<dyn AssignmentStore>,
        fleet: Arc<dyn FleetStore>,
        notifier: Arc<NotificationDispatcher>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            trips,
            assignments,
            fleet,
            notifier,
            transport: None,
            config,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches a transport for the device-command surface
    /// ([`Self::sound_buzzer`] and friends).
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<AlertTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Routes one decoded alert.
    ///
    /// Wire-shape validation happens at the ingestion boundary; this layer
    /// checks correlation: a generic alert must carry the trip it belongs
    /// to, a TRIP alert must resolve its driver and vehicle.
    ///
    /// # Errors
    ///
    /// `Validation` when correlation fields are missing, `NotFound` when a
    /// name or plate lookup misses, `Store` when the store keeps failing
    /// past the retry budget.
    pub fn handle_alert(&self, alert: &Alert) -> GuardResult<AlertOutcome> {
        if alert.is_trip_event() {
            self.handle_trip_toggle(alert)
        } else {
            self.handle_generic(alert)
        }
    }

    fn handle_generic(&self, alert: &Alert) -> GuardResult<AlertOutcome> {
        let Some(trip_id) = alert.trip_id else {
            return Err(ValidationError::MissingTripId {
                alert_type: alert.alert_type.clone(),
            }
            .into());
        };

        let record = self.with_retry("log_alert", || {
            self.trips
                .log_alert(trip_id, &alert.alert_type, alert.severity, &alert.message)
        })?;
        debug!(
            "alert {} ({}) logged against trip {trip_id}",
            record.id, record.alert_type
        );

        self.notifier
            .forward(&alert.alert_type, alert.severity, &alert.message, Some(trip_id));
        Ok(AlertOutcome::Logged { trip_id })
    }

    fn handle_trip_toggle(&self, alert: &Alert) -> GuardResult<AlertOutcome> {
        let driver_id = self.resolve_driver(alert)?;
        let vehicle_id = self.resolve_vehicle(alert)?;
        let key = TripKey::new(driver_id, vehicle_id);

        // Serialize the whole read-decide-mutate sequence per pair. The
        // store's check is not atomic across get_active_trip and the
        // mutation that follows.
        let key_lock = self.lock_for(key)?;
        let _guard = key_lock
            .lock()
            .map_err(|_| GuardError::internal(format!("poisoned trip lock for {key}")))?;

        let active = self.with_retry("get_active_trip", || self.trips.get_active_trip(key))?;
        match active {
            Some(trip) => self.end_trip_locked(alert, trip.id, key),
            None => self.start_trip_locked(alert, key),
        }
    }

    fn end_trip_locked(
        &self,
        alert: &Alert,
        trip_id: TripId,
        key: TripKey,
    ) -> GuardResult<AlertOutcome> {
        self.with_retry("end_trip", || self.trips.end_trip(trip_id))?;

        let message = "Trip finalizado automáticamente por alerta TRIP";
        self.with_retry("log_alert", || {
            self.trips
                .log_alert(trip_id, TRIP_ALERT_TYPE, alert.severity, message)
        })?;
        info!("trip {trip_id} ended for {key}");

        self.notifier
            .forward(TRIP_ALERT_TYPE, alert.severity, message, Some(trip_id));
        Ok(AlertOutcome::TripEnded { trip_id })
    }

    fn start_trip_locked(&self, alert: &Alert, key: TripKey) -> GuardResult<AlertOutcome> {
        // The pending plan is consumed even when the alert overrides its
        // values; a stale plan must not resurface on a later trip.
        let plan = self.with_retry("consume_trip_plan", || self.trips.consume_trip_plan(key))?;
        if let Some(plan) = &plan {
            debug!("plan {} consumed for {key}", plan.id);
        }

        let origin = alert
            .origin
            .clone()
            .or_else(|| plan.as_ref().map(|p| p.origin.clone()))
            .unwrap_or_else(|| self.config.placeholder_origin.clone());
        let destination = alert
            .destination
            .clone()
            .or_else(|| plan.as_ref().map(|p| p.destination.clone()))
            .unwrap_or_else(|| self.config.placeholder_destination.clone());

        let trip_id =
            self.with_retry("start_trip", || self.trips.start_trip(key, &origin, &destination))?;

        let message = "Trip iniciado automáticamente por alerta TRIP";
        self.with_retry("log_alert", || {
            self.trips
                .log_alert(trip_id, TRIP_ALERT_TYPE, alert.severity, message)
        })?;
        info!("trip {trip_id} started for {key}: {origin} → {destination}");

        self.notifier
            .forward(TRIP_ALERT_TYPE, alert.severity, message, Some(trip_id));
        Ok(AlertOutcome::TripStarted { trip_id })
    }

    fn resolve_driver(&self, alert: &Alert) -> GuardResult<DriverId> {
        if let Some(id) = alert.driver_id {
            return Ok(id);
        }
        let Some(name) = alert.driver_name.as_deref() else {
            return Err(ValidationError::MissingField {
                field: "driver_id or driver_name".to_string(),
            }
            .into());
        };
        let driver = self.with_retry("find_driver_by_name", || {
            self.fleet.find_driver_by_name(name)
        })?;
        match driver {
            Some(driver) => Ok(driver.id),
            None => Err(NotFoundError::Driver {
                name: name.to_string(),
            }
            .into()),
        }
    }

    fn resolve_vehicle(&self, alert: &Alert) -> GuardResult<VehicleId> {
        if let Some(id) = alert.vehicle_id {
            return Ok(id);
        }
        let Some(plate) = alert.vehicle_plate.as_deref() else {
            return Err(ValidationError::MissingField {
                field: "vehicle_id or vehicle_plate".to_string(),
            }
            .into());
        };
        let vehicle = self.with_retry("find_vehicle_by_plate", || {
            self.fleet.find_vehicle_by_plate(plate)
        })?;
        match vehicle {
            Some(vehicle) => Ok(vehicle.id),
            None => Err(NotFoundError::Vehicle {
                plate: plate.to_string(),
            }
            .into()),
        }
    }

    /// Opens an assignment for the pair.
    ///
    /// The pre-checks give a fast, descriptive conflict answer; the store's
    /// own uniqueness enforcement stays authoritative and a race that slips
    /// past the pre-checks maps to the same errors.
    ///
    /// # Errors
    ///
    /// `Conflict` when the driver or vehicle already holds an open
    /// assignment; `Store` on persistent store failure.
    pub fn create_assignment(
        &self,
        driver_id: DriverId,
        vehicle_id: VehicleId,
    ) -> GuardResult<AssignmentId> {
        if let Some(existing) = self.with_retry("active_for_driver", || {
            self.assignments.active_for_driver(driver_id)
        })? {
            return Err(ConflictError::DriverAlreadyAssigned {
                driver_id,
                vehicle_plate: self.plate_of(existing.vehicle_id),
            }
            .into());
        }
        if let Some(existing) = self.with_retry("active_for_vehicle", || {
            self.assignments.active_for_vehicle(vehicle_id)
        })? {
            return Err(ConflictError::VehicleAlreadyAssigned {
                vehicle_id,
                driver_name: self.name_of(existing.driver_id),
            }
            .into());
        }

        match self.with_retry("create_assignment", || {
            self.assignments.create_assignment(driver_id, vehicle_id)
        }) {
            Ok(assignment) => {
                info!(
                    "assignment {} opened: driver {driver_id} on vehicle {vehicle_id}",
                    assignment.id
                );
                Ok(assignment.id)
            }
            Err(GuardError::Store(StoreError::DriverAlreadyAssigned {
                driver_id,
                assignment_id,
            })) => Err(ConflictError::DriverAlreadyAssigned {
                driver_id,
                vehicle_plate: self.plate_behind(assignment_id),
            }
            .into()),
            Err(GuardError::Store(StoreError::VehicleAlreadyAssigned {
                vehicle_id,
                assignment_id,
            })) => Err(ConflictError::VehicleAlreadyAssigned {
                vehicle_id,
                driver_name: self.name_behind(assignment_id),
            }
            .into()),
            Err(other) => Err(other),
        }
    }

    /// Closes an assignment by ending its window.
    ///
    /// # Errors
    ///
    /// `Store` with `AssignmentNotFound` for an unknown id, or on
    /// persistent store failure.
    pub fn close_assignment(&self, assignment_id: AssignmentId) -> GuardResult<()> {
        self.with_retry("close_assignment", || {
            self.assignments.close_assignment(assignment_id)
        })?;
        info!("assignment {assignment_id} closed");
        Ok(())
    }

    /// Turns the edge buzzer off.
    ///
    /// # Errors
    ///
    /// `Transport` when no transport is attached.
    pub fn silence_buzzer(&self) -> GuardResult<()> {
        self.control(ControlAction::BuzzerOff)
    }

    /// Turns the edge buzzer on.
    ///
    /// # Errors
    ///
    /// `Transport` when no transport is attached.
    pub fn sound_buzzer(&self) -> GuardResult<()> {
        self.control(ControlAction::BuzzerOn)
    }

    /// Turns the edge LED on.
    ///
    /// # Errors
    ///
    /// `Transport` when no transport is attached.
    pub fn light_led(&self) -> GuardResult<()> {
        self.control(ControlAction::LedOn)
    }

    /// Turns the edge LED off.
    ///
    /// # Errors
    ///
    /// `Transport` when no transport is attached.
    pub fn dark_led(&self) -> GuardResult<()> {
        self.control(ControlAction::LedOff)
    }

    fn control(&self, action: ControlAction) -> GuardResult<()> {
        let Some(transport) = self.transport.as_ref() else {
            return Err(TransportError::NotConnected.into());
        };
        transport.publish_control(action)
    }

    fn lock_for(&self, key: TripKey) -> GuardResult<Arc<Mutex<()>>> {
        let mut registry = self
            .key_locks
            .lock()
            .map_err(|_| GuardError::internal("poisoned trip lock registry"))?;
        Ok(Arc::clone(registry.entry(key).or_default()))
    }

    /// Runs a store call, retrying transient failures with doubling backoff
    /// up to the configured attempt budget.
    fn with_retry<T>(
        &self,
        op: &str,
        mut call: impl FnMut() -> Result<T, StoreError>,
    ) -> GuardResult<T> {
        let attempts = self.config.store_retry_attempts.max(1);
        let mut backoff = self.config.store_retry_backoff;
        for attempt in 1..=attempts {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!("{op} attempt {attempt}/{attempts} failed, retrying in {backoff:?}: {err}");
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(err) => {
                    warn!("{op} failed: {err}");
                    return Err(err.into());
                }
            }
        }
        // The loop always returns; attempts is at least one.
        Err(GuardError::internal(format!("{op} retry loop fell through")))
    }

    fn plate_of(&self, vehicle_id: VehicleId) -> String {
        self.fleet
            .get_vehicle(vehicle_id)
            .ok()
            .flatten()
            .map_or_else(|| format!("vehicle {vehicle_id}"), |v| v.plate)
    }

    fn name_of(&self, driver_id: DriverId) -> String {
        self.fleet
            .get_driver(driver_id)
            .ok()
            .flatten()
            .map_or_else(|| format!("driver {driver_id}"), |d| d.full_name())
    }

    fn plate_behind(&self, assignment_id: AssignmentId) -> String {
        self.assignments
            .get_assignment(assignment_id)
            .ok()
            .flatten()
            .map_or_else(
                || format!("assignment {assignment_id}"),
                |a| self.plate_of(a.vehicle_id),
            )
    }

    fn name_behind(&self, assignment_id: AssignmentId) -> String {
        self.assignments
            .get_assignment(assignment_id)
            .ok()
            .flatten()
            .map_or_else(
                || format!("assignment {assignment_id}"),
                |a| self.name_of(a.driver_id),
            )
    }
}
