//! Operator notifications.
//!
//! Every logged alert is forwarded to a notification sink (Telegram in the
//! reference deployment, a recording sink in tests). Delivery is strictly
//! best-effort: a sink failure is logged and counted, never propagated, so
//! a down notifier can not stall alert processing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use thiserror::Error;

use crate::alert::Severity;
use crate::store::{FleetStore, TripStore};
use crate::trip::TripId;

/// Errors a notification sink can report.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The sink has no credentials and cannot deliver anything.
    #[error("Notifier is not configured")]
    NotConfigured,

    /// The notification service rejected the message.
    #[error("Notifier rejected the message (status {status})")]
    Rejected {
        /// Status code the service answered with.
        status: u16,
    },

    /// The notification service was unreachable.
    #[error("Notifier unreachable: {message}")]
    Network {
        /// What the client reported.
        message: String,
    },
}

/// One operator-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// What happened.
    pub alert_type: String,

    /// How urgent it is.
    pub severity: Severity,

    /// Human-readable description.
    pub message: String,

    /// The trip the alert was logged against, when known.
    pub trip_id: Option<TripId>,

    /// Driver name resolved from the trip, when available.
    pub driver_name: Option<String>,

    /// Vehicle plate resolved from the trip, when available.
    pub vehicle_plate: Option<String>,
}

impl Notification {
    /// Renders the message text sinks deliver.
    ///
    /// The line format is consumed by existing operator tooling; do not
    /// reorder the fixed lines.
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = vec![
            "Alerta activada en DriveGuard".to_string(),
            format!("Tipo: {}", self.alert_type),
            format!("Severidad: {}", self.severity),
            format!("Mensaje: {}", self.message),
        ];
        if let Some(trip_id) = self.trip_id {
            lines.push(format!("Viaje ID: {trip_id}"));
        }
        if let Some(driver_name) = &self.driver_name {
            lines.push(format!("Conductor: {driver_name}"));
        }
        if let Some(vehicle_plate) = &self.vehicle_plate {
            lines.push(format!("Vehiculo: {vehicle_plate}"));
        }
        lines.join("\n")
    }
}

/// Delivery seam for notifications.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification.
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sink that records notifications in memory.
///
/// Backs tests and the simulation binary.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything delivered so far. A poisoned recorder
    /// reads as empty.
    #[must_use]
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut delivered = self.delivered.lock().map_err(|_| NotifyError::Network {
            message: "recording sink poisoned".to_string(),
        })?;
        delivered.push(notification.clone());
        Ok(())
    }
}

/// Builds notifications, enriches them with trip context, and hands them
/// to the sink. Failures never leave this type.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    trips: Arc<dyn TripStore>,
    fleet: Arc<dyn FleetStore>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    /// Creates a dispatcher over the given sink and stores.
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        trips: Arc<dyn TripStore>,
        fleet: Arc<dyn FleetStore>,
    ) -> Self {
        Self {
            sink,
            trips,
            fleet,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Forwards one alert to the sink, best-effort.
    ///
    /// Trip context (driver name, vehicle plate) is resolved when the store
    /// answers; resolution failures degrade to an unenriched notification.
    pub fn forward(
        &self,
        alert_type: &str,
        severity: Severity,
        message: &str,
        trip_id: Option<TripId>,
    ) {
        let mut notification = Notification {
            alert_type: alert_type.to_string(),
            severity,
            message: message.to_string(),
            trip_id,
            driver_name: None,
            vehicle_plate: None,
        };

        if let Some(trip_id) = trip_id {
            self.enrich(trip_id, &mut notification);
        }

        match self.sink.deliver(&notification) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("notification delivery failed for {alert_type}: {err}");
            }
        }
    }

    fn enrich(&self, trip_id: TripId, notification: &mut Notification) {
        let trip = match self.trips.get_trip(trip_id) {
            Ok(Some(trip)) => trip,
            Ok(None) => return,
            Err(err) => {
                debug!("trip context lookup failed for {trip_id}: {err}");
                return;
            }
        };

        match self.fleet.get_driver(trip.driver_id) {
            Ok(Some(driver)) => notification.driver_name = Some(driver.full_name()),
            Ok(None) => {}
            Err(err) => debug!("driver context lookup failed for {trip_id}: {err}"),
        }
        match self.fleet.get_vehicle(trip.vehicle_id) {
            Ok(Some(vehicle)) => notification.vehicle_plate = Some(vehicle.plate),
            Ok(None) => {}
            Err(err) => debug!("vehicle context lookup failed for {trip_id}: {err}"),
        }
    }

    /// Notifications delivered successfully.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Notifications the sink failed to deliver.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
