//! Broker-to-coordinator bridge.
//!
//! The [`AlertIngestor`] owns a subscription on the alerts topic and runs a
//! dedicated thread that decodes each payload, validates its wire shape and
//! hands it to the [`TripLifecycleCoordinator`]. Undecodable or malformed
//! payloads are counted and dropped; alerts the coordinator refuses are
//! counted separately. One bad payload never stops the stream.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::alert::Alert;
use crate::coordinator::TripLifecycleCoordinator;
use crate::error::{GuardError, TransportError};
use crate::transport::{BrokerEvent, Subscription};

/// How often the worker wakes to check the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consumes the alert stream and drives the coordinator.
///
/// Dropping the ingestor stops the worker; the subscription it owns is
/// released when the worker exits.
pub struct AlertIngestor {
    stop: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    decode_failures: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl AlertIngestor {
    /// Starts the ingest worker over an alerts-topic subscription.
    #[must_use]
    pub fn start(
        subscription: Subscription,
        coordinator: Arc<TripLifecycleCoordinator>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let accepted = Arc::new(AtomicU64::new(0));
        let rejected = Arc::new(AtomicU64::new(0));
        let decode_failures = Arc::new(AtomicU64::new(0));

        let worker = IngestWorker {
            subscription,
            coordinator,
            stop: Arc::clone(&stop),
            accepted: Arc::clone(&accepted),
            rejected: Arc::clone(&rejected),
            decode_failures: Arc::clone(&decode_failures),
        };
        let join = thread::Builder::new()
            .name("driveguard-ingest".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn alert ingest thread");

        Self {
            stop,
            accepted,
            rejected,
            decode_failures,
            join: Mutex::new(Some(join)),
        }
    }

    /// Alerts the coordinator handled successfully.
    #[must_use]
    pub fn accepted_alerts(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Well-formed alerts the coordinator refused.
    #[must_use]
    pub fn rejected_alerts(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Payloads dropped before reaching the coordinator.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Stops the worker and waits for it to exit. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = match self.join.lock() {
            Ok(mut join) => join.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("alert ingest worker panicked");
            }
        }
    }
}

impl fmt::Debug for AlertIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertIngestor")
            .field("accepted", &self.accepted_alerts())
            .field("rejected", &self.rejected_alerts())
            .field("decode_failures", &self.decode_failures())
            .finish_non_exhaustive()
    }
}

impl Drop for AlertIngestor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct IngestWorker {
    subscription: Subscription,
    coordinator: Arc<TripLifecycleCoordinator>,
    stop: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    decode_failures: Arc<AtomicU64>,
}

impl IngestWorker {
    fn run(self) {
        info!("alert ingest started on {}", self.subscription.topic());
        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match self.subscription.recv_timeout(POLL_INTERVAL) {
                Ok(event) => self.handle_event(&event),
                Err(GuardError::Transport(TransportError::Timeout { .. })) => {}
                Err(err) => {
                    info!("alert stream closed: {err}");
                    break;
                }
            }
        }
        info!("alert ingest stopped");
    }

    fn handle_event(&self, event: &BrokerEvent) {
        let alert = match serde_json::from_slice::<Alert>(&event.payload) {
            Ok(alert) => alert,
            Err(err) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("dropping undecodable alert payload: {err}");
                return;
            }
        };
        if let Err(err) = alert.validate() {
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
            warn!("dropping malformed alert: {err}");
            return;
        }

        match self.coordinator.handle_alert(&alert) {
            Ok(outcome) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!("{} alert handled: {outcome:?}", alert.alert_type);
            }
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("{} alert rejected: {err}", alert.alert_type);
            }
        }
    }
}
