//! Broker connection seam and the in-memory hub.
//!
//! `AlertTransport` never talks to a concrete broker; it drives a
//! [`BrokerConnection`] obtained from a [`BrokerClient`]. The in-memory hub
//! in this module implements both for tests, the simulation binary, and
//! embedded deployments, including injected connect failures and link drops
//! so reconnect behavior is testable.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::TransportError;

/// Per-connection buffer of the in-memory hub.
const HUB_CONNECTION_CAPACITY: usize = 1024;

/// One message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEvent {
    /// The topic the message arrived on.
    pub topic: String,

    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// A live link to the broker, owned by the transport worker.
pub trait BrokerConnection: Send {
    /// Publishes one message.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Subscribes this connection to a topic.
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Waits up to `timeout` for the next inbound message.
    ///
    /// `Ok(None)` means no message arrived before the timeout; an `Err`
    /// means the link is gone and the caller must reconnect.
    fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerEvent>, TransportError>;
}

/// Factory for broker connections, used on every (re)connect attempt.
pub trait BrokerClient: Send {
    /// Opens a fresh connection.
    fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

#[derive(Debug)]
struct HubSubscriber {
    conn_id: u64,
    topics: HashSet<String>,
    tx: Sender<BrokerEvent>,
}

#[derive(Debug, Default)]
struct HubState {
    epoch: u64,
    next_conn_id: u64,
    fail_connects: u32,
    subscribers: Vec<HubSubscriber>,
}

/// In-process broker hub.
///
/// Every connection sees messages published by any connection on the
/// topics it subscribed to, itself included. Topic matching is exact;
/// there are no wildcard patterns.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryBroker {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Severs every live connection. Existing connections start failing
    /// and must reconnect; the hub itself keeps working.
    pub fn sever(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.epoch += 1;
            state.subscribers.clear();
        }
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_connects = count;
        }
    }

    /// Number of live connections subscribed to a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state.lock().map_or(0, |state| {
            state
                .subscribers
                .iter()
                .filter(|s| s.topics.contains(topic))
                .count()
        })
    }
}

impl BrokerClient for InMemoryBroker {
    fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut state = self.state.lock().map_err(|_| TransportError::ConnectionFailed {
            message: "broker hub poisoned".to_string(),
        })?;

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::ConnectionFailed {
                message: "injected connect failure".to_string(),
            });
        }

        state.next_conn_id += 1;
        let conn_id = state.next_conn_id;
        let (tx, rx) = bounded::<BrokerEvent>(HUB_CONNECTION_CAPACITY);
        state.subscribers.push(HubSubscriber {
            conn_id,
            topics: HashSet::new(),
            tx,
        });

        Ok(Box::new(InMemoryConnection {
            hub: Arc::clone(&self.state),
            conn_id,
            epoch: state.epoch,
            rx,
        }))
    }
}

#[derive(Debug)]
struct InMemoryConnection {
    hub: Arc<Mutex<HubState>>,
    conn_id: u64,
    epoch: u64,
    rx: Receiver<BrokerEvent>,
}

impl InMemoryConnection {
    fn hub_state(&self) -> Result<std::sync::MutexGuard<'_, HubState>, TransportError> {
        let state = self.hub.lock().map_err(|_| TransportError::ConnectionFailed {
            message: "broker hub poisoned".to_string(),
        })?;
        if state.epoch != self.epoch {
            return Err(TransportError::NotConnected);
        }
        Ok(state)
    }
}

impl BrokerConnection for InMemoryConnection {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let state = self.hub_state()?;
        let event = BrokerEvent {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        for sub in state.subscribers.iter().filter(|s| s.topics.contains(topic)) {
            // A slow connection loses messages rather than stalling the hub.
            match sub.tx.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
            }
        }
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.hub_state()?;
        let conn_id = self.conn_id;
        let Some(sub) = state.subscribers.iter_mut().find(|s| s.conn_id == conn_id) else {
            return Err(TransportError::NotConnected);
        };
        sub.topics.insert(topic.to_string());
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerEvent>, TransportError> {
        // A severed link must surface as an error, not as silence.
        self.hub_state().map(drop)?;

        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::NotConnected),
        }
    }
}
