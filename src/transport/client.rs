//! The transport worker and its subscription streams.
//!
//! [`AlertTransport`] owns a dedicated worker thread that holds the broker
//! link. Producers hand it payloads through a bounded queue and are never
//! blocked or failed: when the queue is full or the link is down, messages
//! are dropped and counted. The worker reconnects with exponential backoff
//! and re-subscribes every topic (the control topic always included) on
//! each successful connect.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{Alert, ControlAction, ControlMessage};
use crate::error::{GuardResult, TransportError};
use crate::transport::broker::{BrokerClient, BrokerConnection, BrokerEvent};

/// Unique identifier for a transport subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport worker tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Topic alerts are published on.
    pub alerts_topic: String,
    /// Topic device commands are published on. Subscribed on every connect.
    pub control_topic: String,
    /// Max queued outbound messages before publishes are dropped.
    pub publish_queue_capacity: usize,
    /// Max queued subscribe/unsubscribe messages.
    pub control_queue_capacity: usize,
    /// Per-subscription stream buffer capacity.
    pub subscriber_capacity: usize,
    /// First reconnect delay. Doubles per failed attempt.
    pub base_backoff: Duration,
    /// Reconnect delay ceiling.
    pub max_backoff: Duration,
    /// Worker wake-up interval when idle.
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            alerts_topic: "driveguard/alerts".to_string(),
            control_topic: "driveguard/control".to_string(),
            publish_queue_capacity: 256,
            control_queue_capacity: 64,
            subscriber_capacity: 256,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
struct OutboundMsg {
    topic: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Subscribe {
        subscription_id: SubscriptionId,
        topic: String,
        tx: Sender<BrokerEvent>,
        registered: Arc<AtomicBool>,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
}

#[derive(Debug)]
struct SubEntry {
    topic: String,
    tx: Sender<BrokerEvent>,
}

/// Fire-and-forget broker I/O for the whole pipeline.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AlertTransport {
    cfg: TransportConfig,
    control_tx: Sender<ControlMsg>,
    publish_tx: Sender<OutboundMsg>,
    dropped_publishes: Arc<AtomicU64>,
    dropped_events: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl AlertTransport {
    /// Spawns the worker over the given broker client.
    ///
    /// The worker starts connecting immediately and keeps reconnecting
    /// with exponential backoff for as long as the transport lives.
    #[must_use]
    pub fn start(client: Box<dyn BrokerClient>, cfg: TransportConfig) -> Self {
        let publish_capacity = cfg.publish_queue_capacity.max(1);
        let control_capacity = cfg.control_queue_capacity.max(1);

        let (control_tx, control_rx) = bounded::<ControlMsg>(control_capacity);
        let (publish_tx, publish_rx) = bounded::<OutboundMsg>(publish_capacity);

        let dropped_publishes = Arc::new(AtomicU64::new(0));
        let dropped_events = Arc::new(AtomicU64::new(0));
        let connects = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            client,
            cfg: cfg.clone(),
            control_rx,
            publish_rx,
            dropped_publishes: Arc::clone(&dropped_publishes),
            dropped_events: Arc::clone(&dropped_events),
            connects: Arc::clone(&connects),
        };

        let join = thread::Builder::new()
            .name("driveguard-transport".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn driveguard transport worker");

        Self {
            cfg,
            control_tx,
            publish_tx,
            dropped_publishes,
            dropped_events,
            connects,
            join: Mutex::new(Some(join)),
        }
    }

    /// Non-blocking raw publish. Messages that do not fit the queue are
    /// dropped and counted, never blocking the caller.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        let msg = OutboundMsg {
            topic: topic.to_string(),
            payload,
        };
        match self.publish_tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_publishes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Publishes an alert on the alerts topic.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the alert cannot be encoded; once
    /// encoded, delivery is fire-and-forget.
    pub fn publish_alert(&self, alert: &Alert) -> GuardResult<()> {
        let payload =
            serde_json::to_vec(alert).map_err(|e| TransportError::SerializationFailed {
                message: e.to_string(),
            })?;
        self.publish(&self.cfg.alerts_topic, payload);
        Ok(())
    }

    /// Publishes a device command on the control topic.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the command cannot be encoded.
    pub fn publish_control(&self, action: ControlAction) -> GuardResult<()> {
        let payload = serde_json::to_vec(&ControlMessage::new(action)).map_err(|e| {
            TransportError::SerializationFailed {
                message: e.to_string(),
            }
        })?;
        self.publish(&self.cfg.control_topic, payload);
        Ok(())
    }

    /// Opens a subscription stream for a topic.
    ///
    /// The subscription survives reconnects: the worker re-subscribes the
    /// topic on every fresh connection.
    ///
    /// # Errors
    ///
    /// Fails only when the transport worker is gone.
    pub fn subscribe(&self, topic: &str) -> GuardResult<Subscription> {
        let subscription_id = SubscriptionId::new();
        let (tx, rx) = bounded::<BrokerEvent>(self.cfg.subscriber_capacity.max(1));
        let registered = Arc::new(AtomicBool::new(false));

        self.control_tx
            .send(ControlMsg::Subscribe {
                subscription_id,
                topic: topic.to_string(),
                tx,
                registered: Arc::clone(&registered),
            })
            .map_err(|_| TransportError::StreamClosed)?;

        Ok(Subscription {
            subscription_id,
            topic: topic.to_string(),
            rx,
            control_tx: self.control_tx.clone(),
            unsubscribed: AtomicBool::new(false),
            registered,
        })
    }

    /// The configured alerts topic.
    #[must_use]
    pub fn alerts_topic(&self) -> &str {
        &self.cfg.alerts_topic
    }

    /// The configured control topic.
    #[must_use]
    pub fn control_topic(&self) -> &str {
        &self.cfg.control_topic
    }

    /// Messages dropped on the publish side (queue full, link down, or
    /// mid-publish failure).
    #[must_use]
    pub fn dropped_publishes(&self) -> u64 {
        self.dropped_publishes.load(Ordering::Relaxed)
    }

    /// Inbound events dropped because a subscriber was slow.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Successful connects since start. Greater than one means the worker
    /// has reconnected.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for AlertTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertTransport")
            .field("alerts_topic", &self.cfg.alerts_topic)
            .field("control_topic", &self.cfg.control_topic)
            .field("connects", &self.connects())
            .finish_non_exhaustive()
    }
}

impl Drop for AlertTransport {
    fn drop(&mut self) {
        // Close channels first so the worker can terminate.
        let (dummy_control_tx, _) = bounded::<ControlMsg>(1);
        let old_control = std::mem::replace(&mut self.control_tx, dummy_control_tx);
        drop(old_control);

        let (dummy_publish_tx, _) = bounded::<OutboundMsg>(1);
        let old_publish = std::mem::replace(&mut self.publish_tx, dummy_publish_tx);
        drop(old_publish);

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                // Do not join here.
                //
                // Callers may keep `Subscription` handles alive beyond the
                // transport lifetime, and each one holds a clone of
                // `control_tx`. Joining would wait on a worker that cannot
                // exit until those clones are gone.
                //
                // Detaching is safe: the worker exits once the last sender
                // is dropped.
                drop(handle);
            }
        }
    }
}

struct Worker {
    client: Box<dyn BrokerClient>,
    cfg: TransportConfig,
    control_rx: Receiver<ControlMsg>,
    publish_rx: Receiver<OutboundMsg>,
    dropped_publishes: Arc<AtomicU64>,
    dropped_events: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
}

impl Worker {
    fn run(mut self) {
        let mut subs: HashMap<SubscriptionId, SubEntry> = HashMap::new();
        let mut conn: Option<Box<dyn BrokerConnection>> = None;
        let mut backoff = self.cfg.base_backoff;
        let mut next_attempt = Instant::now();

        let mut control_closed = false;
        let mut publish_closed = false;

        loop {
            if conn.is_none() && Instant::now() >= next_attempt {
                match self.try_connect(&subs) {
                    Ok(fresh) => {
                        self.connects.fetch_add(1, Ordering::Relaxed);
                        backoff = self.cfg.base_backoff;
                        conn = Some(fresh);
                    }
                    Err(err) => {
                        warn!("broker connect failed, retrying in {backoff:?}: {err}");
                        next_attempt = Instant::now() + backoff;
                        backoff = (backoff * 2).min(self.cfg.max_backoff);
                    }
                }
            }

            select! {
                recv(self.control_rx) -> msg => match msg {
                    Ok(ControlMsg::Subscribe { subscription_id, topic, tx, registered }) => {
                        if let Some(c) = conn.as_mut() {
                            if let Err(err) = c.subscribe(&topic) {
                                warn!("subscribe to {topic} failed, reconnecting: {err}");
                                conn = None;
                                next_attempt = Instant::now();
                            }
                        }
                        debug!("subscription {subscription_id} registered for {topic}");
                        subs.insert(subscription_id, SubEntry { topic, tx });
                        registered.store(true, Ordering::Release);
                    }
                    Ok(ControlMsg::Unsubscribe { subscription_id }) => {
                        subs.remove(&subscription_id);
                    }
                    Err(_) => {
                        control_closed = true;
                        self.control_rx = never();
                    }
                },
                recv(self.publish_rx) -> msg => match msg {
                    Ok(out) => match conn.as_mut() {
                        Some(c) => {
                            if let Err(err) = c.publish(&out.topic, &out.payload) {
                                // The message is lost, not re-queued.
                                self.dropped_publishes.fetch_add(1, Ordering::Relaxed);
                                warn!("publish to {} failed, reconnecting: {err}", out.topic);
                                conn = None;
                                next_attempt = Instant::now();
                            }
                        }
                        None => {
                            self.dropped_publishes.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    Err(_) => {
                        publish_closed = true;
                        self.publish_rx = never();
                    }
                },
                default(self.cfg.poll_interval) => {}
            }

            if let Some(active) = conn.as_mut() {
                if !self.drain_inbound(active.as_mut(), &subs) {
                    conn = None;
                    next_attempt = Instant::now();
                }
            }

            if control_closed && publish_closed {
                break;
            }
        }
    }

    fn try_connect(
        &self,
        subs: &HashMap<SubscriptionId, SubEntry>,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut fresh = self.client.connect()?;

        // The control topic is always subscribed so device commands are
        // never missed after a reconnect.
        let mut topics: HashSet<&str> = HashSet::new();
        topics.insert(self.cfg.control_topic.as_str());
        topics.extend(subs.values().map(|s| s.topic.as_str()));
        for topic in &topics {
            fresh.subscribe(topic)?;
        }

        info!("broker connected, {} topics subscribed", topics.len());
        Ok(fresh)
    }

    /// Drains inbound messages. Returns false when the link died.
    fn drain_inbound(
        &self,
        conn: &mut dyn BrokerConnection,
        subs: &HashMap<SubscriptionId, SubEntry>,
    ) -> bool {
        loop {
            match conn.poll(Duration::ZERO) {
                Ok(Some(event)) => {
                    for sub in subs.values().filter(|s| s.topic == event.topic) {
                        // Never block the worker: drop if the subscriber is slow.
                        match sub.tx.try_send(event.clone()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
                Ok(None) => return true,
                Err(err) => {
                    warn!("broker poll failed, reconnecting: {err}");
                    return false;
                }
            }
        }
    }
}

/// A subscription stream for broker messages.
///
/// Dropping this stream attempts best-effort unregistration.
#[derive(Debug)]
pub struct Subscription {
    subscription_id: SubscriptionId,
    topic: String,
    rx: Receiver<BrokerEvent>,
    control_tx: Sender<ControlMsg>,
    unsubscribed: AtomicBool,
    registered: Arc<AtomicBool>,
}

impl Subscription {
    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// True once the worker has registered this stream for fan-out.
    ///
    /// Registration happens asynchronously after [`AlertTransport::subscribe`]
    /// returns; messages published before it completes are not delivered to
    /// this stream. Poll this to sequence a publish after the stream is live.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn registered_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.registered)
    }

    /// The topic this stream receives.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Best-effort explicit unregistration.
    ///
    /// Non-blocking and idempotent. After the worker removes the
    /// subscription, the stream eventually becomes disconnected.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.control_tx.try_send(ControlMsg::Unsubscribe {
            subscription_id: self.subscription_id,
        });
    }

    /// Receive the next message (blocking).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::StreamClosed` once the worker is gone.
    pub fn recv(&self) -> GuardResult<BrokerEvent> {
        Ok(self.rx.recv().map_err(|_| TransportError::StreamClosed)?)
    }

    /// Receive the next message with a timeout.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Timeout` when nothing arrived in time and
    /// `TransportError::StreamClosed` once the worker is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> GuardResult<BrokerEvent> {
        Ok(self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => TransportError::Timeout {
                #[allow(clippy::cast_possible_truncation)]
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => TransportError::StreamClosed,
        })?)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best-effort: do not block on shutdown.
        if !self.unsubscribed.swap(true, Ordering::AcqRel) {
            let _ = self.control_tx.try_send(ControlMsg::Unsubscribe {
                subscription_id: self.subscription_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::alert::Severity;
    use crate::transport::broker::InMemoryBroker;

    fn fast_config() -> TransportConfig {
        TransportConfig {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
            ..TransportConfig::default()
        }
    }

    fn transport_over(hub: &InMemoryBroker) -> AlertTransport {
        AlertTransport::start(Box::new(hub.clone()), fast_config())
    }

    /// Polls `check` until it passes or a deadline expires.
    fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn alert_round_trip() {
        let hub = InMemoryBroker::new();
        let transport = transport_over(&hub);

        let sub = transport.subscribe(transport.alerts_topic()).unwrap();
        eventually("alerts subscription", || {
            hub.subscriber_count("driveguard/alerts") == 1
        });

        let alert = Alert::new("DROWSINESS", Severity::High, "Driver is drowsy");
        transport.publish_alert(&alert).unwrap();

        let event = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.topic, "driveguard/alerts");
        let decoded: Alert = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(decoded, alert);
    }

    #[test]
    fn control_round_trip() {
        let hub = InMemoryBroker::new();
        let transport = transport_over(&hub);

        let sub = transport.subscribe(transport.control_topic()).unwrap();
        eventually("control subscription", || {
            hub.subscriber_count("driveguard/control") == 1
        });

        transport.publish_control(ControlAction::BuzzerOff).unwrap();

        let event = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        let decoded: ControlMessage = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(decoded.action, ControlAction::BuzzerOff);
    }

    #[test]
    fn control_topic_auto_subscribed() {
        let hub = InMemoryBroker::new();
        let _transport = transport_over(&hub);

        // No local subscription needed; the worker subscribes on connect.
        eventually("control auto-subscribe", || {
            hub.subscriber_count("driveguard/control") == 1
        });
    }

    #[test]
    fn registered_subscription_needs_no_republish() {
        let hub = InMemoryBroker::new();
        let transport = transport_over(&hub);

        let sub = transport.subscribe("driveguard/alerts").unwrap();
        assert_eq!(sub.topic(), "driveguard/alerts");
        eventually("stream live", || {
            sub.is_registered() && hub.subscriber_count("driveguard/alerts") == 1
        });

        // A single publish after the stream reports live must arrive.
        transport.publish("driveguard/alerts", b"once".to_vec());
        let event = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.payload, b"once");
    }

    #[test]
    fn publishes_drop_while_disconnected() {
        let hub = InMemoryBroker::new();
        hub.fail_next_connects(u32::MAX);
        let transport = transport_over(&hub);

        for _ in 0..3 {
            let alert = Alert::new("HELP", Severity::Critical, "Driver signaled for help");
            transport.publish_alert(&alert).unwrap();
        }

        eventually("drops while disconnected", || {
            transport.dropped_publishes() == 3
        });
        assert_eq!(transport.connects(), 0);
    }

    #[test]
    fn reconnects_and_resubscribes_after_sever() {
        let hub = InMemoryBroker::new();
        let transport = transport_over(&hub);

        let sub = transport.subscribe("driveguard/alerts").unwrap();
        eventually("initial subscription", || {
            hub.subscriber_count("driveguard/alerts") == 1
        });

        transport.publish("driveguard/alerts", b"before".to_vec());
        let event = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.payload, b"before");

        hub.sever();
        eventually("reconnect", || transport.connects() >= 2);
        eventually("resubscribe", || hub.subscriber_count("driveguard/alerts") == 1);

        transport.publish("driveguard/alerts", b"after".to_vec());
        let event = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.payload, b"after");
    }

    #[test]
    fn slow_subscriber_loses_events() {
        let hub = InMemoryBroker::new();
        let cfg = TransportConfig {
            subscriber_capacity: 1,
            ..fast_config()
        };
        let transport = AlertTransport::start(Box::new(hub.clone()), cfg);

        let sub = transport.subscribe("driveguard/alerts").unwrap();
        eventually("subscription", || {
            hub.subscriber_count("driveguard/alerts") == 1
        });

        for n in 0..5u8 {
            transport.publish("driveguard/alerts", vec![n]);
        }

        eventually("event drops", || transport.dropped_events() >= 1);
        // The buffered message is still deliverable.
        assert!(sub.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = InMemoryBroker::new();
        let transport = transport_over(&hub);

        let sub = transport.subscribe("driveguard/alerts").unwrap();
        eventually("subscription", || {
            hub.subscriber_count("driveguard/alerts") == 1
        });
        sub.unsubscribe();

        eventually("delivery stops", || {
            transport.publish("driveguard/alerts", b"x".to_vec());
            sub.recv_timeout(Duration::from_millis(50)).is_err()
        });
    }

    #[test]
    fn subscription_ids_are_unique() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }
}
