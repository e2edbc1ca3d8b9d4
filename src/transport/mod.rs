//! Broker transport for alerts and device commands.
//!
//! The pipeline talks to the outside world over a pub/sub broker with two
//! topics: one carrying alert JSON from edge devices, one carrying device
//! commands back. [`AlertTransport`] keeps a single broker link on a
//! dedicated worker thread, reconnects with backoff, and exposes
//! fire-and-forget publishing plus [`Subscription`] streams that survive
//! reconnects.
//!
//! The broker itself sits behind the [`BrokerClient`] / [`BrokerConnection`]
//! traits so tests and simulations can run against [`InMemoryBroker`]
//! without a network.

pub mod broker;
pub mod client;

pub use broker::{BrokerClient, BrokerConnection, BrokerEvent, InMemoryBroker};
pub use client::{AlertTransport, Subscription, SubscriptionId, TransportConfig};
