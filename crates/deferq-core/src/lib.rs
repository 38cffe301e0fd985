//! deferq-core
//!
//! Building blocks for consuming long-running units of work from a message
//! queue whose processing-lock timeout is far shorter than the work itself.
//!
//! # Module layout
//! - **domain**: sequence numbers, work items, tracked properties, states
//! - **broker**: broker port traits + in-memory implementation
//! - **queue**: closeable hand-off buffer between ingestion and the workers
//! - **ingest**: first deferral with an expected-completion deadline
//! - **worker**: fixed pool running timed slices with progress re-deferral
//! - **watchdog**: periodic audit that dead-letters overdue deferred messages
//! - **retry**: bounded backoff for broker operations
//! - **service**: lifecycle wiring and exit status

pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod service;
pub mod watchdog;
pub mod worker;

pub use broker::{Broker, Delivery, InMemoryBroker, MessageLease, PeekedMessage, Subscription};
pub use config::ServiceConfig;
pub use domain::{DeadLetterReason, MessageState, SequenceNumber, TrackedProperties, WorkItem};
pub use error::DeferqError;
pub use ingest::IngestionHandler;
pub use observability::BrokerCounts;
pub use queue::WorkQueue;
pub use retry::RetryPolicy;
pub use service::{ExitStatus, Service};
pub use watchdog::Watchdog;
pub use worker::{Process, SimulatedProcess, WorkerGroup};
