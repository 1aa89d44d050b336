//! Tracker Manager - keeps locally recorded tickets in step with external
//! issue trackers.
//!
//! A single background loop reconciles the store with every configured
//! tracker. Connectors adapt one tracker kind (Jira Cloud, Server, Data
//! Center) to a common interface.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────────────┐
//!   interval → │          Reconciler          │ ← shutdown (watch)
//!              └──────────────────────────────┘
//!                 │           │           │
//!                 ▼           ▼           ▼
//!          ConnectionManager  TicketSynchronizer  PendingCreator
//!          (disconnected,     (connected,         (connected,
//!           backoff elapsed)   created tickets)    pending tickets)
//!                 │           │           │
//!                 └─────── ConnectorRegistry ───────┘
//!                             │  resolve(kind)
//!                             ▼
//!                     Connector (JiraConnector)
//!                             │
//!                             ▼
//!                     Jira REST API v2
//! ```
//!
//! # Core Types
//!
//! - [`Connector`] - Trait every tracker kind implements
//! - [`ConnectorRegistry`] - Maps a tracker kind to a connector factory
//! - [`Reconciler`] - The background loop
//! - [`TrackerError`] - Failure taxonomy logged by the loop

mod connector;
mod error;
pub mod connection;
pub mod connectors;
pub mod creator;
pub mod reconciler;
pub mod registry;
pub mod synchronizer;

#[cfg(test)]
mod testing;

pub use connector::{Connector, RefreshOutcome};
pub use error::TrackerError;
pub use reconciler::{Reconciler, TickReport};
pub use registry::{ConnectorFactory, ConnectorRegistry};
