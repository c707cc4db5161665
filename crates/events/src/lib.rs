//! Outcome events for the Warden reconciliation engine.
//!
//! The engine hands every recovery, healing and rollback outcome to an
//! [`EventSink`] and does not care what happens to it afterwards. Wire a
//! message broker or a notifier behind the trait in production.
//! [`EventLog`] keeps events in memory and [`TracedSink`] logs them on the
//! way through.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_core::DeviceId;
//! use warden_events::{EventLog, EventSink, FleetEvent, TracedSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let log = Arc::new(EventLog::new());
//!     let sink = TracedSink::new(log.clone());
//!
//!     sink.publish(FleetEvent::permanent_failure(DeviceId::new("device-1"), 3))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(log.event_types().await, vec!["permanent_failure"]);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod event;
pub mod sink;

pub use error::{Error, Result};
pub use event::{EventId, FleetEvent};
pub use sink::{EventLog, EventSink, TracedSink};
