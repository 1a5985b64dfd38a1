// Port Layer - Interfaces for external collaborators

pub mod driver;
pub mod event_log;
pub mod id_provider; // For deterministic testing

// Re-exports
pub use driver::{Connection, Driver, DriverError, Notice, RawOutcome, RawResult};
pub use event_log::{EventLog, EventLogError, SessionEvent, TracingEventLog};
pub use id_provider::{IdProvider, UuidProvider};
