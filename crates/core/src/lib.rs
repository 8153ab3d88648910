//! Shared data model and collaborator interfaces for the Nachos tool pipeline.

pub mod audit;
pub mod bus;
pub mod types;

pub use audit::{AuditLogger, TracingAuditLogger};
pub use bus::{tool_request_topic, BusError, LocalBus, MessageBus, RequestHandler};
pub use types::*;
