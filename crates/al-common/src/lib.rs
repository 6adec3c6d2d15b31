//! Audit log pipeline common types, IDs, and errors.
//!
//! This crate provides the value types shared by every other crate:
//! - Immutable entry records (audit, command log, request, response, trace, location)
//! - Correlation identity
//! - Entry validation
//! - Common error types

pub mod entry;
pub mod error;
pub mod id;

pub use entry::{
    now, thread_label, AuditEntry, Entry, EntryKind, LocationRecord, LogEntry, Outcome,
    RequestEntry, ResponseEntry, Tags, Timestamp, Timing, TraceEntry, TraceLevel, Validate,
    ValidationKind, ValidationMessage,
};
pub use error::{Error, Result};
pub use id::CorrelationId;
