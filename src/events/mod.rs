//! Audit events
//!
//! The versioned event vocabulary, its argument schemas, and the value model
//! events carry.

pub mod schema;
pub mod value;

pub use schema::{AuditEvent, CodeObjectSpec, EventKind, VOCABULARY_VERSION};
pub use value::{ObjectRef, Value};
