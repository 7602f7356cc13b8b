//! Store layer contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the document, history and audit persistence contracts the
//!   service layer depends on.
//! - Isolate SQL and JSON-path details from service orchestration.
//!
//! # Invariants
//! - Document writes are conditional on version tokens; stale tokens must
//!   surface as `Conflict`, never as silent overwrites.
//! - History and audit tables are append-only; nothing in this layer
//!   updates or deletes their rows.

pub mod audit_store;
pub mod history_store;
pub mod tag_store;
