//! Domain model for versioned tag documents.
//!
//! # Responsibility
//! - Define the canonical document shape shared by the store and service layers.
//! - Define the audit vocabulary every successful mutation produces.
//!
//! # Invariants
//! - Every document is identified by a stable `TagId`.
//! - Deletion is represented by the `deleted` timestamp field, not removal.

pub mod audit;
pub mod tag;
