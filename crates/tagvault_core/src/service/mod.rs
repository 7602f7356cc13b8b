//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store, history and audit calls into tag use-case APIs.
//! - Keep callers decoupled from persistence details.

pub mod tag_service;
