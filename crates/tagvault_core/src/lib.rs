//! Core domain logic for TagVault.
//! This crate is the single source of truth for tag mutation invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::audit::{AuditAction, AuditEntry, AuditIntent};
pub use model::tag::{Reference, Tag, TagDraft, TagId, TagPatch, VersionToken};
pub use service::tag_service::{
    Actor, TagPage, TagResult, TagService, TagServiceError,
};
pub use store::audit_store::{AuditError, AuditRecord, AuditResult, AuditStore, SqliteAuditStore};
pub use store::history_store::{
    HistoryError, HistoryRecord, HistoryResult, HistoryStore, SqliteHistoryStore,
};
pub use store::tag_store::{
    normalize_tag_limit, DocFilter, FilteringArgs, PaginationArgs, SortOrder, SortingArgs,
    SqliteTagStore, StoreError, StoreResult, StoredTag, TagStore,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
