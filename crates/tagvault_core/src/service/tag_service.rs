//! Tag use-case service.
//!
//! # Responsibility
//! - Provide the tag mutation APIs (create, update, delete, reference
//!   add/remove) and the read APIs (get, count, list).
//! - Run every mutation through the shared recording pipeline.
//!
//! # Invariants
//! - Every successful mutation appends exactly one history snapshot and
//!   then exactly one audit entry, in that order.
//! - `get`, `count` and `list` never write to any collaborator.
//! - Version tokens pass through to the store verbatim; a conflict is the
//!   caller's to resolve, never retried here.
//! - `create` and `delete` re-stamp mutation meta; reference operations
//!   carry meta forward unchanged.

use crate::model::audit::{AuditAction, AuditIntent};
use crate::model::tag::{utc_now_ms, Reference, Tag, TagDraft, TagId, TagPatch, VersionToken};
use crate::store::audit_store::{AuditError, AuditStore};
use crate::store::history_store::{HistoryError, HistoryStore};
use crate::store::tag_store::{
    normalize_tag_limit, DocFilter, FilteringArgs, PaginationArgs, SortingArgs, StoreError,
    StoredTag, TagStore,
};
use log::error;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Top-level body field marking a document as soft-deleted.
const DELETED_FIELD: &str = "deleted";

pub type TagResult<T> = Result<T, TagServiceError>;

/// Acting identity stamped into meta fields and audit entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub username: String,
}

impl Actor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Service error for tag use-cases.
#[derive(Debug)]
pub enum TagServiceError {
    /// Target tag does not exist.
    TagNotFound(TagId),
    /// Reference removal on a tag whose reference list is absent or empty.
    NoReferences(TagId),
    /// The supplied version token no longer matches the stored document.
    Conflict {
        id: TagId,
        supplied: Option<VersionToken>,
    },
    /// Input rejected before any write happened.
    Validation(String),
    /// Persistence-layer failure outside the semantic cases above.
    Store(StoreError),
    /// History append failed after the document write committed.
    History(HistoryError),
    /// Audit append failed after the snapshot was recorded.
    Audit(AuditError),
}

impl Display for TagServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TagNotFound(tag_id) => write!(f, "tag not found: {tag_id}"),
            Self::NoReferences(tag_id) => write!(f, "tag {tag_id} has no references"),
            Self::Conflict {
                id,
                supplied: Some(token),
            } => write!(f, "tag {id} changed concurrently: token {token} is stale"),
            Self::Conflict { id, supplied: None } => {
                write!(f, "tag {id} changed concurrently: id already exists")
            }
            Self::Validation(message) => write!(f, "invalid tag input: {message}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::History(err) => write!(f, "history trail append failed: {err}"),
            Self::Audit(err) => write!(f, "audit trail append failed: {err}"),
        }
    }
}

impl Error for TagServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::History(err) => Some(err),
            Self::Audit(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for TagServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(tag_id) => Self::TagNotFound(tag_id),
            StoreError::Conflict { id, supplied } => Self::Conflict { id, supplied },
            StoreError::Validation(message) => Self::Validation(message),
            other => Self::Store(other),
        }
    }
}

impl From<HistoryError> for TagServiceError {
    fn from(value: HistoryError) -> Self {
        Self::History(value)
    }
}

impl From<AuditError> for TagServiceError {
    fn from(value: AuditError) -> Self {
        Self::Audit(value)
    }
}

/// List result envelope used by service callers.
#[derive(Debug, Clone, PartialEq)]
pub struct TagPage {
    /// Total documents matching the `include_deleted` policy, before paging.
    pub total: u64,
    /// Effective normalized limit used by the query.
    pub limit: u32,
    /// Offset used by the query.
    pub offset: u32,
    /// One page of documents with their version tokens.
    pub items: Vec<StoredTag>,
}

/// Tag service facade over store and trail implementations.
pub struct TagService<S: TagStore, H: HistoryStore, A: AuditStore> {
    actor: Actor,
    store: S,
    history: H,
    audit: A,
}

impl<S: TagStore, H: HistoryStore, A: AuditStore> TagService<S, H, A> {
    /// Creates a service acting as `actor` over the provided collaborators.
    pub fn new(actor: Actor, store: S, history: H, audit: A) -> Self {
        Self {
            actor,
            store,
            history,
            audit,
        }
    }

    /// Identity this service acts as.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Gets one tag with its current version token.
    ///
    /// Soft-deleted tags read back like live ones.
    pub fn get(&self, tag_id: TagId) -> TagResult<StoredTag> {
        Ok(self.store.read(tag_id)?)
    }

    /// Counts tags, excluding soft-deleted ones unless asked otherwise.
    pub fn count(&self, include_deleted: bool) -> TagResult<u64> {
        Ok(self.store.count(deleted_filter(include_deleted))?)
    }

    /// Lists tags under filtering, sorting and paging.
    ///
    /// `total` is computed before paging under the same `include_deleted`
    /// policy, so it reflects the full matching set for any page window.
    pub fn list(
        &self,
        pagination: &PaginationArgs,
        filtering: &FilteringArgs,
        sorting: &SortingArgs,
        include_deleted: bool,
    ) -> TagResult<TagPage> {
        let total = self.count(include_deleted)?;
        let items = self.store.search(
            pagination,
            filtering,
            sorting,
            deleted_filter(include_deleted),
        )?;

        Ok(TagPage {
            total,
            limit: normalize_tag_limit(pagination.limit),
            offset: pagination.offset,
            items,
        })
    }

    /// Creates a new tag from `draft` under a fresh id.
    ///
    /// The actor becomes author and editor, `created == updated`, and the
    /// reserved meta keys in the draft's field map are dropped.
    pub fn create(&self, draft: TagDraft) -> TagResult<StoredTag> {
        if draft.name.trim().is_empty() {
            return Err(TagServiceError::Validation(
                "tag name must not be blank".to_string(),
            ));
        }
        if let Some(references) = &draft.references {
            if references.iter().any(|reference| reference.id.trim().is_empty()) {
                return Err(TagServiceError::Validation(
                    "reference id must not be blank".to_string(),
                ));
            }
        }

        let tag_id = Uuid::new_v4();
        let body = Tag::from_draft(draft, self.actor.username.as_str(), utc_now_ms());

        self.recorded(|| {
            let stored = self.store.write(tag_id, &body, None)?;
            let intent = AuditIntent::for_tag(
                AuditAction::Create,
                tag_id,
                stored.token,
                format!("Creating new Tag [{}]", stored.tag.name),
            );
            Ok((intent, stored))
        })
    }

    /// Shallow-merges `patch` over the stored document and re-stamps meta.
    ///
    /// Top-level patch keys overwrite; nested structures are replaced
    /// wholesale. Works on soft-deleted documents too.
    pub fn update(
        &self,
        tag_id: TagId,
        token: VersionToken,
        patch: TagPatch,
    ) -> TagResult<StoredTag> {
        let field_names: Vec<&String> = patch.keys().collect();
        let message = format!(
            "Tag [{tag_id}] had {field_names:?} modified by [{}]",
            self.actor.username
        );

        self.recorded(|| {
            let current = self.store.read(tag_id)?;
            let mut body = current.tag.merged(&patch).map_err(|err| {
                TagServiceError::Validation(format!("patch produced an invalid document: {err}"))
            })?;
            body.touch(self.actor.username.as_str(), utc_now_ms());

            let stored = self.store.write(tag_id, &body, Some(token))?;
            let intent = AuditIntent::for_tag(AuditAction::Update, tag_id, stored.token, message);
            Ok((intent, stored))
        })
    }

    /// Soft-deletes a tag: re-stamps meta and sets `deleted` to the same
    /// instant as `updated`.
    ///
    /// The document stays readable and mutable. Deleting an already deleted
    /// tag re-stamps both fields.
    pub fn delete(&self, tag_id: TagId, token: VersionToken) -> TagResult<StoredTag> {
        self.recorded(|| {
            let current = self.store.read(tag_id)?;
            let mut body = current.tag;
            body.touch(self.actor.username.as_str(), utc_now_ms());
            body.deleted = Some(body.updated);

            let stored = self.store.write(tag_id, &body, Some(token))?;
            let intent = AuditIntent::for_tag(
                AuditAction::Delete,
                tag_id,
                stored.token,
                format!("Tag [{}] deleted", stored.tag.name),
            );
            Ok((intent, stored))
        })
    }

    /// Appends one reference to the tag's `references` list, creating the
    /// list when the document does not carry it yet.
    pub fn create_reference(
        &self,
        tag_id: TagId,
        token: VersionToken,
        reference: Reference,
    ) -> TagResult<StoredTag> {
        if reference.id.trim().is_empty() {
            return Err(TagServiceError::Validation(
                "reference id must not be blank".to_string(),
            ));
        }

        let message = format!(
            "Tag [{tag_id}] had {:?} modified by [{}]",
            reference.field_names(),
            self.actor.username
        );

        self.recorded(|| {
            let current = self.store.read(tag_id)?;
            let mut body = current.tag;
            body.references.get_or_insert_with(Vec::new).push(reference);

            let stored = self.store.write(tag_id, &body, Some(token))?;
            let intent =
                AuditIntent::for_references(AuditAction::Create, tag_id, stored.token, message);
            Ok((intent, stored))
        })
    }

    /// Removes every reference whose id equals `reference_id`.
    ///
    /// A tag whose reference list is absent or empty fails with
    /// `NoReferences`; removing an id that is not in the list rewrites the
    /// document unchanged rather than failing.
    pub fn delete_reference(
        &self,
        tag_id: TagId,
        token: VersionToken,
        reference_id: &str,
    ) -> TagResult<StoredTag> {
        self.recorded(|| {
            let current = self.store.read(tag_id)?;
            let mut body = current.tag;

            let references = match body.references.take() {
                Some(list) if !list.is_empty() => list,
                _ => return Err(TagServiceError::NoReferences(tag_id)),
            };
            body.references = Some(
                references
                    .into_iter()
                    .filter(|reference| reference.id != reference_id)
                    .collect(),
            );

            let stored = self.store.write(tag_id, &body, Some(token))?;
            let intent = AuditIntent::for_references(
                AuditAction::Delete,
                tag_id,
                stored.token,
                format!("Tag [{tag_id}] had reference {reference_id} deleted"),
            );
            Ok((intent, stored))
        })
    }

    /// Runs `mutate`, then appends the history snapshot and the stamped
    /// audit entry, in that order.
    ///
    /// A recorder failure at this point means the document write has
    /// already committed; the gap is logged before the error propagates so
    /// the trail divergence is observable even when callers drop the error.
    fn recorded<F>(&self, mutate: F) -> TagResult<StoredTag>
    where
        F: FnOnce() -> TagResult<(AuditIntent, StoredTag)>,
    {
        let (intent, stored) = mutate()?;

        if let Err(err) = self.history.add(&stored) {
            error!(
                "event=history_append module=service status=error tag_id={} version={} error={err}",
                stored.id, stored.token
            );
            return Err(err.into());
        }

        let entry = intent.stamped(self.actor.username.clone());
        if let Err(err) = self.audit.add(&entry) {
            error!(
                "event=audit_append module=service status=error tag_id={} version={} error={err}",
                stored.id, stored.token
            );
            return Err(err.into());
        }

        Ok(stored)
    }
}

fn deleted_filter(include_deleted: bool) -> Option<DocFilter> {
    if include_deleted {
        None
    } else {
        Some(DocFilter::FieldAbsent(DELETED_FIELD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::store::audit_store::{AuditResult, SqliteAuditStore};
    use crate::store::history_store::{HistoryResult, SqliteHistoryStore};
    use crate::store::tag_store::SqliteTagStore;
    use rusqlite::Connection;

    struct FailingHistory;

    impl HistoryStore for FailingHistory {
        fn add(&self, _snapshot: &StoredTag) -> HistoryResult<()> {
            Err(HistoryError::InvalidData(
                "history trail unavailable".to_string(),
            ))
        }
    }

    struct FailingAudit;

    impl AuditStore for FailingAudit {
        fn add(&self, _entry: &crate::model::audit::AuditEntry) -> AuditResult<()> {
            Err(AuditError::InvalidData(
                "audit trail unavailable".to_string(),
            ))
        }
    }

    fn table_count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn create_fails_fast_on_blank_name() {
        let conn = open_db_in_memory().unwrap();
        let service = TagService::new(
            Actor::new("alice"),
            SqliteTagStore::try_new(&conn).unwrap(),
            SqliteHistoryStore::try_new(&conn).unwrap(),
            SqliteAuditStore::try_new(&conn).unwrap(),
        );

        let err = service.create(TagDraft::named("   ")).unwrap_err();
        assert!(matches!(err, TagServiceError::Validation(_)));
        assert_eq!(table_count(&conn, "tags"), 0);
        assert_eq!(table_count(&conn, "tag_history"), 0);
        assert_eq!(table_count(&conn, "audit_log"), 0);
    }

    #[test]
    fn history_failure_surfaces_but_document_write_stays() {
        let conn = open_db_in_memory().unwrap();
        let service = TagService::new(
            Actor::new("alice"),
            SqliteTagStore::try_new(&conn).unwrap(),
            FailingHistory,
            SqliteAuditStore::try_new(&conn).unwrap(),
        );

        let err = service.create(TagDraft::named("orphan")).unwrap_err();

        assert!(matches!(err, TagServiceError::History(_)));
        // The document write committed before the recorder ran.
        assert_eq!(table_count(&conn, "tags"), 1);
        // The audit append never ran: history comes first.
        assert_eq!(table_count(&conn, "audit_log"), 0);
    }

    #[test]
    fn audit_failure_surfaces_after_history_was_recorded() {
        let conn = open_db_in_memory().unwrap();
        let service = TagService::new(
            Actor::new("alice"),
            SqliteTagStore::try_new(&conn).unwrap(),
            SqliteHistoryStore::try_new(&conn).unwrap(),
            FailingAudit,
        );

        let err = service.create(TagDraft::named("half-trailed")).unwrap_err();

        assert!(matches!(err, TagServiceError::Audit(_)));
        assert_eq!(table_count(&conn, "tags"), 1);
        assert_eq!(table_count(&conn, "tag_history"), 1);
        assert_eq!(table_count(&conn, "audit_log"), 0);
    }

    #[test]
    fn validation_failure_inside_pipeline_writes_nothing() {
        let conn = open_db_in_memory().unwrap();
        let service = TagService::new(
            Actor::new("alice"),
            SqliteTagStore::try_new(&conn).unwrap(),
            SqliteHistoryStore::try_new(&conn).unwrap(),
            SqliteAuditStore::try_new(&conn).unwrap(),
        );

        let created = service.create(TagDraft::named("valid")).unwrap();

        let mut patch = TagPatch::new();
        patch.insert("updated".to_string(), serde_json::json!("not a number"));
        let err = service
            .update(created.id, created.token, patch)
            .unwrap_err();

        assert!(matches!(err, TagServiceError::Validation(_)));
        // Only the create left trail rows behind.
        assert_eq!(table_count(&conn, "tag_history"), 1);
        assert_eq!(table_count(&conn, "audit_log"), 1);
    }
}
