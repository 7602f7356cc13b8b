use rusqlite::Connection;
use serde_json::json;
use tagvault_core::db::open_db_in_memory;
use tagvault_core::{
    Actor, AuditAction, Reference, SqliteAuditStore, SqliteHistoryStore, SqliteTagStore, TagDraft,
    TagPatch, TagService, TagServiceError,
};

type SqliteTagService<'conn> =
    TagService<SqliteTagStore<'conn>, SqliteHistoryStore<'conn>, SqliteAuditStore<'conn>>;

fn service_on(conn: &Connection) -> SqliteTagService<'_> {
    TagService::new(
        Actor::new("alice"),
        SqliteTagStore::try_new(conn).unwrap(),
        SqliteHistoryStore::try_new(conn).unwrap(),
        SqliteAuditStore::try_new(conn).unwrap(),
    )
}

#[test]
fn every_successful_mutation_appends_one_snapshot_and_one_entry() {
    let conn = open_db_in_memory().unwrap();
    let service = service_on(&conn);

    let created = service.create(TagDraft::named("trail")).unwrap();
    let mut patch = TagPatch::new();
    patch.insert("color".to_string(), json!("teal"));
    let updated = service.update(created.id, created.token, patch).unwrap();
    let with_ref = service
        .create_reference(created.id, updated.token, Reference::new("r-1"))
        .unwrap();
    let without_ref = service
        .delete_reference(created.id, with_ref.token, "r-1")
        .unwrap();
    let deleted = service.delete(created.id, without_ref.token).unwrap();

    let history = SqliteHistoryStore::try_new(&conn).unwrap();
    let snapshots = history.snapshots_for(created.id).unwrap();
    let audit = SqliteAuditStore::try_new(&conn).unwrap();
    let entries = audit.entries_for(created.id).unwrap();

    assert_eq!(snapshots.len(), 5);
    assert_eq!(entries.len(), 5);

    // Snapshot and entry of each mutation carry the token that write produced.
    let tokens = [
        created.token,
        updated.token,
        with_ref.token,
        without_ref.token,
        deleted.token,
    ];
    for (idx, token) in tokens.iter().enumerate() {
        assert_eq!(snapshots[idx].version, *token);
        assert_eq!(entries[idx].version, *token);
        assert_eq!(token.seq(), created.token.seq() + idx as i64);
    }
}

#[test]
fn history_snapshots_are_full_post_mutation_documents() {
    let conn = open_db_in_memory().unwrap();
    let service = service_on(&conn);

    let created = service.create(TagDraft::named("snapshots")).unwrap();
    let mut patch = TagPatch::new();
    patch.insert("color".to_string(), json!("plum"));
    let updated = service.update(created.id, created.token, patch).unwrap();
    let deleted = service.delete(created.id, updated.token).unwrap();

    let history = SqliteHistoryStore::try_new(&conn).unwrap();
    let snapshots = history.snapshots_for(created.id).unwrap();

    assert_eq!(snapshots[0].body, created.tag);
    assert_eq!(snapshots[1].body, updated.tag);
    assert_eq!(snapshots[1].body.extra.get("color"), Some(&json!("plum")));
    assert_eq!(snapshots[2].body, deleted.tag);
    assert!(snapshots[2].body.deleted.is_some());
    assert!(snapshots.iter().all(|snapshot| snapshot.recorded_at > 0));
}

#[test]
fn audit_entries_describe_each_mutation() {
    let conn = open_db_in_memory().unwrap();
    let service = service_on(&conn);

    let created = service.create(TagDraft::named("described")).unwrap();
    let mut patch = TagPatch::new();
    patch.insert("color".to_string(), json!("teal"));
    patch.insert("owner".to_string(), json!("ops"));
    let updated = service.update(created.id, created.token, patch).unwrap();
    let with_ref = service
        .create_reference(created.id, updated.token, Reference::new("r-1"))
        .unwrap();
    let without_ref = service
        .delete_reference(created.id, with_ref.token, "r-1")
        .unwrap();
    service.delete(created.id, without_ref.token).unwrap();

    let audit = SqliteAuditStore::try_new(&conn).unwrap();
    let entries = audit.entries_for(created.id).unwrap();
    assert_eq!(entries.len(), 5);

    assert_eq!(entries[0].action, AuditAction::Create);
    assert!(entries[0].subcomponent.is_none());
    assert_eq!(entries[0].message, "Creating new Tag [described]");

    assert_eq!(entries[1].action, AuditAction::Update);
    assert_eq!(
        entries[1].message,
        format!("Tag [{}] had [\"color\", \"owner\"] modified by [alice]", created.id)
    );

    // Reference mutations are updates with the concrete action nested.
    assert_eq!(entries[2].action, AuditAction::Update);
    assert_eq!(entries[2].subcomponent.as_deref(), Some("references"));
    assert_eq!(entries[2].subcomponent_action, Some(AuditAction::Create));
    assert_eq!(
        entries[2].message,
        format!("Tag [{}] had [\"id\"] modified by [alice]", created.id)
    );

    assert_eq!(entries[3].action, AuditAction::Update);
    assert_eq!(entries[3].subcomponent.as_deref(), Some("references"));
    assert_eq!(entries[3].subcomponent_action, Some(AuditAction::Delete));
    assert_eq!(
        entries[3].message,
        format!("Tag [{}] had reference r-1 deleted", created.id)
    );

    assert_eq!(entries[4].action, AuditAction::Delete);
    assert_eq!(entries[4].message, "Tag [described] deleted");

    for entry in &entries {
        assert_eq!(entry.component, "tag");
        assert_eq!(entry.user, "alice");
        assert_eq!(entry.tag_id, created.id);
        assert!(entry.recorded_at > 0);
    }
}

#[test]
fn audit_user_is_the_acting_service_identity() {
    let conn = open_db_in_memory().unwrap();
    let alice = service_on(&conn);
    let bob = TagService::new(
        Actor::new("bob"),
        SqliteTagStore::try_new(&conn).unwrap(),
        SqliteHistoryStore::try_new(&conn).unwrap(),
        SqliteAuditStore::try_new(&conn).unwrap(),
    );

    let created = alice.create(TagDraft::named("shared")).unwrap();
    let mut patch = TagPatch::new();
    patch.insert("color".to_string(), json!("plum"));
    bob.update(created.id, created.token, patch).unwrap();

    let audit = SqliteAuditStore::try_new(&conn).unwrap();
    let entries = audit.entries_for(created.id).unwrap();
    assert_eq!(entries[0].user, "alice");
    assert_eq!(entries[1].user, "bob");
    assert!(entries[1].message.ends_with("modified by [bob]"));
}

#[test]
fn failed_mutations_leave_both_trails_untouched() {
    let conn = open_db_in_memory().unwrap();
    let service = service_on(&conn);

    let created = service.create(TagDraft::named("stable-trail")).unwrap();
    let mut patch = TagPatch::new();
    patch.insert("color".to_string(), json!("plum"));
    service
        .update(created.id, created.token, patch.clone())
        .unwrap();

    // Replay with the stale token; the conflict must not add trail rows.
    let err = service.update(created.id, created.token, patch).unwrap_err();
    assert!(matches!(err, TagServiceError::Conflict { .. }));

    let history = SqliteHistoryStore::try_new(&conn).unwrap();
    assert_eq!(history.snapshots_for(created.id).unwrap().len(), 2);
    let audit = SqliteAuditStore::try_new(&conn).unwrap();
    assert_eq!(audit.entries_for(created.id).unwrap().len(), 2);
}
