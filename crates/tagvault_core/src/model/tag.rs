//! Canonical tag document shape and meta stamping rules.
//!
//! # Responsibility
//! - Define the `Tag` body persisted by the document store, with typed meta
//!   fields plus an open field map for everything else.
//! - Provide the meta stamping helpers every mutation path goes through.
//!
//! # Invariants
//! - The document id is the store key, never a body field.
//! - `created` is written once; `updated` moves on whole-document mutations.
//! - Re-stamping meta always clears `state` back to null.
//! - Reserved meta keys never survive inside the open field maps.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable identifier for a tag document.
pub type TagId = Uuid;

/// Caller payload for a shallow-merge update: top-level keys overwrite,
/// nested structures are replaced wholesale.
pub type TagPatch = Map<String, Value>;

/// Top-level keys owned by the document meta. They are stripped from caller
/// field maps so the typed fields stay authoritative.
const RESERVED_FIELDS: &[&str] = &[
    "name",
    "author",
    "editor",
    "created",
    "updated",
    "deleted",
    "state",
    "references",
];

/// Current UTC time in epoch milliseconds.
pub fn utc_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

/// Optimistic-concurrency token bound to exactly one stored document state.
///
/// Callers obtain tokens from reads and writes and pass them back verbatim;
/// a conditional write succeeds only while the stored token is unchanged.
/// The two halves mirror the term/sequence pair used by versioned document
/// stores and carry no meaning beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionToken {
    term: i64,
    seq: i64,
}

impl VersionToken {
    /// Builds a token from its raw halves. Intended for store implementations.
    pub fn new(term: i64, seq: i64) -> Self {
        Self { term, seq }
    }

    pub fn term(&self) -> i64 {
        self.term
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }
}

impl Display for VersionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.term, self.seq)
    }
}

/// One entry of a tag's `references` list.
///
/// Only `id` is schematized; every other field is carried verbatim.
/// Id uniqueness within a tag is a caller convention, not a schema rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reference {
    /// Reference with no extra fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: Map::new(),
        }
    }

    /// Top-level field names carried by this reference, `id` first and the
    /// rest in stored (sorted) order. Used for audit messages.
    pub fn field_names(&self) -> Vec<String> {
        let mut names = vec!["id".to_string()];
        names.extend(self.extra.keys().cloned());
        names
    }
}

/// Canonical tag document body.
///
/// Serializes to the exact JSON object held by the store: typed meta fields
/// at the top level, the open `extra` map flattened beside them. `state` is
/// always present (null when cleared); `deleted` and `references` are
/// omitted entirely while unset so field-absence filters keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    /// Identity that created the document. Written once.
    pub author: String,
    /// Identity of the latest whole-document mutation.
    pub editor: String,
    /// Creation instant, epoch milliseconds.
    pub created: i64,
    /// Latest whole-document mutation instant, epoch milliseconds.
    pub updated: i64,
    /// Soft-delete marker; equals the `updated` stamp of the delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<i64>,
    /// Free-form working state; cleared on every meta re-stamp.
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Reference>>,
    /// Open fields outside the meta schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tag {
    /// Builds the initial body for a new document.
    ///
    /// The actor becomes both author and editor, `created` equals `updated`,
    /// and reserved meta keys in the draft's field map are dropped.
    pub fn from_draft(draft: TagDraft, author: impl Into<String>, now_ms: i64) -> Self {
        let author = author.into();
        let mut extra = draft.fields;
        for key in RESERVED_FIELDS {
            extra.remove(*key);
        }
        Self {
            name: draft.name,
            editor: author.clone(),
            author,
            created: now_ms,
            updated: now_ms,
            deleted: None,
            state: None,
            references: draft.references,
            extra,
        }
    }

    /// Re-stamps the mutation meta: `updated` and `editor` move, `state`
    /// resets to null. `created`, `author` and `deleted` are untouched.
    pub fn touch(&mut self, editor: impl Into<String>, now_ms: i64) {
        self.updated = now_ms;
        self.editor = editor.into();
        self.state = None;
    }

    /// Whether the document is live (not soft-deleted).
    pub fn is_live(&self) -> bool {
        self.deleted.is_none()
    }

    /// Shallow-merges `patch` over this document's serialized form.
    ///
    /// Each top-level patch key overwrites the stored value outright; nested
    /// objects and arrays are replaced, never deep-merged. The merged object
    /// must still deserialize as a valid document, so a patch cannot null
    /// out required meta fields.
    pub fn merged(&self, patch: &TagPatch) -> Result<Tag, serde_json::Error> {
        let mut object = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => return Err(serde_json::Error::custom("tag body must be a JSON object")),
        };
        for (key, value) in patch {
            object.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(object))
    }
}

/// Caller payload for creating a tag.
///
/// Only `name` is required. References seed the initial list; `fields`
/// become the open part of the body after reserved keys are stripped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagDraft {
    pub name: String,
    #[serde(default)]
    pub references: Option<Vec<Reference>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TagDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: None,
            fields: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft_with_fields() -> TagDraft {
        let mut draft = TagDraft::named("release");
        draft.fields.insert("color".to_string(), json!("teal"));
        draft
            .fields
            .insert("priority".to_string(), json!({"level": 2}));
        draft
    }

    #[test]
    fn from_draft_stamps_meta_and_strips_reserved_keys() {
        let mut draft = draft_with_fields();
        draft.fields.insert("author".to_string(), json!("intruder"));
        draft.fields.insert("created".to_string(), json!(0));

        let tag = Tag::from_draft(draft, "alice", 1_700_000_000_000);

        assert_eq!(tag.name, "release");
        assert_eq!(tag.author, "alice");
        assert_eq!(tag.editor, "alice");
        assert_eq!(tag.created, tag.updated);
        assert!(tag.deleted.is_none());
        assert!(tag.state.is_none());
        assert_eq!(tag.extra.get("color"), Some(&json!("teal")));
        assert!(!tag.extra.contains_key("author"));
        assert!(!tag.extra.contains_key("created"));
    }

    #[test]
    fn touch_moves_updated_and_clears_state() {
        let mut tag = Tag::from_draft(draft_with_fields(), "alice", 100);
        tag.state = Some(json!({"stage": "review"}));

        tag.touch("bob", 250);

        assert_eq!(tag.updated, 250);
        assert_eq!(tag.created, 100);
        assert_eq!(tag.editor, "bob");
        assert_eq!(tag.author, "alice");
        assert!(tag.state.is_none());
    }

    #[test]
    fn serialized_body_keeps_state_null_and_omits_unset_optionals() {
        let tag = Tag::from_draft(TagDraft::named("ops"), "alice", 42);
        let body = serde_json::to_value(&tag).unwrap();

        let object = body.as_object().unwrap();
        assert_eq!(object.get("state"), Some(&Value::Null));
        assert!(!object.contains_key("deleted"));
        assert!(!object.contains_key("references"));
    }

    #[test]
    fn merged_overwrites_top_level_and_replaces_nested_wholesale() {
        let mut draft = draft_with_fields();
        draft.references = Some(vec![Reference::new("r-1")]);
        let tag = Tag::from_draft(draft, "alice", 7);

        let mut patch = TagPatch::new();
        patch.insert("color".to_string(), json!("plum"));
        patch.insert("priority".to_string(), json!({"owner": "bob"}));

        let merged = tag.merged(&patch).unwrap();

        assert_eq!(merged.extra.get("color"), Some(&json!("plum")));
        // The nested object is replaced, so `level` is gone.
        assert_eq!(merged.extra.get("priority"), Some(&json!({"owner": "bob"})));
        assert_eq!(merged.references.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn merged_rejects_patch_that_breaks_the_schema() {
        let tag = Tag::from_draft(TagDraft::named("ops"), "alice", 7);

        let mut patch = TagPatch::new();
        patch.insert("created".to_string(), json!("yesterday"));

        assert!(tag.merged(&patch).is_err());
    }

    #[test]
    fn reference_field_names_lead_with_id() {
        let mut reference = Reference::new("r-9");
        reference.extra.insert("url".to_string(), json!("https://example.test"));
        reference.extra.insert("kind".to_string(), json!("doc"));

        assert_eq!(reference.field_names(), vec!["id", "kind", "url"]);
    }

    #[test]
    fn version_token_displays_both_halves() {
        assert_eq!(VersionToken::new(3, 17).to_string(), "3:17");
    }
}
