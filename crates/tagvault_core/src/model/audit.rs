//! Audit vocabulary for tag mutations.
//!
//! # Responsibility
//! - Describe who did what to which document at which version.
//! - Split the record into an intent (built inside a mutation) and the
//!   stamped entry (completed by the recording pipeline).
//!
//! # Invariants
//! - Whole-document mutations carry no subcomponent.
//! - Reference mutations are `Update` at the top level with the concrete
//!   action under the `references` subcomponent.

use crate::model::tag::{TagId, VersionToken};
use serde::{Deserialize, Serialize};

/// Component label on every entry this core produces.
pub const TAG_COMPONENT: &str = "tag";

/// Subcomponent label for mutations of the `references` list.
pub const REFERENCES_SUBCOMPONENT: &str = "references";

/// Kind of mutation an audit entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

/// Audit fields a mutation prepares before the trail is written.
///
/// The intent deliberately omits the acting identity; the recording pipeline
/// stamps it in one place so no mutation can forget it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditIntent {
    pub action: AuditAction,
    pub component: &'static str,
    pub subcomponent: Option<&'static str>,
    pub subcomponent_action: Option<AuditAction>,
    pub message: String,
    pub tag_id: TagId,
    pub version: VersionToken,
}

impl AuditIntent {
    /// Intent for a whole-document mutation.
    pub fn for_tag(
        action: AuditAction,
        tag_id: TagId,
        version: VersionToken,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action,
            component: TAG_COMPONENT,
            subcomponent: None,
            subcomponent_action: None,
            message: message.into(),
            tag_id,
            version,
        }
    }

    /// Intent for a mutation of the `references` list.
    pub fn for_references(
        subcomponent_action: AuditAction,
        tag_id: TagId,
        version: VersionToken,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action: AuditAction::Update,
            component: TAG_COMPONENT,
            subcomponent: Some(REFERENCES_SUBCOMPONENT),
            subcomponent_action: Some(subcomponent_action),
            message: message.into(),
            tag_id,
            version,
        }
    }

    /// Completes the intent with the acting identity.
    pub fn stamped(self, user: impl Into<String>) -> AuditEntry {
        AuditEntry {
            action: self.action,
            component: self.component,
            subcomponent: self.subcomponent,
            subcomponent_action: self.subcomponent_action,
            message: self.message,
            tag_id: self.tag_id,
            version: self.version,
            user: user.into(),
        }
    }
}

/// Immutable record of one successful mutation, ready for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub component: &'static str,
    pub subcomponent: Option<&'static str>,
    pub subcomponent_action: Option<AuditAction>,
    pub message: String,
    pub tag_id: TagId,
    pub version: VersionToken,
    pub user: String,
}
