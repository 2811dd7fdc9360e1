//! Audit context attached to every persisted write.

use super::Timestamp;
use serde::{Deserialize, Serialize};

/// Who performed a write and from where.
///
/// Opaque to hierarchy logic; repositories record it next to the rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub actor: String,
    pub origin: Option<String>,
}

impl AuditContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            origin: None,
        }
    }

    /// Context for writes triggered by the system itself.
    pub fn system() -> Self {
        Self::new("system")
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Audited entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Scope,
    Relation,
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity: AuditEntity,
    pub entity_uuid: uuid::Uuid,
    /// `create|update|delete|restore|hard_delete`.
    pub action: String,
    pub actor: String,
    pub origin: Option<String>,
    pub rationale: String,
    pub recorded_at: Timestamp,
}
