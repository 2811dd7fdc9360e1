//! Audit trail persistence.
//!
//! # Responsibility
//! - Append one row per scope/relation write.
//! - Read back the trail of one entity for inspection.
//!
//! # Invariants
//! - Audit rows are never updated or deleted, including for hard-deleted
//!   relations.
//! - Rows for one entity are returned in insertion order.

use super::{parse_uuid, RepoError, RepoResult};
use crate::model::audit::{AuditContext, AuditEntity, AuditEntry};
use rusqlite::{params, Connection};
use uuid::Uuid;

pub(crate) fn record_audit(
    conn: &Connection,
    entity: AuditEntity,
    entity_uuid: Uuid,
    action: &str,
    context: &AuditContext,
    rationale: &str,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO audit_trail (
            entity_kind,
            entity_uuid,
            action,
            actor,
            origin,
            rationale
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            entity_to_db(entity),
            entity_uuid.to_string(),
            action,
            context.actor.as_str(),
            context.origin.as_deref(),
            rationale,
        ],
    )?;
    Ok(())
}

/// Lists audit rows for one scope or relation, oldest first.
pub fn list_audit_entries(conn: &Connection, entity_uuid: Uuid) -> RepoResult<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT
            entity_kind,
            entity_uuid,
            action,
            actor,
            origin,
            rationale,
            recorded_at
         FROM audit_trail
         WHERE entity_uuid = ?1
         ORDER BY audit_id ASC;",
    )?;
    let mut rows = stmt.query([entity_uuid.to_string()])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get("entity_kind")?;
        let entity = parse_entity(&kind_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid entity kind `{kind_text}` in audit_trail.entity_kind"
            ))
        })?;
        let uuid_text: String = row.get("entity_uuid")?;
        entries.push(AuditEntry {
            entity,
            entity_uuid: parse_uuid(&uuid_text, "audit_trail.entity_uuid")?,
            action: row.get("action")?,
            actor: row.get("actor")?,
            origin: row.get("origin")?,
            rationale: row.get("rationale")?,
            recorded_at: row.get("recorded_at")?,
        });
    }
    Ok(entries)
}

fn entity_to_db(entity: AuditEntity) -> &'static str {
    match entity {
        AuditEntity::Scope => "scope",
        AuditEntity::Relation => "relation",
    }
}

fn parse_entity(value: &str) -> Option<AuditEntity> {
    match value {
        "scope" => Some(AuditEntity::Scope),
        "relation" => Some(AuditEntity::Relation),
        _ => None,
    }
}
