//! Scope relation repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist timed parent links with audit.
//! - List parent/child relations of one scope in deterministic order.
//! - Expose the transaction boundary used by composite relation writes.
//!
//! # Invariants
//! - Relation listings are ordered `start_date ASC, relation_uuid ASC`.
//! - Listings include relations to deleted scopes; callers filter.
//! - Hard deletes still leave an audit row behind.

use super::audit_repo::record_audit;
use super::{bool_to_int, ensure_connection_ready, parse_flag, parse_uuid, RepoError, RepoResult};
use crate::db::{run_atomic, DbError};
use crate::model::audit::{AuditContext, AuditEntity};
use crate::model::relation::{RelationId, ScopeRelation};
use crate::model::scope::ScopeId;
use crate::model::Timestamp;
use rusqlite::{params, Connection, Row};

const RELATION_SELECT_SQL: &str = "SELECT
    r.relation_uuid AS relation_uuid,
    r.scope_uuid AS scope_uuid,
    r.parent_uuid AS parent_uuid,
    r.start_date AS start_date,
    r.end_date AS end_date,
    r.is_default AS is_default
FROM scope_relations r";

/// Repository interface for scope relation persistence.
pub trait RelationRepository {
    fn get_relation(&self, id: RelationId) -> RepoResult<Option<ScopeRelation>>;
    /// Loads the relation between `child` and `parent` enabled at `at`.
    fn get_active_relation(
        &self,
        child: ScopeId,
        parent: ScopeId,
        at: Timestamp,
    ) -> RepoResult<Option<ScopeRelation>>;
    /// Inserts or updates one relation.
    fn save_relation(
        &self,
        relation: &ScopeRelation,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()>;
    /// Removes one relation row permanently.
    fn delete_relation(
        &self,
        relation: &ScopeRelation,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()>;
    /// All relations where `child` is the child side.
    fn parent_relations(&self, child: ScopeId) -> RepoResult<Vec<ScopeRelation>>;
    /// All relations where `parent` is the parent side.
    fn child_relations(&self, parent: ScopeId) -> RepoResult<Vec<ScopeRelation>>;
    /// Runs `op` so that every write it performs commits or rolls back
    /// together. Nested calls join the enclosing unit.
    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce() -> Result<T, E>;
}

/// SQLite-backed relation repository.
pub struct SqliteRelationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRelationRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl RelationRepository for SqliteRelationRepository<'_> {
    fn get_relation(&self, id: RelationId) -> RepoResult<Option<ScopeRelation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RELATION_SELECT_SQL} WHERE r.relation_uuid = ?1;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_relation_row(row)?));
        }
        Ok(None)
    }

    fn get_active_relation(
        &self,
        child: ScopeId,
        parent: ScopeId,
        at: Timestamp,
    ) -> RepoResult<Option<ScopeRelation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RELATION_SELECT_SQL}
             INNER JOIN scopes p ON p.scope_uuid = r.parent_uuid
             WHERE r.scope_uuid = ?1
               AND r.parent_uuid = ?2
               AND (
                 p.is_virtual = 1
                 OR (r.start_date <= ?3 AND (r.end_date IS NULL OR r.end_date > ?3))
               )
             ORDER BY r.start_date DESC, r.relation_uuid ASC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query(params![child.to_string(), parent.to_string(), at])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_relation_row(row)?));
        }
        Ok(None)
    }

    fn save_relation(
        &self,
        relation: &ScopeRelation,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE scope_relations
             SET
                scope_uuid = ?2,
                parent_uuid = ?3,
                start_date = ?4,
                end_date = ?5,
                is_default = ?6,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE relation_uuid = ?1;",
            params![
                relation.uuid.to_string(),
                relation.scope_uuid.to_string(),
                relation.parent_uuid.to_string(),
                relation.start_date,
                relation.end_date,
                bool_to_int(relation.is_default),
            ],
        )?;

        let action = if changed == 0 {
            self.conn.execute(
                "INSERT INTO scope_relations (
                    relation_uuid,
                    scope_uuid,
                    parent_uuid,
                    start_date,
                    end_date,
                    is_default
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    relation.uuid.to_string(),
                    relation.scope_uuid.to_string(),
                    relation.parent_uuid.to_string(),
                    relation.start_date,
                    relation.end_date,
                    bool_to_int(relation.is_default),
                ],
            )?;
            "create"
        } else {
            "update"
        };

        record_audit(
            self.conn,
            AuditEntity::Relation,
            relation.uuid,
            action,
            context,
            rationale,
        )
    }

    fn delete_relation(
        &self,
        relation: &ScopeRelation,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM scope_relations WHERE relation_uuid = ?1;",
            [relation.uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::RelationNotFound(relation.uuid));
        }
        record_audit(
            self.conn,
            AuditEntity::Relation,
            relation.uuid,
            "hard_delete",
            context,
            rationale,
        )
    }

    fn parent_relations(&self, child: ScopeId) -> RepoResult<Vec<ScopeRelation>> {
        list_relations(
            self.conn,
            &format!(
                "{RELATION_SELECT_SQL}
                 WHERE r.scope_uuid = ?1
                 ORDER BY r.start_date ASC, r.relation_uuid ASC;"
            ),
            child,
        )
    }

    fn child_relations(&self, parent: ScopeId) -> RepoResult<Vec<ScopeRelation>> {
        list_relations(
            self.conn,
            &format!(
                "{RELATION_SELECT_SQL}
                 WHERE r.parent_uuid = ?1
                 ORDER BY r.start_date ASC, r.relation_uuid ASC;"
            ),
            parent,
        )
    }

    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce() -> Result<T, E>,
    {
        run_atomic(self.conn, op)
    }
}

fn list_relations(conn: &Connection, sql: &str, id: ScopeId) -> RepoResult<Vec<ScopeRelation>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut relations = Vec::new();
    while let Some(row) = rows.next()? {
        relations.push(parse_relation_row(row)?);
    }
    Ok(relations)
}

fn parse_relation_row(row: &Row<'_>) -> RepoResult<ScopeRelation> {
    let uuid_text: String = row.get("relation_uuid")?;
    let scope_text: String = row.get("scope_uuid")?;
    let parent_text: String = row.get("parent_uuid")?;
    let start_date: Timestamp = row.get("start_date")?;
    let end_date: Option<Timestamp> = row.get("end_date")?;

    if end_date.is_some_and(|end| end < start_date) {
        return Err(RepoError::InvalidData(format!(
            "relation {uuid_text} ends before it starts"
        )));
    }

    Ok(ScopeRelation {
        uuid: parse_uuid(&uuid_text, "scope_relations.relation_uuid")?,
        scope_uuid: parse_uuid(&scope_text, "scope_relations.scope_uuid")?,
        parent_uuid: parse_uuid(&parent_text, "scope_relations.parent_uuid")?,
        start_date,
        end_date,
        is_default: parse_flag(row.get("is_default")?, "scope_relations.is_default")?,
    })
}
