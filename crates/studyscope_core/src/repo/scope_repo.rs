//! Scope repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Fetch/save/soft-delete/restore scope rows with audit.
//! - Answer closure queries (all ancestors/descendants through any
//!   relation) with recursive CTEs over live relation rows.
//!
//! # Invariants
//! - Writes call `Scope::validate()` before SQL mutations.
//! - Closure queries read relation rows directly, so they can never lag
//!   behind relation edits made on the same connection.
//! - Closure results skip deleted scopes.

use super::audit_repo::record_audit;
use super::{bool_to_int, ensure_connection_ready, parse_flag, parse_uuid, RepoError, RepoResult};
use crate::model::audit::{AuditContext, AuditEntity};
use crate::model::scope::{Scope, ScopeId};
use crate::model::Timestamp;
use rusqlite::{params, Connection, Row};

const SCOPE_SELECT_SQL: &str = "SELECT
    scope_uuid,
    code,
    shortname,
    longname,
    scope_model_id,
    is_virtual,
    is_locked,
    is_deleted,
    start_date,
    stop_date,
    max_number,
    created_at,
    updated_at
FROM scopes";

/// Repository interface for scope persistence and closure queries.
pub trait ScopeRepository {
    /// Loads one scope by key, deleted scopes included.
    fn get_scope(&self, id: ScopeId) -> RepoResult<Option<Scope>>;
    /// Loads one scope by business code, deleted scopes included.
    fn get_scope_by_code(&self, code: &str) -> RepoResult<Option<Scope>>;
    /// Inserts or updates one scope.
    fn save_scope(&self, scope: &Scope, context: &AuditContext, rationale: &str)
        -> RepoResult<()>;
    /// Soft-deletes one scope.
    fn delete_scope(&self, id: ScopeId, context: &AuditContext, rationale: &str)
        -> RepoResult<()>;
    /// Clears the soft-delete flag of one scope.
    fn restore_scope(&self, id: ScopeId, context: &AuditContext, rationale: &str)
        -> RepoResult<()>;
    /// Counts non-deleted scopes of one model.
    fn count_by_model(&self, scope_model_id: &str) -> RepoResult<u64>;
    /// All non-deleted scopes reachable upward through any relation.
    fn closure_ancestor_ids(&self, id: ScopeId) -> RepoResult<Vec<ScopeId>>;
    /// All non-deleted scopes reachable downward through any relation.
    fn closure_descendant_ids(&self, id: ScopeId) -> RepoResult<Vec<ScopeId>>;
    /// Counts non-deleted descendants of `ancestor` of one model reachable
    /// through relations enabled at `at`.
    fn count_enabled_descendants_by_model(
        &self,
        scope_model_id: &str,
        ancestor: ScopeId,
        at: Timestamp,
    ) -> RepoResult<u64>;
}

/// SQLite-backed scope repository.
pub struct SqliteScopeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteScopeRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ScopeRepository for SqliteScopeRepository<'_> {
    fn get_scope(&self, id: ScopeId) -> RepoResult<Option<Scope>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SCOPE_SELECT_SQL} WHERE scope_uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_scope_row(row)?));
        }
        Ok(None)
    }

    fn get_scope_by_code(&self, code: &str) -> RepoResult<Option<Scope>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SCOPE_SELECT_SQL} WHERE code = ?1;"))?;
        let mut rows = stmt.query([code])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_scope_row(row)?));
        }
        Ok(None)
    }

    fn save_scope(
        &self,
        scope: &Scope,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()> {
        scope.validate()?;

        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM scopes WHERE scope_uuid = ?1);",
            [scope.uuid.to_string()],
            |row| row.get(0),
        )?;

        let action = if exists == 1 {
            self.conn.execute(
                "UPDATE scopes
                 SET
                    code = ?2,
                    shortname = ?3,
                    longname = ?4,
                    scope_model_id = ?5,
                    is_virtual = ?6,
                    is_locked = ?7,
                    is_deleted = ?8,
                    start_date = ?9,
                    stop_date = ?10,
                    max_number = ?11,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE scope_uuid = ?1;",
                params![
                    scope.uuid.to_string(),
                    scope.code.as_str(),
                    scope.shortname.as_str(),
                    scope.longname.as_deref(),
                    scope.scope_model_id.as_str(),
                    bool_to_int(scope.is_virtual),
                    bool_to_int(scope.is_locked),
                    bool_to_int(scope.is_deleted),
                    scope.start_date,
                    scope.stop_date,
                    scope.max_number,
                ],
            )?;
            "update"
        } else {
            self.conn.execute(
                "INSERT INTO scopes (
                    scope_uuid,
                    code,
                    shortname,
                    longname,
                    scope_model_id,
                    is_virtual,
                    is_locked,
                    is_deleted,
                    start_date,
                    stop_date,
                    max_number,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
                params![
                    scope.uuid.to_string(),
                    scope.code.as_str(),
                    scope.shortname.as_str(),
                    scope.longname.as_deref(),
                    scope.scope_model_id.as_str(),
                    bool_to_int(scope.is_virtual),
                    bool_to_int(scope.is_locked),
                    bool_to_int(scope.is_deleted),
                    scope.start_date,
                    scope.stop_date,
                    scope.max_number,
                    scope.created_at,
                    scope.updated_at,
                ],
            )?;
            "create"
        };

        record_audit(
            self.conn,
            AuditEntity::Scope,
            scope.uuid,
            action,
            context,
            rationale,
        )
    }

    fn delete_scope(
        &self,
        id: ScopeId,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()> {
        set_deleted_flag(self.conn, id, true)?;
        record_audit(self.conn, AuditEntity::Scope, id, "delete", context, rationale)
    }

    fn restore_scope(
        &self,
        id: ScopeId,
        context: &AuditContext,
        rationale: &str,
    ) -> RepoResult<()> {
        set_deleted_flag(self.conn, id, false)?;
        record_audit(self.conn, AuditEntity::Scope, id, "restore", context, rationale)
    }

    fn count_by_model(&self, scope_model_id: &str) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM scopes
             WHERE scope_model_id = ?1
               AND is_deleted = 0;",
            [scope_model_id],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }

    fn closure_ancestor_ids(&self, id: ScopeId) -> RepoResult<Vec<ScopeId>> {
        query_ids(
            self.conn,
            "WITH RECURSIVE ancestors(scope_uuid) AS (
                SELECT r.parent_uuid
                FROM scope_relations r
                WHERE r.scope_uuid = ?1
                UNION
                SELECT r.parent_uuid
                FROM scope_relations r
                INNER JOIN ancestors a ON r.scope_uuid = a.scope_uuid
            )
            SELECT s.scope_uuid
            FROM ancestors a
            INNER JOIN scopes s ON s.scope_uuid = a.scope_uuid
            WHERE s.is_deleted = 0
            ORDER BY s.scope_uuid ASC;",
            id,
        )
    }

    fn closure_descendant_ids(&self, id: ScopeId) -> RepoResult<Vec<ScopeId>> {
        query_ids(
            self.conn,
            "WITH RECURSIVE descendants(scope_uuid) AS (
                SELECT r.scope_uuid
                FROM scope_relations r
                WHERE r.parent_uuid = ?1
                UNION
                SELECT r.scope_uuid
                FROM scope_relations r
                INNER JOIN descendants d ON r.parent_uuid = d.scope_uuid
            )
            SELECT s.scope_uuid
            FROM descendants d
            INNER JOIN scopes s ON s.scope_uuid = d.scope_uuid
            WHERE s.is_deleted = 0
            ORDER BY s.scope_uuid ASC;",
            id,
        )
    }

    fn count_enabled_descendants_by_model(
        &self,
        scope_model_id: &str,
        ancestor: ScopeId,
        at: Timestamp,
    ) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "WITH RECURSIVE descendants(scope_uuid) AS (
                SELECT r.scope_uuid
                FROM scope_relations r
                INNER JOIN scopes p ON p.scope_uuid = r.parent_uuid
                INNER JOIN scopes c ON c.scope_uuid = r.scope_uuid
                WHERE r.parent_uuid = ?1
                  AND c.is_deleted = 0
                  AND (
                    p.is_virtual = 1
                    OR (r.start_date <= ?3 AND (r.end_date IS NULL OR r.end_date > ?3))
                  )
                UNION
                SELECT r.scope_uuid
                FROM scope_relations r
                INNER JOIN descendants d ON r.parent_uuid = d.scope_uuid
                INNER JOIN scopes p ON p.scope_uuid = r.parent_uuid
                INNER JOIN scopes c ON c.scope_uuid = r.scope_uuid
                WHERE c.is_deleted = 0
                  AND (
                    p.is_virtual = 1
                    OR (r.start_date <= ?3 AND (r.end_date IS NULL OR r.end_date > ?3))
                  )
            )
            SELECT COUNT(*)
            FROM descendants d
            INNER JOIN scopes s ON s.scope_uuid = d.scope_uuid
            WHERE s.scope_model_id = ?2;",
            params![ancestor.to_string(), scope_model_id, at],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }
}

fn set_deleted_flag(conn: &Connection, id: ScopeId, deleted: bool) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE scopes
         SET
            is_deleted = ?2,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE scope_uuid = ?1;",
        params![id.to_string(), bool_to_int(deleted)],
    )?;
    if changed == 0 {
        return Err(RepoError::ScopeNotFound(id));
    }
    Ok(())
}

fn query_ids(conn: &Connection, sql: &str, id: ScopeId) -> RepoResult<Vec<ScopeId>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "scopes.scope_uuid")?);
    }
    Ok(ids)
}

fn parse_scope_row(row: &Row<'_>) -> RepoResult<Scope> {
    let uuid_text: String = row.get("scope_uuid")?;
    let max_number = row
        .get::<_, Option<i64>>("max_number")?
        .map(|value| {
            u32::try_from(value).map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid max_number `{value}` in scopes.max_number"
                ))
            })
        })
        .transpose()?;

    let scope = Scope {
        uuid: parse_uuid(&uuid_text, "scopes.scope_uuid")?,
        code: row.get("code")?,
        shortname: row.get("shortname")?,
        longname: row.get("longname")?,
        scope_model_id: row.get("scope_model_id")?,
        is_virtual: parse_flag(row.get("is_virtual")?, "scopes.is_virtual")?,
        is_locked: parse_flag(row.get("is_locked")?, "scopes.is_locked")?,
        is_deleted: parse_flag(row.get("is_deleted")?, "scopes.is_deleted")?,
        start_date: row.get("start_date")?,
        stop_date: row.get("stop_date")?,
        max_number,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    scope.validate()?;
    Ok(scope)
}
