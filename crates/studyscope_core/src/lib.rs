//! Temporal scope hierarchy core.
//! This crate is the single source of truth for relation invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, ScopeModel, ScopeModelCatalog};
pub use db::{open_db, open_db_in_memory, run_atomic, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::audit::AuditContext;
pub use model::relation::{RelationId, ScopeRelation};
pub use model::scope::{Scope, ScopeId};
pub use model::Timestamp;
pub use repo::relation_repo::{RelationRepository, SqliteRelationRepository};
pub use repo::scope_repo::{ScopeRepository, SqliteScopeRepository};
pub use repo::{RepoError, RepoResult};
pub use service::{
    ErrorKind, HierarchyError, HierarchyResult, RelationEnding, ScopeRelationService, ScopeService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
