//! Errors raised by hierarchy services.
//!
//! Every variant maps onto one [`ErrorKind`] so callers can branch on the
//! failure family without matching individual variants.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::relation::RelationId;
use crate::model::scope::ScopeId;
use crate::model::Timestamp;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Failure family of a [`HierarchyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Endpoint deleted/locked, invalid dates, closed enrollment window.
    InvalidState,
    /// Duplicate/overlapping relation or a default/virtuality rule breach.
    RelationConflict,
    /// Scope-model incompatibility or a configured ceiling.
    ConfigurationViolation,
    /// Missing scope, relation or default parent.
    NotFound,
    /// Distance requested between disconnected scopes.
    NotRelated,
    /// Persistence failure.
    Storage,
}

#[derive(Debug)]
pub enum HierarchyError {
    ScopeDeleted(ScopeId),
    ScopeLocked(ScopeId),
    EndBeforeStart {
        relation: RelationId,
        start_date: Timestamp,
        end_date: Timestamp,
    },
    DefaultStartsInFuture(RelationId),
    /// Transfer would open a default relation after now.
    TransferInFuture {
        scope: ScopeId,
        transfer_date: Timestamp,
    },
    /// Parent is outside its enrollment window.
    ParentClosed(ScopeId),
    CodeAlreadyUsed(String),

    AlreadyChild {
        scope: ScopeId,
        parent: ScopeId,
    },
    WindowOverlap {
        scope: ScopeId,
        parent: ScopeId,
        start_date: Timestamp,
    },
    /// Ending the current default lineage directly.
    DefaultRelationEnd(RelationId),
    VirtualRelationDefault(RelationId),
    RelationAlreadyEnded {
        relation: RelationId,
        end_date: Timestamp,
    },

    IncompatibleModels {
        child_model: String,
        parent_model: String,
    },
    UnknownScopeModel(String),
    /// Scope of a non-root model created without a parent.
    ParentRequired(String),
    MaxScopesReached {
        model: String,
        max_number: u32,
    },
    MaxDescendantsReached {
        model: String,
        ancestor: ScopeId,
        max_number: u32,
    },
    /// Non-virtual model under a virtual parent.
    VirtualChain {
        model: String,
        parent: ScopeId,
    },

    ScopeNotFound(ScopeId),
    RelationNotFound(RelationId),
    DefaultParentMissing(ScopeId),

    NotRelated {
        scope: ScopeId,
        other: ScopeId,
    },

    Repo(RepoError),
}

impl HierarchyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ScopeDeleted(_)
            | Self::ScopeLocked(_)
            | Self::EndBeforeStart { .. }
            | Self::DefaultStartsInFuture(_)
            | Self::TransferInFuture { .. }
            | Self::ParentClosed(_)
            | Self::CodeAlreadyUsed(_) => ErrorKind::InvalidState,
            Self::AlreadyChild { .. }
            | Self::WindowOverlap { .. }
            | Self::DefaultRelationEnd(_)
            | Self::VirtualRelationDefault(_)
            | Self::RelationAlreadyEnded { .. } => ErrorKind::RelationConflict,
            Self::IncompatibleModels { .. }
            | Self::UnknownScopeModel(_)
            | Self::ParentRequired(_)
            | Self::MaxScopesReached { .. }
            | Self::MaxDescendantsReached { .. }
            | Self::VirtualChain { .. } => ErrorKind::ConfigurationViolation,
            Self::ScopeNotFound(_) | Self::RelationNotFound(_) | Self::DefaultParentMissing(_) => {
                ErrorKind::NotFound
            }
            Self::NotRelated { .. } => ErrorKind::NotRelated,
            Self::Repo(_) => ErrorKind::Storage,
        }
    }

    /// Stable snake_case code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ScopeDeleted(_) => "scope_deleted",
            Self::ScopeLocked(_) => "scope_locked",
            Self::EndBeforeStart { .. } => "end_before_start",
            Self::DefaultStartsInFuture(_) => "default_starts_in_future",
            Self::TransferInFuture { .. } => "transfer_in_future",
            Self::ParentClosed(_) => "parent_closed",
            Self::CodeAlreadyUsed(_) => "code_already_used",
            Self::AlreadyChild { .. } => "already_child",
            Self::WindowOverlap { .. } => "window_overlap",
            Self::DefaultRelationEnd(_) => "default_relation_end",
            Self::VirtualRelationDefault(_) => "virtual_relation_default",
            Self::RelationAlreadyEnded { .. } => "relation_already_ended",
            Self::IncompatibleModels { .. } => "incompatible_models",
            Self::UnknownScopeModel(_) => "unknown_scope_model",
            Self::ParentRequired(_) => "parent_required",
            Self::MaxScopesReached { .. } => "max_scopes_reached",
            Self::MaxDescendantsReached { .. } => "max_descendants_reached",
            Self::VirtualChain { .. } => "virtual_chain",
            Self::ScopeNotFound(_) => "scope_not_found",
            Self::RelationNotFound(_) => "relation_not_found",
            Self::DefaultParentMissing(_) => "default_parent_missing",
            Self::NotRelated { .. } => "not_related",
            Self::Repo(_) => "storage",
        }
    }
}

impl Display for HierarchyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScopeDeleted(id) => write!(f, "scope {id} is deleted"),
            Self::ScopeLocked(id) => write!(f, "scope {id} is locked"),
            Self::EndBeforeStart {
                relation,
                start_date,
                end_date,
            } => write!(
                f,
                "end date {end_date} of relation {relation} is before its start date {start_date}"
            ),
            Self::DefaultStartsInFuture(id) => {
                write!(f, "relation {id} starts in the future and cannot be default")
            }
            Self::TransferInFuture {
                scope,
                transfer_date,
            } => write!(
                f,
                "transfer of scope {scope} at {transfer_date} would start a default relation in the future"
            ),
            Self::ParentClosed(id) => write!(f, "scope {id} is outside its enrollment window"),
            Self::CodeAlreadyUsed(code) => write!(f, "scope code `{code}` is already used"),
            Self::AlreadyChild { scope, parent } => {
                write!(f, "scope {scope} is already a child of scope {parent}")
            }
            Self::WindowOverlap {
                scope,
                parent,
                start_date,
            } => write!(
                f,
                "scope {scope} already has a relation with {parent} overlapping {start_date}"
            ),
            Self::DefaultRelationEnd(id) => {
                write!(f, "relation {id} is the default relation and cannot be ended")
            }
            Self::VirtualRelationDefault(id) => {
                write!(f, "virtual relation {id} cannot be made default")
            }
            Self::RelationAlreadyEnded { relation, end_date } => {
                write!(f, "relation {relation} has already ended at {end_date}")
            }
            Self::IncompatibleModels {
                child_model,
                parent_model,
            } => write!(
                f,
                "scope model `{child_model}` is not a child of scope model `{parent_model}`"
            ),
            Self::UnknownScopeModel(id) => write!(f, "unknown scope model `{id}`"),
            Self::ParentRequired(id) => {
                write!(f, "scopes of model `{id}` must be created under a parent")
            }
            Self::MaxScopesReached { model, max_number } => write!(
                f,
                "maximum number of `{model}` scopes ({max_number}) reached"
            ),
            Self::MaxDescendantsReached {
                model,
                ancestor,
                max_number,
            } => write!(
                f,
                "maximum number of `{model}` scopes ({max_number}) reached under scope {ancestor}"
            ),
            Self::VirtualChain { model, parent } => write!(
                f,
                "non-virtual scope model `{model}` cannot be created under virtual scope {parent}"
            ),
            Self::ScopeNotFound(id) => write!(f, "scope not found: {id}"),
            Self::RelationNotFound(id) => write!(f, "scope relation not found: {id}"),
            Self::DefaultParentMissing(id) => write!(f, "no default parent found for scope {id}"),
            Self::NotRelated { scope, other } => {
                write!(f, "scope {scope} is not related to scope {other}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for HierarchyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for HierarchyError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ScopeNotFound(id) => Self::ScopeNotFound(id),
            RepoError::RelationNotFound(id) => Self::RelationNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<DbError> for HierarchyError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<ConfigError> for HierarchyError {
    fn from(value: ConfigError) -> Self {
        match value {
            ConfigError::UnknownModel(id) => Self::UnknownScopeModel(id),
            other => Self::Repo(RepoError::InvalidData(other.to_string())),
        }
    }
}
