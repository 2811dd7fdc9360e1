//! Scope domain model.
//!
//! # Responsibility
//! - Define the node record of the study hierarchy.
//! - Provide lifecycle helpers for lock/delete/enrollment-window state.
//!
//! # Invariants
//! - `uuid` is stable and never reused for another scope.
//! - `code` is unique across all scopes, deleted ones included.
//! - `stop_date` should not be earlier than `start_date` when both are set.

use super::Timestamp;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a scope.
pub type ScopeId = Uuid;

/// One node of the study hierarchy (study, country, center, patient, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Surrogate key.
    pub uuid: ScopeId,
    /// Business code, unique across the study.
    pub code: String,
    pub shortname: String,
    pub longname: Option<String>,
    /// Id of the configured scope model this scope instantiates.
    pub scope_model_id: String,
    /// Computed grouping rather than a physically enrolled entity.
    pub is_virtual: bool,
    pub is_locked: bool,
    pub is_deleted: bool,
    /// Start of the enrollment window.
    pub start_date: Option<Timestamp>,
    /// End of the enrollment window.
    pub stop_date: Option<Timestamp>,
    /// Ceiling on enabled leaf descendants below this scope.
    pub max_number: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Scope {
    /// Creates an unlocked, non-deleted scope with a generated id.
    ///
    /// The enrollment window opens at `created_at` and has no stop date.
    pub fn new(
        code: impl Into<String>,
        scope_model_id: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        let code = code.into();
        Self {
            uuid: Uuid::new_v4(),
            shortname: code.clone(),
            code,
            longname: None,
            scope_model_id: scope_model_id.into(),
            is_virtual: false,
            is_locked: false,
            is_deleted: false,
            start_date: Some(created_at),
            stop_date: None,
            max_number: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Returns whether `now` lies outside the enrollment window.
    ///
    /// A scope without a start date is never open for enrollment.
    pub fn is_closed(&self, now: Timestamp) -> bool {
        match self.start_date {
            None => true,
            Some(start) if start > now => true,
            Some(_) => self.stop_date.is_some_and(|stop| stop < now),
        }
    }

    /// Validates record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), ScopeValidationError> {
        if self.code.trim().is_empty() {
            return Err(ScopeValidationError::BlankCode);
        }
        if self.scope_model_id.trim().is_empty() {
            return Err(ScopeValidationError::BlankScopeModel);
        }
        if let (Some(start), Some(stop)) = (self.start_date, self.stop_date) {
            if stop < start {
                return Err(ScopeValidationError::StopBeforeStart { start, stop });
            }
        }
        Ok(())
    }
}

/// Record-level validation failures for [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeValidationError {
    BlankCode,
    BlankScopeModel,
    StopBeforeStart { start: Timestamp, stop: Timestamp },
}

impl Display for ScopeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankCode => write!(f, "scope code must not be blank"),
            Self::BlankScopeModel => write!(f, "scope model id must not be blank"),
            Self::StopBeforeStart { start, stop } => write!(
                f,
                "scope stop date {stop} must not be earlier than start date {start}"
            ),
        }
    }
}

impl Error for ScopeValidationError {}
