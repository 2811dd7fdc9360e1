//! Scope relation domain model.
//!
//! # Responsibility
//! - Define the timed child -> parent edge between two scopes.
//! - Own the date-window predicates used by lifecycle and traversal code.
//!
//! # Invariants
//! - Windows are half-open: `[start_date, end_date)`, `None` meaning open.
//! - Relations under a virtual parent are enabled regardless of dates.

use super::scope::ScopeId;
use super::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a relation.
pub type RelationId = Uuid;

/// Timed parent link of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRelation {
    pub uuid: RelationId,
    /// Child side of the edge.
    pub scope_uuid: ScopeId,
    /// Parent side of the edge.
    pub parent_uuid: ScopeId,
    pub start_date: Timestamp,
    /// `None` while the relation is open.
    pub end_date: Option<Timestamp>,
    /// Marks the primary lineage of the child.
    pub is_default: bool,
}

impl ScopeRelation {
    /// Creates a non-default relation with a generated id.
    pub fn new(
        scope_uuid: ScopeId,
        parent_uuid: ScopeId,
        start_date: Timestamp,
        end_date: Option<Timestamp>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            scope_uuid,
            parent_uuid,
            start_date,
            end_date,
            is_default: false,
        }
    }

    /// Returns whether the relation is in force at `at`.
    ///
    /// `parent_is_virtual` short-circuits the date check: virtual
    /// memberships are always enabled.
    pub fn is_enabled_at(&self, at: Timestamp, parent_is_virtual: bool) -> bool {
        parent_is_virtual
            || (self.start_date <= at && self.end_date.map_or(true, |end| end > at))
    }

    /// Returns whether a requested window conflicts with this one.
    ///
    /// An open request also conflicts with any relation starting after it.
    pub fn conflicts_with_window(&self, start: Timestamp, end: Option<Timestamp>) -> bool {
        let starts_after_open_request = end.is_none() && self.start_date > start;
        let intersects = self.end_date.map_or(true, |existing_end| start < existing_end)
            && end.map_or(true, |requested_end| requested_end > self.start_date);
        starts_after_open_request || intersects
    }
}
