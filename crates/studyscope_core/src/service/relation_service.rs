//! Scope relation lifecycle service.
//!
//! # Responsibility
//! - Create, end, make-default and transfer timed parent relations.
//! - Validate every rule before the first write of an operation.
//!
//! # Invariants
//! - Every non-root scope keeps exactly one default parent relation.
//! - Windows of one (child, parent) pair never overlap.
//! - Relations under a virtual parent are hard-deleted when ended and can
//!   never become default.
//! - A child model must declare the parent model as parent.
//! - Each public mutation runs in one atomic unit; `transfer` rolls back its
//!   first write when the second one fails.
//!
//! Hierarchy queries live in `traversal`.

use super::error::{HierarchyError, HierarchyResult};
use crate::clock::{Clock, SystemClock};
use crate::config::ScopeModelCatalog;
use crate::db::DbError;
use crate::model::audit::AuditContext;
use crate::model::relation::{RelationId, ScopeRelation};
use crate::model::scope::{Scope, ScopeId};
use crate::model::Timestamp;
use crate::repo::relation_repo::RelationRepository;
use crate::repo::scope_repo::ScopeRepository;
use log::{info, warn};

const TRANSFER_RATIONALE: &str = "Scope transfer";

/// Outcome of [`ScopeRelationService::end_relation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationEnding {
    /// Row kept with its end date set.
    SoftEnded(ScopeRelation),
    /// Virtual relation removed from storage.
    HardDeleted(ScopeRelation),
}

/// Relation lifecycle and hierarchy traversal over one pair of repositories.
pub struct ScopeRelationService<'cfg, S, R, C = SystemClock> {
    pub(super) scopes: S,
    pub(super) relations: R,
    pub(super) catalog: &'cfg ScopeModelCatalog,
    pub(super) clock: C,
}

impl<'cfg, S: ScopeRepository, R: RelationRepository> ScopeRelationService<'cfg, S, R> {
    /// Creates a service reading "now" from the system clock.
    pub fn new(scopes: S, relations: R, catalog: &'cfg ScopeModelCatalog) -> Self {
        Self::with_clock(scopes, relations, catalog, SystemClock)
    }
}

impl<'cfg, S: ScopeRepository, R: RelationRepository, C: Clock> ScopeRelationService<'cfg, S, R, C> {
    pub fn with_clock(
        scopes: S,
        relations: R,
        catalog: &'cfg ScopeModelCatalog,
        clock: C,
    ) -> Self {
        Self {
            scopes,
            relations,
            catalog,
            clock,
        }
    }

    pub fn scopes(&self) -> &S {
        &self.scopes
    }

    pub fn catalog(&self) -> &'cfg ScopeModelCatalog {
        self.catalog
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Runs `op` as one atomic unit on the relation store.
    pub fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce() -> Result<T, E>,
    {
        self.relations.atomically(op)
    }

    /// Attaches `scope` under `parent` for `[start_date, end_date)`.
    ///
    /// The relation becomes default iff it is the first non-deleted parent
    /// relation of `scope`.
    ///
    /// # Errors
    /// - `InvalidState` when an endpoint is deleted/locked or the window is
    ///   inverted.
    /// - `RelationConflict` when `scope` is already an active child of
    ///   `parent` or the window overlaps an existing one for the pair.
    /// - `ConfigurationViolation` when the models are incompatible.
    pub fn create_relation(
        &self,
        scope: &Scope,
        parent: &Scope,
        start_date: Timestamp,
        end_date: Option<Timestamp>,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<ScopeRelation> {
        let result = self.relations.atomically(|| {
            let scope = self.load_scope(scope.uuid)?;
            let parent = self.load_scope(parent.uuid)?;
            self.insert_relation(&scope, &parent, start_date, end_date, context, rationale)
        });
        log_outcome("relation_create", scope.uuid, parent.uuid, &result);
        result
    }

    /// Ends a non-default relation at `end_date`.
    ///
    /// Virtual relations are removed; physical ones keep their row for
    /// history.
    pub fn end_relation(
        &self,
        relation: &ScopeRelation,
        end_date: Timestamp,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<RelationEnding> {
        let result = self.relations.atomically(|| {
            let mut relation = self.load_relation(relation.uuid)?;
            let scope = self.load_scope(relation.scope_uuid)?;
            let parent = self.load_scope(relation.parent_uuid)?;
            check_endpoints(&scope, &parent)?;

            if relation.is_default {
                return Err(HierarchyError::DefaultRelationEnd(relation.uuid));
            }
            if end_date < relation.start_date {
                return Err(HierarchyError::EndBeforeStart {
                    relation: relation.uuid,
                    start_date: relation.start_date,
                    end_date,
                });
            }
            if let Some(current_end) = relation.end_date.filter(|current| *current < end_date) {
                return Err(HierarchyError::RelationAlreadyEnded {
                    relation: relation.uuid,
                    end_date: current_end,
                });
            }

            if parent.is_virtual {
                self.relations
                    .delete_relation(&relation, context, rationale)?;
                return Ok(RelationEnding::HardDeleted(relation));
            }

            relation.end_date = Some(end_date);
            self.relations.save_relation(&relation, context, rationale)?;
            Ok(RelationEnding::SoftEnded(relation))
        });
        log_relation_outcome("relation_end", relation.uuid, &result);
        result
    }

    /// Makes `relation` the primary lineage of its child.
    ///
    /// Every other default relation of the child is unset in the same unit.
    pub fn make_default(
        &self,
        relation: &ScopeRelation,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<ScopeRelation> {
        let result = self.relations.atomically(|| {
            let mut relation = self.load_relation(relation.uuid)?;
            let scope = self.load_scope(relation.scope_uuid)?;
            let parent = self.load_scope(relation.parent_uuid)?;
            check_endpoints(&scope, &parent)?;

            if parent.is_virtual {
                return Err(HierarchyError::VirtualRelationDefault(relation.uuid));
            }
            if relation.start_date > self.now() {
                return Err(HierarchyError::DefaultStartsInFuture(relation.uuid));
            }

            self.clear_other_defaults(scope.uuid, relation.uuid, context, rationale)?;

            relation.is_default = true;
            self.relations.save_relation(&relation, context, rationale)?;
            Ok(relation)
        });
        log_relation_outcome("relation_make_default", relation.uuid, &result);
        result
    }

    /// Replaces the default parent of `scope` by `new_parent` at
    /// `transfer_date`.
    ///
    /// The old default relation is closed at `transfer_date` and loses its
    /// default flag; the new relation starts at `transfer_date` and becomes
    /// default. Both writes commit together or not at all.
    ///
    /// # Errors
    /// - `TransferInFuture` when `transfer_date` is after now.
    /// - `EndBeforeStart` when it precedes the current default's start.
    /// - Every error of [`Self::create_relation`] for the new parent.
    pub fn transfer(
        &self,
        scope: &Scope,
        new_parent: &Scope,
        transfer_date: Timestamp,
        context: &AuditContext,
    ) -> HierarchyResult<ScopeRelation> {
        let result = self.relations.atomically(|| {
            let scope = self.load_scope(scope.uuid)?;
            let new_parent = self.load_scope(new_parent.uuid)?;
            check_endpoints(&scope, &new_parent)?;
            if transfer_date > self.now() {
                return Err(HierarchyError::TransferInFuture {
                    scope: scope.uuid,
                    transfer_date,
                });
            }

            // The current default may point at a deleted parent.
            let mut previous = self.stored_default_relation(scope.uuid)?;
            if transfer_date < previous.start_date {
                return Err(HierarchyError::EndBeforeStart {
                    relation: previous.uuid,
                    start_date: previous.start_date,
                    end_date: transfer_date,
                });
            }
            previous.is_default = false;
            previous.end_date = Some(transfer_date);
            self.relations
                .save_relation(&previous, context, TRANSFER_RATIONALE)?;

            let mut relation = self.insert_relation(
                &scope,
                &new_parent,
                transfer_date,
                None,
                context,
                TRANSFER_RATIONALE,
            )?;
            if !relation.is_default {
                relation.is_default = true;
                self.relations
                    .save_relation(&relation, context, TRANSFER_RATIONALE)?;
            }
            Ok(relation)
        });
        log_outcome("relation_transfer", scope.uuid, new_parent.uuid, &result);
        result
    }

    /// Validates and writes one new relation; callers own the atomic unit.
    fn insert_relation(
        &self,
        scope: &Scope,
        parent: &Scope,
        start_date: Timestamp,
        end_date: Option<Timestamp>,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<ScopeRelation> {
        check_endpoints(scope, parent)?;

        let mut relation = ScopeRelation::new(scope.uuid, parent.uuid, start_date, end_date);

        if self.is_child_of(scope, parent)? {
            return Err(HierarchyError::AlreadyChild {
                scope: scope.uuid,
                parent: parent.uuid,
            });
        }

        if let Some(end) = end_date.filter(|end| *end < start_date) {
            return Err(HierarchyError::EndBeforeStart {
                relation: relation.uuid,
                start_date,
                end_date: end,
            });
        }
        self.verify_no_overlap(scope, parent, start_date, end_date)?;

        let child_model = self.catalog.require(&scope.scope_model_id)?;
        let parent_model = self.catalog.require(&parent.scope_model_id)?;
        if !child_model.is_child_of(parent_model) {
            return Err(HierarchyError::IncompatibleModels {
                child_model: child_model.id.clone(),
                parent_model: parent_model.id.clone(),
            });
        }

        relation.is_default = self.get_non_deleted_parent_relations(scope)?.is_empty();
        if relation.is_default {
            self.clear_other_defaults(scope.uuid, relation.uuid, context, rationale)?;
        }
        self.relations.save_relation(&relation, context, rationale)?;
        Ok(relation)
    }

    /// Unsets the default flag on every parent relation of `scope` but
    /// `keep`, relations to deleted parents included.
    fn clear_other_defaults(
        &self,
        scope: ScopeId,
        keep: RelationId,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<()> {
        for mut other in self.relations.parent_relations(scope)? {
            if other.is_default && other.uuid != keep {
                other.is_default = false;
                self.relations.save_relation(&other, context, rationale)?;
            }
        }
        Ok(())
    }

    fn verify_no_overlap(
        &self,
        scope: &Scope,
        parent: &Scope,
        start_date: Timestamp,
        end_date: Option<Timestamp>,
    ) -> HierarchyResult<()> {
        let overlapping = self
            .relations
            .parent_relations(scope.uuid)?
            .into_iter()
            .filter(|relation| relation.parent_uuid == parent.uuid)
            .any(|relation| relation.conflicts_with_window(start_date, end_date));
        if overlapping {
            return Err(HierarchyError::WindowOverlap {
                scope: scope.uuid,
                parent: parent.uuid,
                start_date,
            });
        }
        Ok(())
    }

    pub(super) fn load_scope(&self, id: ScopeId) -> HierarchyResult<Scope> {
        self.scopes
            .get_scope(id)?
            .ok_or(HierarchyError::ScopeNotFound(id))
    }

    /// Default parent relation of `scope`, whatever the parent state.
    pub(super) fn stored_default_relation(&self, scope: ScopeId) -> HierarchyResult<ScopeRelation> {
        self.relations
            .parent_relations(scope)?
            .into_iter()
            .find(|relation| relation.is_default)
            .ok_or(HierarchyError::DefaultParentMissing(scope))
    }

    pub(super) fn load_relation(&self, id: RelationId) -> HierarchyResult<ScopeRelation> {
        self.relations
            .get_relation(id)?
            .ok_or(HierarchyError::RelationNotFound(id))
    }
}

/// Rejects deleted endpoints first, then locked ones, child side first.
fn check_endpoints(scope: &Scope, parent: &Scope) -> HierarchyResult<()> {
    for endpoint in [scope, parent] {
        if endpoint.is_deleted {
            return Err(HierarchyError::ScopeDeleted(endpoint.uuid));
        }
    }
    for endpoint in [scope, parent] {
        if endpoint.is_locked {
            return Err(HierarchyError::ScopeLocked(endpoint.uuid));
        }
    }
    Ok(())
}

fn log_outcome<T>(
    event: &'static str,
    scope: ScopeId,
    parent: ScopeId,
    result: &HierarchyResult<T>,
) {
    match result {
        Ok(_) => info!("event={event} module=relation status=ok scope={scope} parent={parent}"),
        Err(err) => warn!(
            "event={event} module=relation status=rejected scope={scope} parent={parent} error_code={} error={err}",
            err.code()
        ),
    }
}

fn log_relation_outcome<T>(event: &'static str, relation: RelationId, result: &HierarchyResult<T>) {
    match result {
        Ok(_) => info!("event={event} module=relation status=ok relation={relation}"),
        Err(err) => warn!(
            "event={event} module=relation status=rejected relation={relation} error_code={} error={err}",
            err.code()
        ),
    }
}
