//! Scope lifecycle use-case service.
//!
//! # Responsibility
//! - Create scopes under a parent together with their first (default)
//!   relation.
//! - Enforce configured ceilings and model rules before anything is written.
//! - Save, soft-delete, restore, lock and unlock scopes.
//!
//! # Invariants
//! - `create_from_candidate` evaluates every gate before the first write; a
//!   failed gate leaves no scope and no relation behind.
//! - Root scopes are never deleted.
//! - Only root models are created without a parent.
//! - Business codes stay unique.

use super::error::{HierarchyError, HierarchyResult};
use super::relation_service::ScopeRelationService;
use crate::clock::{Clock, SystemClock};
use crate::config::ScopeModel;
use crate::model::audit::AuditContext;
use crate::model::scope::{Scope, ScopeId};
use crate::model::Timestamp;
use crate::repo::relation_repo::RelationRepository;
use crate::repo::scope_repo::ScopeRepository;
use log::{info, warn};

/// Scope lifecycle service layered on [`ScopeRelationService`].
pub struct ScopeService<'cfg, S, R, C = SystemClock> {
    relations: ScopeRelationService<'cfg, S, R, C>,
}

impl<'cfg, S: ScopeRepository, R: RelationRepository, C: Clock> ScopeService<'cfg, S, R, C> {
    pub fn new(relations: ScopeRelationService<'cfg, S, R, C>) -> Self {
        Self { relations }
    }

    /// Relation service used for hierarchy reads and relation writes.
    pub fn relations(&self) -> &ScopeRelationService<'cfg, S, R, C> {
        &self.relations
    }

    /// Builds an unsaved scope of `scope_model_id` opening at `start_date`.
    pub fn create_candidate(
        &self,
        scope_model_id: &str,
        code: &str,
        start_date: Timestamp,
    ) -> HierarchyResult<Scope> {
        let model = self.relations.catalog().require(scope_model_id)?;
        let mut scope = Scope::new(code, model.id.as_str(), self.relations.now());
        scope.is_virtual = model.is_virtual;
        scope.start_date = Some(start_date);
        Ok(scope)
    }

    /// Validates `candidate` against the configuration, then creates it
    /// under `parent`.
    ///
    /// # Errors
    /// - `ConfigurationViolation` for incompatible models, a virtual chain,
    ///   or a reached global/per-ancestor ceiling.
    /// - `CodeAlreadyUsed` when another scope owns the code.
    /// - Every error of [`Self::create`].
    pub fn create_from_candidate(
        &self,
        candidate: &Scope,
        parent: &Scope,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<Scope> {
        let rationale = with_base_rationale("Create scope", rationale);
        let result = self.relations.atomically(|| {
            let parent = self.relations.load_scope(parent.uuid)?;
            let model = self.relations.catalog().require(&candidate.scope_model_id)?;
            self.check_model_parent_correctness(model, &parent)?;

            if self
                .relations
                .scopes()
                .get_scope_by_code(&candidate.code)?
                .is_some()
            {
                return Err(HierarchyError::CodeAlreadyUsed(candidate.code.clone()));
            }

            self.create_scope(candidate, Some(&parent), context, &rationale)
        });
        log_outcome("scope_create", candidate.uuid, &result);
        result
    }

    /// Persists `scope` and attaches it under `parent` from its creation
    /// time. Without a parent the scope is stored as a root.
    ///
    /// # Errors
    /// - `ParentRequired` when `parent` is absent and the model is not a root.
    /// - `InvalidState` when the parent is locked or outside its enrollment
    ///   window.
    /// - Every error of [`ScopeRelationService::create_relation`].
    pub fn create(
        &self,
        scope: &Scope,
        parent: Option<&Scope>,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<Scope> {
        let result = self.relations.atomically(|| {
            let parent = parent
                .map(|parent| self.relations.load_scope(parent.uuid))
                .transpose()?;
            self.create_scope(scope, parent.as_ref(), context, rationale)
        });
        log_outcome("scope_create", scope.uuid, &result);
        result
    }

    /// Soft-deletes `scope`. Returns `false` when it is a root scope, which
    /// is left untouched.
    pub fn delete(
        &self,
        scope: &Scope,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<bool> {
        let result = self.relations.atomically(|| {
            let scope = self.relations.load_scope(scope.uuid)?;
            let model = self.relations.catalog().require(&scope.scope_model_id)?;
            if model.is_root() {
                return Ok(false);
            }
            if scope.is_locked {
                return Err(HierarchyError::ScopeLocked(scope.uuid));
            }
            let rationale = with_base_rationale(&format!("{} removed", model.id), rationale);
            self.relations
                .scopes()
                .delete_scope(scope.uuid, context, &rationale)?;
            Ok(true)
        });
        log_outcome("scope_delete", scope.uuid, &result);
        result
    }

    /// Clears the deleted flag of `scope`.
    pub fn restore(
        &self,
        scope: &Scope,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<()> {
        let result = self.relations.atomically(|| {
            let scope = self.relations.load_scope(scope.uuid)?;
            if scope.is_locked {
                return Err(HierarchyError::ScopeLocked(scope.uuid));
            }
            let rationale =
                with_base_rationale(&format!("{} restored", scope.scope_model_id), rationale);
            self.relations
                .scopes()
                .restore_scope(scope.uuid, context, &rationale)?;
            Ok(())
        });
        log_outcome("scope_restore", scope.uuid, &result);
        result
    }

    /// Updates the attributes of an existing or new scope.
    ///
    /// The locked check reads the stored row when there is one.
    pub fn save(
        &self,
        scope: &Scope,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<()> {
        let result = self.relations.atomically(|| {
            let stored = self.relations.scopes().get_scope(scope.uuid)?;
            if stored.as_ref().unwrap_or(scope).is_locked {
                return Err(HierarchyError::ScopeLocked(scope.uuid));
            }
            let same_code = self.relations.scopes().get_scope_by_code(&scope.code)?;
            if same_code.is_some_and(|other| other.uuid != scope.uuid) {
                return Err(HierarchyError::CodeAlreadyUsed(scope.code.clone()));
            }
            self.relations
                .scopes()
                .save_scope(scope, context, rationale)?;
            Ok(())
        });
        log_outcome("scope_save", scope.uuid, &result);
        result
    }

    /// Locks `scope` and every descendant enabled now.
    ///
    /// Returns the ids that changed state.
    pub fn lock(&self, scope: &Scope, context: &AuditContext) -> HierarchyResult<Vec<ScopeId>> {
        let result = self.set_locked(scope, true, context);
        log_outcome("scope_lock", scope.uuid, &result);
        result
    }

    /// Unlocks `scope` and every descendant enabled now.
    pub fn unlock(&self, scope: &Scope, context: &AuditContext) -> HierarchyResult<Vec<ScopeId>> {
        let result = self.set_locked(scope, false, context);
        log_outcome("scope_unlock", scope.uuid, &result);
        result
    }

    fn set_locked(
        &self,
        scope: &Scope,
        locked: bool,
        context: &AuditContext,
    ) -> HierarchyResult<Vec<ScopeId>> {
        self.relations.atomically(|| {
            let scope = self.relations.load_scope(scope.uuid)?;
            if scope.is_deleted {
                return Err(HierarchyError::ScopeDeleted(scope.uuid));
            }
            let (own_rationale, cascade_rationale) = if locked {
                ("Lock scope", format!("Lock ancestor scope {}", scope.shortname))
            } else {
                ("Unlock scope", format!("Unlock ancestor scope {}", scope.shortname))
            };

            let descendants = self.relations.get_enabled_descendants(&scope, None)?;
            let mut changed = Vec::new();
            let targets = std::iter::once((scope, own_rationale))
                .chain(descendants.into_iter().map(|descendant| (descendant, cascade_rationale.as_str())));
            for (mut target, rationale) in targets {
                if target.is_locked == locked {
                    continue;
                }
                target.is_locked = locked;
                self.relations
                    .scopes()
                    .save_scope(&target, context, rationale)?;
                changed.push(target.uuid);
            }
            Ok(changed)
        })
    }

    /// Writes `scope` and its first relation; callers own the atomic unit.
    fn create_scope(
        &self,
        scope: &Scope,
        parent: Option<&Scope>,
        context: &AuditContext,
        rationale: &str,
    ) -> HierarchyResult<Scope> {
        match parent {
            Some(parent) => {
                if parent.is_locked {
                    return Err(HierarchyError::ScopeLocked(parent.uuid));
                }
                if parent.is_closed(self.relations.now()) {
                    return Err(HierarchyError::ParentClosed(parent.uuid));
                }
            }
            None => {
                let model = self.relations.catalog().require(&scope.scope_model_id)?;
                if !model.is_root() {
                    return Err(HierarchyError::ParentRequired(model.id.clone()));
                }
            }
        }

        self.relations
            .scopes()
            .save_scope(scope, context, rationale)?;

        if let Some(parent) = parent {
            self.relations
                .create_relation(scope, parent, scope.created_at, None, context, rationale)?;
        }
        self.relations.load_scope(scope.uuid)
    }

    fn check_model_parent_correctness(
        &self,
        model: &ScopeModel,
        parent: &Scope,
    ) -> HierarchyResult<()> {
        let catalog = self.relations.catalog();
        let parent_model = catalog.require(&parent.scope_model_id)?;
        if !model.is_child_of(parent_model) {
            return Err(HierarchyError::IncompatibleModels {
                child_model: model.id.clone(),
                parent_model: parent_model.id.clone(),
            });
        }

        if parent.is_virtual && !model.is_virtual {
            return Err(HierarchyError::VirtualChain {
                model: model.id.clone(),
                parent: parent.uuid,
            });
        }

        if let Some(max_number) = model.effective_max_number() {
            if self.relations.scopes().count_by_model(&model.id)? >= u64::from(max_number) {
                return Err(HierarchyError::MaxScopesReached {
                    model: model.id.clone(),
                    max_number,
                });
            }
        }

        if catalog.is_leaf(&model.id) {
            let now = self.relations.now();
            let mut ancestors = self.relations.get_all_ancestors(parent)?;
            ancestors.push(parent.clone());
            for ancestor in ancestors {
                let Some(max_number) = ancestor.max_number else {
                    continue;
                };
                let count = self.relations.scopes().count_enabled_descendants_by_model(
                    &model.id,
                    ancestor.uuid,
                    now,
                )?;
                if count >= u64::from(max_number) {
                    return Err(HierarchyError::MaxDescendantsReached {
                        model: model.id.clone(),
                        ancestor: ancestor.uuid,
                        max_number,
                    });
                }
            }
        }
        Ok(())
    }
}

fn with_base_rationale(base: &str, rationale: &str) -> String {
    if rationale.trim().is_empty() {
        base.to_string()
    } else {
        format!("{base}: {rationale}")
    }
}

fn log_outcome<T>(event: &'static str, scope: ScopeId, result: &HierarchyResult<T>) {
    match result {
        Ok(_) => info!("event={event} module=scope status=ok scope={scope}"),
        Err(err) => warn!(
            "event={event} module=scope status=rejected scope={scope} error_code={} error={err}",
            err.code()
        ),
    }
}
