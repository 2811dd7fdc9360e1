//! Hierarchy queries over the scope relation graph.
//!
//! # Invariants
//! - Scopes are compared by key only, never by loaded value.
//! - "Enabled at `date`" means a non-deleted endpoint and either a virtual
//!   parent or `start_date <= date < end_date`.
//! - `get_ancestors` follows default relations only; the closure and
//!   enabled queries follow every relation.
//! - Every walk keeps a visited set and fails on a default-chain cycle
//!   instead of looping.

use super::error::{HierarchyError, HierarchyResult};
use super::relation_service::ScopeRelationService;
use crate::clock::Clock;
use crate::model::relation::{RelationId, ScopeRelation};
use crate::model::scope::{Scope, ScopeId};
use crate::model::Timestamp;
use crate::repo::relation_repo::RelationRepository;
use crate::repo::scope_repo::ScopeRepository;
use crate::repo::RepoError;
use std::collections::{HashSet, VecDeque};

impl<S: ScopeRepository, R: RelationRepository, C: Clock> ScopeRelationService<'_, S, R, C> {
    pub fn get_relation(&self, id: RelationId) -> HierarchyResult<ScopeRelation> {
        self.load_relation(id)
    }

    /// Relation between `scope` and `parent` enabled now, if any.
    pub fn get_active_relation(
        &self,
        scope: &Scope,
        parent: &Scope,
    ) -> HierarchyResult<Option<ScopeRelation>> {
        Ok(self
            .relations
            .get_active_relation(scope.uuid, parent.uuid, self.now())?)
    }

    /// Parent side of `relation`.
    pub fn get_parent(&self, relation: &ScopeRelation) -> HierarchyResult<Scope> {
        self.load_scope(relation.parent_uuid)
    }

    /// Child side of `relation`.
    pub fn get_child(&self, relation: &ScopeRelation) -> HierarchyResult<Scope> {
        self.load_scope(relation.scope_uuid)
    }

    /// Returns whether the parent side of `relation` is virtual.
    pub fn is_virtual(&self, relation: &ScopeRelation) -> HierarchyResult<bool> {
        Ok(self.get_parent(relation)?.is_virtual)
    }

    // Parent side.

    /// Every parent relation of `scope`, deleted parents included.
    pub fn get_all_parent_relations(&self, scope: &Scope) -> HierarchyResult<Vec<ScopeRelation>> {
        Ok(self.relations.parent_relations(scope.uuid)?)
    }

    pub fn get_non_deleted_parent_relations(
        &self,
        scope: &Scope,
    ) -> HierarchyResult<Vec<ScopeRelation>> {
        Ok(self
            .parent_links(scope)?
            .into_iter()
            .filter(|(_, parent)| !parent.is_deleted)
            .map(|(relation, _)| relation)
            .collect())
    }

    /// Parent relations of `scope` enabled at `date`.
    pub fn get_active_parent_relations(
        &self,
        scope: &Scope,
        date: Timestamp,
    ) -> HierarchyResult<Vec<ScopeRelation>> {
        Ok(self
            .enabled_parent_links(scope, date)?
            .into_iter()
            .map(|(relation, _)| relation)
            .collect())
    }

    /// Default relation of `scope` to a non-deleted parent.
    pub fn get_default_parent_relation(&self, scope: &Scope) -> HierarchyResult<ScopeRelation> {
        self.get_non_deleted_parent_relations(scope)?
            .into_iter()
            .find(|relation| relation.is_default)
            .ok_or(HierarchyError::DefaultParentMissing(scope.uuid))
    }

    /// Non-deleted parents of `scope` over any time.
    pub fn get_parents(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        Ok(self
            .parent_links(scope)?
            .into_iter()
            .filter(|(_, parent)| !parent.is_deleted)
            .map(|(_, parent)| parent)
            .collect())
    }

    /// Every parent of `scope` over any time, deleted ones included.
    pub fn get_all_parents(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        Ok(self
            .parent_links(scope)?
            .into_iter()
            .map(|(_, parent)| parent)
            .collect())
    }

    /// Parents of `scope` through relations enabled at `date`.
    pub fn get_enabled_parents(&self, scope: &Scope, date: Timestamp) -> HierarchyResult<Vec<Scope>> {
        Ok(self
            .enabled_parent_links(scope, date)?
            .into_iter()
            .map(|(_, parent)| parent)
            .collect())
    }

    /// Parent at the other end of the default relation, deleted or not.
    pub fn get_default_parent(&self, scope: &Scope) -> HierarchyResult<Scope> {
        let relation = self.stored_default_relation(scope.uuid)?;
        self.load_scope(relation.parent_uuid)
    }

    // Child side.

    /// Every child relation of `scope`, deleted children included.
    pub fn get_child_relations(&self, scope: &Scope) -> HierarchyResult<Vec<ScopeRelation>> {
        Ok(self.relations.child_relations(scope.uuid)?)
    }

    pub fn get_non_deleted_child_relations(
        &self,
        scope: &Scope,
    ) -> HierarchyResult<Vec<ScopeRelation>> {
        Ok(self
            .child_links(scope)?
            .into_iter()
            .filter(|(_, child)| !child.is_deleted)
            .map(|(relation, _)| relation)
            .collect())
    }

    /// Child relations of `scope` enabled at `date`.
    pub fn get_active_child_relations(
        &self,
        scope: &Scope,
        date: Timestamp,
    ) -> HierarchyResult<Vec<ScopeRelation>> {
        Ok(self
            .enabled_child_links(scope, date)?
            .into_iter()
            .map(|(relation, _)| relation)
            .collect())
    }

    /// Non-deleted children of `scope` over any time.
    pub fn get_children(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        Ok(self
            .child_links(scope)?
            .into_iter()
            .filter(|(_, child)| !child.is_deleted)
            .map(|(_, child)| child)
            .collect())
    }

    /// Every child of `scope` over any time, deleted ones included.
    pub fn get_all_children(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        Ok(self
            .child_links(scope)?
            .into_iter()
            .map(|(_, child)| child)
            .collect())
    }

    /// Children of `scope` through relations enabled at `date`.
    pub fn get_enabled_children(&self, scope: &Scope, date: Timestamp) -> HierarchyResult<Vec<Scope>> {
        Ok(self
            .enabled_child_links(scope, date)?
            .into_iter()
            .map(|(_, child)| child)
            .collect())
    }

    /// Scopes sharing at least one parent with `scope`, without `scope`
    /// itself and without duplicates.
    pub fn get_all_siblings(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        let mut seen = HashSet::from([scope.uuid]);
        let mut siblings = Vec::new();
        for parent in self.get_all_parents(scope)? {
            for child in self.get_all_children(&parent)? {
                if seen.insert(child.uuid) {
                    siblings.push(child);
                }
            }
        }
        Ok(siblings)
    }

    // Multi-level queries.

    /// Default lineage of `scope`, nearest first, deleted scopes skipped.
    ///
    /// # Errors
    /// - `DefaultParentMissing` when a non-root scope on the chain has no
    ///   default relation.
    pub fn get_ancestors(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        let mut visited = HashSet::from([scope.uuid]);
        let mut ancestors = Vec::new();
        let mut current = scope.uuid;
        loop {
            let relations = self.relations.parent_relations(current)?;
            if relations.is_empty() {
                return Ok(ancestors);
            }
            let default = relations
                .into_iter()
                .find(|relation| relation.is_default)
                .ok_or(HierarchyError::DefaultParentMissing(current))?;
            if !visited.insert(default.parent_uuid) {
                return Err(RepoError::InvalidData(format!(
                    "default parent chain of scope {} loops at scope {}",
                    scope.uuid, default.parent_uuid
                ))
                .into());
            }
            let parent = self.load_scope(default.parent_uuid)?;
            current = parent.uuid;
            if !parent.is_deleted {
                ancestors.push(parent);
            }
        }
    }

    /// Non-deleted ancestors through any relation over any time.
    pub fn get_all_ancestors(&self, scope: &Scope) -> HierarchyResult<Vec<Scope>> {
        self.load_scopes(self.scopes.closure_ancestor_ids(scope.uuid)?)
    }

    /// Ancestors through relations enabled now, nearest first, optionally
    /// restricted to one scope model.
    pub fn get_enabled_ancestors(
        &self,
        scope: &Scope,
        scope_model_id: Option<&str>,
    ) -> HierarchyResult<Vec<Scope>> {
        let now = self.now();
        let found = self.walk(scope, |current| {
            Ok(self
                .enabled_parent_links(current, now)?
                .into_iter()
                .map(|(_, parent)| parent)
                .collect())
        })?;
        Ok(filter_model(found, scope_model_id))
    }

    /// Non-deleted descendants through any relation over any time,
    /// optionally restricted to one scope model.
    pub fn get_descendants(
        &self,
        scope: &Scope,
        scope_model_id: Option<&str>,
    ) -> HierarchyResult<Vec<Scope>> {
        let found = self.load_scopes(self.scopes.closure_descendant_ids(scope.uuid)?)?;
        Ok(filter_model(found, scope_model_id))
    }

    /// Descendants through relations enabled now, nearest first,
    /// optionally restricted to one scope model.
    pub fn get_enabled_descendants(
        &self,
        scope: &Scope,
        scope_model_id: Option<&str>,
    ) -> HierarchyResult<Vec<Scope>> {
        let now = self.now();
        let found = self.walk(scope, |current| {
            Ok(self
                .enabled_child_links(current, now)?
                .into_iter()
                .map(|(_, child)| child)
                .collect())
        })?;
        Ok(filter_model(found, scope_model_id))
    }

    // Predicates.

    /// Returns whether `ancestor` is on the default lineage of `scope`.
    pub fn is_descendant_of(&self, scope: &Scope, ancestor: &Scope) -> HierarchyResult<bool> {
        Ok(self
            .get_ancestors(scope)?
            .iter()
            .any(|candidate| candidate.uuid == ancestor.uuid))
    }

    pub fn is_ancestor_of(&self, ancestor: &Scope, scope: &Scope) -> HierarchyResult<bool> {
        self.is_descendant_of(scope, ancestor)
    }

    /// Returns whether `ancestor` is reachable through relations enabled now.
    pub fn is_descendant_of_enabled(
        &self,
        scope: &Scope,
        ancestor: &Scope,
    ) -> HierarchyResult<bool> {
        Ok(self
            .get_enabled_ancestors(scope, None)?
            .iter()
            .any(|candidate| candidate.uuid == ancestor.uuid))
    }

    /// Returns whether `scope` is an enabled child of `parent` now.
    pub fn is_child_of(&self, scope: &Scope, parent: &Scope) -> HierarchyResult<bool> {
        Ok(self
            .get_active_child_relations(parent, self.now())?
            .iter()
            .any(|relation| relation.scope_uuid == scope.uuid))
    }

    pub fn is_parent_of(&self, parent: &Scope, scope: &Scope) -> HierarchyResult<bool> {
        self.is_child_of(scope, parent)
    }

    /// Same scope, or one on the default lineage of the other.
    pub fn are_related(&self, scope: &Scope, other: &Scope) -> HierarchyResult<bool> {
        Ok(scope.uuid == other.uuid
            || self.is_descendant_of(scope, other)?
            || self.is_descendant_of(other, scope)?)
    }

    /// Fewest hops between `scope` and `other`, walking either strictly up or
    /// strictly down through every relation, deleted scopes included.
    ///
    /// # Errors
    /// - `NotRelated` when neither walk reaches `other`.
    pub fn get_shortest_distance_between(
        &self,
        scope: &Scope,
        other: &Scope,
    ) -> HierarchyResult<u32> {
        if scope.uuid == other.uuid {
            return Ok(0);
        }
        let upward = self.hops_to(scope.uuid, other.uuid, |id| {
            Ok(self
                .relations
                .parent_relations(id)?
                .into_iter()
                .map(|relation| relation.parent_uuid)
                .collect())
        })?;
        let downward = self.hops_to(scope.uuid, other.uuid, |id| {
            Ok(self
                .relations
                .child_relations(id)?
                .into_iter()
                .map(|relation| relation.scope_uuid)
                .collect())
        })?;
        upward
            .into_iter()
            .chain(downward)
            .min()
            .ok_or(HierarchyError::NotRelated {
                scope: scope.uuid,
                other: other.uuid,
            })
    }

    fn parent_links(&self, scope: &Scope) -> HierarchyResult<Vec<(ScopeRelation, Scope)>> {
        self.relations
            .parent_relations(scope.uuid)?
            .into_iter()
            .map(|relation| {
                let parent = self.load_scope(relation.parent_uuid)?;
                Ok((relation, parent))
            })
            .collect()
    }

    fn child_links(&self, scope: &Scope) -> HierarchyResult<Vec<(ScopeRelation, Scope)>> {
        self.relations
            .child_relations(scope.uuid)?
            .into_iter()
            .map(|relation| {
                let child = self.load_scope(relation.scope_uuid)?;
                Ok((relation, child))
            })
            .collect()
    }

    fn enabled_parent_links(
        &self,
        scope: &Scope,
        date: Timestamp,
    ) -> HierarchyResult<Vec<(ScopeRelation, Scope)>> {
        if scope.is_deleted {
            return Ok(Vec::new());
        }
        Ok(self
            .parent_links(scope)?
            .into_iter()
            .filter(|(relation, parent)| {
                !parent.is_deleted && relation.is_enabled_at(date, parent.is_virtual)
            })
            .collect())
    }

    fn enabled_child_links(
        &self,
        scope: &Scope,
        date: Timestamp,
    ) -> HierarchyResult<Vec<(ScopeRelation, Scope)>> {
        if scope.is_deleted {
            return Ok(Vec::new());
        }
        Ok(self
            .child_links(scope)?
            .into_iter()
            .filter(|(relation, child)| {
                !child.is_deleted && relation.is_enabled_at(date, scope.is_virtual)
            })
            .collect())
    }

    /// Breadth-first collection of every scope reachable through `next`,
    /// `start` excluded, each scope once.
    fn walk<F>(&self, start: &Scope, mut next: F) -> HierarchyResult<Vec<Scope>>
    where
        F: FnMut(&Scope) -> HierarchyResult<Vec<Scope>>,
    {
        let mut visited = HashSet::from([start.uuid]);
        let mut queue = VecDeque::from([start.clone()]);
        let mut found = Vec::new();
        while let Some(current) = queue.pop_front() {
            for neighbour in next(&current)? {
                if visited.insert(neighbour.uuid) {
                    found.push(neighbour.clone());
                    queue.push_back(neighbour);
                }
            }
        }
        Ok(found)
    }

    /// Breadth-first hop count from `from` to `target` through `next`.
    fn hops_to<F>(&self, from: ScopeId, target: ScopeId, mut next: F) -> HierarchyResult<Option<u32>>
    where
        F: FnMut(ScopeId) -> HierarchyResult<Vec<ScopeId>>,
    {
        let mut visited = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0_u32)]);
        while let Some((current, distance)) = queue.pop_front() {
            for neighbour in next(current)? {
                if neighbour == target {
                    return Ok(Some(distance + 1));
                }
                if visited.insert(neighbour) {
                    queue.push_back((neighbour, distance + 1));
                }
            }
        }
        Ok(None)
    }

    fn load_scopes(&self, ids: Vec<ScopeId>) -> HierarchyResult<Vec<Scope>> {
        ids.into_iter().map(|id| self.load_scope(id)).collect()
    }
}

fn filter_model(scopes: Vec<Scope>, scope_model_id: Option<&str>) -> Vec<Scope> {
    match scope_model_id {
        Some(model) => scopes
            .into_iter()
            .filter(|scope| scope.scope_model_id == model)
            .collect(),
        None => scopes,
    }
}
