//! Hierarchy use-case services.
//!
//! # Responsibility
//! - Enforce relation and scope lifecycle rules above the repository layer.
//! - Answer hierarchy queries in terms of scopes, not rows.
//!
//! `ScopeRelationService` owns relation writes and traversal; `ScopeService`
//! builds scope creation and deletion on top of it.

pub mod error;
pub mod relation_service;
pub mod scope_service;
mod traversal;

pub use error::{ErrorKind, HierarchyError, HierarchyResult};
pub use relation_service::{RelationEnding, ScopeRelationService};
pub use scope_service::ScopeService;
