//! Read-only study configuration consumed by the hierarchy core.
//!
//! # Responsibility
//! - Load the scope-model catalog once from JSON.
//! - Reject inconsistent catalogs before any service uses them.
//!
//! # Invariants
//! - A loaded catalog is immutable; services only query it by model id.
//! - Model-level parent links are acyclic, which keeps every scope
//!   hierarchy built on top of them acyclic.

pub mod scope_model;

pub use scope_model::{ConfigError, ConfigResult, ScopeModel, ScopeModelCatalog};
