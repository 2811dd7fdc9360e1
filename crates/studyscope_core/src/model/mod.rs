//! Domain model for study hierarchy scopes and their timed relations.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep date-window arithmetic next to the records it describes.
//!
//! # Invariants
//! - Every scope and relation is identified by a stable UUID.
//! - Scope deletion is a soft tombstone; only virtual relations are ever
//!   hard-deleted.

pub mod audit;
pub mod relation;
pub mod scope;

/// Unix epoch milliseconds.
pub type Timestamp = i64;
