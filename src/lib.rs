//! Common Requirement Enumeration cross-reference catalog.
//!
//! Canonical security requirements are linked to each other in a hierarchy
//! and to entries of external standards, tools and code. The catalog persists
//! them in SQLite, mirrors the links in an in-memory graph, and answers
//! lookup, search and gap-analysis queries over both.

pub mod domain;
pub use domain::{CatalogError, Config, Document, Link, Node, NodeKind, Relation, Requirement};

/// Persistence, the link graph, and the write coordinator.
pub mod storage;
pub use storage::{Catalog, ImportReport, LinkOutcome};

/// Lookups, text search and gap analysis.
pub mod query;
pub use query::{Page, RequirementSelector, SearchQuery};

/// CSV interchange formats.
pub mod interchange;
