//! Domain models for the catalog.
//!
//! This module contains the entity types (requirements and nodes), the link
//! relations between them, their error types, and configuration.

mod config;
pub use config::Config;

/// Entity sum type, links and graph vertex keys.
pub mod document;
pub use document::{Document, Link, VertexKey};

/// Catalog error kinds.
pub mod error;
pub use error::{CatalogError, ConflictError, ValidationError};

/// The `NNN-NNN` public requirement identifier.
pub mod external_id;
pub use external_id::ExternalId;

/// References to entries of external documents.
pub mod node;
pub use node::{Node, NodeDetail, NodeKind, ToolType};

/// Link relations.
pub mod relation;
pub use relation::Relation;

/// The canonical requirement entity.
pub mod requirement;
pub use requirement::Requirement;
