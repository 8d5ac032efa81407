use std::io;

use thiserror::Error;

use crate::domain::{
    document::VertexKey, external_id::InvalidExternalIdError, relation::UnknownRelationError,
};

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The input was malformed. Never retried.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An entity referenced by a link or query does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// An attempt to overwrite a populated field with a different value.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The persisted hierarchy already contains a `Contains` cycle.
    ///
    /// The catalog refuses to serve writes once this is detected.
    #[error("persisted hierarchy contains a cycle: {}", format_cycle(.cycle))]
    FatalState {
        /// Vertices on the offending cycle.
        cycle: Vec<VertexKey>,
    },

    /// The underlying database failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Reading or writing a file failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Malformed input rejected before touching the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// An external id was not of the form `NNN-NNN`.
    #[error(transparent)]
    ExternalId(#[from] InvalidExternalIdError),

    /// A relation name was not recognised.
    #[error(transparent)]
    Relation(#[from] UnknownRelationError),

    /// A lookup was issued without any non-empty filter key.
    #[error("at least one filter key must be non-empty")]
    EmptyFilter,

    /// An entity was submitted without a name.
    #[error("entity name must not be empty")]
    EmptyName,

    /// A node kind was not one of `Standard`, `Tool` or `Code`.
    #[error("unknown node kind '{0}'")]
    NodeKind(String),

    /// A tool type was not recognised.
    #[error("unknown tool type '{0}'")]
    ToolType(String),

    /// Nodes never link directly to other nodes.
    #[error("nodes cannot be linked to other nodes")]
    NodeToNode,

    /// An interchange file had an unusable header or cell.
    #[error("malformed table: {0}")]
    Table(String),
}

/// An attempted overwrite of a populated field with a different value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("conflict on {entity}: field '{field}' is '{existing}', refusing to overwrite with '{incoming}'")]
pub struct ConflictError {
    /// Human-readable name of the entity being enriched.
    pub entity: String,
    /// The field that would have been overwritten.
    pub field: &'static str,
    /// The stored value.
    pub existing: String,
    /// The rejected incoming value.
    pub incoming: String,
}

/// Render a cycle as `a -> b -> c`.
pub(crate) fn format_cycle(cycle: &[VertexKey]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
