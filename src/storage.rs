//! Persistence and the in-memory graph.
//!
//! The [`EntityStore`] owns durable state, the [`GraphIndex`] mirrors its
//! links, and the [`Catalog`] keeps the two in step.

/// Store-then-index write coordination.
pub mod catalog;
pub use catalog::{Catalog, ImportReport, LinkOutcome, State};

/// SQLite-backed entity persistence.
pub mod entity_store;
pub use entity_store::{EntityStore, LinkKind, LinkRow, NodeFilter, PageRequest, RequirementFilter};

mod graph_index;
pub use graph_index::GraphIndex;
