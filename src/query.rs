//! Read operations over a [`Catalog`].
//!
//! Every entity returned here is hydrated with its one-hop link closure; the
//! peers inside `links` are never hydrated themselves.

use std::fmt;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{
    domain::{
        CatalogError, Document, ExternalId, Node, NodeKind, Requirement, ValidationError, VertexKey,
    },
    storage::{Catalog, NodeFilter, PageRequest, RequirementFilter},
};

mod gap_analysis;
mod text_search;

pub use text_search::SearchQuery;

/// How to pick a single requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementSelector {
    /// By the public `NNN-NNN` id.
    ExternalId(ExternalId),
    /// By exact name.
    Name(String),
    /// By internal id.
    InternalId(Uuid),
}

impl RequirementSelector {
    fn filter(&self) -> RequirementFilter {
        match self {
            Self::ExternalId(id) => RequirementFilter::by_external_id(id.as_str()),
            Self::Name(name) => RequirementFilter::by_name(name.as_str()),
            Self::InternalId(id) => RequirementFilter::by_internal_id(*id),
        }
    }
}

impl fmt::Display for RequirementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalId(id) => write!(f, "CRE {id}"),
            Self::Name(name) => write!(f, "'{name}'"),
            Self::InternalId(id) => write!(f, "{id}"),
        }
    }
}

/// One page of a paginated lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Number of pages available.
    pub total_pages: usize,
    /// The 1-indexed page returned.
    pub page: usize,
    /// Entries on this page. Empty past the last page.
    pub items: Vec<T>,
}

impl Catalog {
    /// Fetch one requirement with its links.
    ///
    /// With a non-empty `include_only`, only links whose peer name or
    /// external id is listed are attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn find_requirement(
        &self,
        selector: &RequirementSelector,
        include_only: &[String],
    ) -> Result<Option<Requirement>, CatalogError> {
        let state = self.read();
        let Some(found) = state
            .store
            .get_requirements(&selector.filter())?
            .into_iter()
            .next()
        else {
            debug!("No requirement for {selector:?}");
            return Ok(None);
        };

        let mut document = state.hydrate(found.into())?;
        document.retain_links(include_only);
        Ok(match document {
            Document::Requirement(requirement) => Some(requirement),
            Document::Node(_) => None,
        })
    }

    /// Fetch a page of nodes of `kind` matching `filter`.
    ///
    /// `page` defaults to 1 and `per_page` to the configured page size.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyFilter`] if `filter` has no non-empty key
    ///   besides the kind.
    /// - [`CatalogError::Storage`] if the store cannot be read.
    pub fn find_nodes(
        &self,
        kind: NodeKind,
        filter: NodeFilter,
        page: Option<usize>,
        per_page: Option<usize>,
        include_only: &[String],
    ) -> Result<Page<Node>, CatalogError> {
        let request = PageRequest {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or_else(|| self.items_per_page()).max(1),
        };
        let filter = NodeFilter {
            kind: None,
            ..filter
        };
        if filter.is_empty() {
            return Err(ValidationError::EmptyFilter.into());
        }
        let filter = NodeFilter {
            kind: Some(kind),
            ..filter
        };

        let state = self.read();
        let (nodes, total_pages) = state.store.get_nodes(&filter, Some(request))?;
        let mut items = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut document = state.hydrate(node.into())?;
            document.retain_links(include_only);
            if let Document::Node(node) = document {
                items.push(node);
            }
        }

        Ok(Page {
            total_pages: total_pages.unwrap_or_default(),
            page: request.page,
            items,
        })
    }

    /// Every entity carrying all of `tags`, each as a substring of one of its
    /// tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn find_by_tags(&self, tags: &[String]) -> Result<Vec<Document>, CatalogError> {
        let state = self.read();
        state
            .store
            .tagged(tags)?
            .into_iter()
            .map(|document| state.hydrate(document))
            .collect()
    }

    /// Requirements at the top of the `Contains` hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn root_requirements(&self) -> Result<Vec<Requirement>, CatalogError> {
        let state = self.read();
        let mut roots = Vec::new();
        for id in state.index.root_requirements() {
            if let Some(requirement) = state.store.requirement(id)? {
                if let Document::Requirement(requirement) = state.hydrate(requirement.into())? {
                    roots.push(requirement);
                }
            }
        }
        roots.sort_by(|a, b| {
            (a.external_id_str(), &a.name).cmp(&(b.external_id_str(), &b.name))
        });
        Ok(roots)
    }

    /// Number of `Contains` steps between the nearest root and the
    /// requirement.
    ///
    /// Zero for roots and for requirements no root reaches.
    #[must_use]
    pub fn hierarchy_depth(&self, requirement: Uuid) -> usize {
        self.read().index.hierarchy_depth(requirement)
    }

    /// Whether two entities are connected, ignoring link direction.
    #[must_use]
    pub fn has_path(&self, a: VertexKey, b: VertexKey) -> bool {
        self.read().index.has_path(a, b)
    }

    /// Resolve a node by `section_id`, or failing that by `section`, and
    /// return its hyperlink.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn smartlink(
        &self,
        kind: NodeKind,
        name: &str,
        selector: &str,
    ) -> Result<Option<String>, CatalogError> {
        if name.is_empty() || selector.is_empty() {
            return Ok(None);
        }
        let state = self.read();
        let by_section_id = NodeFilter {
            kind: Some(kind),
            section_id: Some(selector.to_string()),
            ..NodeFilter::by_name(name)
        };
        let by_section = NodeFilter {
            kind: Some(kind),
            section: Some(selector.to_string()),
            ..NodeFilter::by_name(name)
        };

        for filter in [by_section_id, by_section] {
            let (nodes, _) = state.store.get_nodes(&filter, None)?;
            if let Some(node) = nodes.into_iter().find(|n| !n.hyperlink.is_empty()) {
                debug!("Smartlink {kind}:{name}:{selector} -> {}", node.hyperlink);
                return Ok(Some(node.hyperlink));
            }
        }
        Ok(None)
    }
}
