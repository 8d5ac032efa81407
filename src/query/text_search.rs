use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use tracing::debug;

use crate::{
    domain::{CatalogError, Document, ExternalId, NodeKind},
    storage::{Catalog, NodeFilter, RequirementFilter, State},
};

static EXTERNAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(?i:cre)[: ])?(\d{3}-\d{3})$").expect("valid regex"));

static REQUIREMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:cre)[: ](.+)$").expect("valid regex"));

static NODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(standard|tool|code)[: ](.+)$").expect("valid regex"));

/// The interpretation of a free-text query, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// `CRE:NNN-NNN`, `CRE NNN-NNN` or a bare `NNN-NNN`.
    ExternalId(ExternalId),
    /// `CRE:<name>` or `CRE <name>`.
    RequirementName(String),
    /// `<kind>:<tokens>`: up to three tokens matched against name, section
    /// and subsection in any order. Tokens that look like URLs match the
    /// hyperlink instead.
    Node {
        /// The node kind.
        kind: NodeKind,
        /// Name, section and subsection candidates.
        tokens: Vec<String>,
        /// Optional hyperlink.
        hyperlink: Option<String>,
    },
    /// Anything else: substring match over every field.
    Text(String),
}

impl SearchQuery {
    /// Classify a raw query.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let query = query.trim();

        if let Some(id) = EXTERNAL_ID
            .captures(query)
            .and_then(|c| ExternalId::new(&c[1]).ok())
        {
            return Self::ExternalId(id);
        }
        if let Some(captures) = REQUIREMENT_NAME.captures(query) {
            return Self::RequirementName(captures[1].trim().to_string());
        }
        if let Some(captures) = NODE.captures(query) {
            if let Ok(kind) = captures[1].parse() {
                let rest = &captures[2];
                let separator = if rest.contains(':') && !rest.contains("://") {
                    ':'
                } else {
                    ' '
                };
                let (hyperlinks, tokens): (Vec<String>, Vec<String>) = rest
                    .split(separator)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string)
                    .partition(|t| t.starts_with("http://") || t.starts_with("https://"));
                return Self::Node {
                    kind,
                    tokens: tokens.into_iter().take(3).collect(),
                    hyperlink: hyperlinks.into_iter().next(),
                };
            }
        }
        Self::Text(query.to_string())
    }
}

impl Catalog {
    /// Search by external id, requirement name, node coordinates or free
    /// text, in that order of priority.
    ///
    /// The first interpretation that finds anything wins; free-text search
    /// is the last resort. Results are de-duplicated and hydrated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn text_search(&self, query: &str) -> Result<Vec<Document>, CatalogError> {
        let parsed = SearchQuery::parse(query);
        debug!("Text search {query:?} parsed as {parsed:?}");
        let state = self.read();

        let found = match &parsed {
            SearchQuery::ExternalId(id) => state
                .store
                .get_requirements(&RequirementFilter::by_external_id(id.as_str()))?
                .into_iter()
                .map(Document::from)
                .collect(),
            SearchQuery::RequirementName(name) => state
                .store
                .get_requirements(&RequirementFilter::by_name(name.as_str()))?
                .into_iter()
                .map(Document::from)
                .collect(),
            SearchQuery::Node {
                kind,
                tokens,
                hyperlink,
            } => node_search(&state, *kind, tokens, hyperlink.as_deref())?,
            SearchQuery::Text(_) => Vec::new(),
        };

        let found = if found.is_empty() {
            let text = query.trim();
            if text.is_empty() {
                return Ok(Vec::new());
            }
            state
                .store
                .search_requirements(text)?
                .into_iter()
                .map(Document::from)
                .chain(state.store.search_nodes(text)?.into_iter().map(Document::from))
                .collect()
        } else {
            found
        };

        let mut seen = HashSet::new();
        found
            .into_iter()
            .filter(|document| seen.insert(document.vertex()))
            .map(|document| state.hydrate(document))
            .collect()
    }
}

fn node_search(
    state: &State,
    kind: NodeKind,
    tokens: &[String],
    hyperlink: Option<&str>,
) -> Result<Vec<Document>, CatalogError> {
    let mut found = Vec::new();
    for ordering in permutations(tokens) {
        let mut slots = ordering.into_iter();
        let filter = NodeFilter {
            name: slots.next(),
            section: slots.next(),
            subsection: slots.next(),
            hyperlink: hyperlink.map(ToString::to_string),
            kind: Some(kind),
            ..NodeFilter::default()
        };
        let (nodes, _) = state.store.get_nodes(&filter, None)?;
        found.extend(nodes.into_iter().map(Document::from));
    }
    Ok(found)
}

/// Every ordering of `items`. A single empty ordering for no items.
fn permutations(items: &[String]) -> Vec<Vec<String>> {
    if items.is_empty() {
        return vec![Vec::new()];
    }
    let mut result = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first.clone());
            result.push(tail);
        }
    }
    result
}
