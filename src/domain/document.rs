//! The sum type over catalog entities and the links between them.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    error::{ConflictError, ValidationError},
    Node, Relation, Requirement,
};

/// Identity of an entity as a vertex of the catalog graph.
///
/// Displayed as `CRE:<uuid>` or `Node:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexKey {
    /// A requirement vertex.
    Requirement(Uuid),
    /// A node vertex.
    Node(Uuid),
}

impl VertexKey {
    /// The UUID of the entity.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::Requirement(id) | Self::Node(id) => id,
        }
    }

    /// Whether the vertex is a requirement.
    #[must_use]
    pub const fn is_requirement(self) -> bool {
        matches!(self, Self::Requirement(_))
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Requirement(id) => write!(f, "CRE:{id}"),
            Self::Node(id) => write!(f, "Node:{id}"),
        }
    }
}

impl FromStr for VertexKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::Table(format!("invalid vertex key '{s}'"));
        let (prefix, id) = s.split_once(':').ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        match prefix {
            "CRE" => Ok(Self::Requirement(id)),
            "Node" => Ok(Self::Node(id)),
            _ => Err(invalid()),
        }
    }
}

/// A directed, relation-typed edge as seen from the entity that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// How the holding entity relates to `document`.
    #[serde(rename = "ltype")]
    pub relation: Relation,
    /// The peer entity. Peers are never hydrated with their own links.
    pub document: Document,
}

impl Link {
    /// Create a link to the given peer.
    #[must_use]
    pub const fn new(relation: Relation, document: Document) -> Self {
        Self { relation, document }
    }
}

/// Any entity of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doctype")]
pub enum Document {
    /// A common requirement.
    #[serde(rename = "CRE")]
    Requirement(Requirement),
    /// A reference to an external document entry.
    Node(Node),
}

impl Document {
    /// The entity's graph vertex.
    #[must_use]
    pub const fn vertex(&self) -> VertexKey {
        match self {
            Self::Requirement(r) => VertexKey::Requirement(r.internal_id),
            Self::Node(n) => VertexKey::Node(n.id),
        }
    }

    /// The entity's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Requirement(r) => &r.name,
            Self::Node(n) => &n.name,
        }
    }

    /// The entity's tags.
    #[must_use]
    pub const fn tags(&self) -> &BTreeSet<String> {
        match self {
            Self::Requirement(r) => &r.tags,
            Self::Node(n) => &n.tags,
        }
    }

    /// The entity's materialized links.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        match self {
            Self::Requirement(r) => &r.links,
            Self::Node(n) => &n.links,
        }
    }

    /// Mutable access to the entity's materialized links.
    pub fn links_mut(&mut self) -> &mut Vec<Link> {
        match self {
            Self::Requirement(r) => &mut r.links,
            Self::Node(n) => &mut n.links,
        }
    }

    /// A label suitable for log and error messages.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Requirement(r) => r.label(),
            Self::Node(n) => n.label(),
        }
    }

    /// The requirement, if this is one.
    #[must_use]
    pub const fn as_requirement(&self) -> Option<&Requirement> {
        match self {
            Self::Requirement(r) => Some(r),
            Self::Node(_) => None,
        }
    }

    /// The node, if this is one.
    #[must_use]
    pub const fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(n) => Some(n),
            Self::Requirement(_) => None,
        }
    }

    /// A copy of the entity without its links.
    #[must_use]
    pub fn shallow(&self) -> Self {
        match self {
            Self::Requirement(r) => Self::Requirement(Requirement {
                links: Vec::new(),
                ..r.clone()
            }),
            Self::Node(n) => Self::Node(Node {
                links: Vec::new(),
                ..n.clone()
            }),
        }
    }

    /// Add a link unless an identical one is already present.
    ///
    /// Peers are compared by name and kind-specific identity rather than by
    /// internal id, so that links decoded from a file (where ids are not yet
    /// assigned) de-duplicate.
    ///
    /// Returns `true` if the link was added.
    pub fn add_link(&mut self, link: Link) -> bool {
        let present = self
            .links()
            .iter()
            .any(|l| l.relation == link.relation && same_entity(&l.document, &link.document));
        if !present {
            self.links_mut().push(link);
        }
        !present
    }

    /// Keep only links whose peer name or external id is in `include_only`.
    ///
    /// An empty filter keeps everything.
    pub fn retain_links(&mut self, include_only: &[String]) {
        if include_only.is_empty() {
            return;
        }
        self.links_mut().retain(|link| {
            include_only.iter().any(|wanted| {
                link.document.name() == wanted
                    || link
                        .document
                        .as_requirement()
                        .is_some_and(|r| r.external_id_str() == wanted)
            })
        });
    }
}

/// Whether two documents denote the same entity by their natural keys.
#[must_use]
pub fn same_entity(a: &Document, b: &Document) -> bool {
    match (a, b) {
        (Document::Requirement(a), Document::Requirement(b)) => {
            a.internal_id == b.internal_id
                || (a.name == b.name && a.external_id_str() == b.external_id_str())
        }
        (Document::Node(a), Document::Node(b)) => a.id == b.id || a.key() == b.key(),
        _ => false,
    }
}

impl From<Requirement> for Document {
    fn from(value: Requirement) -> Self {
        Self::Requirement(value)
    }
}

impl From<Node> for Document {
    fn from(value: Node) -> Self {
        Self::Node(value)
    }
}

/// Fill `stored` from `incoming` if it is empty.
///
/// Returns `true` if `stored` changed.
pub(crate) fn enrich_field(
    entity: &str,
    field: &'static str,
    stored: &mut String,
    incoming: &str,
) -> Result<bool, ConflictError> {
    if incoming.is_empty() || stored == incoming {
        Ok(false)
    } else if stored.is_empty() {
        incoming.clone_into(stored);
        Ok(true)
    } else {
        Err(ConflictError {
            entity: entity.to_string(),
            field,
            existing: stored.clone(),
            incoming: incoming.to_string(),
        })
    }
}
