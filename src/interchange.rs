//! Row-oriented interchange formats.
//!
//! Both formats are rectangular tables whose schema depends on the data:
//! every external document gets its own group of `<kind>:<name>:<attribute>`
//! columns.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use tracing::warn;

use crate::domain::{
    CatalogError, Document, Node, NodeDetail, NodeKind, Relation, ToolType, ValidationError,
};

/// The flat export format.
pub mod export;
pub use export::{decode, encode};

/// The indented-outline format.
pub mod hierarchy;
pub use hierarchy::{decode_hierarchy, parse_standards};

mod table;
pub use table::Table;

/// The attribute part of a `<kind>:<name>:<attribute>` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    /// Section, or rule id for tools.
    Section,
    /// Subsection.
    Subsection,
    /// Section id.
    SectionId,
    /// Hyperlink.
    Hyperlink,
    /// Relation from the row's requirement to the node.
    LinkType,
    /// Description.
    Description,
    /// Tool type.
    ToolType,
}

impl Attribute {
    const ALL: [Self; 7] = [
        Self::Section,
        Self::Subsection,
        Self::SectionId,
        Self::Hyperlink,
        Self::LinkType,
        Self::Description,
        Self::ToolType,
    ];

    /// The reserved column suffix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Subsection => "subsection",
            Self::SectionId => "section_id",
            Self::Hyperlink => "hyperlink",
            Self::LinkType => "link_type",
            Self::Description => "description",
            Self::ToolType => "tool_type",
        }
    }

    /// The columns written for each kind of node, in header order.
    #[must_use]
    pub const fn for_kind(kind: NodeKind) -> &'static [Self] {
        match kind {
            NodeKind::Standard => &[
                Self::Section,
                Self::Subsection,
                Self::SectionId,
                Self::Hyperlink,
                Self::LinkType,
            ],
            NodeKind::Tool => &[
                Self::Section,
                Self::Hyperlink,
                Self::LinkType,
                Self::Description,
                Self::ToolType,
            ],
            NodeKind::Code => &[Self::Hyperlink, Self::LinkType, Self::Description],
        }
    }

    /// The value of this attribute on `node`. Link types are not node
    /// attributes and read as empty.
    #[must_use]
    pub fn of(self, node: &Node) -> &str {
        match self {
            Self::Section => node.section(),
            Self::Subsection => node.subsection(),
            Self::SectionId => node.section_id(),
            Self::Hyperlink => &node.hyperlink,
            Self::Description => node.description(),
            Self::ToolType => match node.tool_type() {
                Some(ToolType::Unknown) | None => "",
                Some(tool_type) => tool_type.as_str(),
            },
            Self::LinkType => "",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ValidationError::Table(format!("unknown attribute '{s}'")))
    }
}

/// The `(kind, name)` pair identifying a group of node columns.
pub type GroupKey = (NodeKind, String);

/// Format a node column header.
#[must_use]
pub fn node_header(kind: NodeKind, name: &str, attribute: Attribute) -> String {
    format!("{kind}:{name}:{attribute}")
}

/// Split a `<kind>:<name>:<attribute>` header.
///
/// Returns `Ok(None)` for headers that do not start with a node kind.
///
/// # Errors
///
/// Returns [`ValidationError::Table`] for a node header with a missing name
/// or an unknown attribute.
pub fn parse_node_header(
    header: &str,
) -> Result<Option<(NodeKind, String, Attribute)>, ValidationError> {
    let Some((kind, rest)) = header.split_once(':') else {
        return Ok(None);
    };
    let Ok(kind) = kind.parse::<NodeKind>() else {
        return Ok(None);
    };
    let (name, attribute) = rest
        .rsplit_once(':')
        .filter(|(name, _)| !name.trim().is_empty())
        .ok_or_else(|| ValidationError::Table(format!("malformed node column '{header}'")))?;
    Ok(Some((kind, name.trim().to_string(), attribute.trim().parse()?)))
}

/// Column positions of every node group in a header row.
pub(crate) fn node_groups(
    headers: &[String],
) -> Result<BTreeMap<GroupKey, BTreeMap<Attribute, usize>>, ValidationError> {
    let mut groups: BTreeMap<GroupKey, BTreeMap<Attribute, usize>> = BTreeMap::new();
    for (position, header) in headers.iter().enumerate() {
        if let Some((kind, name, attribute)) = parse_node_header(header)? {
            groups
                .entry((kind, name))
                .or_default()
                .insert(attribute, position);
        }
    }
    Ok(groups)
}

/// Build a node of `kind` named `name` from attribute values.
///
/// # Errors
///
/// Returns [`ValidationError::ToolType`] for an unknown tool type.
pub(crate) fn build_node<'a>(
    kind: NodeKind,
    name: &str,
    value: impl Fn(Attribute) -> &'a str,
) -> Result<Node, ValidationError> {
    let detail = match kind {
        NodeKind::Standard => NodeDetail::Standard {
            section: value(Attribute::Section).to_string(),
            subsection: value(Attribute::Subsection).to_string(),
            section_id: value(Attribute::SectionId).to_string(),
            version: String::new(),
        },
        NodeKind::Tool => NodeDetail::Tool {
            rule_id: value(Attribute::Section).to_string(),
            tool_type: value(Attribute::ToolType).parse()?,
            description: value(Attribute::Description).to_string(),
        },
        NodeKind::Code => NodeDetail::Code {
            description: value(Attribute::Description).to_string(),
        },
    };
    Ok(Node::with_detail(name, detail).with_hyperlink(value(Attribute::Hyperlink)))
}

/// Parse a link type cell, defaulting to `default` when empty.
pub(crate) fn link_type(cell: &str, default: Relation) -> Result<Relation, ValidationError> {
    if cell.is_empty() {
        Ok(default)
    } else {
        Ok(cell.parse()?)
    }
}

/// The outcome of decoding a table.
///
/// A row that cannot be decoded, or that disagrees with an earlier row on a
/// requirement's own fields, is skipped and reported; the other rows are
/// still decoded.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Documents in first-seen order, merged on their natural key.
    pub documents: Vec<Document>,
    /// Skipped rows, numbered from 1 for the first row below the header.
    pub failures: Vec<(usize, CatalogError)>,
}

/// Documents in first-seen order, merged on their natural key.
#[derive(Default)]
pub(crate) struct Merged {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
    failures: Vec<(usize, CatalogError)>,
}

impl Merged {
    /// Merge the documents decoded from data row `row`, or record why the row
    /// was skipped.
    ///
    /// Documents are merged in order; a conflict drops that document and
    /// the rest of the row.
    pub(crate) fn row(&mut self, row: usize, decoded: Result<Vec<Document>, CatalogError>) {
        let result =
            decoded.and_then(|documents| documents.into_iter().try_for_each(|d| self.add(d)));
        if let Err(e) = result {
            self.fail(row, e);
        }
    }

    pub(crate) fn fail(&mut self, row: usize, error: CatalogError) {
        warn!("Skipping row {row}: {error}");
        self.failures.push((row, error));
    }

    fn add(&mut self, document: Document) -> Result<(), CatalogError> {
        let key = merge_key(&document);
        let Some(&position) = self.positions.get(&key) else {
            self.positions.insert(key, self.documents.len());
            self.documents.push(document);
            return Ok(());
        };

        let existing = &mut self.documents[position];
        match (&mut *existing, &document) {
            (Document::Requirement(a), Document::Requirement(b)) => {
                a.enrich(b)?;
            }
            (Document::Node(a), Document::Node(b)) => {
                a.enrich(b)?;
            }
            _ => {}
        }
        for link in document.links() {
            existing.add_link(link.clone());
        }
        Ok(())
    }

    pub(crate) fn into_decoded(self) -> Decoded {
        Decoded {
            documents: self.documents,
            failures: self.failures,
        }
    }
}

fn merge_key(document: &Document) -> String {
    match document {
        Document::Requirement(r) if r.external_id.is_some() => {
            format!("CRE:id:{}", r.external_id_str())
        }
        Document::Requirement(r) => format!("CRE:name:{}", r.name),
        Document::Node(n) => {
            let key = n.key();
            [
                key.kind.as_str(),
                key.name,
                key.section,
                key.subsection,
                key.description,
                key.version,
            ]
            .join("\u{1f}")
        }
    }
}
