use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    document::{enrich_field, Link},
    error::{ConflictError, ValidationError},
};

/// The kind of external document a [`Node`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A section of a standard or guidance document.
    Standard,
    /// A rule in a security tool.
    Tool,
    /// A snippet or module of source code.
    Code,
}

impl NodeKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 3] = [Self::Standard, Self::Tool, Self::Code];

    /// The textual form used in storage, queries and interchange headers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::Tool => "Tool",
            Self::Code => "Code",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::NodeKind(s.to_string()))
    }
}

/// The purpose of a security tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolType {
    /// Attack tooling, e.g. scanners and fuzzers.
    Offensive,
    /// Protective tooling, e.g. firewalls and linters.
    Defensive,
    /// Educational material.
    Training,
    /// Not known. Treated as an empty field for enrichment.
    #[default]
    Unknown,
}

impl ToolType {
    /// The textual form used in storage and interchange files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offensive => "Offensive",
            Self::Defensive => "Defensive",
            Self::Training => "Training",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = ValidationError;

    /// An empty string parses as [`ToolType::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Unknown);
        }
        [
            Self::Offensive,
            Self::Defensive,
            Self::Training,
            Self::Unknown,
        ]
        .into_iter()
        .find(|tool_type| tool_type.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ValidationError::ToolType(s.to_string()))
    }
}

/// Kind-specific attributes of a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDetail {
    /// A section of a standard.
    Standard {
        /// Section title.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        section: String,
        /// Subsection title.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        subsection: String,
        /// Identifier of the section within the standard, e.g. `V5.1.1`.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        section_id: String,
        /// Version of the standard.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        version: String,
    },
    /// A rule of a tool.
    Tool {
        /// Identifier of the rule within the tool.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        rule_id: String,
        /// What the tool is for.
        #[serde(default)]
        tool_type: ToolType,
        /// Free-text description.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
    },
    /// A piece of code.
    Code {
        /// Free-text description.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
    },
}

impl NodeDetail {
    /// Empty attributes for the given kind.
    #[must_use]
    pub const fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Standard => Self::Standard {
                section: String::new(),
                subsection: String::new(),
                section_id: String::new(),
                version: String::new(),
            },
            NodeKind::Tool => Self::Tool {
                rule_id: String::new(),
                tool_type: ToolType::Unknown,
                description: String::new(),
            },
            NodeKind::Code => Self::Code {
                description: String::new(),
            },
        }
    }

    /// The kind these attributes belong to.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Standard { .. } => NodeKind::Standard,
            Self::Tool { .. } => NodeKind::Tool,
            Self::Code { .. } => NodeKind::Code,
        }
    }
}

/// A reference to an entry in an external document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque identity assigned on first insertion.
    pub id: Uuid,
    /// Name of the external document, e.g. `ASVS` or `ZAP`.
    pub name: String,
    /// Where the entry can be read. Exempt from uniqueness and overwritable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hyperlink: String,
    /// Tags attached to the node.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Kind-specific attributes.
    #[serde(flatten)]
    pub detail: NodeDetail,
    /// One-hop link closure, materialized on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

/// The attributes that identify a node for uniqueness purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey<'a> {
    /// Document name.
    pub name: &'a str,
    /// Section, or rule id for tools.
    pub section: &'a str,
    /// Subsection.
    pub subsection: &'a str,
    /// Node kind.
    pub kind: NodeKind,
    /// Description.
    pub description: &'a str,
    /// Version.
    pub version: &'a str,
}

impl Node {
    /// Construct a node of the given kind with empty attributes.
    ///
    /// A new id is automatically generated.
    #[must_use]
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self::with_detail(name, NodeDetail::empty(kind))
    }

    /// Construct a node from its attributes.
    #[must_use]
    pub fn with_detail(name: impl Into<String>, detail: NodeDetail) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            hyperlink: String::new(),
            tags: BTreeSet::new(),
            detail,
            links: Vec::new(),
        }
    }

    /// Construct a standard section.
    #[must_use]
    pub fn standard(
        name: impl Into<String>,
        section: impl Into<String>,
        subsection: impl Into<String>,
    ) -> Self {
        Self::with_detail(
            name,
            NodeDetail::Standard {
                section: section.into(),
                subsection: subsection.into(),
                section_id: String::new(),
                version: String::new(),
            },
        )
    }

    /// Construct a tool rule.
    #[must_use]
    pub fn tool(name: impl Into<String>, rule_id: impl Into<String>, tool_type: ToolType) -> Self {
        Self::with_detail(
            name,
            NodeDetail::Tool {
                rule_id: rule_id.into(),
                tool_type,
                description: String::new(),
            },
        )
    }

    /// Construct a code reference.
    #[must_use]
    pub fn code(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_detail(
            name,
            NodeDetail::Code {
                description: description.into(),
            },
        )
    }

    /// Set the hyperlink.
    #[must_use]
    pub fn with_hyperlink(mut self, hyperlink: impl Into<String>) -> Self {
        self.hyperlink = hyperlink.into();
        self
    }

    /// Set the section id. Ignored for non-standard nodes.
    #[must_use]
    pub fn with_section_id(mut self, id: impl Into<String>) -> Self {
        if let NodeDetail::Standard { section_id, .. } = &mut self.detail {
            *section_id = id.into();
        }
        self
    }

    /// Set the version. Ignored for non-standard nodes.
    #[must_use]
    pub fn with_version(mut self, v: impl Into<String>) -> Self {
        if let NodeDetail::Standard { version, .. } = &mut self.detail {
            *version = v.into();
        }
        self
    }

    /// Add tags to the node.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// The kind of document this node refers to.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.detail.kind()
    }

    /// Section of a standard, or rule id of a tool.
    #[must_use]
    pub fn section(&self) -> &str {
        match &self.detail {
            NodeDetail::Standard { section, .. } => section,
            NodeDetail::Tool { rule_id, .. } => rule_id,
            NodeDetail::Code { .. } => "",
        }
    }

    /// Subsection of a standard.
    #[must_use]
    pub fn subsection(&self) -> &str {
        match &self.detail {
            NodeDetail::Standard { subsection, .. } => subsection,
            NodeDetail::Tool { .. } | NodeDetail::Code { .. } => "",
        }
    }

    /// Section id of a standard.
    #[must_use]
    pub fn section_id(&self) -> &str {
        match &self.detail {
            NodeDetail::Standard { section_id, .. } => section_id,
            NodeDetail::Tool { .. } | NodeDetail::Code { .. } => "",
        }
    }

    /// Version of a standard.
    #[must_use]
    pub fn version(&self) -> &str {
        match &self.detail {
            NodeDetail::Standard { version, .. } => version,
            NodeDetail::Tool { .. } | NodeDetail::Code { .. } => "",
        }
    }

    /// Description of a tool rule or code reference.
    #[must_use]
    pub fn description(&self) -> &str {
        match &self.detail {
            NodeDetail::Tool { description, .. } | NodeDetail::Code { description } => {
                description
            }
            NodeDetail::Standard { .. } => "",
        }
    }

    /// Tool type of a tool rule.
    #[must_use]
    pub const fn tool_type(&self) -> Option<ToolType> {
        match &self.detail {
            NodeDetail::Tool { tool_type, .. } => Some(*tool_type),
            NodeDetail::Standard { .. } | NodeDetail::Code { .. } => None,
        }
    }

    /// The uniqueness tuple `(name, section, subsection, kind, description,
    /// version)`.
    #[must_use]
    pub fn key(&self) -> NodeKey<'_> {
        NodeKey {
            name: &self.name,
            section: self.section(),
            subsection: self.subsection(),
            kind: self.kind(),
            description: self.description(),
            version: self.version(),
        }
    }

    /// A label suitable for log and error messages.
    #[must_use]
    pub fn label(&self) -> String {
        let mut label = format!("{} {}", self.kind(), self.name);
        for part in [self.section(), self.subsection()] {
            if !part.is_empty() {
                label.push(':');
                label.push_str(part);
            }
        }
        label
    }

    /// Merge attributes outside the uniqueness tuple from `incoming`.
    ///
    /// The hyperlink is overwritten whenever `incoming` carries one. Other
    /// attributes are only filled when empty; tags are unioned.
    ///
    /// Returns `true` if any field changed.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError`] if a populated section id or tool type would
    /// change. Nothing is modified in that case.
    pub fn enrich(&mut self, incoming: &Self) -> Result<bool, ConflictError> {
        let label = self.label();
        let mut updated = self.clone();
        let mut changed = false;

        match (&mut updated.detail, &incoming.detail) {
            (
                NodeDetail::Standard { section_id, .. },
                NodeDetail::Standard {
                    section_id: incoming_section_id,
                    ..
                },
            ) => {
                changed |= enrich_field(&label, "section_id", section_id, incoming_section_id)?;
            }
            (
                NodeDetail::Tool { tool_type, .. },
                NodeDetail::Tool {
                    tool_type: incoming_tool_type,
                    ..
                },
            ) => {
                if *incoming_tool_type != ToolType::Unknown && *tool_type != *incoming_tool_type {
                    if *tool_type != ToolType::Unknown {
                        return Err(ConflictError {
                            entity: label,
                            field: "tool_type",
                            existing: tool_type.to_string(),
                            incoming: incoming_tool_type.to_string(),
                        });
                    }
                    *tool_type = *incoming_tool_type;
                    changed = true;
                }
            }
            _ => {}
        }

        if !incoming.hyperlink.is_empty() && updated.hyperlink != incoming.hyperlink {
            updated.hyperlink.clone_from(&incoming.hyperlink);
            changed = true;
        }

        let before = updated.tags.len();
        updated.tags.extend(incoming.tags.iter().cloned());
        changed |= updated.tags.len() != before;

        *self = updated;
        Ok(changed)
    }
}
