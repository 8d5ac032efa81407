use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The typed label carried by a link between two entities.
///
/// The set is closed. Hierarchical and remediation/testing relations come in
/// inverse pairs; the remaining relations are symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Relation {
    /// Equivalent entries. Symmetric and non-hierarchical.
    Same,
    /// A general, human-curated cross reference.
    LinkedTo,
    /// The source is a child of the target.
    PartOf,
    /// The source is the parent of the target.
    Contains,
    /// Loosely related entries. Ignored when computing hierarchy roots.
    Related,
    /// A cross reference produced by an automated mapper.
    AutomaticallyLinkedTo,
    /// The source is remediated by the target.
    RemediatedBy,
    /// The source remediates the target.
    Remediates,
    /// The source is tested by the target.
    TestedBy,
    /// The source tests the target.
    Tests,
}

impl Relation {
    /// Every relation, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Same,
        Self::LinkedTo,
        Self::PartOf,
        Self::Contains,
        Self::Related,
        Self::AutomaticallyLinkedTo,
        Self::RemediatedBy,
        Self::Remediates,
        Self::TestedBy,
        Self::Tests,
    ];

    /// The relation as seen from the other end of the link.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::PartOf => Self::Contains,
            Self::Contains => Self::PartOf,
            Self::RemediatedBy => Self::Remediates,
            Self::Remediates => Self::RemediatedBy,
            Self::TestedBy => Self::Tests,
            Self::Tests => Self::TestedBy,
            Self::Same | Self::LinkedTo | Self::Related | Self::AutomaticallyLinkedTo => self,
        }
    }

    /// Whether this relation orders its endpoints in the requirement
    /// hierarchy.
    #[must_use]
    pub const fn is_hierarchical(self) -> bool {
        matches!(self, Self::Contains | Self::PartOf)
    }

    /// Whether the relation is its own inverse.
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        self.inverse() as u8 == self as u8
    }

    /// The canonical textual form used in storage and interchange files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Same => "SAME",
            Self::LinkedTo => "Linked To",
            Self::PartOf => "Is Part Of",
            Self::Contains => "Contains",
            Self::Related => "Related",
            Self::AutomaticallyLinkedTo => "Automatically Linked To",
            Self::RemediatedBy => "Remediated By",
            Self::Remediates => "Remediates",
            Self::TestedBy => "Tested By",
            Self::Tests => "Tests",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = UnknownRelationError;

    /// Parses a relation, ignoring case, whitespace and underscores so that
    /// `Linked To`, `linked_to` and `LinkedTo` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        let relation = match folded.as_str() {
            "same" => Self::Same,
            "linkedto" => Self::LinkedTo,
            "ispartof" | "partof" => Self::PartOf,
            "contains" => Self::Contains,
            "related" => Self::Related,
            "automaticallylinkedto" => Self::AutomaticallyLinkedTo,
            "remediatedby" => Self::RemediatedBy,
            "remediates" => Self::Remediates,
            "testedby" => Self::TestedBy,
            "tests" => Self::Tests,
            _ => return Err(UnknownRelationError(s.to_string())),
        };
        Ok(relation)
    }
}

impl TryFrom<String> for Relation {
    type Error = UnknownRelationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Relation> for String {
    fn from(value: Relation) -> Self {
        value.as_str().to_string()
    }
}

/// Error returned when a string names no known relation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown relation '{0}'")]
pub struct UnknownRelationError(pub String);
