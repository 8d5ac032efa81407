use std::{fmt, ops::Deref, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}-\d{3}$").expect("pattern is valid"));

/// The stable public identifier of a common requirement.
///
/// Format: two groups of three digits separated by a hyphen, e.g. `764-507`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId(String);

impl ExternalId {
    /// Creates a new `ExternalId`, validating the `NNN-NNN` format.
    ///
    /// Surrounding whitespace is trimmed before validation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidExternalIdError`] if the string does not match.
    pub fn new(s: &str) -> Result<Self, InvalidExternalIdError> {
        let trimmed = s.trim();
        if PATTERN.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidExternalIdError(s.to_string()))
        }
    }

    /// Returns `true` if the string is a well-formed external id.
    #[must_use]
    pub fn is_valid(s: &str) -> bool {
        PATTERN.is_match(s.trim())
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ExternalId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for ExternalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ExternalId {
    type Err = InvalidExternalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ExternalId {
    type Error = InvalidExternalIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl TryFrom<&str> for ExternalId {
    type Error = InvalidExternalIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExternalId> for String {
    fn from(value: ExternalId) -> Self {
        value.0
    }
}

/// Error returned when a string is not of the form `NNN-NNN`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid external id '{0}': expected two groups of three digits, e.g. '123-456'")]
pub struct InvalidExternalIdError(pub String);
