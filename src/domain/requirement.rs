use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    document::{enrich_field, Link},
    error::ConflictError,
    ExternalId,
};

/// A canonical, stable-identified abstract security requirement.
///
/// Requirements are the hubs of the catalog: external entries link to the
/// requirement they implement, and requirements link to each other to form a
/// hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Opaque identity assigned on first insertion. Immutable afterwards.
    pub internal_id: Uuid,
    /// Public `NNN-NNN` identifier, if one has been assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<ExternalId>,
    /// Short title of the requirement.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Tags attached to the requirement.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// One-hop link closure, materialized on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

impl Requirement {
    /// Construct a new [`Requirement`] with the given name.
    ///
    /// A new internal id is automatically generated.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_with_uuid(name, Uuid::new_v4())
    }

    /// Construct a new [`Requirement`] with an explicit internal id.
    #[must_use]
    pub fn new_with_uuid(name: impl Into<String>, internal_id: Uuid) -> Self {
        Self {
            internal_id,
            external_id: None,
            name: name.into(),
            description: String::new(),
            tags: BTreeSet::new(),
            links: Vec::new(),
        }
    }

    /// Set the external id.
    #[must_use]
    pub fn with_external_id(mut self, external_id: ExternalId) -> Self {
        self.external_id = Some(external_id);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add tags to the requirement.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// The external id as a string slice, empty if unset.
    #[must_use]
    pub fn external_id_str(&self) -> &str {
        self.external_id.as_ref().map_or("", ExternalId::as_str)
    }

    /// A label suitable for log and error messages, e.g. `CRE 616-305 (Input
    /// validation)`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.external_id {
            Some(id) => format!("CRE {id} ({})", self.name),
            None => format!("CRE ({})", self.name),
        }
    }

    /// Fill empty fields of `self` from `incoming`.
    ///
    /// Fields are only ever filled, never emptied; tags are unioned. If a
    /// populated field would change, nothing is modified and a
    /// [`ConflictError`] is returned.
    ///
    /// Returns `true` if any field changed.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError`] on an attempted overwrite of a populated
    /// field.
    pub fn enrich(&mut self, incoming: &Self) -> Result<bool, ConflictError> {
        let label = self.label();
        let mut updated = self.clone();

        let mut external_id = updated.external_id_str().to_string();
        let mut changed = enrich_field(
            &label,
            "external_id",
            &mut external_id,
            incoming.external_id_str(),
        )?;
        if changed {
            updated.external_id = incoming.external_id.clone();
        }
        changed |= enrich_field(
            &label,
            "description",
            &mut updated.description,
            &incoming.description,
        )?;

        let before = updated.tags.len();
        updated.tags.extend(incoming.tags.iter().cloned());
        changed |= updated.tags.len() != before;

        *self = updated;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(s: &str) -> ExternalId {
        ExternalId::new(s).unwrap()
    }

    #[test]
    fn enrich_fills_empty_fields() {
        let mut stored = Requirement::new("Input validation");
        let incoming = Requirement::new("Input validation")
            .with_external_id(ext("111-111"))
            .with_description("validate all input")
            .with_tags(["web"]);

        assert!(stored.enrich(&incoming).unwrap());
        assert_eq!(stored.external_id, Some(ext("111-111")));
        assert_eq!(stored.description, "validate all input");
        assert!(stored.tags.contains("web"));
    }

    #[test]
    fn enrich_never_empties_a_field() {
        let mut stored = Requirement::new("Input validation").with_description("validate");
        let incoming = Requirement::new("Input validation");

        assert!(!stored.enrich(&incoming).unwrap());
        assert_eq!(stored.description, "validate");
    }

    #[test]
    fn enrich_keeps_internal_id() {
        let mut stored = Requirement::new("A");
        let id = stored.internal_id;
        stored
            .enrich(&Requirement::new("A").with_description("d"))
            .unwrap();
        assert_eq!(stored.internal_id, id);
    }

    #[test]
    fn enrich_rejects_overwrite_and_leaves_entity_untouched() {
        let mut stored = Requirement::new("A").with_external_id(ext("111-111"));
        let incoming = Requirement::new("A")
            .with_external_id(ext("222-222"))
            .with_description("new description");

        let error = stored.enrich(&incoming).unwrap_err();
        assert_eq!(error.field, "external_id");
        assert_eq!(error.existing, "111-111");
        assert_eq!(error.incoming, "222-222");
        assert!(stored.description.is_empty());
    }
}
