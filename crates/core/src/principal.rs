//! The authenticated caller.

use fhir::{Identifier, Reference};

/// An authenticated caller, identified by the organisation identifiers its credentials carry.
///
/// Two principals are the same party when their identifier sets intersect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    organizations: Vec<Identifier>,
}

impl Principal {
    pub fn new(organizations: Vec<Identifier>) -> Self {
        Self { organizations }
    }

    pub fn organization(identifier: Identifier) -> Self {
        Self::new(vec![identifier])
    }

    pub fn organizations(&self) -> &[Identifier] {
        &self.organizations
    }

    /// The identifier used when the principal has to be written into a resource.
    pub fn primary_identifier(&self) -> Option<&Identifier> {
        self.organizations.first()
    }

    /// Logical reference to the principal's primary organisation.
    pub fn organization_reference(&self) -> Option<Reference> {
        self.primary_identifier()
            .cloned()
            .map(Reference::organization)
    }

    pub fn has_identifier(&self, identifier: &Identifier) -> bool {
        self.organizations.iter().any(|own| own.matches(identifier))
    }

    /// Whether `reference` identifies one of the principal's organisations.
    pub fn is_referenced_by(&self, reference: &Reference) -> bool {
        reference
            .identifier
            .as_ref()
            .is_some_and(|identifier| self.has_identifier(identifier))
    }

    pub fn is_any_of(&self, identifiers: &[Identifier]) -> bool {
        identifiers.iter().any(|id| self.has_identifier(id))
    }
}
