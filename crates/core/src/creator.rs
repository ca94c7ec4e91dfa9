//! The creator marker: an extension recording which organisation created a resource.

use crate::constants::CREATOR_EXTENSION_URL;
use crate::principal::Principal;
use crate::{CoordinationError, CoordinationResult};
use fhir::{Extension, FhirResource, Reference};

/// The organisation recorded as creator, if any.
pub fn creator_of<R: FhirResource>(resource: &R) -> Option<&Reference> {
    resource
        .extension(CREATOR_EXTENSION_URL)
        .and_then(|e| e.value_reference.as_ref())
}

/// Marks `principal` as the creator, replacing whatever marker the client sent.
pub fn set_creator<R: FhirResource>(
    resource: &mut R,
    principal: &Principal,
) -> CoordinationResult<()> {
    let reference = principal.organization_reference().ok_or_else(|| {
        CoordinationError::InvalidInput("principal has no organization identifier".into())
    })?;
    resource.set_extension(Extension::with_reference(CREATOR_EXTENSION_URL, reference));
    Ok(())
}

/// Copies the creator marker of `existing` onto `incoming`, dropping any marker it carried.
pub fn carry_forward_creator<R: FhirResource>(existing: &R, incoming: &mut R) {
    incoming.remove_extension(CREATOR_EXTENSION_URL);
    if let Some(marker) = existing.extension(CREATOR_EXTENSION_URL) {
        incoming.set_extension(marker.clone());
    }
}
