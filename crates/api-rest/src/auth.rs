//! Transport authentication.
//!
//! Credentials are checked by whatever terminates the connection; this module only validates
//! the shared API key and reads which organisation the caller acts for.

use crate::error::ApiError;
use axum::http::HeaderMap;
use carelink_core::Principal;
use fhir::Identifier;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ORGANIZATION_HEADER: &str = "x-organization-identifier";

/// Validates the provided API key against the key configured at startup.
///
/// Returns `Ok(())` if the key is valid, or an error if invalid or missing.
pub fn validate_api_key(headers: &HeaderMap, expected_key: &str) -> Result<(), ApiError> {
    let provided_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthenticated("Missing API key"))?;

    if provided_key == expected_key {
        Ok(())
    } else {
        Err(ApiError::Unauthenticated("Invalid API key"))
    }
}

/// Reads the caller's organisation identifiers from `x-organization-identifier`.
///
/// The header holds one or more comma-separated `system|value` tokens.
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let value = headers
        .get(ORGANIZATION_HEADER)
        .ok_or(ApiError::Unauthenticated("Missing organization identifier"))?
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{ORGANIZATION_HEADER} must be ASCII")))?;

    let organizations = value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Identifier::parse_token)
        .collect::<Result<Vec<_>, _>>()?;
    if organizations.is_empty() {
        return Err(ApiError::Unauthenticated("Missing organization identifier"));
    }
    Ok(Principal::new(organizations))
}

/// Validates the API key, then identifies the caller.
pub fn authenticate(headers: &HeaderMap, expected_key: &str) -> Result<Principal, ApiError> {
    validate_api_key(headers, expected_key)?;
    principal_from_headers(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn rejects_missing_or_wrong_key() {
        assert!(matches!(
            validate_api_key(&HeaderMap::new(), "secret"),
            Err(ApiError::Unauthenticated(_))
        ));
        assert!(matches!(
            validate_api_key(&headers(&[(API_KEY_HEADER, "guess")]), "secret"),
            Err(ApiError::Unauthenticated(_))
        ));
        assert!(validate_api_key(&headers(&[(API_KEY_HEADER, "secret")]), "secret").is_ok());
    }

    #[test]
    fn reads_every_organization_token() {
        let principal = principal_from_headers(&headers(&[(
            ORGANIZATION_HEADER,
            "http://example.org/ura|1, http://example.org/agb|42",
        )]))
        .expect("principal");
        assert_eq!(principal.organizations().len(), 2);
        assert!(principal.has_identifier(&Identifier::new("http://example.org/agb", "42")));
    }

    #[test]
    fn malformed_organization_token_is_a_bad_request() {
        let err = principal_from_headers(&headers(&[(ORGANIZATION_HEADER, "no-separator")]))
            .expect_err("reject");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
