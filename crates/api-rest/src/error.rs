//! HTTP error responses.
//!
//! Every failure is answered with an OperationOutcome body. Server-side failures are logged in
//! full and reported to the client without internals.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use carelink_core::CoordinationError;
use serde::Serialize;
use utoipa::ToSchema;

/// A single OperationOutcome issue.
#[derive(Debug, Serialize, ToSchema)]
pub struct OperationOutcomeIssue {
    pub severity: String,
    pub code: String,
    pub diagnostics: String,
}

/// OperationOutcome-shaped error body.
#[derive(Debug, Serialize, ToSchema)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

impl OperationOutcome {
    pub fn error(code: &str, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".into(),
            issue: vec![OperationOutcomeIssue {
                severity: "error".into(),
                code: code.into(),
                diagnostics: diagnostics.into(),
            }],
        }
    }
}

/// Errors returned by the REST handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or invalid transport credentials.
    Unauthenticated(&'static str),
    /// The HTTP request itself could not be understood.
    BadRequest(String),
    Coordination(CoordinationError),
}

impl From<CoordinationError> for ApiError {
    fn from(err: CoordinationError) -> Self {
        ApiError::Coordination(err)
    }
}

impl From<fhir::FhirError> for ApiError {
    fn from(err: fhir::FhirError) -> Self {
        ApiError::Coordination(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Coordination(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// FHIR issue-type code for the OperationOutcome.
    fn issue_code(&self) -> &'static str {
        let err = match self {
            ApiError::Unauthenticated(_) => return "login",
            ApiError::BadRequest(_) => return "invalid",
            ApiError::Coordination(err) => err,
        };
        match err {
            CoordinationError::TaskRejection(_) => "business-rule",
            CoordinationError::Forbidden(_) => "forbidden",
            CoordinationError::NotFound { .. } => "not-found",
            CoordinationError::Fhir(fhir::FhirError::UnsupportedResourceType(_))
            | CoordinationError::UnsupportedOperation { .. } => "not-supported",
            CoordinationError::SearchCeilingExceeded { .. } => "too-costly",
            err if err.is_retryable() => "transient",
            err if err.status_code() < 500 => "invalid",
            _ => "exception",
        }
    }

    fn diagnostics(&self, status: StatusCode) -> String {
        match self {
            ApiError::Unauthenticated(message) => (*message).to_string(),
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Coordination(_) if status == StatusCode::BAD_GATEWAY => {
                "upstream resource store failure".into()
            }
            ApiError::Coordination(_) if status.is_server_error() => "internal error".into(),
            ApiError::Coordination(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Resource operation error: {:?}", self);
        } else {
            tracing::debug!(status = status.as_u16(), "request refused: {:?}", self);
        }

        let outcome = OperationOutcome::error(self.issue_code(), self.diagnostics(status));
        (status, Json(outcome)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::StoreError;
    use fhir::ResourceType;

    #[test]
    fn task_rejection_keeps_its_reason() {
        let err = ApiError::from(CoordinationError::TaskRejection(
            "subtasks of subtasks are not supported".into(),
        ));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.issue_code(), "business-rule");
        assert!(err
            .diagnostics(err.status())
            .contains("subtasks of subtasks are not supported"));
    }

    #[test]
    fn store_failures_hide_internals() {
        let err = ApiError::from(CoordinationError::store("read", "Task/1")(
            StoreError::Unavailable("10.0.0.3:5432 refused".into()),
        ));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.issue_code(), "transient");
        assert!(!err.diagnostics(err.status()).contains("10.0.0.3"));
    }

    #[test]
    fn forbidden_and_unsupported() {
        let forbidden = ApiError::from(CoordinationError::Forbidden(ResourceType::CareTeam));
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(forbidden.issue_code(), "forbidden");

        let unsupported = ApiError::from(fhir::FhirError::UnsupportedResourceType(
            "Practitioner".into(),
        ));
        assert_eq!(unsupported.status(), StatusCode::NOT_FOUND);
        assert_eq!(unsupported.issue_code(), "not-supported");
    }
}
