//! HTTP routes of the FHIR endpoint.

use crate::auth::authenticate;
use crate::error::{ApiError, OperationOutcome, OperationOutcomeIssue};
use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use carelink_core::{OperationRequest, SearchParams};
use fhir::{Bundle, BundleEntry, ResourceType};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;
type JsonBody = Result<Json<Value>, JsonRejection>;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        read_resource,
        search_resources,
        create_resource,
        update_resource,
        delete_resource,
        transaction,
    ),
    components(schemas(HealthRes, OperationOutcome, OperationOutcomeIssue))
)]
pub struct ApiDoc;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Builds the REST router: the FHIR endpoint under `/fhir`, health and Swagger UI.
pub fn router(state: AppState) -> Router {
    let fhir = Router::new()
        .route("/", post(transaction))
        .route(
            "/:resource_type",
            get(search_resources).post(create_resource),
        )
        .route(
            "/:resource_type/:id",
            get(read_resource)
                .put(update_resource)
                .delete(delete_resource),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/fhir", fhir)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Response helpers
// ============================================================================

/// Turns an operation response entry into an HTTP response.
///
/// The status comes from the entry's response status; a `Location` header is added when the
/// store reported one.
fn entry_response(entry: BundleEntry) -> Response {
    let (status, location) = match entry.response {
        Some(response) => (
            response
                .status_code()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK),
            response.location,
        ),
        None => (StatusCode::OK, None),
    };

    let mut http = match entry.resource {
        Some(resource) if status != StatusCode::NO_CONTENT => {
            (status, Json(resource)).into_response()
        }
        _ => status.into_response(),
    };
    if let Some(location) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
        http.headers_mut().insert(header::LOCATION, location);
    }
    http
}

fn resource_type(name: &str) -> Result<ResourceType, ApiError> {
    Ok(name.parse::<ResourceType>()?)
}

fn upsert_requested(pairs: &[(String, String)]) -> bool {
    pairs
        .iter()
        .any(|(name, value)| name == "_upsert" && value == "true")
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Not authenticated; used by load balancers and monitoring.
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "CareLink is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/fhir/{resource_type}/{id}",
    params(
        ("resource_type" = String, Path, description = "Resource type, e.g. Task"),
        ("id" = String, Path, description = "Logical id of the resource")
    ),
    responses(
        (status = 200, description = "The resource"),
        (status = 401, description = "Missing or invalid credentials", body = OperationOutcome),
        (status = 403, description = "Access denied", body = OperationOutcome),
        (status = 404, description = "Not found or unsupported type", body = OperationOutcome)
    )
)]
/// Read a single resource.
async fn read_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((type_name, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state.api_key)?;
    let request = OperationRequest::read(resource_type(&type_name)?, id);
    let entry = state.server.handle(principal, request).await?;
    Ok(entry_response(entry))
}

#[utoipa::path(
    get,
    path = "/fhir/{resource_type}",
    params(
        ("resource_type" = String, Path, description = "Resource type, e.g. Task")
    ),
    responses(
        (status = 200, description = "Searchset Bundle of the matches the caller may read"),
        (status = 400, description = "Invalid search parameter", body = OperationOutcome),
        (status = 401, description = "Missing or invalid credentials", body = OperationOutcome),
        (status = 422, description = "Too many matches", body = OperationOutcome)
    )
)]
/// Search resources of one type.
///
/// Matches the caller is not allowed to read are dropped from the result.
async fn search_resources(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(type_name): Path<String>,
    query: QueryPairs,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state.api_key)?;
    let Query(pairs) = query?;
    let request =
        OperationRequest::search(resource_type(&type_name)?, SearchParams::from_pairs(pairs));
    let entry = state.server.handle(principal, request).await?;
    Ok(entry_response(entry))
}

#[utoipa::path(
    post,
    path = "/fhir/{resource_type}",
    params(
        ("resource_type" = String, Path, description = "Resource type, e.g. Task"),
        ("_upsert" = Option<bool>, Query, description = "Keep the body's id and create or update")
    ),
    responses(
        (status = 201, description = "Resource created; Location names the new version"),
        (status = 200, description = "Existing resource updated (upsert)"),
        (status = 400, description = "Invalid resource or rejected task", body = OperationOutcome),
        (status = 401, description = "Missing or invalid credentials", body = OperationOutcome),
        (status = 403, description = "Access denied", body = OperationOutcome),
        (status = 405, description = "Create is not supported for this type", body = OperationOutcome)
    )
)]
/// Create a resource.
///
/// With `_upsert=true` the body's id is kept and an existing resource is updated instead.
async fn create_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(type_name): Path<String>,
    query: QueryPairs,
    body: JsonBody,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state.api_key)?;
    let Query(pairs) = query?;
    let Json(body) = body?;

    let request = OperationRequest::create(resource_type(&type_name)?, body)
        .with_upsert(upsert_requested(&pairs));
    let entry = state.server.handle(principal, request).await?;
    Ok(entry_response(entry))
}

#[utoipa::path(
    put,
    path = "/fhir/{resource_type}/{id}",
    params(
        ("resource_type" = String, Path, description = "Resource type, e.g. Task"),
        ("id" = String, Path, description = "Logical id; must match the body's id")
    ),
    responses(
        (status = 200, description = "Resource updated"),
        (status = 201, description = "Resource created with the given id"),
        (status = 400, description = "Invalid resource or illegal transition", body = OperationOutcome),
        (status = 401, description = "Missing or invalid credentials", body = OperationOutcome),
        (status = 403, description = "Access denied", body = OperationOutcome)
    )
)]
/// Update a resource, creating it if it does not exist.
async fn update_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((type_name, id)): Path<(String, String)>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state.api_key)?;
    let Json(body) = body?;
    let request = OperationRequest::update(resource_type(&type_name)?, id, body);
    let entry = state.server.handle(principal, request).await?;
    Ok(entry_response(entry))
}

#[utoipa::path(
    delete,
    path = "/fhir/{resource_type}/{id}",
    params(
        ("resource_type" = String, Path, description = "Resource type, e.g. Task"),
        ("id" = String, Path, description = "Logical id of the resource")
    ),
    responses(
        (status = 204, description = "Resource and its audit trail deleted"),
        (status = 401, description = "Missing or invalid credentials", body = OperationOutcome),
        (status = 403, description = "Access denied", body = OperationOutcome),
        (status = 404, description = "Not found", body = OperationOutcome)
    )
)]
/// Delete a resource together with the AuditEvents that reference it.
async fn delete_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((type_name, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state.api_key)?;
    let request = OperationRequest::delete(resource_type(&type_name)?, id);
    let entry = state.server.handle(principal, request).await?;
    Ok(entry_response(entry))
}

#[utoipa::path(
    post,
    path = "/fhir",
    responses(
        (status = 200, description = "Transaction-response Bundle"),
        (status = 400, description = "Invalid bundle or entry", body = OperationOutcome),
        (status = 401, description = "Missing or invalid credentials", body = OperationOutcome),
        (status = 403, description = "An entry was denied; nothing was written", body = OperationOutcome)
    )
)]
/// Execute a transaction Bundle.
///
/// Entries may refer to each other through `urn:uuid` full URLs. Either every entry is
/// committed or none is.
async fn transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state.api_key)?;
    let Json(body) = body?;
    let bundle: Bundle = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid transaction bundle: {e}")))?;

    let response = state.server.handle_bundle(principal, bundle).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{API_KEY_HEADER, ORGANIZATION_HEADER};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use carelink_core::workflow::MemoryWorkflowProvider;
    use carelink_core::{
        CoreConfig, InMemoryResourceStore, NotificationRegistry, ResourceServer, SearchOverflow,
    };
    use fhir::Identifier;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SYSTEM: &str = "http://example.org/ura";

    fn app() -> Router {
        let cfg = CoreConfig::new(
            vec![Identifier::new(SYSTEM, "1")],
            Identifier::new(SYSTEM, "observer"),
            "https://care.example.org/fhir".into(),
            100,
            SearchOverflow::Reject,
        )
        .unwrap();
        let server = ResourceServer::new(
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(cfg),
            Arc::new(MemoryWorkflowProvider::builtin().unwrap()),
            Arc::new(NotificationRegistry::new()),
        );
        router(AppState::new(Arc::new(server), "secret"))
    }

    fn request(method: Method, uri: &str, org: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, "secret")
            .header(ORGANIZATION_HEADER, format!("{SYSTEM}|{org}"));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/fhir+json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn questionnaire() -> Value {
        json!({
            "resourceType": "Questionnaire",
            "url": "http://example.org/Questionnaire/enrollment",
            "status": "active"
        })
    }

    #[tokio::test]
    async fn health_needs_no_credentials() {
        let app = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unauthorized() {
        let app = app();
        let request = Request::builder()
            .uri("/fhir/Task/1")
            .header(ORGANIZATION_HEADER, format!("{SYSTEM}|1"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["resourceType"], "OperationOutcome");
        assert_eq!(body["issue"][0]["code"], "login");
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let app = app();
        let (status, headers, created) = send(
            &app,
            request(Method::POST, "/fhir/Questionnaire", "2", Some(questionnaire())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(headers.contains_key(header::LOCATION));
        let id = created["id"].as_str().expect("id").to_string();

        let (status, _, read) = send(
            &app,
            request(Method::GET, &format!("/fhir/Questionnaire/{id}"), "3", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["url"], "http://example.org/Questionnaire/enrollment");
    }

    #[tokio::test]
    async fn test_search_returns_a_searchset() {
        let app = app();
        send(
            &app,
            request(Method::POST, "/fhir/Questionnaire", "2", Some(questionnaire())),
        )
        .await;

        let uri = "/fhir/Questionnaire?url=http%3A%2F%2Fexample.org%2FQuestionnaire%2Fenrollment";
        let (status, _, bundle) = send(&app, request(Method::GET, uri, "2", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bundle["type"], "searchset");
        assert_eq!(bundle["total"], 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_the_client_id() {
        let app = app();
        let mut body = questionnaire();
        body["id"] = json!("enrollment");

        let (status, _, created) = send(
            &app,
            request(Method::POST, "/fhir/Questionnaire?_upsert=true", "2", Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], "enrollment");
    }

    #[tokio::test]
    async fn test_delete_answers_no_content() {
        let app = app();
        let (_, _, created) = send(
            &app,
            request(Method::POST, "/fhir/Questionnaire", "2", Some(questionnaire())),
        )
        .await;
        let uri = format!("/fhir/Questionnaire/{}", created["id"].as_str().unwrap());

        let (status, _, _) = send(&app, request(Method::DELETE, &uri, "2", None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(&app, request(Method::GET, &uri, "2", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_policy_denial_is_forbidden() {
        let app = app();
        let patient = json!({"resourceType": "Patient"});
        let (status, _, body) = send(
            &app,
            request(Method::POST, "/fhir/Patient", "2", Some(patient)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["issue"][0]["diagnostics"], "access to Patient denied");
    }

    #[tokio::test]
    async fn test_unsupported_type_and_operation() {
        let app = app();
        let (status, _, _) =
            send(&app, request(Method::GET, "/fhir/Practitioner/1", "1", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let audit = json!({"resourceType": "AuditEvent"});
        let (status, _, body) = send(
            &app,
            request(Method::POST, "/fhir/AuditEvent", "1", Some(audit)),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["issue"][0]["code"], "not-supported");
    }

    #[tokio::test]
    async fn test_transaction_bundle() {
        let app = app();
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [{
                "fullUrl": "urn:uuid:6f1c1f6e-6c55-4c7b-9d0e-0b9f4b1d2a10",
                "resource": questionnaire(),
                "request": {"method": "POST", "url": "Questionnaire"}
            }]
        });
        let (status, _, response) =
            send(&app, request(Method::POST, "/fhir", "2", Some(bundle))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["type"], "transaction-response");
        assert_eq!(response["entry"][0]["response"]["status"], "201 Created");
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_operation_outcome() {
        let app = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/fhir/Questionnaire")
            .header(API_KEY_HEADER, "secret")
            .header(ORGANIZATION_HEADER, format!("{SYSTEM}|1"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["resourceType"], "OperationOutcome");
    }
}
