use fhir::ResourceType;

/// Failures reported by a [`crate::store::ResourceStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("invalid transaction entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("invalid search parameter: {0}")]
    InvalidSearch(String),
    #[error("stored resource is corrupt: {0}")]
    Corrupt(String),
    #[error("resource store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Only transport-level failures are worth retrying; everything else is a bad request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the operation framework, policy engine and task workflow.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Fhir(#[from] fhir::FhirError),
    #[error("access to {0} denied")]
    Forbidden(ResourceType),
    #[error("{resource_type}/{id} not found")]
    NotFound {
        resource_type: ResourceType,
        id: String,
    },
    #[error("task rejected: {0}")]
    TaskRejection(String),
    #[error("failed to {operation} {resource}: {source}")]
    Store {
        operation: &'static str,
        resource: String,
        #[source]
        source: StoreError,
    },
    #[error("{method} is not supported for {resource_type}")]
    UnsupportedOperation {
        method: &'static str,
        resource_type: String,
    },
    #[error("search for {resource_type} matched more than {ceiling} resources")]
    SearchCeilingExceeded {
        resource_type: ResourceType,
        ceiling: usize,
    },
    #[error("transaction result is malformed: {0}")]
    MalformedTransactionResult(String),
    #[error("failed to serialize resource: {0}")]
    Serialization(serde_json::Error),
    #[error("invalid workflow definition: {0}")]
    WorkflowDefinition(String),
    #[error("failed to read workflow definitions: {0}")]
    WorkflowFileRead(std::io::Error),
}

impl CoordinationError {
    /// Builds a mapper that wraps a [`StoreError`] with the operation and resource it hit.
    pub fn store(
        operation: &'static str,
        resource: impl Into<String>,
    ) -> impl FnOnce(StoreError) -> CoordinationError {
        let resource = resource.into();
        move |source| CoordinationError::Store {
            operation,
            resource,
            source,
        }
    }

    /// Whether an outer layer may retry the operation unchanged.
    ///
    /// Task rejections, validation and authorisation failures are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinationError::Store { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// HTTP status an adapter should answer with.
    ///
    /// Store failures map to 502 so that callers can tell them apart from their own mistakes;
    /// their details are never meant to reach the client.
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinationError::InvalidInput(_) | CoordinationError::TaskRejection(_) => 400,
            CoordinationError::Fhir(fhir::FhirError::UnsupportedResourceType(_)) => 404,
            CoordinationError::Fhir(_) => 400,
            CoordinationError::Forbidden(_) => 403,
            CoordinationError::NotFound { .. } => 404,
            CoordinationError::UnsupportedOperation { .. } => 405,
            CoordinationError::SearchCeilingExceeded { .. } => 422,
            CoordinationError::Store { source, .. } => match source {
                StoreError::InvalidEntry { .. } | StoreError::InvalidSearch(_) => 400,
                _ => 502,
            },
            CoordinationError::MalformedTransactionResult(_) => 502,
            CoordinationError::Serialization(_)
            | CoordinationError::WorkflowDefinition(_)
            | CoordinationError::WorkflowFileRead(_) => 500,
        }
    }
}

pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Failures while delivering a notification to a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification payload is invalid: {0}")]
    InvalidPayload(String),
    #[error("failed to deliver notification to {recipient}: {reason}")]
    Delivery { recipient: String, reason: String },
}
