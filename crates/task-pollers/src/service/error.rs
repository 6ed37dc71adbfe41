//! Errors returned by workflow service calls

/// Error type for workflow service operations
///
/// The first five variants are business-rule rejections from the service;
/// the rest are service-side overload/internal signals, transport failures
/// and local call outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Request was malformed
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Workflow, task or domain does not exist
    #[error("entity not exists: {0}")]
    EntityNotExists(String),

    /// A workflow with the same id is already running
    #[error("workflow execution already started: {0}")]
    WorkflowExecutionAlreadyStarted(String),

    /// Domain is already registered
    #[error("domain already exists: {0}")]
    DomainAlreadyExists(String),

    /// Query could not be answered
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Service-side internal error
    #[error("internal service error: {0}")]
    InternalService(String),

    /// Service is overloaded
    #[error("service busy: {0}")]
    ServiceBusy(String),

    /// Connection, framing or other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Our own call deadline elapsed before the service responded
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Call was abandoned because the caller was cancelled
    #[error("call cancelled")]
    Cancelled,

    /// Any other failure reported by the service
    #[error("{0}")]
    Other(String),
}
