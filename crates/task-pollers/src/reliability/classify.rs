//! Error classification for service calls
//!
//! Decides whether a failed call is worth retrying. Unknown failures are
//! treated as transient so that every transport error is retried.

use crate::service::ServiceError;

/// How a failed service call should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Business-rule rejection; retrying cannot help
    Permanent,

    /// Service overload, internal error or transport failure
    Transient,

    /// Our own deadline elapsed before the service answered
    ClientSide,
}

/// Classify a service error
pub fn classify(err: &ServiceError) -> ErrorClass {
    if is_client_side_error(err) {
        ErrorClass::ClientSide
    } else if is_service_transient_error(err) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Whether a call that failed with `err` may succeed if retried
pub fn is_service_transient_error(err: &ServiceError) -> bool {
    !matches!(
        err,
        ServiceError::BadRequest(_)
            | ServiceError::EntityNotExists(_)
            | ServiceError::WorkflowExecutionAlreadyStarted(_)
            | ServiceError::DomainAlreadyExists(_)
            | ServiceError::QueryFailed(_)
    )
}

/// Whether `err` is a local deadline expiring before the service responded
pub fn is_client_side_error(err: &ServiceError) -> bool {
    matches!(err, ServiceError::DeadlineExceeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permanent_errors() -> Vec<ServiceError> {
        vec![
            ServiceError::BadRequest("x".into()),
            ServiceError::EntityNotExists("x".into()),
            ServiceError::WorkflowExecutionAlreadyStarted("x".into()),
            ServiceError::DomainAlreadyExists("x".into()),
            ServiceError::QueryFailed("x".into()),
        ]
    }

    #[test]
    fn test_business_errors_are_not_transient() {
        for err in permanent_errors() {
            assert!(!is_service_transient_error(&err), "{err}");
            assert_eq!(classify(&err), ErrorClass::Permanent);
        }
    }

    #[test]
    fn test_everything_else_is_transient() {
        let errors = vec![
            ServiceError::InternalService("x".into()),
            ServiceError::ServiceBusy("x".into()),
            ServiceError::Transport("connection reset".into()),
            ServiceError::DeadlineExceeded,
            ServiceError::Cancelled,
            ServiceError::Other("something nobody has seen before".into()),
        ];

        for err in errors {
            assert!(is_service_transient_error(&err), "{err}");
        }
    }

    #[test]
    fn test_client_side_error() {
        assert!(is_client_side_error(&ServiceError::DeadlineExceeded));
        assert_eq!(classify(&ServiceError::DeadlineExceeded), ErrorClass::ClientSide);

        assert!(!is_client_side_error(&ServiceError::Cancelled));
        assert!(!is_client_side_error(&ServiceError::ServiceBusy("x".into())));
        assert_eq!(
            classify(&ServiceError::ServiceBusy("x".into())),
            ErrorClass::Transient
        );
    }
}
