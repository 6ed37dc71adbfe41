//! Activity outcomes and the function adapter

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{ActivityTaskHandler, CompletionRequest};
use crate::reliability::{is_client_side_error, with_deadline};
use crate::service::{
    PollForActivityTaskResponse, RespondActivityTaskCanceledRequest,
    RespondActivityTaskCompletedRequest, RespondActivityTaskFailedRequest, ServiceError,
};

/// Ways an activity can end without a result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    /// The activity will be completed later, out of band
    #[error("activity result is pending")]
    ResultPending,

    /// The activity observed a cancellation request
    #[error("activity canceled")]
    Canceled { details: Option<Vec<u8>> },

    /// The local start-to-close deadline elapsed
    #[error("activity deadline exceeded")]
    DeadlineExceeded,

    /// Any other failure
    #[error("{reason}")]
    Failed {
        reason: String,
        details: Option<Vec<u8>>,
    },
}

impl ActivityError {
    /// Create a failure with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            details: None,
        }
    }

    /// Create a cancellation without details
    pub fn canceled() -> Self {
        Self::Canceled { details: None }
    }

    /// Attach details to a failure or cancellation
    pub fn with_details(self, details: Vec<u8>) -> Self {
        match self {
            Self::Failed { reason, .. } => Self::Failed {
                reason,
                details: Some(details),
            },
            Self::Canceled { .. } => Self::Canceled {
                details: Some(details),
            },
            other => other,
        }
    }

    /// Reason and details reported to the service
    pub fn error_details(&self) -> (String, Option<Vec<u8>>) {
        match self {
            Self::Failed { reason, details } => (reason.clone(), details.clone()),
            Self::Canceled { details } => ("canceled".to_string(), details.clone()),
            other => (other.to_string(), None),
        }
    }
}

impl From<ServiceError> for ActivityError {
    fn from(err: ServiceError) -> Self {
        if is_client_side_error(&err) {
            Self::DeadlineExceeded
        } else {
            Self::failed(err.to_string())
        }
    }
}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ActivityError>() {
            Ok(activity_error) => return activity_error,
            Err(err) => err,
        };
        if err.is::<tokio::time::error::Elapsed>() {
            return ServiceError::DeadlineExceeded.into();
        }
        match err.downcast::<ServiceError>() {
            Ok(service_error) => service_error.into(),
            Err(err) => Self::failed(format!("{err:#}")),
        }
    }
}

/// Map an activity outcome to the request that reports it
///
/// A pending result produces no request. Cancellation, and a local deadline
/// expiring, are reported as canceled; every other error as failed.
pub fn convert_activity_result(
    identity: &str,
    task_token: &[u8],
    result: Result<Vec<u8>, ActivityError>,
) -> Option<CompletionRequest> {
    let err = match result {
        Ok(result) => {
            return Some(CompletionRequest::ActivityTaskCompleted(
                RespondActivityTaskCompletedRequest {
                    task_token: task_token.to_vec(),
                    result: Some(result),
                    identity: identity.to_string(),
                },
            ))
        }
        Err(ActivityError::ResultPending) => return None,
        Err(err) => err,
    };

    let (reason, details) = err.error_details();
    if matches!(err, ActivityError::Canceled { .. } | ActivityError::DeadlineExceeded) {
        return Some(CompletionRequest::ActivityTaskCanceled(
            RespondActivityTaskCanceledRequest {
                task_token: task_token.to_vec(),
                details,
                identity: identity.to_string(),
            },
        ));
    }

    Some(CompletionRequest::ActivityTaskFailed(
        RespondActivityTaskFailedRequest {
            task_token: task_token.to_vec(),
            reason,
            details,
            identity: identity.to_string(),
        },
    ))
}

/// Plain activity code
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl ActivityFunction for Echo {
///     async fn run(&self, task: &PollForActivityTaskResponse) -> Result<Vec<u8>, ActivityError> {
///         Ok(task.input.clone().unwrap_or_default())
///     }
/// }
/// ```
#[async_trait]
pub trait ActivityFunction: Send + Sync {
    async fn run(&self, task: &PollForActivityTaskResponse) -> Result<Vec<u8>, ActivityError>;
}

/// Adapts an [`ActivityFunction`] into an [`ActivityTaskHandler`]
///
/// Enforces the task's start-to-close timeout locally and stops the
/// function when the runner's cancellation token fires.
pub struct ActivityRunner<F> {
    function: F,
    identity: String,
    cancel: CancellationToken,
}

impl<F: ActivityFunction> ActivityRunner<F> {
    pub fn new(function: F, identity: impl Into<String>) -> Self {
        Self {
            function,
            identity: identity.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel running activities when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn run_with_limits(&self, task: &PollForActivityTaskResponse) -> Result<Vec<u8>, ActivityError> {
        let run = async {
            match start_to_close(task) {
                Some(limit) => with_deadline(limit, async { Ok(self.function.run(task).await) })
                    .await
                    .unwrap_or_else(|e| Err(e.into())),
                None => self.function.run(task).await,
            }
        };

        tokio::select! {
            result = run => result,
            _ = self.cancel.cancelled() => {
                debug!("Activity canceled by worker shutdown");
                Err(ActivityError::canceled())
            }
        }
    }
}

#[async_trait]
impl<F: ActivityFunction> ActivityTaskHandler for ActivityRunner<F> {
    #[instrument(skip_all, fields(activity_id = %task.activity_id, activity_type = %task.activity_type))]
    async fn execute(
        &self,
        task: &PollForActivityTaskResponse,
    ) -> anyhow::Result<Option<CompletionRequest>> {
        let result = self.run_with_limits(task).await;
        if let Err(err) = &result {
            debug!(error = %err, "Activity did not complete");
        }
        Ok(convert_activity_result(&self.identity, &task.task_token, result))
    }
}

fn start_to_close(task: &PollForActivityTaskResponse) -> Option<Duration> {
    (task.start_to_close_timeout_seconds > 0)
        .then(|| Duration::from_secs(task.start_to_close_timeout_seconds as u64))
}
