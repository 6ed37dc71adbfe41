//! Reporting task outcomes to the service

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::DEFAULT_RPC_TIMEOUT;
use crate::handler::CompletionRequest;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::reliability::{is_service_transient_error, retry, with_deadline, RetryPolicy};
use crate::service::{ServiceError, WorkflowService};

/// Sends completion requests with retry
///
/// Each request becomes exactly one RPC, retried while the failure is
/// transient and the policy allows it. Every attempt runs under its own
/// local deadline.
pub struct ResponseDispatcher {
    service: Arc<dyn WorkflowService>,
    retry_policy: Arc<RetryPolicy>,
    metrics: Arc<dyn MetricsSink>,
    rpc_timeout: Duration,
    cancel: CancellationToken,
}

impl ResponseDispatcher {
    pub fn new(service: Arc<dyn WorkflowService>, retry_policy: Arc<RetryPolicy>) -> Self {
        Self {
            service,
            retry_policy,
            metrics: Arc::new(NoopMetrics),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Stop retrying when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Send `request`, if any
    ///
    /// `None` is a successful no-op. On success the outcome counter for the
    /// request kind is incremented; on failure the last error is returned.
    pub async fn dispatch(&self, request: Option<CompletionRequest>) -> Result<(), ServiceError> {
        let Some(request) = request else {
            trace!("Nothing to report");
            return Ok(());
        };

        let service = self.service.as_ref();
        let rpc_timeout = self.rpc_timeout;
        let request_ref = &request;

        let result = retry(
            &self.retry_policy,
            &self.cancel,
            is_service_transient_error,
            move || async move { with_deadline(rpc_timeout, send(service, request_ref)).await },
        )
        .await;

        if let Err(e) = result {
            debug!(kind = request.kind(), error = %e, "Failed to report task outcome");
            return Err(e);
        }

        self.metrics.incr_counter(outcome_counter(&request), 1);
        Ok(())
    }
}

async fn send(service: &dyn WorkflowService, request: &CompletionRequest) -> Result<(), ServiceError> {
    match request {
        CompletionRequest::DecisionTaskCompleted(r) => {
            service.respond_decision_task_completed(r.clone()).await
        }
        CompletionRequest::QueryTaskCompleted(r) => {
            service.respond_query_task_completed(r.clone()).await
        }
        CompletionRequest::ActivityTaskCompleted(r) => {
            service.respond_activity_task_completed(r.clone()).await
        }
        CompletionRequest::ActivityTaskFailed(r) => {
            service.respond_activity_task_failed(r.clone()).await
        }
        CompletionRequest::ActivityTaskCanceled(r) => {
            service.respond_activity_task_canceled(r.clone()).await
        }
    }
}

fn outcome_counter(request: &CompletionRequest) -> &'static str {
    match request {
        CompletionRequest::DecisionTaskCompleted(_) => metrics::DECISION_TASK_COMPLETED_COUNTER,
        CompletionRequest::QueryTaskCompleted(_) => metrics::QUERY_TASK_COMPLETED_COUNTER,
        CompletionRequest::ActivityTaskCompleted(_) => metrics::ACTIVITY_TASK_COMPLETED_COUNTER,
        CompletionRequest::ActivityTaskFailed(_) => metrics::ACTIVITY_TASK_FAILED_COUNTER,
        CompletionRequest::ActivityTaskCanceled(_) => metrics::ACTIVITY_TASK_CANCELED_COUNTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetrics;
    use crate::service::{
        InMemoryWorkflowService, RecordedCall, RespondActivityTaskCompletedRequest,
        RespondActivityTaskFailedRequest, Rpc,
    };

    fn setup() -> (Arc<InMemoryWorkflowService>, Arc<InMemoryMetrics>, ResponseDispatcher) {
        let service = Arc::new(InMemoryWorkflowService::new());
        let sink = Arc::new(InMemoryMetrics::new());
        let dispatcher = ResponseDispatcher::new(service.clone(), Arc::new(RetryPolicy::service()))
            .with_metrics(sink.clone());
        (service, sink, dispatcher)
    }

    fn failed() -> CompletionRequest {
        CompletionRequest::ActivityTaskFailed(RespondActivityTaskFailedRequest {
            task_token: b"t".to_vec(),
            reason: "boom".to_string(),
            details: None,
            identity: "me".to_string(),
        })
    }

    #[tokio::test]
    async fn test_none_is_noop() {
        let (service, sink, dispatcher) = setup();

        dispatcher.dispatch(None).await.unwrap();

        assert!(service.calls().is_empty());
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_COMPLETED_COUNTER), 0);
    }

    #[tokio::test]
    async fn test_dispatches_matching_rpc() {
        let (service, sink, dispatcher) = setup();

        dispatcher.dispatch(Some(failed())).await.unwrap();

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        let RecordedCall::RespondActivityTaskFailed(request) = &calls[0] else {
            panic!("unexpected call {:?}", calls[0]);
        };
        assert_eq!(request.reason, "boom");
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_FAILED_COUNTER), 1);
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_COMPLETED_COUNTER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let (service, sink, dispatcher) = setup();
        service.fail_next(
            Rpc::RespondActivityTaskCompleted,
            ServiceError::ServiceBusy("busy".into()),
        );

        let request = CompletionRequest::ActivityTaskCompleted(RespondActivityTaskCompletedRequest {
            task_token: b"t".to_vec(),
            result: None,
            identity: "me".to_string(),
        });
        dispatcher.dispatch(Some(request)).await.unwrap();

        assert_eq!(service.call_count(Rpc::RespondActivityTaskCompleted), 2);
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_COMPLETED_COUNTER), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_surfaces() {
        let (service, sink, dispatcher) = setup();
        service.fail_next(
            Rpc::RespondActivityTaskFailed,
            ServiceError::EntityNotExists("gone".into()),
        );

        let err = dispatcher.dispatch(Some(failed())).await.unwrap_err();

        assert_eq!(err, ServiceError::EntityNotExists("gone".into()));
        assert_eq!(service.call_count(Rpc::RespondActivityTaskFailed), 1);
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_FAILED_COUNTER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_expiration() {
        let service = Arc::new(InMemoryWorkflowService::new());
        for _ in 0..100 {
            service.fail_next(
                Rpc::RespondActivityTaskFailed,
                ServiceError::InternalService("down".into()),
            );
        }
        let policy = RetryPolicy::service().with_expiration_interval(Duration::from_secs(2));
        let dispatcher = ResponseDispatcher::new(service.clone(), Arc::new(policy));

        let started = tokio::time::Instant::now();
        let err = dispatcher.dispatch(Some(failed())).await.unwrap_err();

        assert_eq!(err, ServiceError::InternalService("down".into()));
        assert!(started.elapsed() <= Duration::from_secs(2) + Duration::from_secs(4));
        assert!(service.call_count(Rpc::RespondActivityTaskFailed) > 1);
    }
}
