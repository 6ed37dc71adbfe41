//! Activity task poller

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use super::{PollerError, TaskPoller};
use crate::config::WorkerOptions;
use crate::dispatch::ResponseDispatcher;
use crate::handler::ActivityTaskHandler;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::reliability::{is_service_transient_error, with_deadline, RetryPolicy};
use crate::service::{
    PollForActivityTaskRequest, PollForActivityTaskResponse, TaskList, WorkflowService,
};

/// Result of one activity poll
#[derive(Debug)]
pub struct ActivityTask {
    /// The task, or `None` when the long poll expired without work
    pub task: Option<PollForActivityTaskResponse>,
    pub poll_started_at: Instant,
}

impl ActivityTask {
    pub fn is_empty(&self) -> bool {
        self.task.is_none()
    }
}

/// Polls activity tasks and reports their outcomes
pub struct ActivityTaskPoller {
    service: Arc<dyn WorkflowService>,
    handler: Arc<dyn ActivityTaskHandler>,
    options: WorkerOptions,
    retry_policy: Arc<RetryPolicy>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl ActivityTaskPoller {
    pub fn new(
        service: Arc<dyn WorkflowService>,
        handler: Arc<dyn ActivityTaskHandler>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            service,
            handler,
            retry_policy: Arc::clone(&options.retry_policy),
            options,
            metrics: Arc::new(NoopMetrics),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the retry policy taken from the options
    pub fn with_retry_policy(mut self, policy: Arc<RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Abandon polls and retries when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.retry_policy
    }

    fn dispatcher(&self) -> ResponseDispatcher {
        ResponseDispatcher::new(Arc::clone(&self.service), Arc::clone(&self.retry_policy))
            .with_metrics(Arc::clone(&self.metrics))
            .with_rpc_timeout(self.options.rpc_timeout)
            .with_cancellation(self.cancel.clone())
    }
}

#[async_trait]
impl TaskPoller for ActivityTaskPoller {
    type Task = ActivityTask;

    #[instrument(skip(self), fields(task_list = %self.options.task_list))]
    async fn poll_task(&self) -> Result<ActivityTask, PollerError> {
        if self.cancel.is_cancelled() {
            return Err(PollerError::Shutdown);
        }

        let started = Instant::now();
        self.metrics.incr_counter(metrics::ACTIVITY_POLL_COUNTER, 1);
        trace!("Polling for activity task");

        let request = PollForActivityTaskRequest {
            domain: self.options.domain.clone(),
            task_list: TaskList::new(self.options.task_list.clone()),
            identity: self.options.identity.clone(),
        };

        let result = tokio::select! {
            result = with_deadline(self.options.poll_timeout, self.service.poll_for_activity_task(request)) => result,
            _ = self.cancel.cancelled() => {
                debug!("Activity poll abandoned for shutdown");
                return Err(PollerError::Shutdown);
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if is_service_transient_error(&e) {
                    self.metrics
                        .incr_counter(metrics::ACTIVITY_POLL_TRANSIENT_FAILED_COUNTER, 1);
                } else {
                    self.metrics.incr_counter(metrics::ACTIVITY_POLL_FAILED_COUNTER, 1);
                }
                debug!(error = %e, "Activity poll failed");
                return Err(e.into());
            }
        };

        if !response.has_task() {
            self.metrics.incr_counter(metrics::ACTIVITY_POLL_NO_TASK_COUNTER, 1);
            debug!("No activity task");
            return Ok(ActivityTask {
                task: None,
                poll_started_at: started,
            });
        }

        self.metrics.incr_counter(metrics::ACTIVITY_POLL_SUCCEED_COUNTER, 1);
        self.metrics
            .record_timer(metrics::ACTIVITY_POLL_LATENCY, started.elapsed());
        debug!(
            activity_id = %response.activity_id,
            activity_type = %response.activity_type,
            "Received activity task"
        );

        Ok(ActivityTask {
            task: Some(response),
            poll_started_at: started,
        })
    }

    #[instrument(skip_all)]
    async fn process_task(&self, task: ActivityTask) -> Result<(), PollerError> {
        let Some(response) = task.task else {
            debug!("Activity task unavailable");
            return Ok(());
        };

        let execution_started = Instant::now();
        let request = match self.handler.execute(&response).await {
            Ok(request) => request,
            Err(e) => {
                self.metrics
                    .incr_counter(metrics::ACTIVITY_EXECUTION_FAILED_COUNTER, 1);
                debug!(error = %e, "Activity task handler failed");
                return Err(PollerError::Handler(e));
            }
        };
        self.metrics
            .record_timer(metrics::ACTIVITY_EXECUTION_LATENCY, execution_started.elapsed());

        let Some(request) = request else {
            // Completed asynchronously later
            debug!(activity_id = %response.activity_id, "Activity result pending");
            return Ok(());
        };

        if !request.is_activity_response() {
            error!(kind = request.kind(), "Activity task handler returned a workflow response");
            return Err(PollerError::InvariantViolation(format!(
                "activity task handler returned {}",
                request.kind()
            )));
        }

        let response_started = Instant::now();
        if let Err(e) = self.dispatcher().dispatch(Some(request)).await {
            self.metrics
                .incr_counter(metrics::ACTIVITY_RESPONSE_FAILED_COUNTER, 1);
            return Err(e.into());
        }

        self.metrics
            .record_timer(metrics::ACTIVITY_RESPONSE_LATENCY, response_started.elapsed());
        self.metrics
            .record_timer(metrics::ACTIVITY_END_TO_END_LATENCY, task.poll_started_at.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ActivityError, ActivityFunction, ActivityRunner, CompletionRequest};
    use crate::metrics::InMemoryMetrics;
    use crate::service::{
        InMemoryWorkflowService, QueryTaskCompletedType, RecordedCall,
        RespondQueryTaskCompletedRequest, Rpc, ServiceError,
    };

    struct Outcome(Result<Vec<u8>, ActivityError>);

    #[async_trait]
    impl ActivityFunction for Outcome {
        async fn run(&self, _task: &PollForActivityTaskResponse) -> Result<Vec<u8>, ActivityError> {
            self.0.clone()
        }
    }

    struct Broken;

    #[async_trait]
    impl ActivityTaskHandler for Broken {
        async fn execute(
            &self,
            task: &PollForActivityTaskResponse,
        ) -> anyhow::Result<Option<CompletionRequest>> {
            Ok(Some(CompletionRequest::QueryTaskCompleted(
                RespondQueryTaskCompletedRequest {
                    task_token: task.task_token.clone(),
                    completed_type: QueryTaskCompletedType::Completed,
                    query_result: None,
                    error_message: None,
                },
            )))
        }
    }

    fn activity_task() -> PollForActivityTaskResponse {
        PollForActivityTaskResponse {
            task_token: b"t".to_vec(),
            activity_id: "a-1".to_string(),
            activity_type: "ship_order".to_string(),
            ..Default::default()
        }
    }

    fn poller(
        service: Arc<InMemoryWorkflowService>,
        outcome: Result<Vec<u8>, ActivityError>,
    ) -> ActivityTaskPoller {
        ActivityTaskPoller::new(
            service,
            Arc::new(ActivityRunner::new(Outcome(outcome), "worker-1")),
            WorkerOptions::new("test", "activities").with_identity("worker-1"),
        )
    }

    #[tokio::test]
    async fn test_empty_poll_is_noop() {
        let service = Arc::new(InMemoryWorkflowService::new());
        let poller = poller(service.clone(), Ok(vec![]));

        let task = poller.poll_task().await.unwrap();
        assert!(task.is_empty());
        poller.process_task(task).await.unwrap();

        assert_eq!(service.calls().len(), 1);
        let RecordedCall::PollForActivityTask(request) = &service.calls()[0] else {
            panic!("expected an activity poll");
        };
        assert_eq!(request.task_list.name, "activities");
    }

    #[tokio::test]
    async fn test_completed_activity_is_reported() {
        let service = Arc::new(InMemoryWorkflowService::new());
        service.push_activity_task("activities", activity_task());
        let sink = Arc::new(InMemoryMetrics::new());
        let poller = poller(service.clone(), Ok(b"shipped".to_vec())).with_metrics(sink.clone());

        let task = poller.poll_task().await.unwrap();
        poller.process_task(task).await.unwrap();

        let calls = service.calls();
        let RecordedCall::RespondActivityTaskCompleted(request) = &calls[1] else {
            panic!("expected a completion, got {:?}", calls[1]);
        };
        assert_eq!(request.result, Some(b"shipped".to_vec()));
        assert_eq!(request.identity, "worker-1");
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_COMPLETED_COUNTER), 1);
        assert_eq!(sink.timer_count(metrics::ACTIVITY_END_TO_END_LATENCY), 1);
    }

    #[tokio::test]
    async fn test_failed_activity_is_reported() {
        let service = Arc::new(InMemoryWorkflowService::new());
        service.push_activity_task("activities", activity_task());
        let poller = poller(service.clone(), Err(ActivityError::failed("no stock")));

        let task = poller.poll_task().await.unwrap();
        poller.process_task(task).await.unwrap();

        assert_eq!(service.call_count(Rpc::RespondActivityTaskFailed), 1);
    }

    #[tokio::test]
    async fn test_pending_result_sends_nothing() {
        let service = Arc::new(InMemoryWorkflowService::new());
        service.push_activity_task("activities", activity_task());
        let poller = poller(service.clone(), Err(ActivityError::ResultPending));

        let task = poller.poll_task().await.unwrap();
        poller.process_task(task).await.unwrap();

        assert_eq!(service.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_response_failure_counts() {
        let service = Arc::new(InMemoryWorkflowService::new());
        service.push_activity_task("activities", activity_task());
        service.fail_next(
            Rpc::RespondActivityTaskCanceled,
            ServiceError::EntityNotExists("timed out already".into()),
        );
        let sink = Arc::new(InMemoryMetrics::new());
        let poller = poller(service.clone(), Err(ActivityError::canceled())).with_metrics(sink.clone());

        let task = poller.poll_task().await.unwrap();
        let err = poller.process_task(task).await.unwrap_err();

        assert!(matches!(
            err,
            PollerError::Service(ServiceError::EntityNotExists(_))
        ));
        assert_eq!(sink.counter(metrics::ACTIVITY_RESPONSE_FAILED_COUNTER), 1);
        assert_eq!(sink.counter(metrics::ACTIVITY_TASK_CANCELED_COUNTER), 0);
    }

    #[tokio::test]
    async fn test_workflow_response_is_invariant_violation() {
        let service = Arc::new(InMemoryWorkflowService::new());
        service.push_activity_task("activities", activity_task());
        let poller = ActivityTaskPoller::new(
            service.clone(),
            Arc::new(Broken),
            WorkerOptions::new("test", "activities"),
        );

        let task = poller.poll_task().await.unwrap();
        let err = poller.process_task(task).await.unwrap_err();

        assert!(err.is_invariant_violation());
        assert_eq!(service.call_count(Rpc::RespondQueryTaskCompleted), 0);
    }
}
