//! Decision task poller

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use super::balancer::{PollBalancer, QueueKind};
use super::{PollerError, TaskPoller};
use crate::config::WorkerOptions;
use crate::dispatch::ResponseDispatcher;
use crate::handler::{CompletionRequest, WorkflowTaskHandler};
use crate::history::{HistoryIterator, HistoryPageFetcher};
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::reliability::{is_service_transient_error, with_deadline, RetryPolicy};
use crate::service::{
    PollForDecisionTaskRequest, PollForDecisionTaskResponse, StickyExecutionAttributes, TaskList,
    WorkflowService,
};

/// Result of one decision poll
#[derive(Debug)]
pub struct WorkflowTask {
    /// The task, or `None` when the long poll expired without work
    pub decision: Option<DecisionTask>,
    pub poll_started_at: Instant,
}

impl WorkflowTask {
    fn empty(poll_started_at: Instant) -> Self {
        Self {
            decision: None,
            poll_started_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.decision.is_none()
    }
}

/// A decision task together with the iterator over the rest of its history
#[derive(Debug)]
pub struct DecisionTask {
    pub response: PollForDecisionTaskResponse,
    pub history: HistoryIterator,
}

/// Polls decision tasks and reports the decisions made for them
///
/// Polls alternate between this worker's sticky queue and the shared queue
/// (see [`PollBalancer`]). Completed decisions ask the service to route the
/// next decision of the same execution back to this worker's sticky queue.
pub struct WorkflowTaskPoller {
    service: Arc<dyn WorkflowService>,
    handler: Arc<dyn WorkflowTaskHandler>,
    options: WorkerOptions,
    retry_policy: Arc<RetryPolicy>,
    metrics: Arc<dyn MetricsSink>,
    balancer: PollBalancer,
    cancel: CancellationToken,
}

impl WorkflowTaskPoller {
    pub fn new(
        service: Arc<dyn WorkflowService>,
        handler: Arc<dyn WorkflowTaskHandler>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            service,
            handler,
            retry_policy: Arc::clone(&options.retry_policy),
            balancer: PollBalancer::new(!options.disable_sticky_execution),
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

    pub fn balancer(&self) -> &PollBalancer {
        &self.balancer
    }

    fn dispatcher(&self) -> ResponseDispatcher {
        ResponseDispatcher::new(Arc::clone(&self.service), Arc::clone(&self.retry_policy))
            .with_metrics(Arc::clone(&self.metrics))
            .with_rpc_timeout(self.options.rpc_timeout)
            .with_cancellation(self.cancel.clone())
    }

    fn history_iterator(&self, response: &PollForDecisionTaskResponse) -> Result<HistoryIterator, PollerError> {
        let execution = response.workflow_execution.clone().ok_or_else(|| {
            error!("Decision task arrived without a workflow execution");
            PollerError::InvariantViolation("decision task has no workflow execution".to_string())
        })?;

        let fetcher = HistoryPageFetcher::new(
            Arc::clone(&self.service),
            Arc::clone(&self.retry_policy),
            self.options.domain.clone(),
            execution,
            response.started_event_id,
        )
        .with_metrics(Arc::clone(&self.metrics))
        .with_cancellation(self.cancel.clone())
        .with_rpc_timeout(self.options.rpc_timeout);

        Ok(HistoryIterator::new(fetcher, response.next_page_token.clone()))
    }

    fn sticky_attributes(&self) -> StickyExecutionAttributes {
        StickyExecutionAttributes {
            worker_task_list: TaskList::new(self.options.sticky_task_list.clone()),
            schedule_to_start_timeout_seconds: self
                .options
                .sticky_schedule_to_start_timeout_secs(),
        }
    }

    /// Check the handler's request and attach sticky attributes
    fn prepare_response(&self, request: CompletionRequest) -> Result<CompletionRequest, PollerError> {
        match request {
            CompletionRequest::DecisionTaskCompleted(mut request) => {
                if request.sticky_attributes.is_none() && self.balancer.is_sticky_enabled() {
                    request.sticky_attributes = Some(self.sticky_attributes());
                }
                Ok(CompletionRequest::DecisionTaskCompleted(request))
            }
            query @ CompletionRequest::QueryTaskCompleted(_) => Ok(query),
            other => {
                error!(kind = other.kind(), "Workflow task handler returned an activity response");
                Err(PollerError::InvariantViolation(format!(
                    "workflow task handler returned {}",
                    other.kind()
                )))
            }
        }
    }
}

#[async_trait]
impl TaskPoller for WorkflowTaskPoller {
    type Task = WorkflowTask;

    #[instrument(skip(self), fields(task_list = %self.options.task_list))]
    async fn poll_task(&self) -> Result<WorkflowTask, PollerError> {
        if self.cancel.is_cancelled() {
            return Err(PollerError::Shutdown);
        }

        let started = Instant::now();
        self.metrics.incr_counter(metrics::DECISION_POLL_COUNTER, 1);

        // Held until this function returns, whichever way it returns
        let permit = self.balancer.acquire();
        let task_list = match permit.kind() {
            QueueKind::Sticky => &self.options.sticky_task_list,
            QueueKind::Regular => &self.options.task_list,
        };
        trace!(queue = ?permit.kind(), %task_list, "Polling for decision task");

        let request = PollForDecisionTaskRequest {
            domain: self.options.domain.clone(),
            task_list: TaskList::new(task_list.clone()),
            identity: self.options.identity.clone(),
        };

        let result = tokio::select! {
            result = with_deadline(self.options.poll_timeout, self.service.poll_for_decision_task(request)) => result,
            _ = self.cancel.cancelled() => {
                debug!("Decision poll abandoned for shutdown");
                return Err(PollerError::Shutdown);
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if is_service_transient_error(&e) {
                    self.metrics
                        .incr_counter(metrics::DECISION_POLL_TRANSIENT_FAILED_COUNTER, 1);
                } else {
                    self.metrics.incr_counter(metrics::DECISION_POLL_FAILED_COUNTER, 1);
                }
                debug!(error = %e, "Decision poll failed");
                return Err(e.into());
            }
        };

        if !response.has_task() {
            self.metrics.incr_counter(metrics::DECISION_POLL_NO_TASK_COUNTER, 1);
            permit.update_backlog(0);
            debug!("No decision task");
            return Ok(WorkflowTask::empty(started));
        }

        permit.update_backlog(response.backlog_count_hint);
        let history = self.history_iterator(&response)?;

        self.metrics.incr_counter(metrics::DECISION_POLL_SUCCEED_COUNTER, 1);
        self.metrics
            .record_timer(metrics::DECISION_POLL_LATENCY, started.elapsed());
        debug!(
            started_event_id = response.started_event_id,
            backlog = response.backlog_count_hint,
            "Received decision task"
        );

        Ok(WorkflowTask {
            decision: Some(DecisionTask { response, history }),
            poll_started_at: started,
        })
    }

    #[instrument(skip_all)]
    async fn process_task(&self, task: WorkflowTask) -> Result<(), PollerError> {
        let Some(DecisionTask {
            response,
            mut history,
        }) = task.decision
        else {
            debug!("Workflow task unavailable");
            return Ok(());
        };

        let execution_started = Instant::now();
        let outcome = match self
            .handler
            .process_workflow_task(&response, &mut history, false)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics
                    .incr_counter(metrics::DECISION_EXECUTION_FAILED_COUNTER, 1);
                debug!(error = %e, "Workflow task handler failed");
                return Err(PollerError::Handler(e));
            }
        };
        self.metrics
            .record_timer(metrics::DECISION_EXECUTION_LATENCY, execution_started.elapsed());

        let request = self.prepare_response(outcome.request)?;

        let response_started = Instant::now();
        if let Err(e) = self.dispatcher().dispatch(Some(request)).await {
            self.metrics
                .incr_counter(metrics::DECISION_RESPONSE_FAILED_COUNTER, 1);
            return Err(e.into());
        }

        self.metrics
            .record_timer(metrics::DECISION_RESPONSE_LATENCY, response_started.elapsed());
        self.metrics
            .record_timer(metrics::DECISION_END_TO_END_LATENCY, task.poll_started_at.elapsed());
        Ok(())
    }
}
