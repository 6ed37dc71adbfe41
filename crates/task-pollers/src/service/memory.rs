//! In-memory implementation of WorkflowService for testing

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::types::*;
use super::{ServiceError, WorkflowService};

/// Identifies one RPC of [`WorkflowService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    PollForDecisionTask,
    RespondDecisionTaskCompleted,
    RespondQueryTaskCompleted,
    PollForActivityTask,
    RespondActivityTaskCompleted,
    RespondActivityTaskFailed,
    RespondActivityTaskCanceled,
    GetWorkflowExecutionHistory,
}

/// A request received by [`InMemoryWorkflowService`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    PollForDecisionTask(PollForDecisionTaskRequest),
    RespondDecisionTaskCompleted(RespondDecisionTaskCompletedRequest),
    RespondQueryTaskCompleted(RespondQueryTaskCompletedRequest),
    PollForActivityTask(PollForActivityTaskRequest),
    RespondActivityTaskCompleted(RespondActivityTaskCompletedRequest),
    RespondActivityTaskFailed(RespondActivityTaskFailedRequest),
    RespondActivityTaskCanceled(RespondActivityTaskCanceledRequest),
    GetWorkflowExecutionHistory(GetWorkflowExecutionHistoryRequest),
}

impl RecordedCall {
    /// The RPC this call was made to
    pub fn rpc(&self) -> Rpc {
        match self {
            Self::PollForDecisionTask(_) => Rpc::PollForDecisionTask,
            Self::RespondDecisionTaskCompleted(_) => Rpc::RespondDecisionTaskCompleted,
            Self::RespondQueryTaskCompleted(_) => Rpc::RespondQueryTaskCompleted,
            Self::PollForActivityTask(_) => Rpc::PollForActivityTask,
            Self::RespondActivityTaskCompleted(_) => Rpc::RespondActivityTaskCompleted,
            Self::RespondActivityTaskFailed(_) => Rpc::RespondActivityTaskFailed,
            Self::RespondActivityTaskCanceled(_) => Rpc::RespondActivityTaskCanceled,
            Self::GetWorkflowExecutionHistory(_) => Rpc::GetWorkflowExecutionHistory,
        }
    }
}

/// In-memory implementation of WorkflowService
///
/// This is primarily for testing. Poll responses are queued per task list,
/// histories are paged from an in-memory event log, and failures can be
/// scripted per RPC. Every request is recorded for later inspection.
///
/// When no task is queued for the polled task list, a poll waits for the
/// configured poll delay and then returns an empty response, the way a
/// long poll expires on the real service.
///
/// # Example
///
/// ```
/// use task_pollers::service::{InMemoryWorkflowService, PollForActivityTaskResponse};
///
/// let service = InMemoryWorkflowService::new();
/// service.push_activity_task(
///     "orders",
///     PollForActivityTaskResponse {
///         task_token: b"token".to_vec(),
///         ..Default::default()
///     },
/// );
/// ```
pub struct InMemoryWorkflowService {
    decision_tasks: RwLock<HashMap<String, VecDeque<PollForDecisionTaskResponse>>>,
    activity_tasks: RwLock<HashMap<String, VecDeque<PollForActivityTaskResponse>>>,
    histories: RwLock<HashMap<WorkflowExecution, Vec<HistoryEvent>>>,
    failures: RwLock<HashMap<Rpc, VecDeque<ServiceError>>>,
    calls: RwLock<Vec<RecordedCall>>,
    page_size: usize,
    poll_delay: Duration,
}

impl InMemoryWorkflowService {
    /// Create a new in-memory service
    pub fn new() -> Self {
        Self {
            decision_tasks: RwLock::new(HashMap::new()),
            activity_tasks: RwLock::new(HashMap::new()),
            histories: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            page_size: 100,
            poll_delay: Duration::ZERO,
        }
    }

    /// Set how long an empty poll waits before answering
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Set the number of events per history page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Queue a decision task on a task list
    pub fn push_decision_task(&self, task_list: &str, response: PollForDecisionTaskResponse) {
        self.decision_tasks
            .write()
            .entry(task_list.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue an activity task on a task list
    pub fn push_activity_task(&self, task_list: &str, response: PollForActivityTaskResponse) {
        self.activity_tasks
            .write()
            .entry(task_list.to_string())
            .or_default()
            .push_back(response);
    }

    /// Replace the full history of an execution
    pub fn set_history(&self, execution: WorkflowExecution, events: Vec<HistoryEvent>) {
        self.histories.write().insert(execution, events);
    }

    /// Make the next call to `rpc` fail with `error`
    ///
    /// Calling this repeatedly queues one failure per call.
    pub fn fail_next(&self, rpc: Rpc, error: ServiceError) {
        self.failures.write().entry(rpc).or_default().push_back(error);
    }

    /// All requests received so far, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().clone()
    }

    /// Number of requests received for one RPC
    pub fn call_count(&self, rpc: Rpc) -> usize {
        self.calls.read().iter().filter(|c| c.rpc() == rpc).count()
    }

    /// Number of tasks still queued on a decision task list
    pub fn pending_decision_tasks(&self, task_list: &str) -> usize {
        self.decision_tasks
            .read()
            .get(task_list)
            .map_or(0, VecDeque::len)
    }

    fn record(&self, call: RecordedCall) -> Result<(), ServiceError> {
        let rpc = call.rpc();
        self.calls.write().push(call);
        match self.failures.write().get_mut(&rpc).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn decode_page_token(token: &[u8]) -> Result<usize, ServiceError> {
        std::str::from_utf8(token)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ServiceError::BadRequest("invalid next page token".to_string()))
    }
}

impl Default for InMemoryWorkflowService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowService for InMemoryWorkflowService {
    async fn poll_for_decision_task(
        &self,
        request: PollForDecisionTaskRequest,
    ) -> Result<PollForDecisionTaskResponse, ServiceError> {
        let task_list = request.task_list.name.clone();
        self.record(RecordedCall::PollForDecisionTask(request))?;

        let task = self
            .decision_tasks
            .write()
            .get_mut(&task_list)
            .and_then(VecDeque::pop_front);

        match task {
            Some(task) => Ok(task),
            None => {
                tokio::time::sleep(self.poll_delay).await;
                Ok(PollForDecisionTaskResponse::default())
            }
        }
    }

    async fn respond_decision_task_completed(
        &self,
        request: RespondDecisionTaskCompletedRequest,
    ) -> Result<(), ServiceError> {
        self.record(RecordedCall::RespondDecisionTaskCompleted(request))
    }

    async fn respond_query_task_completed(
        &self,
        request: RespondQueryTaskCompletedRequest,
    ) -> Result<(), ServiceError> {
        self.record(RecordedCall::RespondQueryTaskCompleted(request))
    }

    async fn poll_for_activity_task(
        &self,
        request: PollForActivityTaskRequest,
    ) -> Result<PollForActivityTaskResponse, ServiceError> {
        let task_list = request.task_list.name.clone();
        self.record(RecordedCall::PollForActivityTask(request))?;

        let task = self
            .activity_tasks
            .write()
            .get_mut(&task_list)
            .and_then(VecDeque::pop_front);

        match task {
            Some(task) => Ok(task),
            None => {
                tokio::time::sleep(self.poll_delay).await;
                Ok(PollForActivityTaskResponse::default())
            }
        }
    }

    async fn respond_activity_task_completed(
        &self,
        request: RespondActivityTaskCompletedRequest,
    ) -> Result<(), ServiceError> {
        self.record(RecordedCall::RespondActivityTaskCompleted(request))
    }

    async fn respond_activity_task_failed(
        &self,
        request: RespondActivityTaskFailedRequest,
    ) -> Result<(), ServiceError> {
        self.record(RecordedCall::RespondActivityTaskFailed(request))
    }

    async fn respond_activity_task_canceled(
        &self,
        request: RespondActivityTaskCanceledRequest,
    ) -> Result<(), ServiceError> {
        self.record(RecordedCall::RespondActivityTaskCanceled(request))
    }

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, ServiceError> {
        let execution = request.execution.clone();
        let offset = match &request.next_page_token {
            Some(token) => Self::decode_page_token(token)?,
            None => 0,
        };
        self.record(RecordedCall::GetWorkflowExecutionHistory(request))?;

        let histories = self.histories.read();
        let events = histories.get(&execution).ok_or_else(|| {
            ServiceError::EntityNotExists(format!(
                "workflow {} run {}",
                execution.workflow_id, execution.run_id
            ))
        })?;

        let start = offset.min(events.len());
        let end = (start + self.page_size).min(events.len());
        let next_page_token = (end < events.len()).then(|| end.to_string().into_bytes());

        Ok(GetWorkflowExecutionHistoryResponse {
            history: History::new(events[start..end].to_vec()),
            next_page_token,
        })
    }
}
