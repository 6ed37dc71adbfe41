//! Task handler seams
//!
//! The pollers never execute workflow or activity code themselves. They hand
//! each task to a handler and report whatever [`CompletionRequest`] comes
//! back.

mod activity;

use async_trait::async_trait;

use crate::history::HistoryIterator;
use crate::service::{
    PollForActivityTaskResponse, PollForDecisionTaskResponse, RespondActivityTaskCanceledRequest,
    RespondActivityTaskCompletedRequest, RespondActivityTaskFailedRequest,
    RespondDecisionTaskCompletedRequest, RespondQueryTaskCompletedRequest,
};

pub use activity::{convert_activity_result, ActivityError, ActivityFunction, ActivityRunner};

/// Outcome of a task, as the request that reports it
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionRequest {
    DecisionTaskCompleted(RespondDecisionTaskCompletedRequest),
    QueryTaskCompleted(RespondQueryTaskCompletedRequest),
    ActivityTaskCompleted(RespondActivityTaskCompletedRequest),
    ActivityTaskFailed(RespondActivityTaskFailedRequest),
    ActivityTaskCanceled(RespondActivityTaskCanceledRequest),
}

impl CompletionRequest {
    /// Short name used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DecisionTaskCompleted(_) => "decision_task_completed",
            Self::QueryTaskCompleted(_) => "query_task_completed",
            Self::ActivityTaskCompleted(_) => "activity_task_completed",
            Self::ActivityTaskFailed(_) => "activity_task_failed",
            Self::ActivityTaskCanceled(_) => "activity_task_canceled",
        }
    }

    /// Token of the task being reported
    pub fn task_token(&self) -> &[u8] {
        match self {
            Self::DecisionTaskCompleted(r) => &r.task_token,
            Self::QueryTaskCompleted(r) => &r.task_token,
            Self::ActivityTaskCompleted(r) => &r.task_token,
            Self::ActivityTaskFailed(r) => &r.task_token,
            Self::ActivityTaskCanceled(r) => &r.task_token,
        }
    }

    /// Whether this reports a decision or query task
    pub fn is_workflow_response(&self) -> bool {
        matches!(
            self,
            Self::DecisionTaskCompleted(_) | Self::QueryTaskCompleted(_)
        )
    }

    /// Whether this reports an activity task
    pub fn is_activity_response(&self) -> bool {
        !self.is_workflow_response()
    }
}

/// What a workflow task handler produced
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTaskOutcome {
    /// Request reporting the decision (or query answer)
    pub request: CompletionRequest,

    /// Auxiliary result for the caller, e.g. a query answer kept locally
    pub result: Option<serde_json::Value>,
}

impl WorkflowTaskOutcome {
    pub fn new(request: CompletionRequest) -> Self {
        Self {
            request,
            result: None,
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Runs workflow code for a decision task
///
/// The handler replays history through `history` as far as it needs and
/// returns the request that reports its decisions. An error means the
/// workflow code itself failed; it is not retried by the poller.
#[async_trait]
pub trait WorkflowTaskHandler: Send + Sync {
    async fn process_workflow_task(
        &self,
        task: &PollForDecisionTaskResponse,
        history: &mut HistoryIterator,
        query_only: bool,
    ) -> anyhow::Result<WorkflowTaskOutcome>;
}

/// Runs activity code for an activity task
///
/// `Ok(None)` means the activity will be completed asynchronously and there
/// is nothing to report now.
#[async_trait]
pub trait ActivityTaskHandler: Send + Sync {
    async fn execute(
        &self,
        task: &PollForActivityTaskResponse,
    ) -> anyhow::Result<Option<CompletionRequest>>;
}
