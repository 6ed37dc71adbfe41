//! Request and response types for the workflow service RPCs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named task list (queue) on the service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskList {
    pub name: String,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Identity of one workflow run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Types of events recorded in a workflow history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // =========================================================================
    // Workflow Lifecycle Events
    // =========================================================================
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCanceled,
    WorkflowExecutionSignaled,

    // =========================================================================
    // Decision Events
    // =========================================================================
    DecisionTaskScheduled,
    DecisionTaskStarted,
    /// Marks the point where the last decision left off
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    DecisionTaskFailed,

    // =========================================================================
    // Activity Events
    // =========================================================================
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCanceled,

    // =========================================================================
    // Timer and Marker Events
    // =========================================================================
    TimerStarted,
    TimerFired,
    TimerCanceled,
    MarkerRecorded,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One event in a workflow history
///
/// Event ids start at 1 and increase by one within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Event attributes, opaque to the poller
    #[serde(default)]
    pub attributes: Option<serde_json::Value>,
}

impl HistoryEvent {
    pub fn new(event_id: i64, event_type: EventType) -> Self {
        Self {
            event_id,
            event_type,
            timestamp: Utc::now(),
            attributes: None,
        }
    }
}

/// An ordered page of history events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

impl History {
    pub fn new(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    pub fn first_event_id(&self) -> Option<i64> {
        self.events.first().map(|e| e.event_id)
    }

    pub fn last_event_id(&self) -> Option<i64> {
        self.events.last().map(|e| e.event_id)
    }
}

// =============================================================================
// Decision tasks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollForDecisionTaskRequest {
    pub domain: String,
    pub task_list: TaskList,
    pub identity: String,
}

/// Response to a decision poll
///
/// An empty `task_token` means the long poll expired with no work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForDecisionTaskResponse {
    #[serde(default)]
    pub task_token: Vec<u8>,
    pub workflow_execution: Option<WorkflowExecution>,
    pub workflow_type: Option<String>,
    /// First page of history, delivered inline with the task
    #[serde(default)]
    pub history: Option<History>,
    /// Cursor for the remaining history pages
    pub next_page_token: Option<Vec<u8>>,
    /// Approximate number of tasks still waiting on the polled task list
    #[serde(default)]
    pub backlog_count_hint: i64,
    /// Id of the DecisionTaskStarted event for this task
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(default)]
    pub previous_started_event_id: i64,
    #[serde(default)]
    pub attempt: i64,
}

impl PollForDecisionTaskResponse {
    pub fn has_task(&self) -> bool {
        !self.task_token.is_empty()
    }
}

/// Routes subsequent decisions of an execution to one worker's task list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickyExecutionAttributes {
    pub worker_task_list: TaskList,
    pub schedule_to_start_timeout_seconds: i32,
}

/// A decision produced by workflow code, opaque to the poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondDecisionTaskCompletedRequest {
    pub task_token: Vec<u8>,
    pub decisions: Vec<Decision>,
    pub execution_context: Option<Vec<u8>>,
    pub identity: String,
    pub sticky_attributes: Option<StickyExecutionAttributes>,
}

/// Outcome of answering a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTaskCompletedType {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondQueryTaskCompletedRequest {
    pub task_token: Vec<u8>,
    pub completed_type: QueryTaskCompletedType,
    pub query_result: Option<Vec<u8>>,
    pub error_message: Option<String>,
}

// =============================================================================
// Activity tasks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollForActivityTaskRequest {
    pub domain: String,
    pub task_list: TaskList,
    pub identity: String,
}

/// Response to an activity poll
///
/// An empty `task_token` means the long poll expired with no work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForActivityTaskResponse {
    #[serde(default)]
    pub task_token: Vec<u8>,
    pub workflow_execution: Option<WorkflowExecution>,
    pub activity_id: String,
    pub activity_type: String,
    pub input: Option<Vec<u8>>,
    #[serde(default)]
    pub start_to_close_timeout_seconds: i32,
    #[serde(default)]
    pub heartbeat_timeout_seconds: i32,
    #[serde(default)]
    pub attempt: i32,
}

impl PollForActivityTaskResponse {
    pub fn has_task(&self) -> bool {
        !self.task_token.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCompletedRequest {
    pub task_token: Vec<u8>,
    pub result: Option<Vec<u8>>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskFailedRequest {
    pub task_token: Vec<u8>,
    pub reason: String,
    pub details: Option<Vec<u8>>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCanceledRequest {
    pub task_token: Vec<u8>,
    pub details: Option<Vec<u8>>,
    pub identity: String,
}

// =============================================================================
// History
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionHistoryRequest {
    pub domain: String,
    pub execution: WorkflowExecution,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionHistoryResponse {
    pub history: History,
    pub next_page_token: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_poll_response_has_no_task() {
        assert!(!PollForDecisionTaskResponse::default().has_task());
        assert!(!PollForActivityTaskResponse::default().has_task());

        let response = PollForDecisionTaskResponse {
            task_token: b"token".to_vec(),
            ..Default::default()
        };
        assert!(response.has_task());
    }

    #[test]
    fn test_history_event_ids() {
        let history = History::new(vec![
            HistoryEvent::new(3, EventType::DecisionTaskScheduled),
            HistoryEvent::new(4, EventType::DecisionTaskStarted),
        ]);
        assert_eq!(history.first_event_id(), Some(3));
        assert_eq!(history.last_event_id(), Some(4));
        assert_eq!(History::default().last_event_id(), None);
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::DecisionTaskCompleted).unwrap();
        assert_eq!(json, "\"decision_task_completed\"");
    }
}
