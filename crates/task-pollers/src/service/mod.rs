//! Workflow service interface
//!
//! This module provides:
//! - [`WorkflowService`] - the RPCs the pollers consume
//! - Request/response types for those RPCs
//! - [`ServiceError`] - errors returned by the service or the transport
//! - [`InMemoryWorkflowService`] - a scriptable in-memory service for testing
//!
//! Transport and wire serialization live behind the trait; implementations
//! map their own failures into [`ServiceError`].

mod error;
mod memory;
mod types;

use async_trait::async_trait;

pub use error::ServiceError;
pub use memory::{InMemoryWorkflowService, RecordedCall, Rpc};
pub use types::{
    Decision, EventType, GetWorkflowExecutionHistoryRequest, GetWorkflowExecutionHistoryResponse,
    History, HistoryEvent, PollForActivityTaskRequest, PollForActivityTaskResponse,
    PollForDecisionTaskRequest, PollForDecisionTaskResponse, QueryTaskCompletedType,
    RespondActivityTaskCanceledRequest, RespondActivityTaskCompletedRequest,
    RespondActivityTaskFailedRequest, RespondDecisionTaskCompletedRequest,
    RespondQueryTaskCompletedRequest, StickyExecutionAttributes, TaskList, WorkflowExecution,
};

/// RPC surface of the remote task-queue service
///
/// Poll calls are long polls: the service holds them open until a task
/// arrives or its own poll window ends, then answers with an empty task
/// token.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    async fn poll_for_decision_task(
        &self,
        request: PollForDecisionTaskRequest,
    ) -> Result<PollForDecisionTaskResponse, ServiceError>;

    async fn respond_decision_task_completed(
        &self,
        request: RespondDecisionTaskCompletedRequest,
    ) -> Result<(), ServiceError>;

    async fn respond_query_task_completed(
        &self,
        request: RespondQueryTaskCompletedRequest,
    ) -> Result<(), ServiceError>;

    async fn poll_for_activity_task(
        &self,
        request: PollForActivityTaskRequest,
    ) -> Result<PollForActivityTaskResponse, ServiceError>;

    async fn respond_activity_task_completed(
        &self,
        request: RespondActivityTaskCompletedRequest,
    ) -> Result<(), ServiceError>;

    async fn respond_activity_task_failed(
        &self,
        request: RespondActivityTaskFailedRequest,
    ) -> Result<(), ServiceError>;

    async fn respond_activity_task_canceled(
        &self,
        request: RespondActivityTaskCanceledRequest,
    ) -> Result<(), ServiceError>;

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, ServiceError>;
}
