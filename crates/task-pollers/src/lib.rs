//! # Task Pollers
//!
//! Worker-side task acquisition for a workflow orchestration service.
//!
//! ## Features
//!
//! - **Long polling**: decision and activity tasks are pulled with bounded long polls
//! - **Sticky execution**: decision polls are balanced between a worker-affine queue and the shared one
//! - **Retries**: every report to the service is retried with exponential backoff until its expiration
//! - **Paged history**: decision history is fetched on demand and cut at the completion boundary
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PollerGroup                            │
//! │  (N concurrent loops of poll_task → process_task)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            WorkflowTaskPoller / ActivityTaskPoller           │
//! │  (queue selection, handler invocation, HistoryIterator)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ResponseDispatcher                         │
//! │  (one RPC per outcome, RetryPolicy + error classification)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WorkflowService                           │
//! │  (remote task-queue service; in-memory fake for tests)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use task_pollers::prelude::*;
//!
//! let options = WorkerOptions::from_env();
//! let shutdown = CancellationToken::new();
//!
//! let poller = ActivityTaskPoller::new(
//!     service.clone(),
//!     Arc::new(ActivityRunner::new(ShipOrder, options.identity.clone())),
//!     options,
//! )
//! .with_cancellation(shutdown.clone());
//!
//! let group = PollerGroup::spawn(Arc::new(poller), 4, shutdown);
//! // ...
//! group.shutdown_and_join().await;
//! ```

pub mod config;
pub mod dispatch;
pub mod handler;
pub mod history;
pub mod metrics;
pub mod reliability;
pub mod service;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::WorkerOptions;
    pub use crate::dispatch::ResponseDispatcher;
    pub use crate::handler::{
        ActivityError, ActivityFunction, ActivityRunner, ActivityTaskHandler, CompletionRequest,
        WorkflowTaskHandler, WorkflowTaskOutcome,
    };
    pub use crate::history::{HistoryError, HistoryIterator};
    pub use crate::metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
    pub use crate::reliability::RetryPolicy;
    pub use crate::service::{InMemoryWorkflowService, ServiceError, WorkflowService};
    pub use crate::worker::{
        ActivityTaskPoller, PollerError, PollerGroup, TaskPoller, WorkflowTaskPoller,
    };
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use config::WorkerOptions;
pub use dispatch::ResponseDispatcher;
pub use handler::{
    convert_activity_result, ActivityError, ActivityFunction, ActivityRunner, ActivityTaskHandler,
    CompletionRequest, WorkflowTaskHandler, WorkflowTaskOutcome,
};
pub use history::{HistoryError, HistoryIterator, HistoryPageFetcher, PageCursor};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use reliability::{is_client_side_error, is_service_transient_error, ErrorClass, RetryPolicy};
pub use service::{InMemoryWorkflowService, ServiceError, WorkflowService};
pub use worker::{
    ActivityTask, ActivityTaskPoller, PollBalancer, PollerError, PollerGroup, QueueKind,
    TaskPoller, WorkflowTask, WorkflowTaskPoller,
};
