//! Task pollers
//!
//! This module provides:
//! - [`TaskPoller`] - The poll / process contract driven by the worker
//! - [`WorkflowTaskPoller`] - Decision tasks, balanced across two queues
//! - [`ActivityTaskPoller`] - Activity tasks
//! - [`PollBalancer`] - Sticky vs. regular queue selection
//! - [`PollerGroup`] - Concurrent poll loops with shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PollerGroup                            │
//! │   [loop 1]  [loop 2]  ...  [loop N]   poll_task → process_task│
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │
//!                 ▼
//! ┌──────────────────────────────┐    ┌──────────────────────────┐
//! │      WorkflowTaskPoller      │    │    ActivityTaskPoller    │
//! │  PollBalancer (sticky/regular)│    │                          │
//! │  HistoryIterator per task    │    │                          │
//! └───────────────┬──────────────┘    └─────────────┬────────────┘
//!                 │   handler → CompletionRequest    │
//!                 ▼                                  ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │        ResponseDispatcher (retry + per-attempt deadline)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod activity_poller;
mod balancer;
mod driver;
mod error;
mod workflow_poller;

use async_trait::async_trait;

pub use activity_poller::{ActivityTask, ActivityTaskPoller};
pub use balancer::{BalancerState, PollBalancer, PollPermit, QueueKind};
pub use driver::{PollerGroup, ERROR_PAUSE};
pub use error::PollerError;
pub use workflow_poller::{DecisionTask, WorkflowTask, WorkflowTaskPoller};

/// Poll / process contract driven by the worker
///
/// `poll_task` issues one long poll. An empty result is not an error; it is
/// handed to `process_task` like any other task and processing it does
/// nothing.
#[async_trait]
pub trait TaskPoller: Send + Sync {
    type Task: Send + 'static;

    async fn poll_task(&self) -> Result<Self::Task, PollerError>;

    async fn process_task(&self, task: Self::Task) -> Result<(), PollerError>;
}
