//! Worker configuration shared by the pollers

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reliability::{duration_millis, RetryPolicy};

/// Default long-poll timeout; the service holds a poll for about a minute
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Default timeout for a single non-poll call
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Default schedule-to-start timeout attached to sticky decisions
pub const DEFAULT_STICKY_SCHEDULE_TO_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Poller configuration
///
/// # Example
///
/// ```
/// use task_pollers::WorkerOptions;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let options = WorkerOptions::new("payments", "payments-tl")
///     .with_identity("payments-worker-1")
///     .with_sticky_schedule_to_start_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerOptions {
    /// Domain the task lists belong to
    pub domain: String,

    /// Shared task list polled by every worker of this kind
    pub task_list: String,

    /// Identity reported to the service with every poll and response
    pub identity: String,

    /// This worker's own sticky task list
    pub sticky_task_list: String,

    /// Poll only the shared task list and never request sticky execution
    pub disable_sticky_execution: bool,

    /// How long a sticky decision may wait before the service reroutes it
    #[serde(with = "duration_millis")]
    pub sticky_schedule_to_start_timeout: Duration,

    /// Client-side deadline for one long poll
    #[serde(with = "duration_millis")]
    pub poll_timeout: Duration,

    /// Client-side deadline for one attempt of any other call
    #[serde(with = "duration_millis")]
    pub rpc_timeout: Duration,

    /// Retry policy for responses and history fetches
    ///
    /// Built once and shared by every poller created from these options.
    pub retry_policy: Arc<RetryPolicy>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        let identity = format!("worker-{}", Uuid::now_v7());
        Self {
            domain: "default".to_string(),
            task_list: "default".to_string(),
            sticky_task_list: sticky_task_list_for(&identity),
            identity,
            disable_sticky_execution: false,
            sticky_schedule_to_start_timeout: DEFAULT_STICKY_SCHEDULE_TO_START_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            retry_policy: Arc::new(RetryPolicy::service()),
        }
    }
}

impl WorkerOptions {
    /// Create options for a domain and shared task list
    pub fn new(domain: impl Into<String>, task_list: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            task_list: task_list.into(),
            ..Default::default()
        }
    }

    /// Load options from the environment
    ///
    /// Reads `WORKER_DOMAIN`, `WORKER_TASK_LIST`, `WORKER_IDENTITY`,
    /// `WORKER_DISABLE_STICKY` and `WORKER_STICKY_SCHEDULE_TO_START_SECS`;
    /// anything unset or unparsable keeps its default.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(domain) = std::env::var("WORKER_DOMAIN") {
            options.domain = domain;
        }
        if let Ok(task_list) = std::env::var("WORKER_TASK_LIST") {
            options.task_list = task_list;
        }
        if let Ok(identity) = std::env::var("WORKER_IDENTITY") {
            options = options.with_identity(identity);
        }

        options.disable_sticky_execution = std::env::var("WORKER_DISABLE_STICKY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        if let Some(secs) = std::env::var("WORKER_STICKY_SCHEDULE_TO_START_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            options.sticky_schedule_to_start_timeout = Duration::from_secs(secs);
        }

        options
    }

    /// Set the worker identity
    ///
    /// The sticky task list is derived from the identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self.sticky_task_list = sticky_task_list_for(&self.identity);
        self
    }

    /// Override the sticky task list name
    pub fn with_sticky_task_list(mut self, name: impl Into<String>) -> Self {
        self.sticky_task_list = name.into();
        self
    }

    /// Enable or disable sticky execution
    pub fn with_sticky_execution(mut self, enabled: bool) -> Self {
        self.disable_sticky_execution = !enabled;
        self
    }

    /// Set the sticky schedule-to-start timeout
    pub fn with_sticky_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.sticky_schedule_to_start_timeout = timeout;
        self
    }

    /// Set the long-poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the per-call timeout
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: impl Into<Arc<RetryPolicy>>) -> Self {
        self.retry_policy = policy.into();
        self
    }

    /// Sticky schedule-to-start timeout in whole seconds, rounded up
    pub fn sticky_schedule_to_start_timeout_secs(&self) -> i32 {
        let timeout = self.sticky_schedule_to_start_timeout;
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        i32::try_from(secs).unwrap_or(i32::MAX)
    }
}

/// Sticky task lists must be unique per worker process
fn sticky_task_list_for(identity: &str) -> String {
    format!("{}:{}", identity, Uuid::now_v7())
}
