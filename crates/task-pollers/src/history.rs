//! Paginated workflow history
//!
//! A decision task arrives with the first page of its history. The rest is
//! pulled on demand through a [`HistoryIterator`], which stops at the
//! decision's completion boundary: events recorded after the boundary are
//! never surfaced, even when the service already has them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::config::DEFAULT_RPC_TIMEOUT;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::reliability::{is_service_transient_error, retry, with_deadline, RetryPolicy};
use crate::service::{
    EventType, GetWorkflowExecutionHistoryRequest, History, ServiceError, WorkflowExecution,
    WorkflowService,
};

/// Event type every completion boundary must point at
pub const COMPLETION_MARKER: EventType = EventType::DecisionTaskCompleted;

/// History retrieval errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The history RPC failed after retrying
    #[error("failed to fetch history: {0}")]
    Service(#[from] ServiceError),

    /// The boundary event is not a completion marker
    #[error(
        "completion boundary {boundary_event_id} points to event {found_event_id} \
         of type {event_type}, expected a completed decision"
    )]
    DataIntegrity {
        boundary_event_id: i64,
        found_event_id: i64,
        event_type: EventType,
    },

    /// The boundary lies before the first event of the fetched page
    #[error("completion boundary {boundary_event_id} precedes page starting at event {first_event_id}")]
    BoundaryOutOfRange {
        boundary_event_id: i64,
        first_event_id: i64,
    },

    /// All pages have already been returned
    #[error("history iterator is exhausted")]
    Exhausted,
}

impl HistoryError {
    /// Whether this error signals inconsistent history rather than a failed call
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::DataIntegrity { .. } | Self::BoundaryOutOfRange { .. })
    }
}

/// Position of a [`HistoryIterator`] in the event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Next fetch starts from the first event
    Start,
    /// Next fetch continues from a service-issued token
    Token(Vec<u8>),
    /// Nothing left to fetch
    Exhausted,
}

impl PageCursor {
    /// Cursor for a token returned by the service
    ///
    /// A missing or empty token means the log has been read to its end.
    pub fn from_token(token: Option<Vec<u8>>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Self::Token(token),
            _ => Self::Exhausted,
        }
    }
}

/// Fetches history pages for one execution
///
/// Bound to the execution, domain and completion boundary of a single
/// decision task. Every fetch is one retried RPC with a local deadline per
/// attempt.
pub struct HistoryPageFetcher {
    service: Arc<dyn WorkflowService>,
    retry_policy: Arc<RetryPolicy>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    rpc_timeout: Duration,
    domain: String,
    execution: WorkflowExecution,
    max_event_id: i64,
}

impl HistoryPageFetcher {
    /// Create a fetcher
    ///
    /// `max_event_id` is the completion boundary; 0 disables truncation.
    pub fn new(
        service: Arc<dyn WorkflowService>,
        retry_policy: Arc<RetryPolicy>,
        domain: impl Into<String>,
        execution: WorkflowExecution,
        max_event_id: i64,
    ) -> Self {
        Self {
            service,
            retry_policy,
            metrics: Arc::new(NoopMetrics),
            cancel: CancellationToken::new(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            domain: domain.into(),
            execution,
            max_event_id,
        }
    }

    /// Report fetches to a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Stop retrying when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the per-attempt deadline
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Fetch the page at `token` and apply the completion boundary
    ///
    /// Returns the page together with the token of the following page.
    pub async fn fetch_page(
        &self,
        token: Option<Vec<u8>>,
    ) -> Result<(History, Option<Vec<u8>>), HistoryError> {
        self.metrics.incr_counter(metrics::WORKFLOW_GET_HISTORY_COUNTER, 1);
        let started = Instant::now();

        let request = GetWorkflowExecutionHistoryRequest {
            domain: self.domain.clone(),
            execution: self.execution.clone(),
            next_page_token: token,
        };
        let service = &self.service;
        let rpc_timeout = self.rpc_timeout;

        let result = retry(
            &self.retry_policy,
            &self.cancel,
            is_service_transient_error,
            move || {
                let request = request.clone();
                async move {
                    with_deadline(rpc_timeout, service.get_workflow_execution_history(request))
                        .await
                }
            },
        )
        .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.metrics
                    .incr_counter(metrics::WORKFLOW_GET_HISTORY_FAILED_COUNTER, 1);
                return Err(e.into());
            }
        };

        self.metrics
            .incr_counter(metrics::WORKFLOW_GET_HISTORY_SUCCEED_COUNTER, 1);
        self.metrics
            .record_timer(metrics::WORKFLOW_GET_HISTORY_LATENCY, started.elapsed());

        let mut history = response.history;
        let mut next_page_token = response.next_page_token;
        truncate_at_boundary(&mut history, &mut next_page_token, self.max_event_id)?;

        Ok((history, next_page_token))
    }
}

/// Cut a page at the completion boundary
///
/// When the page reaches `max_event_id`, it is cut so that it ends on the
/// boundary event and `next_page_token` is cleared, even if the page already
/// ended there. The boundary event must be a [`COMPLETION_MARKER`]. A
/// boundary of 0 leaves the page untouched.
pub fn truncate_at_boundary(
    history: &mut History,
    next_page_token: &mut Option<Vec<u8>>,
    max_event_id: i64,
) -> Result<(), HistoryError> {
    let (Some(first_event_id), Some(last_event_id)) =
        (history.first_event_id(), history.last_event_id())
    else {
        return Ok(());
    };

    if max_event_id <= 0 || last_event_id < max_event_id {
        return Ok(());
    }

    if max_event_id < first_event_id {
        error!(
            boundary_event_id = max_event_id,
            first_event_id, "Completion boundary precedes history page"
        );
        return Err(HistoryError::BoundaryOutOfRange {
            boundary_event_id: max_event_id,
            first_event_id,
        });
    }

    let keep = (max_event_id - first_event_id + 1) as usize;
    history.events.truncate(keep);
    *next_page_token = None;

    // Ids with gaps can leave the page shorter than `keep`
    let Some(boundary) = history.events.last() else {
        return Ok(());
    };
    if boundary.event_type != COMPLETION_MARKER || boundary.event_id != max_event_id {
        error!(
            boundary_event_id = max_event_id,
            found_event_id = boundary.event_id,
            event_type = %boundary.event_type,
            "Completion boundary does not point at a completion marker"
        );
        return Err(HistoryError::DataIntegrity {
            boundary_event_id: max_event_id,
            found_event_id: boundary.event_id,
            event_type: boundary.event_type,
        });
    }

    Ok(())
}

/// Lazily pages through the history of one decision task
///
/// # Example
///
/// ```ignore
/// while iterator.has_next_page() {
///     let page = iterator.get_next_page().await?;
///     replay(page.events);
/// }
/// ```
pub struct HistoryIterator {
    fetcher: HistoryPageFetcher,
    cursor: PageCursor,
}

impl HistoryIterator {
    /// Create an iterator positioned at `next_page_token`
    ///
    /// The token is the one returned with the first page of the task, so
    /// the first call to [`get_next_page`](Self::get_next_page) fetches the
    /// second page.
    pub fn new(fetcher: HistoryPageFetcher, next_page_token: Option<Vec<u8>>) -> Self {
        Self {
            fetcher,
            cursor: PageCursor::from_token(next_page_token),
        }
    }

    /// Whether a service-issued cursor is pending
    pub fn has_next_page(&self) -> bool {
        matches!(self.cursor, PageCursor::Token(_))
    }

    /// Current cursor
    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Execution this iterator reads
    pub fn execution(&self) -> &WorkflowExecution {
        &self.fetcher.execution
    }

    /// Completion boundary event id (0 when unset)
    pub fn max_event_id(&self) -> i64 {
        self.fetcher.max_event_id
    }

    /// Fetch the next page and advance the cursor
    ///
    /// Fails with [`HistoryError::Exhausted`] once the log has been read to
    /// its end (or to the completion boundary) until [`reset`](Self::reset)
    /// is called. On error the cursor is left where it was.
    #[instrument(skip(self), fields(workflow_id = %self.fetcher.execution.workflow_id))]
    pub async fn get_next_page(&mut self) -> Result<History, HistoryError> {
        let token = match &self.cursor {
            PageCursor::Start => None,
            PageCursor::Token(token) => Some(token.clone()),
            PageCursor::Exhausted => return Err(HistoryError::Exhausted),
        };

        let (history, next_page_token) = self.fetcher.fetch_page(token).await?;
        self.cursor = PageCursor::from_token(next_page_token);

        debug!(
            events = history.events.len(),
            exhausted = self.cursor == PageCursor::Exhausted,
            "Fetched history page"
        );

        Ok(history)
    }

    /// Rewind to the first event
    ///
    /// Only the cursor changes; nothing is fetched until the next call to
    /// [`get_next_page`](Self::get_next_page).
    pub fn reset(&mut self) {
        self.cursor = PageCursor::Start;
    }
}

impl std::fmt::Debug for HistoryIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryIterator")
            .field("execution", &self.fetcher.execution)
            .field("max_event_id", &self.fetcher.max_event_id)
            .field("cursor", &self.cursor)
            .finish()
    }
}
