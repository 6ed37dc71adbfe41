//! Client-side deadlines for service calls

use std::future::Future;
use std::time::Duration;

use crate::service::ServiceError;

/// Run one service call under a local deadline
///
/// If `deadline` elapses before the call completes, the call is dropped and
/// [`ServiceError::DeadlineExceeded`] is returned. A zero deadline disables
/// the limit.
pub async fn with_deadline<T, Fut>(deadline: Duration, call: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    if deadline.is_zero() {
        return call.await;
    }

    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::DeadlineExceeded),
    }
}
