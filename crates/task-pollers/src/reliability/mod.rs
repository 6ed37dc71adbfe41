//! Reliability patterns for service calls
//!
//! This module provides:
//! - [`RetryPolicy`] - Exponential backoff bounded by an expiration interval
//! - [`retry`] - The retry loop used for every service call
//! - [`classify`] - Transient / permanent / client-side error classification
//! - [`with_deadline`] - Local per-call deadline

mod classify;
mod retry;
mod timeout;

pub(crate) use retry::duration_millis;

pub use classify::{classify, is_client_side_error, is_service_transient_error, ErrorClass};
pub use retry::{retry, RetryPolicy};
pub use timeout::with_deadline;
