//! Retry policy.
//!
//! A request moves through `Idle → Attempting(n) → Retrying(delay) →
//! Attempting(n + 1) → … → Exhausted`. [`RetryPolicy::decide`] is consulted
//! after every failed attempt; successful attempts are terminal.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use horizon_request_core::logging::targets;

use crate::error::RequestError;
use crate::response::{ResponseObject, TransportResponse};

/// Decides synchronously whether a failed attempt is worth retrying.
pub type RetryValidator = Arc<dyn Fn(&RetryInput) -> bool + Send + Sync>;

/// Performs extra work before a retry (e.g. refreshing a token) and makes the
/// final call.
pub type RetryProcessor = Arc<dyn Fn(RetryInput) -> BoxFuture<'static, bool> + Send + Sync>;

/// Snapshot of a failed attempt handed to validators and processors.
#[derive(Clone, Debug)]
pub struct RetryInput {
    /// Number of transport invocations so far, including this one.
    pub attempt: u32,
    /// The response, when the transport produced one.
    pub response: Option<TransportResponse>,
    /// The decoded response object, when decoding succeeded.
    pub response_object: Option<ResponseObject>,
    /// Why the attempt failed.
    pub error: RequestError,
    /// Time since the first attempt started.
    pub elapsed: Duration,
}

impl RetryInput {
    /// HTTP status code of the response, if any.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// The default validator: retry transport errors and non-2xx statuses.
pub fn default_retry_validator(input: &RetryInput) -> bool {
    input.error.is_network() || input.status().is_some_and(|s| !(200..300).contains(&s))
}

/// Outcome of a retry evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    /// Resubmit after the delay.
    Retrying(Duration),
    /// Give up and surface the last error.
    Exhausted,
}

/// Retry settings for a request.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first one.
    pub count: u32,
    /// Delay before each resubmission.
    pub interval: Duration,
    /// Overall budget measured from the first attempt; zero means unbounded.
    pub timeout: Duration,
    /// Validator; [`default_retry_validator`] when unset.
    pub validator: Option<RetryValidator>,
    /// Optional async processor run after the validator agreed.
    pub processor: Option<RetryProcessor>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 0,
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
            validator: None,
            processor: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("count", &self.count)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("validator", &self.validator.is_some())
            .field("processor", &self.processor.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `count` times, waiting `interval` between attempts.
    pub fn new(count: u32, interval: Duration) -> Self {
        Self {
            count,
            interval,
            ..Self::default()
        }
    }

    /// Bound the whole request, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the validator.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&RetryInput) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Install an async processor.
    pub fn with_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(RetryInput) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        self.processor = Some(Arc::new(processor));
        self
    }

    fn has_budget(&self, context: &RetryContext) -> bool {
        if context.attempts > self.count {
            return false;
        }
        self.timeout.is_zero() || context.elapsed() + self.interval < self.timeout
    }

    /// Evaluate a failed attempt.
    ///
    /// The validator and processor only run while attempts and time remain.
    pub async fn decide(&self, context: &RetryContext, input: RetryInput) -> RetryState {
        if !self.has_budget(context) {
            tracing::debug!(
                target: targets::RETRY,
                attempts = context.attempts,
                elapsed_ms = context.elapsed().as_millis() as u64,
                "retry budget exhausted"
            );
            return RetryState::Exhausted;
        }

        let agreed = match &self.validator {
            Some(validator) => validator(&input),
            None => default_retry_validator(&input),
        };
        if !agreed {
            tracing::trace!(
                target: targets::RETRY,
                error = %input.error,
                "validator declined retry"
            );
            return RetryState::Exhausted;
        }

        if let Some(processor) = &self.processor
            && !processor(input).await
        {
            tracing::trace!(target: targets::RETRY, "processor declined retry");
            return RetryState::Exhausted;
        }

        // The processor may have taken a while.
        if !self.has_budget(context) {
            return RetryState::Exhausted;
        }

        tracing::debug!(
            target: targets::RETRY,
            attempt = context.attempts + 1,
            delay_ms = self.interval.as_millis() as u64,
            "scheduling retry"
        );
        RetryState::Retrying(self.interval)
    }

    /// Time left before the overall timeout, or `None` when unbounded.
    pub fn remaining(&self, context: &RetryContext) -> Option<Duration> {
        if self.timeout.is_zero() {
            None
        } else {
            Some(self.timeout.saturating_sub(context.elapsed()))
        }
    }
}

/// Per-request retry bookkeeping.
#[derive(Clone, Debug)]
pub struct RetryContext {
    attempts: u32,
    started_at: Instant,
    last_error: Option<RequestError>,
}

impl RetryContext {
    /// Start bookkeeping now.
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started_at: Instant::now(),
            last_error: None,
        }
    }

    /// Count a transport invocation.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Remember the most recent failure.
    pub fn record_error(&mut self, error: RequestError) {
        self.last_error = Some(error);
    }

    /// Transport invocations so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since bookkeeping started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The most recent failure.
    pub fn last_error(&self) -> Option<&RequestError> {
        self.last_error.as_ref()
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NetworkError, ValidationError};

    fn failed(attempt: u32, status: Option<u16>, error: RequestError) -> RetryInput {
        RetryInput {
            attempt,
            response: status.map(|s| TransportResponse::new(s, "")),
            response_object: None,
            error,
            elapsed: Duration::ZERO,
        }
    }

    fn context_with(attempts: u32) -> RetryContext {
        let mut context = RetryContext::new();
        for _ in 0..attempts {
            context.record_attempt();
        }
        context
    }

    #[test]
    fn test_default_validator() {
        assert!(default_retry_validator(&failed(
            1,
            None,
            NetworkError::Timeout.into()
        )));
        assert!(default_retry_validator(&failed(
            1,
            Some(503),
            ValidationError::InvalidStatusCode { status: 503 }.into()
        )));
        assert!(!default_retry_validator(&failed(
            1,
            Some(200),
            ValidationError::InvalidJsonFormat.into()
        )));
    }

    #[tokio::test]
    async fn test_count_limits_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(5));
        let input = failed(1, Some(500), ValidationError::InvalidStatusCode { status: 500 }.into());

        assert_eq!(
            policy.decide(&context_with(1), input.clone()).await,
            RetryState::Retrying(Duration::from_millis(5))
        );
        assert!(matches!(
            policy.decide(&context_with(2), input.clone()).await,
            RetryState::Retrying(_)
        ));
        assert_eq!(
            policy.decide(&context_with(3), input).await,
            RetryState::Exhausted
        );
    }

    #[tokio::test]
    async fn test_timeout_budget_includes_interval() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(2)).with_timeout(Duration::from_secs(1));
        let input = failed(1, None, NetworkError::Timeout.into());
        assert_eq!(
            policy.decide(&context_with(1), input).await,
            RetryState::Exhausted
        );
    }

    #[tokio::test]
    async fn test_processor_decides_after_validator() {
        let policy = RetryPolicy::new(3, Duration::ZERO)
            .with_validator(|_| true)
            .with_processor(|input| Box::pin(async move { input.attempt < 2 }));

        let ctx = context_with(1);
        let first = failed(1, Some(200), ValidationError::InvalidJsonFormat.into());
        assert!(matches!(policy.decide(&ctx, first).await, RetryState::Retrying(_)));

        let ctx = context_with(2);
        let second = failed(2, Some(200), ValidationError::InvalidJsonFormat.into());
        assert_eq!(policy.decide(&ctx, second).await, RetryState::Exhausted);
    }

    #[test]
    fn test_remaining_budget() {
        let ctx = RetryContext::new();
        assert_eq!(RetryPolicy::none().remaining(&ctx), None);
        let bounded = RetryPolicy::none().with_timeout(Duration::from_secs(30));
        assert!(bounded.remaining(&ctx).unwrap() <= Duration::from_secs(30));
    }

    #[test]
    fn test_context_keeps_the_most_recent_error() {
        let mut ctx = RetryContext::new();
        assert!(ctx.last_error().is_none());
        ctx.record_error(NetworkError::Timeout.into());
        ctx.record_error(ValidationError::InvalidJsonFormat.into());
        assert_eq!(
            ctx.last_error(),
            Some(&RequestError::Validation(ValidationError::InvalidJsonFormat))
        );
    }
}
