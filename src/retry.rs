// src/retry.rs

//! Bounded retry with exponential backoff
//!
//! Wraps any async action that can transiently fail. The delay doubles on
//! each attempt (`base_delay * 2^(attempt-1)`), optionally capped. Filters
//! restrict retrying to one error kind or to errors whose message contains
//! a given substring; anything else propagates unchanged. Cancellation is
//! never treated as retryable.

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for transiently failing operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
    kind_filter: Option<ErrorKind>,
    message_filter: Option<String>,
}

impl RetryPolicy {
    /// Create a policy retrying up to `max_retries` times after the first attempt
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: None,
            kind_filter: None,
            message_filter: None,
        }
    }

    /// Cap the backoff delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Only retry errors of the given kind
    pub fn retry_kind(mut self, kind: ErrorKind) -> Self {
        self.kind_filter = Some(kind);
        self
    }

    /// Only retry errors whose message contains the given substring
    pub fn retry_message(mut self, needle: impl Into<String>) -> Self {
        self.message_filter = Some(needle.into());
        self
    }

    fn qualifies(&self, error: &Error) -> bool {
        if error.is_cancelled() {
            return false;
        }
        if let Some(kind) = self.kind_filter {
            if error.kind() != kind {
                return false;
            }
        }
        if let Some(ref needle) = self.message_filter {
            if !error.to_string().contains(needle.as_str()) {
                return false;
            }
        }
        true
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Run `action`, retrying qualifying failures until retries are exhausted
    pub async fn run<T, F, Fut>(&self, mut action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match action().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt <= self.max_retries && self.qualifies(&e) => {
                    warn!("Attempt {} failed: {}, retrying...", attempt, e);
                    tokio::time::sleep(self.delay_for(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
