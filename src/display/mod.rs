//! Outbound display targets
//!
//! A [`DisplayTarget`] is whatever the host uses to show output: a chat
//! channel, a terminal, a test recorder. Delivery helpers wrap its raw calls
//! with the retry policy: rate limits are retried with exponential backoff,
//! oversized edits fall back to a file attachment, and an error only reaches
//! the caller once retries are exhausted.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::pager::RenderedPage;

#[cfg(test)]
pub mod testing;

/// File name used when output is attached instead of sent inline
pub const OUTPUT_FILE_NAME: &str = "output.txt";

/* ===================== Identifiers & Limits ===================== */

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLimits {
    /// Characters allowed in one message
    pub max_message_len: usize,
    /// Minimum time between two edits of the same message
    pub min_edit_interval: Duration,
    /// Largest attachment the platform previews inline
    pub max_file_preview: usize,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            max_message_len: 2000,
            min_edit_interval: Duration::from_secs(1),
            max_file_preview: 50_000,
        }
    }
}

/// Outcome marker attached to the invoking message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusMarker {
    Running,
    Done,
    Timeout,
    SyntaxError,
    Error,
}

impl StatusMarker {
    pub fn emoji(&self) -> &'static str {
        match self {
            StatusMarker::Running => "\u{25b6}\u{fe0f}",
            StatusMarker::Done => "\u{2714}\u{fe0f}",
            StatusMarker::Timeout => "\u{23f0}",
            StatusMarker::SyntaxError => "\u{2757}",
            StatusMarker::Error => "\u{203c}\u{fe0f}",
        }
    }
}

/* ===================== Errors ===================== */

/// Raw failure reported by a target
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisplayError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("content of {len} characters exceeds the limit of {max}")]
    TooLarge { len: usize, max: usize },
    #[error("message not found")]
    NotFound,
    #[error("{0}")]
    Fatal(String),
}

/// Failure left over after the retry policy gave up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("{operation} still failing after {attempts} attempts: {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last: DisplayError,
    },
    #[error("the message was deleted")]
    Gone,
    #[error("{operation} failed: {message}")]
    Fatal {
        operation: &'static str,
        message: String,
    },
}

/* ===================== DisplayTarget ===================== */

#[async_trait]
pub trait DisplayTarget: Send + Sync {
    fn limits(&self) -> PlatformLimits;

    async fn send(&self, page: &RenderedPage) -> Result<MessageId, DisplayError>;

    async fn edit(&self, id: &MessageId, page: &RenderedPage) -> Result<(), DisplayError>;

    async fn send_file(&self, name: &str, bytes: &[u8]) -> Result<MessageId, DisplayError>;

    async fn delete(&self, id: &MessageId) -> Result<(), DisplayError>;

    /// Mark the invocation with an outcome; targets without markers ignore it
    async fn react(&self, _marker: StatusMarker) -> Result<(), DisplayError> {
        Ok(())
    }

    /// Send to the invoking user only; falls back to a normal send
    async fn send_private(&self, page: &RenderedPage) -> Result<MessageId, DisplayError> {
        self.send(page).await
    }
}

/* ===================== Delivery ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `op`, retrying rate limits; other errors come back untouched
async fn retrying<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, (u32, DisplayError)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DisplayError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(DisplayError::RateLimited { retry_after }) if attempt < policy.max_retries => {
                let delay = retry_after.max(policy.backoff(attempt));
                warn!(operation, attempt, ?delay, "rate limited, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err((attempt + 1, err)),
        }
    }
}

fn give_up(operation: &'static str, attempts: u32, err: DisplayError) -> ResourceError {
    match err {
        DisplayError::NotFound => ResourceError::Gone,
        DisplayError::Fatal(message) => ResourceError::Fatal { operation, message },
        last => ResourceError::Exhausted {
            operation,
            attempts,
            last,
        },
    }
}

/// Attach `bytes` as a file
pub async fn deliver_file(
    target: &dyn DisplayTarget,
    name: &str,
    bytes: &[u8],
    policy: &RetryPolicy,
) -> Result<MessageId, ResourceError> {
    retrying(policy, "send_file", || target.send_file(name, bytes))
        .await
        .map_err(|(attempts, err)| give_up("send_file", attempts, err))
}

/// Send a new message; content the target refuses as too large is attached instead
pub async fn deliver_send(
    target: &dyn DisplayTarget,
    page: &RenderedPage,
    policy: &RetryPolicy,
) -> Result<MessageId, ResourceError> {
    match retrying(policy, "send", || target.send(page)).await {
        Ok(id) => Ok(id),
        Err((_, DisplayError::TooLarge { len, max })) => {
            debug!(len, max, "message too large, attaching as file");
            deliver_file(target, OUTPUT_FILE_NAME, page.content.as_bytes(), policy).await
        }
        Err((attempts, err)) => Err(give_up("send", attempts, err)),
    }
}

/// Send to the invoking user only
pub async fn deliver_private(
    target: &dyn DisplayTarget,
    page: &RenderedPage,
    policy: &RetryPolicy,
) -> Result<MessageId, ResourceError> {
    retrying(policy, "send_private", || target.send_private(page))
        .await
        .map_err(|(attempts, err)| give_up("send_private", attempts, err))
}

/// Edit an existing message; a too-large edit is attached as a file instead
pub async fn deliver_edit(
    target: &dyn DisplayTarget,
    id: &MessageId,
    page: &RenderedPage,
    policy: &RetryPolicy,
) -> Result<(), ResourceError> {
    match retrying(policy, "edit", || target.edit(id, page)).await {
        Ok(()) => Ok(()),
        Err((_, DisplayError::TooLarge { len, max })) => {
            debug!(%id, len, max, "edit too large, attaching as file");
            deliver_file(target, OUTPUT_FILE_NAME, page.content.as_bytes(), policy)
                .await
                .map(|_| ())
        }
        Err((attempts, err)) => Err(give_up("edit", attempts, err)),
    }
}
