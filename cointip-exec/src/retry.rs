//! Retry policy for the platform boundary.
//!
//! Transient platform failures (rate limiting, 5xx, timeouts) are retried
//! here with exponential backoff so they never reach the action layer. The
//! ledger boundary is deliberately not wrapped: money-moving calls are never
//! retried blindly.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use cointip_domain::Username;

use crate::ports::{PlatformError, PlatformItem, PlatformPort};

// =============================================================================
// Retry Policy
// =============================================================================

/// Sleep-and-retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` below 1 is treated as 1.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Wait after the `attempt`-th failure (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// A rate-limit response with a `retry_after` hint waits for the hint
    /// (capped at `max_backoff`) instead of the computed backoff.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, PlatformError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let wait = match &e {
                        PlatformError::RateLimited {
                            retry_after: Some(hint),
                        } => (*hint).min(self.max_backoff),
                        _ => self.backoff(attempt),
                    };
                    warn!(
                        operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient platform failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// =============================================================================
// Retrying Platform
// =============================================================================

/// Platform adapter that applies a [`RetryPolicy`] to every call.
pub struct RetryingPlatform {
    inner: Arc<dyn PlatformPort>,
    policy: RetryPolicy,
}

impl RetryingPlatform {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn PlatformPort>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl PlatformPort for RetryingPlatform {
    async fn unread_messages(&self, limit: usize) -> Result<Vec<PlatformItem>, PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("unread_messages", move || inner.unread_messages(limit))
            .await
    }

    async fn mark_read(&self, item_id: &str) -> Result<(), PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("mark_read", move || inner.mark_read(item_id))
            .await
    }

    async fn recent_comments(&self, limit: usize) -> Result<Vec<PlatformItem>, PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("recent_comments", move || inner.recent_comments(limit))
            .await
    }

    async fn reply(&self, item_id: &str, text: &str) -> Result<(), PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("reply", move || inner.reply(item_id, text))
            .await
    }

    async fn send_message(
        &self,
        to: &Username,
        subject: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("send_message", move || inner.send_message(to, subject, text))
            .await
    }

    async fn parent_author(&self, item_id: &str) -> Result<Option<Username>, PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("parent_author", move || inner.parent_author(item_id))
            .await
    }

    async fn user_exists(&self, user: &Username) -> Result<bool, PlatformError> {
        let inner = &self.inner;
        self.policy
            .run("user_exists", move || inner.user_exists(user))
            .await
    }

    async fn karma(&self, user: &Username) -> Result<i64, PlatformError> {
        let inner = &self.inner;
        self.policy.run("karma", move || inner.karma(user)).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubPlatform;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(250))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.backoff(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let stub = Arc::new(StubPlatform::new());
        stub.fail_next_calls(vec![
            PlatformError::Transient("502".into()),
            PlatformError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            },
        ]);
        let platform = RetryingPlatform::new(stub.clone(), policy());

        platform.reply("t1_a", "hello").await.unwrap();
        assert_eq!(stub.replies().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let stub = Arc::new(StubPlatform::new());
        stub.fail_next_calls(vec![PlatformError::Transient("timeout".into()); 3]);
        let platform = RetryingPlatform::new(stub.clone(), policy());

        let result = platform.reply("t1_a", "hello").await;
        assert!(matches!(result, Err(PlatformError::Transient(_))));
        assert!(stub.replies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let stub = Arc::new(StubPlatform::new());
        stub.fail_next_calls(vec![PlatformError::Deleted("t1_a".into())]);
        let platform = RetryingPlatform::new(stub.clone(), policy());

        let result = platform.reply("t1_a", "hello").await;
        assert!(matches!(result, Err(PlatformError::Deleted(_))));
        // The deleted error was consumed; nothing else was attempted
        platform.reply("t1_b", "hello").await.unwrap();
        assert_eq!(stub.replies().len(), 1);
    }
}
