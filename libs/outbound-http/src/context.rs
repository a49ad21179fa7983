//! Per-request cancellation and deadline

use crate::error::HttpError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal and optional deadline bound to one request
///
/// The context is raced against dispatch and handed back to the response
/// handler. Cloning shares the cancellation token, so cancelling any clone
/// cancels the request.
///
/// Dispatch ends once response headers arrive. Reading the body inside the
/// handler is not bounded by the context unless the handler wraps the read
/// in [`run`](Self::run):
///
/// ```ignore
/// let ctx = RequestContext::new().with_timeout(Duration::from_secs(2));
/// client
///     .get(
///         ctx,
///         |ctx, outcome| async move { ctx.run(outcome?.bytes()).await },
///         "https://example.com/health",
///         [],
///     )
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context that is never cancelled and has no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the request to `timeout` from now.
    ///
    /// An earlier deadline already set on the context is kept. A timeout too
    /// large to represent as an instant leaves the deadline unchanged.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(at) => self.with_deadline(at),
            None => self,
        }
    }

    /// Bound the request to finish before `deadline`.
    ///
    /// An earlier deadline already set on the context is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    /// Tie the request to an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the request. In-flight dispatch ends with [`HttpError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `dispatch` until it completes, the context is cancelled, or the
    /// deadline passes, whichever happens first.
    ///
    /// Cancellation is checked before the deadline, and both before the
    /// dispatch itself, so an already-cancelled context never dispatches.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Cancelled`] or [`HttpError::DeadlineExceeded`]
    /// when the context ends first, otherwise the result of `dispatch`.
    pub async fn run<F, T>(&self, dispatch: F) -> Result<T, HttpError>
    where
        F: Future<Output = Result<T, HttpError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(HttpError::Cancelled),
            () = deadline => Err(HttpError::DeadlineExceeded),
            result = dispatch => result,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_with_timeout_keeps_earliest_deadline() {
        let near = RequestContext::new().with_timeout(Duration::from_secs(1));
        let near_deadline = near.deadline().unwrap();

        let still_near = near.with_timeout(Duration::from_secs(60));
        assert_eq!(still_near.deadline(), Some(near_deadline));
    }

    #[test]
    fn test_with_timeout_unrepresentable_leaves_deadline_unset() {
        let ctx = RequestContext::new().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);

        let bounded = RequestContext::new().with_timeout(Duration::from_secs(1));
        let deadline = bounded.deadline();
        assert_eq!(bounded.with_timeout(Duration::MAX).deadline(), deadline);
    }

    #[tokio::test]
    async fn test_run_without_representable_deadline_completes() {
        let ctx = RequestContext::new().with_timeout(Duration::MAX);
        let result = ctx.run(async { Ok::<_, HttpError>("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        assert!(!clone.is_cancelled());

        ctx.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = RequestContext::new();
        let result = ctx.run(async { Ok::<_, HttpError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_run_cancelled_before_dispatch() {
        let ctx = RequestContext::new();
        ctx.cancel();

        let result = ctx.run(async { Ok::<_, HttpError>(()) }).await;
        assert!(matches!(result, Err(HttpError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_cancelled_while_pending() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = ctx
            .run(std::future::pending::<Result<(), HttpError>>())
            .await;
        assert!(matches!(result, Err(HttpError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_deadline_exceeded() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));

        let result = ctx
            .run(std::future::pending::<Result<(), HttpError>>())
            .await;
        assert!(matches!(result, Err(HttpError::DeadlineExceeded)));
    }
}
