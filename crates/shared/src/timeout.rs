//! Deadlines for blocking waits.

use crate::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::future::Future;
use std::time::Duration;

/// Run `fut` with a deadline, returning early if the request is cancelled.
///
/// On expiry the error carries `operation` and `timeoutMs` metadata.
pub async fn timeout_with_context<T, F>(
    ctx: &RequestContext,
    timeout: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ctx.ensure_not_cancelled(operation)?;

    tokio::select! {
        () = ctx.cancelled() => Err(
            ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
        ),
        outcome = tokio::time::timeout(timeout, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ErrorEnvelope::unexpected(
                ErrorCode::timeout(),
                format!("operation timed out: {operation}"),
                ErrorClass::Retriable,
            )
            .with_metadata("operation", operation)
            .with_metadata("timeoutMs", timeout.as_millis().to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline() -> Result<()> {
        let ctx = RequestContext::new_request();
        let value = timeout_with_context(&ctx, Duration::from_secs(1), "test.fast", async {
            Ok(42)
        })
        .await?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout_error() {
        let ctx = RequestContext::new_request();
        let result = timeout_with_context(&ctx, Duration::from_millis(10), "test.slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ErrorEnvelope>(())
        })
        .await;

        let error = result.err();
        assert_eq!(error.as_ref().map(|e| e.code.clone()), Some(ErrorCode::timeout()));
        assert_eq!(
            error.as_ref().and_then(|e| e.metadata_value("timeoutMs")),
            Some("10")
        );
    }

    #[tokio::test]
    async fn cancellation_wins_over_deadline() {
        let ctx = RequestContext::new_request();
        let token = ctx.cancellation_token();
        let task = tokio::spawn(async move {
            timeout_with_context(&ctx, Duration::from_secs(5), "test.cancel", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ErrorEnvelope>(())
            })
            .await
        });

        tokio::task::yield_now().await;
        token.cancel();
        let result = task.await;
        assert!(matches!(result, Ok(Err(ref error)) if error.is_cancelled()));
    }
}
