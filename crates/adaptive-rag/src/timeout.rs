//! Deadline wrapper for collaborator calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, RagResult};

/// Race `operation` against a `timeout_ms` deadline.
///
/// The operation's own error is passed through unchanged so callers can tell
/// it apart from [`RagError::Timeout`]. When the deadline fires the future is
/// dropped, not awaited further. The timer is owned by `tokio::time::timeout`
/// and released on every exit path.
pub async fn with_timeout<T, F>(operation: &str, timeout_ms: u64, future: F) -> RagResult<T>
where
    F: Future<Output = RagResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms, "Operation timed out");
            Err(RagError::Timeout {
                operation: operation.to_string(),
                after_ms: timeout_ms,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_result_before_deadline() {
        let value = with_timeout("fast", 1_000, async { Ok::<_, RagError>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_passes_operation_error_through() {
        let err = with_timeout("failing", 1_000, async {
            Err::<(), _>(RagError::ModelInvocation("boom".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RagError::ModelInvocation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_slow_operation() {
        let err = with_timeout("slow call", 50, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, RagError>(())
        })
        .await
        .unwrap_err();
        match err {
            RagError::Timeout {
                operation,
                after_ms,
            } => {
                assert_eq!(operation, "slow call");
                assert_eq!(after_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
