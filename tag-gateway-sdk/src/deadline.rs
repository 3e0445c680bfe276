use std::{future::Future, time::Duration};
use tag_gateway_error::{GatewayError, GatewayResult};

/// Await a transport call for at most `timeout`.
///
/// Elapsing yields [`GatewayError::Timeout`] tagged with `operation`; the inner
/// future is dropped at that point.
pub async fn with_deadline<T, F>(
    operation: impl Into<String>,
    timeout: Duration,
    fut: F,
) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_elapsed) => {
            let operation = operation.into();
            tracing::warn!(
                operation = %operation,
                timeout_ms = timeout.as_millis() as u64,
                "Transport call timed out"
            );
            Err(GatewayError::Timeout { operation, timeout })
        }
    }
}
