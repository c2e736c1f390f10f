//! Cancellation helpers

use crate::error::VSphereError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race `fut` against `cancel`.
///
/// Cancellation wins ties, so an already-cancelled token never starts the
/// request. The dropped future aborts the underlying HTTP call.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, VSphereError>
where
    F: Future<Output = Result<T, VSphereError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(VSphereError::Cancelled),
        result = fut => result,
    }
}
