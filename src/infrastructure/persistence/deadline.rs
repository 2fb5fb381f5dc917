//! # Deadlines
//!
//! Bounds a repository call by a deadline. Repository futures are
//! cancel-on-drop: dropping one mid-flight drops its connection and any
//! open transaction rolls back, so expiry leaves no side effects beyond
//! what the database already committed.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use trade_accounts::infrastructure::persistence::deadline::with_deadline;
//! use trade_accounts::infrastructure::persistence::traits::RepositoryResult;
//!
//! # tokio_test::block_on(async {
//! let slow = async {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     RepositoryResult::Ok(())
//! };
//! let result = with_deadline(Duration::from_millis(10), slow).await;
//! assert!(matches!(
//!     result,
//!     Err(trade_accounts::infrastructure::persistence::traits::RepositoryError::Cancelled)
//! ));
//! # });
//! ```

use crate::infrastructure::persistence::traits::{RepositoryError, RepositoryResult};
use std::future::Future;
use std::time::Duration;

/// Runs `fut`, failing with `RepositoryError::Cancelled` once `timeout`
/// elapses.
///
/// # Errors
///
/// Returns `RepositoryError::Cancelled` on expiry, otherwise whatever
/// `fut` returns.
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> RepositoryResult<T>
where
    F: Future<Output = RepositoryResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "repository call cancelled");
            Err(RepositoryError::Cancelled)
        }
    }
}
