//! Article persistence.
//!
//! [`ArticleStore`] is the contract every backend satisfies. Records are keyed
//! by `(account, id)`; a record under another account is indistinguishable
//! from a missing one.

pub mod memory;
pub mod pagination;
mod repository;
mod schema;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Article, Page};

pub use memory::InMemoryStore;
pub use pagination::PageRequest;
pub use repository::Repository;

/// Storage contract for articles.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`store`](ArticleStore::store) | Upsert by `(account, id)`, preserving `created_at` |
/// | [`get_by_account_and_id`](ArticleStore::get_by_account_and_id) | Full record including content |
/// | [`list_by_account`](ArticleStore::list_by_account) | Newest-first page of summaries |
/// | [`delete_by_account_and_id`](ArticleStore::delete_by_account_and_id) | Idempotent single delete |
/// | [`delete_by_account`](ArticleStore::delete_by_account) | Batched bulk delete |
///
/// Every call is a single round trip (or a bounded series of batches for
/// `delete_by_account`). Dropping the returned future abandons the call; the
/// record may or may not have been written.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Inserts or replaces the record and returns it as persisted.
    ///
    /// `updated_at` is always refreshed. `created_at` is taken from the
    /// article (or `now`) only when no record exists yet.
    async fn store(&self, article: &Article) -> Result<Article>;

    async fn get_by_account_and_id(&self, account: &str, id: &str) -> Result<Article>;

    /// Summaries ordered by `created_at` descending, ties by `id` ascending.
    async fn list_by_account(&self, account: &str, page: i64, page_size: i64)
        -> Result<Page<Article>>;

    /// Returns the number of removed records; missing or foreign records yield 0.
    async fn delete_by_account_and_id(&self, account: &str, id: &str) -> Result<u64>;

    async fn delete_by_account(&self, account: &str) -> Result<u64>;
}

pub(crate) fn validate_account(account: &str) -> Result<()> {
    if account.trim().is_empty() {
        return Err(AppError::Validation("account is required".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_key(account: &str, id: &str) -> Result<()> {
    validate_account(account)?;
    if id.trim().is_empty() {
        return Err(AppError::Validation("article id is required".to_string()));
    }
    Ok(())
}

/// Current time at the microsecond precision both backends persist.
pub(crate) fn now() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

pub(crate) fn truncate_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

/// `updated_at` for a write: `now`, nudged forward so it strictly exceeds the previous value.
pub(crate) fn next_updated_at(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
        _ => now,
    }
}

/// Runs `delete_batch` over `ids` in chunks of `batch_size`, retrying a chunk
/// up to `retries` extra times when it fails with a retryable error.
pub(crate) async fn delete_in_batches<F, Fut>(
    ids: Vec<String>,
    batch_size: usize,
    retries: u32,
    mut delete_batch: F,
) -> Result<u64>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let mut deleted = 0;
    for chunk in ids.chunks(batch_size.max(1)) {
        let mut attempt = 0;
        loop {
            match delete_batch(chunk.to_vec()).await {
                Ok(n) => {
                    deleted += n;
                    break;
                }
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "delete batch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn key_requires_account_and_id() {
        assert!(matches!(validate_key("", "x"), Err(AppError::Validation(_))));
        assert!(matches!(validate_key("  ", "x"), Err(AppError::Validation(_))));
        assert!(matches!(validate_key("a", ""), Err(AppError::Validation(_))));
        assert!(validate_key("a", "x").is_ok());
    }

    #[test]
    fn updated_at_always_moves_forward() {
        let t = now();
        assert_eq!(next_updated_at(t, None), t);
        assert_eq!(
            next_updated_at(t, Some(t)),
            t + chrono::Duration::microseconds(1)
        );
        let earlier = t - chrono::Duration::seconds(5);
        assert_eq!(next_updated_at(t, Some(earlier)), t);
    }

    #[tokio::test]
    async fn deletes_in_bounded_batches() {
        let ids: Vec<String> = (0..7).map(|i| format!("id-{i}")).collect();
        let batches = Mutex::new(Vec::new());

        let deleted = delete_in_batches(ids, 3, 0, |chunk| {
            batches.lock().unwrap().push(chunk.len());
            async move { Ok(chunk.len() as u64) }
        })
        .await
        .unwrap();

        assert_eq!(deleted, 7);
        assert_eq!(*batches.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn retries_only_the_failing_batch() {
        let ids: Vec<String> = (0..4).map(|i| format!("id-{i}")).collect();
        let calls = AtomicU32::new(0);

        let deleted = delete_in_batches(ids, 2, 2, |chunk| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 1 {
                    Err(AppError::BackendUnavailable("throttled".into()))
                } else {
                    Ok(chunk.len() as u64)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(deleted, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_batch_errors_surface() {
        let ids = vec!["a".to_string()];
        let err = delete_in_batches(ids, 10, 5, |_| async {
            Err(AppError::Marshal("bad row".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Marshal(_)));
    }
}
