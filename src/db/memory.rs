//! In-memory [`ArticleStore`] for tests and for running without a database file.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Listing sorts the account's
//! records on every call, which mirrors the full-scan count of the SQLite
//! backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::models::{Article, Page};

use super::pagination::{listing_order, PageRequest};
use super::{
    delete_in_batches, next_updated_at, now, truncate_micros, validate_account, validate_key,
    ArticleStore,
};

type Key = (String, String);

pub struct InMemoryStore {
    articles: RwLock<HashMap<Key, Article>>,
    config: StoreConfig,
}

impl InMemoryStore {
    /// Fails with [`AppError::Config`] when the paging or batch bounds are inconsistent.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            articles: RwLock::new(HashMap::new()),
            config,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Key, Article>>> {
        self.articles
            .read()
            .map_err(|_| AppError::BackendUnavailable("article map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Key, Article>>> {
        self.articles
            .write()
            .map_err(|_| AppError::BackendUnavailable("article map lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            articles: RwLock::new(HashMap::new()),
            config: StoreConfig::default(),
        }
    }
}

fn key(account: &str, id: &str) -> Key {
    (account.to_string(), id.to_string())
}

#[async_trait]
impl ArticleStore for InMemoryStore {
    async fn store(&self, article: &Article) -> Result<Article> {
        validate_key(&article.account, &article.id)?;

        let now = now();
        let mut articles = self.write()?;
        let k = key(&article.account, &article.id);
        let existing = articles.get(&k);

        let mut stored = article.clone();
        stored.created_at = match existing {
            Some(prev) => prev.created_at,
            None => Some(article.created_at.map(truncate_micros).unwrap_or(now)),
        };
        stored.updated_at = Some(next_updated_at(now, existing.and_then(|p| p.updated_at)));

        articles.insert(k, stored.clone());
        Ok(stored)
    }

    async fn get_by_account_and_id(&self, account: &str, id: &str) -> Result<Article> {
        validate_key(account, id)?;
        self.read()?
            .get(&key(account, id))
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn list_by_account(
        &self,
        account: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Article>> {
        validate_account(account)?;
        let request = PageRequest::normalize(page, page_size, &self.config);

        let mut owned: Vec<&Article> = Vec::new();
        let guard = self.read()?;
        owned.extend(guard.values().filter(|a| a.account == account));
        owned.sort_by(|a, b| listing_order(a, b));

        let total = owned.len() as u64;
        let items = owned
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .map(|a| a.clone().into_summary())
            .collect();

        Ok(request.into_page(items, total))
    }

    async fn delete_by_account_and_id(&self, account: &str, id: &str) -> Result<u64> {
        validate_key(account, id)?;
        let removed = self.write()?.remove(&key(account, id));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn delete_by_account(&self, account: &str) -> Result<u64> {
        validate_account(account)?;

        let ids: Vec<String> = self
            .read()?
            .keys()
            .filter(|(acct, _)| acct == account)
            .map(|(_, id)| id.clone())
            .collect();

        delete_in_batches(
            ids,
            self.config.delete_batch_size,
            self.config.delete_batch_retries,
            |chunk| {
                let result = self.write().map(|mut articles| {
                    chunk
                        .iter()
                        .filter(|id| articles.remove(&key(account, id)).is_some())
                        .count() as u64
                });
                async move { result }
            },
        )
        .await
    }
}
