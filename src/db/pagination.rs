//! Stateless offset pagination shared by every [`ArticleStore`](super::ArticleStore) backend.

use std::cmp::Ordering;

use crate::config::{StoreConfig, MIN_PAGE};
use crate::models::{Article, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Pages below 1 become 1; sizes are clamped into the configured bounds.
    /// The size never drops below 1, whatever the bounds say.
    pub fn normalize(page: i64, page_size: i64, config: &StoreConfig) -> Self {
        let page = page.clamp(MIN_PAGE as i64, u32::MAX as i64) as u32;
        let page_size = page_size
            .min(config.max_page_size as i64)
            .max(config.min_page_size as i64)
            .max(1) as u32;
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }

    /// Wraps one window of results. `total` is the exact count for the account.
    pub fn into_page<T>(self, items: Vec<T>, total: u64) -> Page<T> {
        let has_more = self.offset() + (items.len() as u64) < total;
        Page {
            items,
            page: self.page,
            page_size: self.page_size,
            total,
            has_more,
        }
    }
}

/// Listing order: newest `created_at` first, then `id` ascending.
pub fn listing_order(a: &Article, b: &Article) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}
