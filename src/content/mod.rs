mod extractor;
mod id;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ExtractedContent;

pub use extractor::{build_content, reading_time_minutes, HttpExtractor, WORDS_PER_MINUTE};
pub use id::{article_id_from_url, canonicalize_url};

/// Source of article metadata and HTML body for a URL.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedContent>;
}
