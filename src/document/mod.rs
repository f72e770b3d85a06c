mod epub;

use std::path::Path;

use crate::error::Result;
use crate::models::Article;

pub use epub::{EpubGenerator, CHAPTER_FILENAME, CHAPTER_TITLE};

/// A rendered article ready to be attached to an email or written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

pub trait DocumentGenerator: Send + Sync {
    fn generate(&self, article: &Article) -> Result<Document>;
}

pub fn write_to_file(document: &Document, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &document.bytes)?;
    tracing::debug!(path = %path.display(), bytes = document.bytes.len(), "document written");
    Ok(())
}
