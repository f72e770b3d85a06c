mod mailjet;

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::document::Document;
use crate::error::Result;
use crate::models::Article;

pub use mailjet::{MailjetSender, MAILJET_API_URL, MAILJET_PROVIDER};

pub const DEFAULT_SUBJECT: &str = "Document";
pub const MAX_SUBJECT_LENGTH: usize = 100;

static FILENAME_UNSAFE: OnceLock<Regex> = OnceLock::new();

pub struct EmailRequest<'a> {
    pub article: &'a Article,
    pub document: &'a Document,
    pub subject: String,
    /// Recipient, typically an e-reader mail-in address.
    pub destination: String,
}

/// What the provider reported for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub email_uuid: String,
    pub sender: String,
    pub recipient: String,
    pub provider: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, request: &EmailRequest<'_>) -> Result<SendReceipt>;
}

/// Custom subject if given, else the article title, else [`DEFAULT_SUBJECT`].
/// Trimmed and cut to [`MAX_SUBJECT_LENGTH`] characters.
pub fn generate_subject(article_title: &str, custom_subject: &str) -> String {
    let subject = [custom_subject, article_title]
        .into_iter()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT);
    subject.chars().take(MAX_SUBJECT_LENGTH).collect()
}

pub fn generate_filename(article: &Article, extension: &str) -> String {
    let re = FILENAME_UNSAFE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("static pattern compiles"));
    let stem = article
        .title
        .as_deref()
        .map(|t| re.replace_all(t, "").trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "article".to_string());
    format!("{stem}.{extension}")
}
