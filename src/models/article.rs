use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::article_id_from_url;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivering,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Only fresh or previously failed articles may enter `Delivering`.
    pub fn can_start_attempt(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivering" => Ok(DeliveryStatus::Delivering),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(AppError::Marshal(format!("unknown delivery status {other:?}"))),
        }
    }
}

/// Delivery bookkeeping for an article.
///
/// Fields are only writable inside the crate so that the attempt counter and
/// status move through [`DeliveryLifecycle`](crate::delivery::DeliveryLifecycle).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryState {
    #[serde(rename = "deliveryStatus")]
    pub(crate) status: DeliveryStatus,
    #[serde(rename = "deliveryAttemptCount")]
    pub(crate) attempt_count: u32,
    #[serde(rename = "lastDeliveryAttempt", skip_serializing_if = "Option::is_none")]
    pub(crate) last_attempt: Option<DateTime<Utc>>,
    #[serde(rename = "deliveryError", skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) delivered_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) delivered_to: Option<String>,
    #[serde(rename = "deliveredEmailUUID", skip_serializing_if = "Option::is_none")]
    pub(crate) delivered_email_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) delivered_by: Option<String>,
}

impl DeliveryState {
    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn delivered_from(&self) -> Option<&str> {
        self.delivered_from.as_deref()
    }

    pub fn delivered_to(&self) -> Option<&str> {
        self.delivered_to.as_deref()
    }

    pub fn delivered_email_uuid(&self) -> Option<&str> {
        self.delivered_email_uuid.as_deref()
    }

    pub fn delivered_by(&self) -> Option<&str> {
        self.delivered_by.as_deref()
    }
}

/// Metadata and body produced by a content extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: String,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub source_domain: Option<String>,
    pub site_name: Option<String>,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub word_count: u32,
    pub reading_time_minutes: u32,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub account: String,
    pub id: String,
    pub url: String,

    pub title: Option<String>,
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub source_domain: Option<String>,
    pub site_name: Option<String>,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub word_count: u32,
    pub reading_time_minutes: u32,
    pub published_at: Option<DateTime<Utc>>,

    /// Why the last content extraction failed. Cleared by the next successful one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,

    #[serde(flatten)]
    pub(crate) delivery: DeliveryState,

    /// Honored on the first write only; the store keeps the original afterwards.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Builds a pending article whose id is derived from `url`.
    pub fn new(account: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let id = article_id_from_url(&url)?;
        Ok(Self {
            account: account.into(),
            id,
            url,
            ..Default::default()
        })
    }

    /// Replaces content metadata after a (re-)extraction. Delivery fields are untouched.
    pub fn apply_content(&mut self, extracted: ExtractedContent) {
        self.title = extracted.title;
        self.author = extracted.author;
        self.content = Some(extracted.content);
        self.excerpt = extracted.excerpt;
        self.image_url = extracted.image_url;
        self.source_domain = extracted.source_domain;
        self.site_name = extracted.site_name;
        self.content_type = extracted.content_type;
        self.language = extracted.language;
        self.word_count = extracted.word_count;
        self.reading_time_minutes = extracted.reading_time_minutes;
        self.published_at = extracted.published_at;
        self.extraction_error = None;
    }

    pub fn delivery(&self) -> &DeliveryState {
        &self.delivery
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        self.delivery.status
    }

    /// Listing projection: everything except the body.
    pub fn into_summary(mut self) -> Self {
        self.content = None;
        self
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Untitled")
    }
}
