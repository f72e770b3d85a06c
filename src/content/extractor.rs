use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::ExtractedContent;

use super::ContentExtractor;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
pub const WORDS_PER_MINUTE: u32 = 250;

static NOISE_BLOCKS: OnceLock<Regex> = OnceLock::new();

/// Fetches a page over HTTP and pulls article metadata out of its markup.
pub struct HttpExtractor {
    client: Client,
}

impl HttpExtractor {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, USER_AGENT_STRING)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(AppError::Extraction(format!(
                "unexpected status code: {}",
                response.status().as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/html") {
            return Err(AppError::Extraction(format!(
                "expected HTML content, got: {content_type}"
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedContent> {
        let parsed = validate_url(url)?;
        let html = self.fetch_html(&parsed).await?;
        tracing::debug!(url, bytes = html.len(), "fetched article page");
        build_content(&html, &parsed)
    }
}

fn validate_url(raw: &str) -> Result<Url> {
    if raw.is_empty() {
        return Err(AppError::InvalidUrl("url cannot be empty".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| AppError::InvalidUrl(format!("{raw:?}: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::InvalidUrl(
            "url must use http or https scheme".to_string(),
        ));
    }
    if url.host_str().is_none() {
        return Err(AppError::InvalidUrl("url must have a host".to_string()));
    }
    Ok(url)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Extraction(format!("bad selector {css:?}: {e}")))
}

/// Turns a fetched page into extracted content. Fails when no body text is found.
pub fn build_content(html: &str, url: &Url) -> Result<ExtractedContent> {
    // scripts, styles and page chrome never belong to the article
    let cleaned = NOISE_BLOCKS
        .get_or_init(|| {
            Regex::new(
                r"(?is)<(script|style|noscript|nav|header|footer)\b[^>]*>.*?</(script|style|noscript|nav|header|footer)>",
            )
            .expect("static pattern compiles")
        })
        .replace_all(html, "");
    let document = Html::parse_document(&cleaned);

    let body = main_content(&document)?;
    let text = html2text::from_read(body.as_bytes(), 80)
        .map_err(|e| AppError::Extraction(format!("failed to read article body: {e}")))?;
    let word_count = text.split_whitespace().count() as u32;
    if word_count == 0 {
        return Err(AppError::Extraction("no content extracted".to_string()));
    }

    let meta = Metadata::collect(&document)?;
    let title = match meta.get("og:title") {
        Some(title) => Some(title),
        None => document
            .select(&selector("title")?)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty()),
    };
    let language = document
        .select(&selector("html")?)
        .next()
        .and_then(|html| html.value().attr("lang"))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    Ok(ExtractedContent {
        title,
        author: meta.get("author").or_else(|| meta.get("article:author")),
        content: body.trim().to_string(),
        excerpt: meta.get("og:description").or_else(|| meta.get("description")),
        image_url: meta.get("og:image"),
        source_domain: url.host_str().map(str::to_string),
        site_name: meta.get("og:site_name"),
        content_type: meta.get("og:type"),
        language,
        word_count,
        reading_time_minutes: reading_time_minutes(word_count),
        published_at: meta
            .get("article:published_time")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

pub fn reading_time_minutes(word_count: u32) -> u32 {
    word_count.div_ceil(WORDS_PER_MINUTE)
}

/// Inner HTML of the `<article>` element if present, otherwise of `<body>`.
fn main_content(document: &Html) -> Result<String> {
    let article = document.select(&selector("article")?).next();
    let body = match article {
        Some(el) => Some(el),
        None => document.select(&selector("body")?).next(),
    };
    Ok(body.map(|el| el.inner_html()).unwrap_or_default())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// `<meta>` tags keyed by their `name` or `property`, first occurrence wins.
struct Metadata(Vec<(String, String)>);

impl Metadata {
    fn collect(document: &Html) -> Result<Self> {
        let tags = document
            .select(&selector("meta")?)
            .filter_map(|tag| {
                let attrs = tag.value();
                let key = attrs.attr("property").or_else(|| attrs.attr("name"))?;
                let content = attrs.attr("content")?.trim();
                (!content.is_empty()).then(|| (key.to_ascii_lowercase(), content.to_string()))
            })
            .collect();
        Ok(Self(tags))
    }

    fn get(&self, key: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}
