//! Orchestration of extract, render, store and deliver.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::content::{canonicalize_url, ContentExtractor, HttpExtractor};
use crate::db::ArticleStore;
use crate::delivery::DeliveryLifecycle;
use crate::document::{self, Document, DocumentGenerator, EpubGenerator};
use crate::email::{generate_subject, EmailSender, MailjetSender};
use crate::error::{AppError, Result};
use crate::models::{Article, DeliveryStatus, Page};

/// An extracted article together with its rendered document.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub article: Article,
    pub document: Document,
}

#[derive(Debug, Clone)]
pub struct CreateArticleResult {
    pub article: Article,
    pub message: String,
}

struct Delivery {
    sender: Arc<dyn EmailSender>,
    destination: String,
}

pub struct ArticleService {
    store: Arc<dyn ArticleStore>,
    extractor: Arc<dyn ContentExtractor>,
    generator: Arc<dyn DocumentGenerator>,
    lifecycle: DeliveryLifecycle,
    delivery: Option<Delivery>,
}

impl ArticleService {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        extractor: Arc<dyn ContentExtractor>,
        generator: Arc<dyn DocumentGenerator>,
    ) -> Self {
        Self {
            lifecycle: DeliveryLifecycle::new(store.clone()),
            store,
            extractor,
            generator,
            delivery: None,
        }
    }

    /// Enables delivery of newly created articles to `destination`.
    pub fn with_sender(mut self, sender: Arc<dyn EmailSender>, destination: impl Into<String>) -> Self {
        self.delivery = Some(Delivery {
            sender,
            destination: destination.into(),
        });
        self
    }

    /// Wires the HTTP extractor, EPUB generator and, when sending is
    /// enabled, the Mailjet sender from `config`.
    pub fn from_config(config: &Config, store: Arc<dyn ArticleStore>) -> Result<Self> {
        let service = Self::new(
            store,
            Arc::new(HttpExtractor::new()?),
            Arc::new(EpubGenerator::new()),
        );
        if !config.send_enabled {
            return Ok(service);
        }

        let setting = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| AppError::Config(format!("{name} is required when sending is enabled")))
        };
        let sender = MailjetSender::new(
            setting(&config.mailjet_api_key, "mailjet_api_key")?,
            setting(&config.mailjet_api_secret, "mailjet_api_secret")?,
            setting(&config.sender_email, "sender_email")?,
        )?;
        Ok(service.with_sender(
            Arc::new(sender),
            setting(&config.destination_email, "destination_email")?,
        ))
    }

    pub fn send_enabled(&self) -> bool {
        self.delivery.is_some()
    }

    /// Extracts `url` and renders it, without touching the store.
    pub async fn process(&self, url: &str) -> Result<ProcessResult> {
        let mut article = Article::new("", url)?;
        let extracted = self.extractor.extract(url).await?;
        article.apply_content(extracted);
        if article.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            article.title = Some("Untitled".to_string());
        }
        let document = self.generator.generate(&article)?;
        Ok(ProcessResult { article, document })
    }

    pub fn write_to_file(&self, result: &ProcessResult, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(AppError::Validation("output path is empty".to_string()));
        }
        document::write_to_file(&result.document, path)
    }

    /// Saves `raw_url` for `account`, refreshes its content and, when
    /// sending is enabled, delivers it.
    ///
    /// Re-adding a known URL refreshes the content of the existing record
    /// and keeps its delivery history. An already delivered article is not
    /// sent again.
    pub async fn create_article(&self, raw_url: &str, account: &str) -> Result<CreateArticleResult> {
        let clean_url = canonicalize_url(raw_url)?;
        let fresh = Article::new(account, clean_url.as_str())?;

        let existing = match self.store.get_by_account_and_id(account, &fresh.id).await {
            Ok(article) => Some(article),
            Err(AppError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let mut article = match existing {
            Some(article) => article,
            None => self.store.store(&fresh).await?,
        };
        tracing::info!(%account, id = %article.id, url = %clean_url, "article saved");

        let document = match self.refresh(&mut article).await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(id = %article.id, error = %e, "article processing failed");
                article.extraction_error = Some(e.to_string());
                self.store.store(&article).await?;
                return Err(e);
            }
        };

        let Some(delivery) = &self.delivery else {
            return Ok(CreateArticleResult {
                article,
                message: "article processed successfully (email sending disabled)".to_string(),
            });
        };
        if article.delivery_status() == DeliveryStatus::Delivered {
            return Ok(CreateArticleResult {
                article,
                message: "article already delivered".to_string(),
            });
        }

        let article = self.deliver(&article, &document, delivery).await?;
        let message = delivery_message(&article);
        Ok(CreateArticleResult { article, message })
    }

    /// Retries delivery of a stored article with freshly extracted content.
    pub async fn resend_article(&self, account: &str, id: &str) -> Result<Article> {
        let delivery = self
            .delivery
            .as_ref()
            .ok_or_else(|| AppError::Config("email sender is not configured".to_string()))?;

        let mut article = self.get_article(account, id).await?;
        let from = article.delivery_status();
        if !from.can_start_attempt() {
            return Err(AppError::InvalidTransition {
                id: article.id,
                from,
                to: DeliveryStatus::Delivering,
            });
        }

        let document = self.refresh(&mut article).await?;
        self.deliver(&article, &document, delivery).await
    }

    pub async fn get_article(&self, account: &str, id: &str) -> Result<Article> {
        if id.trim().is_empty() {
            return Err(AppError::Validation("invalid article id".to_string()));
        }
        self.store.get_by_account_and_id(account, id).await
    }

    pub async fn list_articles(&self, account: &str, page: i64, page_size: i64) -> Result<Page<Article>> {
        self.store.list_by_account(account, page, page_size).await
    }

    pub async fn delete_article(&self, account: &str, id: &str) -> Result<u64> {
        if id.trim().is_empty() {
            return Err(AppError::Validation("invalid article id".to_string()));
        }
        let deleted = self.store.delete_by_account_and_id(account, id).await?;
        tracing::info!(%account, %id, deleted, "article delete");
        Ok(deleted)
    }

    pub async fn delete_all_articles(&self, account: &str) -> Result<u64> {
        let deleted = self.store.delete_by_account(account).await?;
        tracing::info!(%account, deleted, "deleted all articles");
        Ok(deleted)
    }

    /// Re-extracts the article body, persists it and renders the document.
    async fn refresh(&self, article: &mut Article) -> Result<Document> {
        let extracted = self.extractor.extract(&article.url).await?;
        article.apply_content(extracted);
        *article = self.store.store(article).await?;
        self.generator.generate(article)
    }

    async fn deliver(&self, article: &Article, document: &Document, delivery: &Delivery) -> Result<Article> {
        let subject = generate_subject(article.title.as_deref().unwrap_or_default(), "");
        self.lifecycle
            .deliver(
                article,
                document,
                delivery.sender.as_ref(),
                &delivery.destination,
                &subject,
            )
            .await
    }
}

fn delivery_message(article: &Article) -> String {
    match article.delivery_status() {
        DeliveryStatus::Delivered => "article sent to e-reader successfully".to_string(),
        _ => format!(
            "article saved but delivery failed: {}",
            article.delivery.error().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::db::InMemoryStore;
    use crate::email::{EmailRequest, SendReceipt};
    use crate::models::ExtractedContent;

    struct FakeExtractor {
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeExtractor {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContentExtractor for FakeExtractor {
        async fn extract(&self, url: &str) -> Result<ExtractedContent> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Extraction("unexpected status code: 404".into()));
            }
            Ok(ExtractedContent {
                title: Some(format!("Title of {url}")),
                content: format!("<p>version {n}</p>"),
                word_count: 2,
                reading_time_minutes: 1,
                ..Default::default()
            })
        }
    }

    struct RecordingSender {
        fail_with: Mutex<Option<String>>,
        subjects: Mutex<Vec<String>>,
    }

    impl RecordingSender {
        fn new(fail_with: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Mutex::new(fail_with.map(str::to_string)),
                subjects: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> usize {
            self.subjects.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, request: &EmailRequest<'_>) -> Result<SendReceipt> {
            self.subjects.lock().unwrap().push(request.subject.clone());
            if let Some(msg) = self.fail_with.lock().unwrap().clone() {
                return Err(AppError::Email(msg));
            }
            Ok(SendReceipt {
                email_uuid: format!("uuid-{}", request.article.id),
                sender: "me@example.com".into(),
                recipient: request.destination.clone(),
                provider: "Mailjet".into(),
            })
        }
    }

    fn service(store: Arc<InMemoryStore>, extractor: Arc<FakeExtractor>) -> ArticleService {
        ArticleService::new(store, extractor, Arc::new(EpubGenerator::new()))
    }

    #[tokio::test]
    async fn create_without_sender_stores_pending_article_with_content() {
        let store = Arc::new(InMemoryStore::default());
        let svc = service(store.clone(), FakeExtractor::ok());

        let result = svc
            .create_article("https://Example.com/post/?utm_source=x", "reader")
            .await
            .unwrap();

        assert_eq!(result.article.url, "https://example.com/post");
        assert_eq!(result.article.delivery_status(), DeliveryStatus::Pending);
        assert!(result.message.contains("email sending disabled"));

        let stored = svc.get_article("reader", &result.article.id).await.unwrap();
        assert_eq!(stored.content.as_deref(), Some("<p>version 1</p>"));
        assert_eq!(stored.title.as_deref(), Some("Title of https://example.com/post"));
    }

    #[tokio::test]
    async fn create_with_sender_delivers_once() {
        let store = Arc::new(InMemoryStore::default());
        let sender = RecordingSender::new(None);
        let svc = service(store.clone(), FakeExtractor::ok()).with_sender(sender.clone(), "reader@kindle.com");

        let first = svc.create_article("https://example.com/post", "reader").await.unwrap();
        assert_eq!(first.article.delivery_status(), DeliveryStatus::Delivered);
        assert_eq!(first.article.delivery.delivered_to(), Some("reader@kindle.com"));
        assert_eq!(
            sender.subjects.lock().unwrap().as_slice(),
            ["Title of https://example.com/post"]
        );

        let again = svc.create_article("https://example.com/post/", "reader").await.unwrap();
        assert_eq!(again.article.id, first.article.id);
        assert_eq!(again.message, "article already delivered");
        assert_eq!(again.article.content.as_deref(), Some("<p>version 2</p>"));
        assert_eq!(sender.sent(), 1);

        let page = svc.list_articles("reader", 1, 20).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items[0].content.is_none());
    }

    #[tokio::test]
    async fn failed_send_is_reported_and_resend_succeeds() {
        let store = Arc::new(InMemoryStore::default());
        let sender = RecordingSender::new(Some("quota exceeded"));
        let extractor = FakeExtractor::ok();
        let svc = service(store.clone(), extractor.clone()).with_sender(sender.clone(), "reader@kindle.com");

        let created = svc.create_article("https://example.com/post", "reader").await.unwrap();
        assert_eq!(created.article.delivery_status(), DeliveryStatus::Failed);
        assert!(created.message.contains("quota exceeded"));

        *sender.fail_with.lock().unwrap() = None;
        let resent = svc.resend_article("reader", &created.article.id).await.unwrap();
        assert_eq!(resent.delivery_status(), DeliveryStatus::Delivered);
        assert_eq!(resent.delivery.attempt_count(), 2);
        assert_eq!(resent.content.as_deref(), Some("<p>version 2</p>"));

        let err = svc.resend_article("reader", &created.article.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sender.sent(), 2);
    }

    #[tokio::test]
    async fn extraction_failure_is_recorded_apart_from_delivery() {
        let store = Arc::new(InMemoryStore::default());
        let extractor = FakeExtractor::failing();
        let svc = service(store.clone(), extractor.clone());

        let err = svc.create_article("https://example.com/gone", "reader").await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));

        let page = svc.list_articles("reader", 1, 20).await.unwrap();
        assert_eq!(page.total, 1);
        let saved = &page.items[0];
        assert_eq!(saved.delivery_status(), DeliveryStatus::Pending);
        assert!(saved.delivery().error().is_none());
        assert!(saved.extraction_error.as_deref().unwrap().contains("404"));

        extractor.fail.store(false, Ordering::SeqCst);
        let retried = svc.create_article("https://example.com/gone", "reader").await.unwrap();
        assert!(retried.article.extraction_error.is_none());
        let stored = svc.get_article("reader", &retried.article.id).await.unwrap();
        assert!(stored.extraction_error.is_none());
        assert!(stored.content.is_some());
    }

    #[tokio::test]
    async fn extraction_failure_leaves_a_delivered_record_delivered() {
        let store = Arc::new(InMemoryStore::default());
        let extractor = FakeExtractor::ok();
        let sender = RecordingSender::new(None);
        let svc = service(store.clone(), extractor.clone()).with_sender(sender.clone(), "reader@kindle.com");

        let first = svc.create_article("https://example.com/post", "reader").await.unwrap();
        assert_eq!(first.article.delivery_status(), DeliveryStatus::Delivered);

        extractor.fail.store(true, Ordering::SeqCst);
        let err = svc.create_article("https://example.com/post", "reader").await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));

        let stored = svc.get_article("reader", &first.article.id).await.unwrap();
        assert_eq!(stored.delivery_status(), DeliveryStatus::Delivered);
        assert!(stored.delivery().error().is_none());
        assert_eq!(stored.delivery(), first.article.delivery());
        assert!(stored.extraction_error.is_some());
        assert_eq!(sender.sent(), 1);
    }

    #[tokio::test]
    async fn resend_requires_a_sender() {
        let svc = service(Arc::new(InMemoryStore::default()), FakeExtractor::ok());
        assert!(matches!(
            svc.resend_article("reader", "id").await,
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn deletes_report_counts() {
        let store = Arc::new(InMemoryStore::default());
        let svc = service(store.clone(), FakeExtractor::ok());
        let a = svc.create_article("https://example.com/a", "reader").await.unwrap();
        svc.create_article("https://example.com/b", "reader").await.unwrap();
        svc.create_article("https://example.com/c", "other").await.unwrap();

        assert_eq!(svc.delete_article("reader", &a.article.id).await.unwrap(), 1);
        assert_eq!(svc.delete_article("reader", &a.article.id).await.unwrap(), 0);
        assert_eq!(svc.delete_all_articles("reader").await.unwrap(), 1);
        assert_eq!(svc.list_articles("other", 1, 20).await.unwrap().total, 1);
        assert!(matches!(
            svc.delete_article("reader", "").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn process_and_write_to_file() {
        let svc = service(Arc::new(InMemoryStore::default()), FakeExtractor::ok());
        let result = svc.process("https://example.com/post").await.unwrap();
        assert_eq!(result.document.extension, "epub");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post.epub");
        svc.write_to_file(&result, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), result.document.bytes);

        assert!(matches!(
            svc.write_to_file(&result, Path::new("")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn from_config_requires_send_settings() {
        let config = Config {
            send_enabled: true,
            sender_email: Some("me@example.com".into()),
            ..Default::default()
        };
        let store: Arc<dyn ArticleStore> = Arc::new(InMemoryStore::default());
        assert!(matches!(
            ArticleService::from_config(&config, store),
            Err(AppError::Config(_))
        ));
    }
}
