//! Delivery state machine.
//!
//! ```text
//! pending ──begin──> delivering ──success──> delivered
//!    failed <──failure──┘   ^
//!      └──────begin─────────┘
//! ```
//!
//! Every transition is written through [`ArticleStore::store`] before the
//! next step runs, so the attempt is on record before the email goes out.

use std::sync::Arc;

use crate::db::ArticleStore;
use crate::document::Document;
use crate::email::{EmailRequest, EmailSender, SendReceipt};
use crate::error::{AppError, Result};
use crate::models::{Article, DeliveryStatus};

use super::SendOutcome;

#[derive(Clone)]
pub struct DeliveryLifecycle {
    store: Arc<dyn ArticleStore>,
}

impl DeliveryLifecycle {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// Moves a `pending` or `failed` article to `delivering`, bumps the
    /// attempt counter and persists it.
    pub async fn begin_attempt(&self, article: &Article) -> Result<Article> {
        let from = article.delivery_status();
        if !from.can_start_attempt() {
            return Err(AppError::InvalidTransition {
                id: article.id.clone(),
                from,
                to: DeliveryStatus::Delivering,
            });
        }

        let mut next = article.clone();
        next.delivery.status = DeliveryStatus::Delivering;
        next.delivery.attempt_count += 1;
        next.delivery.last_attempt = Some(crate::db::now());

        let stored = self.store.store(&next).await?;
        tracing::info!(
            id = %stored.id,
            attempt = stored.delivery.attempt_count,
            "delivery attempt started"
        );
        Ok(stored)
    }

    pub async fn record_success(&self, article: &Article, receipt: &SendReceipt) -> Result<Article> {
        let mut next = self.finishing(article, DeliveryStatus::Delivered)?;
        next.delivery.error = None;
        next.delivery.delivered_from = Some(receipt.sender.clone());
        next.delivery.delivered_to = Some(receipt.recipient.clone());
        next.delivery.delivered_email_uuid = Some(receipt.email_uuid.clone());
        next.delivery.delivered_by = Some(receipt.provider.clone());

        let stored = self.store.store(&next).await?;
        tracing::info!(id = %stored.id, email_uuid = %receipt.email_uuid, "article delivered");
        Ok(stored)
    }

    /// Attempt count and timestamp stay as `begin_attempt` left them.
    pub async fn record_failure(&self, article: &Article, cause: &str) -> Result<Article> {
        let mut next = self.finishing(article, DeliveryStatus::Failed)?;
        next.delivery.error = Some(cause.to_string());

        let stored = self.store.store(&next).await?;
        tracing::warn!(
            id = %stored.id,
            attempt = stored.delivery.attempt_count,
            error = cause,
            "delivery failed"
        );
        Ok(stored)
    }

    /// Persists a send outcome. Also the way to retry after
    /// [`AppError::OutcomeNotRecorded`] without sending again.
    pub async fn record_outcome(&self, article: &Article, outcome: &SendOutcome) -> Result<Article> {
        match outcome {
            SendOutcome::Sent(receipt) => self.record_success(article, receipt).await,
            SendOutcome::Failed(cause) => self.record_failure(article, cause).await,
        }
    }

    /// Runs one full attempt: begin, send, record.
    ///
    /// A rejected send is an ordinary outcome and comes back as `Ok` with a
    /// `failed` article. Errors are persistence failures only; when the
    /// outcome itself cannot be written the error is
    /// [`AppError::OutcomeNotRecorded`] and carries it.
    pub async fn deliver(
        &self,
        article: &Article,
        document: &Document,
        sender: &dyn EmailSender,
        destination: &str,
        subject: &str,
    ) -> Result<Article> {
        let attempting = self.begin_attempt(article).await?;

        let request = EmailRequest {
            article: &attempting,
            document,
            subject: subject.to_string(),
            destination: destination.to_string(),
        };
        let outcome = match sender.send(&request).await {
            Ok(receipt) => SendOutcome::Sent(receipt),
            Err(e) => SendOutcome::Failed(e.to_string()),
        };

        let recorded = self.record_outcome(&attempting, &outcome).await;
        recorded.map_err(|source| {
            tracing::error!(id = %attempting.id, error = %source, "delivery outcome not recorded");
            AppError::OutcomeNotRecorded {
                id: attempting.id.clone(),
                outcome,
                source: Box::new(source),
            }
        })
    }

    fn finishing(&self, article: &Article, to: DeliveryStatus) -> Result<Article> {
        let from = article.delivery_status();
        if from != DeliveryStatus::Delivering {
            return Err(AppError::InvalidTransition {
                id: article.id.clone(),
                from,
                to,
            });
        }
        let mut next = article.clone();
        next.delivery.status = to;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::InMemoryStore;
    use crate::models::Page;

    fn document() -> Document {
        Document {
            bytes: b"epub".to_vec(),
            content_type: "application/epub+zip",
            extension: "epub",
        }
    }

    fn receipt(uuid: &str) -> SendReceipt {
        SendReceipt {
            email_uuid: uuid.to_string(),
            sender: "me@example.com".to_string(),
            recipient: "reader@kindle.com".to_string(),
            provider: "Mailjet".to_string(),
        }
    }

    /// Replays a fixed list of results and counts calls.
    struct ScriptedSender {
        results: std::sync::Mutex<Vec<std::result::Result<SendReceipt, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(mut results: Vec<std::result::Result<SendReceipt, String>>) -> Self {
            results.reverse();
            Self {
                results: std::sync::Mutex::new(results),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmailSender for ScriptedSender {
        async fn send(&self, _request: &EmailRequest<'_>) -> Result<SendReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.results.lock().unwrap().pop().expect("unscripted send");
            next.map_err(AppError::Email)
        }
    }

    /// Checks that the attempt is already persisted when the send happens.
    struct ObservingSender {
        store: Arc<InMemoryStore>,
    }

    #[async_trait]
    impl EmailSender for ObservingSender {
        async fn send(&self, request: &EmailRequest<'_>) -> Result<SendReceipt> {
            let persisted = self
                .store
                .get_by_account_and_id(&request.article.account, &request.article.id)
                .await?;
            assert_eq!(persisted.delivery_status(), DeliveryStatus::Delivering);
            assert_eq!(persisted.delivery.attempt_count(), 1);
            assert!(persisted.delivery.last_attempt().is_some());
            Ok(receipt("observed"))
        }
    }

    /// Allows a fixed number of writes, then reports the backend as unavailable.
    struct FlakyStore {
        inner: InMemoryStore,
        writes_left: AtomicUsize,
    }

    #[async_trait]
    impl ArticleStore for FlakyStore {
        async fn store(&self, article: &Article) -> Result<Article> {
            let allowed = self
                .writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(AppError::BackendUnavailable("write quota exhausted".into()));
            }
            self.inner.store(article).await
        }

        async fn get_by_account_and_id(&self, account: &str, id: &str) -> Result<Article> {
            self.inner.get_by_account_and_id(account, id).await
        }

        async fn list_by_account(
            &self,
            account: &str,
            page: i64,
            page_size: i64,
        ) -> Result<Page<Article>> {
            self.inner.list_by_account(account, page, page_size).await
        }

        async fn delete_by_account_and_id(&self, account: &str, id: &str) -> Result<u64> {
            self.inner.delete_by_account_and_id(account, id).await
        }

        async fn delete_by_account(&self, account: &str) -> Result<u64> {
            self.inner.delete_by_account(account).await
        }
    }

    async fn seeded(store: &dyn ArticleStore) -> Article {
        store
            .store(&Article::new("reader", "https://example.com/post").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_delivery_records_receipt() {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;
        let sender = ScriptedSender::new(vec![Ok(receipt("uuid-1"))]);

        let delivered = lifecycle
            .deliver(&article, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();

        assert_eq!(delivered.delivery_status(), DeliveryStatus::Delivered);
        assert_eq!(delivered.delivery.attempt_count(), 1);
        assert_eq!(delivered.delivery.delivered_email_uuid(), Some("uuid-1"));
        assert_eq!(delivered.delivery.delivered_to(), Some("reader@kindle.com"));
        assert_eq!(delivered.delivery.delivered_from(), Some("me@example.com"));
        assert_eq!(delivered.delivery.delivered_by(), Some("Mailjet"));
        assert!(delivered.delivery.error().is_none());

        let persisted = store.get_by_account_and_id("reader", &article.id).await.unwrap();
        assert_eq!(persisted.delivery, delivered.delivery);
    }

    #[tokio::test]
    async fn failed_sends_are_recorded_and_counted() {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;
        let sender = ScriptedSender::new(vec![
            Err("provider down".into()),
            Err("still down".into()),
        ]);

        let first = lifecycle
            .deliver(&article, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();
        assert_eq!(first.delivery_status(), DeliveryStatus::Failed);
        assert_eq!(first.delivery.attempt_count(), 1);
        assert!(first.delivery.error().unwrap().contains("provider down"));

        let second = lifecycle
            .deliver(&first, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();
        assert_eq!(second.delivery_status(), DeliveryStatus::Failed);
        assert_eq!(second.delivery.attempt_count(), 2);
        assert!(second.delivery.error().unwrap().contains("still down"));
        assert!(second.delivery.last_attempt() >= first.delivery.last_attempt());
    }

    #[tokio::test]
    async fn retry_after_failure_can_succeed() {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;
        let sender = ScriptedSender::new(vec![Err("timeout".into()), Ok(receipt("uuid-2"))]);

        let failed = lifecycle
            .deliver(&article, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();
        let delivered = lifecycle
            .deliver(&failed, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();

        assert_eq!(delivered.delivery_status(), DeliveryStatus::Delivered);
        assert_eq!(delivered.delivery.attempt_count(), 2);
        assert!(delivered.delivery.error().is_none());
    }

    #[tokio::test]
    async fn delivered_articles_cannot_start_again() {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;
        let sender = ScriptedSender::new(vec![Ok(receipt("uuid-1"))]);

        let delivered = lifecycle
            .deliver(&article, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();
        let err = lifecycle
            .deliver(&delivered, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: DeliveryStatus::Delivered,
                to: DeliveryStatus::Delivering,
                ..
            }
        ));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outcomes_require_an_attempt_in_progress() {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;

        let err = lifecycle
            .record_success(&article, &receipt("uuid"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: DeliveryStatus::Pending,
                to: DeliveryStatus::Delivered,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn attempt_is_persisted_before_sending() {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;
        let sender = ObservingSender {
            store: store.clone(),
        };

        let delivered = lifecycle
            .deliver(&article, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap();
        assert_eq!(delivered.delivery.delivered_email_uuid(), Some("observed"));
    }

    #[tokio::test]
    async fn unrecorded_outcome_can_be_recorded_without_resending() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::default(),
            // seed + begin_attempt
            writes_left: AtomicUsize::new(2),
        });
        let lifecycle = DeliveryLifecycle::new(store.clone());
        let article = seeded(store.as_ref()).await;
        let sender = ScriptedSender::new(vec![Ok(receipt("uuid-9"))]);

        let err = lifecycle
            .deliver(&article, &document(), &sender, "reader@kindle.com", "Post")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let (id, outcome) = match err {
            AppError::OutcomeNotRecorded { id, outcome, .. } => (id, outcome),
            other => panic!("expected OutcomeNotRecorded, got {other:?}"),
        };
        assert_eq!(outcome, SendOutcome::Sent(receipt("uuid-9")));

        store.writes_left.store(1, Ordering::SeqCst);
        let in_flight = store.get_by_account_and_id("reader", &id).await.unwrap();
        assert_eq!(in_flight.delivery_status(), DeliveryStatus::Delivering);

        let delivered = lifecycle.record_outcome(&in_flight, &outcome).await.unwrap();
        assert_eq!(delivered.delivery_status(), DeliveryStatus::Delivered);
        assert_eq!(delivered.delivery.attempt_count(), 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }
}
