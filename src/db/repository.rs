use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, OptionalExtension, Row, ToSql};
use tokio_rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::models::{Article, DeliveryState, DeliveryStatus, Page};

use super::pagination::PageRequest;
use super::schema::{SCHEMA, SUMMARY_COLUMNS};
use super::{delete_in_batches, now, truncate_micros, validate_account, validate_key, ArticleStore};

const UPSERT_ARTICLE: &str = r#"
INSERT INTO articles (
    account, id, url, title, author, content, excerpt, image_url, source_domain,
    site_name, content_type, language, word_count, reading_time_minutes, published_at,
    extraction_error, delivery_status, delivery_attempt_count, last_delivery_attempt, delivery_error,
    delivered_from, delivered_to, delivered_email_uuid, delivered_by, created_at, updated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
        ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
ON CONFLICT(account, id) DO UPDATE SET
    url = excluded.url,
    title = excluded.title,
    author = excluded.author,
    content = excluded.content,
    excerpt = excluded.excerpt,
    image_url = excluded.image_url,
    source_domain = excluded.source_domain,
    site_name = excluded.site_name,
    content_type = excluded.content_type,
    language = excluded.language,
    word_count = excluded.word_count,
    reading_time_minutes = excluded.reading_time_minutes,
    published_at = excluded.published_at,
    extraction_error = excluded.extraction_error,
    delivery_status = excluded.delivery_status,
    delivery_attempt_count = excluded.delivery_attempt_count,
    last_delivery_attempt = excluded.last_delivery_attempt,
    delivery_error = excluded.delivery_error,
    delivered_from = excluded.delivered_from,
    delivered_to = excluded.delivered_to,
    delivered_email_uuid = excluded.delivered_email_uuid,
    delivered_by = excluded.delivered_by,
    updated_at = MAX(excluded.updated_at, articles.updated_at + 1)
RETURNING created_at, updated_at"#;

/// SQLite backend for [`ArticleStore`].
///
/// `created_at` is never part of the conflict update, so the first write's
/// value survives every later upsert without a read-before-write.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
    config: StoreConfig,
}

impl Repository {
    pub async fn new(db_path: &str, config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn, config).await
    }

    pub async fn in_memory(config: StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, config).await
    }

    async fn init(conn: Connection, config: StoreConfig) -> Result<Self> {
        config.validate()?;

        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[async_trait]
impl ArticleStore for Repository {
    async fn store(&self, article: &Article) -> Result<Article> {
        validate_key(&article.account, &article.id)?;

        let now = now();
        let created_at = article.created_at.map(truncate_micros).unwrap_or(now);
        let row = article.clone();

        let (created, updated) = self
            .conn
            .call(move |conn| {
                let d = &row.delivery;
                let stamps = conn.query_row(
                    UPSERT_ARTICLE,
                    params![
                        row.account,
                        row.id,
                        row.url,
                        row.title,
                        row.author,
                        row.content,
                        row.excerpt,
                        row.image_url,
                        row.source_domain,
                        row.site_name,
                        row.content_type,
                        row.language,
                        row.word_count,
                        row.reading_time_minutes,
                        row.published_at.map(|dt| dt.timestamp_micros()),
                        row.extraction_error,
                        d.status,
                        d.attempt_count,
                        d.last_attempt.map(|dt| dt.timestamp_micros()),
                        d.error,
                        d.delivered_from,
                        d.delivered_to,
                        d.delivered_email_uuid,
                        d.delivered_by,
                        created_at.timestamp_micros(),
                        now.timestamp_micros(),
                    ],
                    |r| Ok((timestamp(r, 0)?, timestamp(r, 1)?)),
                )?;
                Ok(stamps)
            })
            .await?;

        let mut stored = article.clone();
        stored.created_at = created;
        stored.updated_at = updated;
        tracing::debug!(
            account = %stored.account,
            id = %stored.id,
            status = %stored.delivery.status,
            "stored article"
        );
        Ok(stored)
    }

    async fn get_by_account_and_id(&self, account: &str, id: &str) -> Result<Article> {
        validate_key(account, id)?;

        let (account_owned, id_owned) = (account.to_string(), id.to_string());
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUMMARY_COLUMNS}, content FROM articles WHERE account = ?1 AND id = ?2"
                ))?;
                let article = stmt
                    .query_row(params![account_owned, id_owned], |row| {
                        article_from_row(row, true)
                    })
                    .optional()?;
                Ok(article)
            })
            .await?;

        article.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn list_by_account(
        &self,
        account: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Article>> {
        validate_account(account)?;
        let request = PageRequest::normalize(page, page_size, &self.config);
        let account = account.to_string();

        let (items, total) = self
            .conn
            .call(move |conn| {
                // one read transaction so the count and the window agree
                let tx = conn.transaction()?;
                let total: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM articles WHERE account = ?1",
                    params![account],
                    |row| row.get(0),
                )?;
                let items = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {SUMMARY_COLUMNS} FROM articles WHERE account = ?1 \
                         ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3"
                    ))?;
                    let rows = stmt
                        .query_map(
                            params![account, request.limit() as i64, request.offset() as i64],
                            |row| article_from_row(row, false),
                        )?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                };
                tx.commit()?;
                Ok((items, total as u64))
            })
            .await?;

        Ok(request.into_page(items, total))
    }

    async fn delete_by_account_and_id(&self, account: &str, id: &str) -> Result<u64> {
        validate_key(account, id)?;

        let (account_owned, id_owned) = (account.to_string(), id.to_string());
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM articles WHERE account = ?1 AND id = ?2",
                    params![account_owned, id_owned],
                )?;
                Ok(n as u64)
            })
            .await?;

        tracing::debug!(account, id, deleted, "deleted article");
        Ok(deleted)
    }

    async fn delete_by_account(&self, account: &str) -> Result<u64> {
        validate_account(account)?;

        let account_owned = account.to_string();
        let ids: Vec<String> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT id FROM articles WHERE account = ?1")?;
                let ids = stmt
                    .query_map(params![account_owned], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .await?;

        let found = ids.len();
        let deleted = delete_in_batches(
            ids,
            self.config.delete_batch_size,
            self.config.delete_batch_retries,
            |chunk| {
                let conn = self.conn.clone();
                let account = account.to_string();
                async move {
                    let n = conn
                        .call(move |conn| {
                            let placeholders = (0..chunk.len())
                                .map(|i| format!("?{}", i + 2))
                                .collect::<Vec<_>>()
                                .join(", ");
                            let sql = format!(
                                "DELETE FROM articles WHERE account = ?1 AND id IN ({placeholders})"
                            );
                            let values = std::iter::once(&account).chain(chunk.iter());
                            Ok(conn.execute(&sql, params_from_iter(values))?)
                        })
                        .await
                        .map_err(AppError::from)?;
                    Ok::<u64, AppError>(n as u64)
                }
            },
        )
        .await?;

        tracing::info!(account, found, deleted, "deleted all articles for account");
        Ok(deleted)
    }
}

impl ToSql for DeliveryStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DeliveryStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
    }
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        None => Ok(None),
        Some(micros) => DateTime::from_timestamp_micros(micros)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros)),
    }
}

fn article_from_row(row: &Row, with_content: bool) -> rusqlite::Result<Article> {
    Ok(Article {
        account: row.get(0)?,
        id: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        author: row.get(4)?,
        content: if with_content { row.get(25)? } else { None },
        excerpt: row.get(5)?,
        image_url: row.get(6)?,
        source_domain: row.get(7)?,
        site_name: row.get(8)?,
        content_type: row.get(9)?,
        language: row.get(10)?,
        word_count: row.get(11)?,
        reading_time_minutes: row.get(12)?,
        published_at: timestamp(row, 13)?,
        extraction_error: row.get(14)?,
        delivery: DeliveryState {
            status: row.get(15)?,
            attempt_count: row.get(16)?,
            last_attempt: timestamp(row, 17)?,
            error: row.get(18)?,
            delivered_from: row.get(19)?,
            delivered_to: row.get(20)?,
            delivered_email_uuid: row.get(21)?,
            delivered_by: row.get(22)?,
        },
        created_at: timestamp(row, 23)?,
        updated_at: timestamp(row, 24)?,
    })
}
