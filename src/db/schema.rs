pub const SCHEMA: &str = r#"
-- articles table, one row per (account, id)
CREATE TABLE IF NOT EXISTS articles (
    account TEXT NOT NULL,
    id TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    author TEXT,
    content TEXT,
    excerpt TEXT,
    image_url TEXT,
    source_domain TEXT,
    site_name TEXT,
    content_type TEXT,
    language TEXT,
    word_count INTEGER NOT NULL DEFAULT 0,
    reading_time_minutes INTEGER NOT NULL DEFAULT 0,
    published_at INTEGER,
    extraction_error TEXT,
    delivery_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (delivery_status IN ('pending', 'delivering', 'delivered', 'failed')),
    delivery_attempt_count INTEGER NOT NULL DEFAULT 0,
    last_delivery_attempt INTEGER,
    delivery_error TEXT,
    delivered_from TEXT,
    delivered_to TEXT,
    delivered_email_uuid TEXT,
    delivered_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (account, id)
) WITHOUT ROWID;

-- listing index: newest first within an account
CREATE INDEX IF NOT EXISTS idx_articles_account_created_at
    ON articles(account, created_at DESC, id);
"#;

/// Every column except `content`, in the order `article_from_row` reads them.
pub const SUMMARY_COLUMNS: &str = "account, id, url, title, author, excerpt, image_url, \
    source_domain, site_name, content_type, language, word_count, reading_time_minutes, \
    published_at, extraction_error, delivery_status, delivery_attempt_count, last_delivery_attempt, \
    delivery_error, delivered_from, delivered_to, delivered_email_uuid, delivered_by, \
    created_at, updated_at";
