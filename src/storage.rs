//! Persistent article and translation store.
//!
//! Articles are keyed by `url` with a UNIQUE constraint, translations by
//! `original_id`. A second insert of the same key is reported as
//! [`InsertOutcome::Duplicate`] and leaves the first row untouched.

use crate::error::StoreError;
use crate::models::{ArticleRecord, StoredArticle, TranslatedRecord};
use rusqlite::{Connection, ffi, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument};

/// Result of an insert against a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Storage used by the crawl.
pub trait ArticleStore {
    /// The subset of `urls` already stored, in one query. Empty input never
    /// touches the store.
    fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError>;

    fn insert_article(&self, record: &ArticleRecord) -> Result<InsertOutcome, StoreError>;
}

impl<T: ArticleStore> ArticleStore for &T {
    fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        (**self).existing_urls(urls)
    }

    fn insert_article(&self, record: &ArticleRecord) -> Result<InsertOutcome, StoreError> {
        (**self).insert_article(record)
    }
}

/// Storage used by translation ingestion.
pub trait TranslationStore {
    fn count_by_media(&self, media_name: &str) -> Result<usize, StoreError>;

    fn translated_count(&self, media_name: &str) -> Result<usize, StoreError>;

    /// Up to `limit` untranslated articles of `media_name` with `id > after_id`,
    /// ordered by id.
    fn untranslated_after(
        &self,
        media_name: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredArticle>, StoreError>;

    fn insert_translation(&self, record: &TranslatedRecord) -> Result<InsertOutcome, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS articles (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    url            TEXT NOT NULL UNIQUE,
    title          TEXT,
    author         TEXT,
    published_date TEXT,
    modified_date  TEXT,
    section        TEXT,
    tags           TEXT NOT NULL DEFAULT '[]',
    article_text   TEXT NOT NULL,
    word_count     INTEGER NOT NULL,
    media_name     TEXT NOT NULL,
    unit_key       TEXT,
    scraped_at     TEXT
);
CREATE INDEX IF NOT EXISTS idx_articles_media ON articles(media_name);

CREATE TABLE IF NOT EXISTS translations (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    original_id           INTEGER NOT NULL UNIQUE REFERENCES articles(id),
    url                   TEXT NOT NULL,
    original_title        TEXT,
    translated_title      TEXT,
    original_text         TEXT NOT NULL,
    translated_text       TEXT NOT NULL,
    author                TEXT,
    published_date        TEXT,
    section               TEXT,
    tags                  TEXT NOT NULL DEFAULT '[]',
    media_name            TEXT NOT NULL,
    original_word_count   INTEGER NOT NULL,
    translated_word_count INTEGER NOT NULL,
    translated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_translations_media ON translations(media_name);
";

/// SQLite-backed store. The connection sits behind a mutex so one store can
/// be shared by reference across all in-flight article tasks.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        info!("Opened article store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn article_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Look up one article by URL.
    pub fn article_by_url(&self, url: &str) -> Result<Option<StoredArticle>, StoreError> {
        use rusqlite::OptionalExtension;
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, url, title, author, published_date, section, tags,
                        article_text, word_count, media_name
                 FROM articles WHERE url = ?1",
                params![url],
                stored_article_row,
            )
            .optional()?;
        row.map(StoredRow::into_article).transpose()
    }
}

impl ArticleStore for SqliteStore {
    #[instrument(level = "debug", skip_all, fields(candidates = urls.len()))]
    fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let list = serde_json::to_string(urls)?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT url FROM articles WHERE url IN (SELECT value FROM json_each(?1))",
        )?;
        let existing = stmt
            .query_map(params![list], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        debug!(existing = existing.len(), "batched existence check");
        Ok(existing)
    }

    fn insert_article(&self, record: &ArticleRecord) -> Result<InsertOutcome, StoreError> {
        let tags = serde_json::to_string(&record.tags)?;
        let scraped_at = record.scraped_at.map(|t| t.to_rfc3339());
        let result = self.conn().execute(
            "INSERT INTO articles
                (url, title, author, published_date, modified_date, section, tags,
                 article_text, word_count, media_name, unit_key, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.url,
                record.title,
                record.author,
                record.published_date,
                record.modified_date,
                record.section,
                tags,
                record.article_text,
                record.word_count as i64,
                record.media_name,
                record.unit_key,
                scraped_at,
            ],
        );
        insert_outcome(result)
    }
}

impl TranslationStore for SqliteStore {
    fn count_by_media(&self, media_name: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM articles WHERE media_name = ?1",
            params![media_name],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn translated_count(&self, media_name: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM translations WHERE media_name = ?1",
            params![media_name],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn untranslated_after(
        &self,
        media_name: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredArticle>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, a.url, a.title, a.author, a.published_date, a.section, a.tags,
                    a.article_text, a.word_count, a.media_name
             FROM articles a
             WHERE a.media_name = ?1 AND a.id > ?2
               AND NOT EXISTS (SELECT 1 FROM translations t WHERE t.original_id = a.id)
             ORDER BY a.id
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![media_name, after_id, limit as i64], stored_article_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(StoredRow::into_article).collect()
    }

    fn insert_translation(&self, record: &TranslatedRecord) -> Result<InsertOutcome, StoreError> {
        let tags = serde_json::to_string(&record.tags)?;
        let result = self.conn().execute(
            "INSERT INTO translations
                (original_id, url, original_title, translated_title, original_text, translated_text,
                 author, published_date, section, tags, media_name,
                 original_word_count, translated_word_count, translated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.original_id,
                record.url,
                record.original_title,
                record.translated_title,
                record.original_text,
                record.translated_text,
                record.author,
                record.published_date,
                record.section,
                tags,
                record.media_name,
                record.original_word_count as i64,
                record.translated_word_count as i64,
                record.translated_at.to_rfc3339(),
            ],
        );
        insert_outcome(result)
    }
}

fn insert_outcome(result: rusqlite::Result<usize>) -> Result<InsertOutcome, StoreError> {
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(InsertOutcome::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

/// Raw row; tags are decoded outside the rusqlite row closure.
struct StoredRow {
    id: i64,
    url: String,
    title: Option<String>,
    author: Option<String>,
    published_date: Option<String>,
    section: Option<String>,
    tags: String,
    article_text: String,
    word_count: i64,
    media_name: String,
}

impl StoredRow {
    fn into_article(self) -> Result<StoredArticle, StoreError> {
        Ok(StoredArticle {
            id: self.id,
            url: self.url,
            title: self.title,
            author: self.author,
            published_date: self.published_date,
            section: self.section,
            tags: serde_json::from_str(&self.tags)?,
            article_text: self.article_text,
            word_count: self.word_count.max(0) as usize,
            media_name: self.media_name,
        })
    }
}

fn stored_article_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        published_date: row.get(4)?,
        section: row.get(5)?,
        tags: row.get(6)?,
        article_text: row.get(7)?,
        word_count: row.get(8)?,
        media_name: row.get(9)?,
    })
}
