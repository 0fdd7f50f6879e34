//! Data models shared by the crawl and translation stages.
//!
//! - [`CandidateLink`]: an article URL discovered on one archive unit
//! - [`ArticleRecord`]: the extracted article, as persisted in the store
//! - [`TranslatedRecord`]: a translated copy of a stored article
//! - [`CrawlStats`] / [`TranslationStats`]: run counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An article URL found on an archive listing page.
///
/// URLs are absolute with query and fragment removed, so two links to the
/// same article from different units compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateLink {
    /// Site descriptor name the link was discovered by.
    pub source_name: String,
    /// Absolute, query-stripped article URL.
    pub url: String,
    /// Key of the archive unit the link was found on.
    pub unit_key: String,
}

/// An extracted news article.
///
/// `url` is the unique key in the store. Records with `success == false` or a
/// `word_count` of zero are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    /// `YYYY-MM-DD` when the source date could be normalized, otherwise verbatim.
    pub published_date: Option<String>,
    pub modified_date: Option<String>,
    pub section: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub article_text: String,
    pub word_count: usize,
    pub media_name: String,
    /// Archive unit the article was discovered on.
    pub unit_key: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
}

impl ArticleRecord {
    /// An empty, successful record for `url`, to be filled by the extractor.
    pub fn new(url: &str, media_name: &str) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            author: None,
            published_date: None,
            modified_date: None,
            section: None,
            tags: Vec::new(),
            article_text: String::new(),
            word_count: 0,
            media_name: media_name.to_string(),
            unit_key: None,
            scraped_at: None,
            success: true,
            error: None,
        }
    }

    /// A failed extraction for `url` carrying the failure reason.
    pub fn failed(url: &str, media_name: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(url, media_name)
        }
    }

    /// Replace the article text and keep `word_count` in step with it.
    pub fn set_text(&mut self, text: String) {
        self.word_count = word_count(&text);
        self.article_text = text;
    }
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// A stored article as read back for translation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArticle {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_date: Option<String>,
    pub section: Option<String>,
    pub tags: Vec<String>,
    pub article_text: String,
    pub word_count: usize,
    pub media_name: String,
}

/// A translated copy of one stored article. `original_id` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedRecord {
    pub original_id: i64,
    pub url: String,
    pub original_title: Option<String>,
    pub translated_title: Option<String>,
    pub original_text: String,
    pub translated_text: String,
    pub author: Option<String>,
    pub published_date: Option<String>,
    pub section: Option<String>,
    pub tags: Vec<String>,
    pub media_name: String,
    pub original_word_count: usize,
    pub translated_word_count: usize,
    pub translated_at: DateTime<Utc>,
}

/// Counters for one crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub units_completed: usize,
    pub units_skipped: usize,
    pub units_failed: usize,
    pub empty_units: usize,
    pub suspicious_empty_units: usize,
    pub total_urls_found: usize,
    pub duplicates_skipped: usize,
    pub duplicates_at_insert: usize,
    pub zero_word_count_skipped: usize,
    pub extraction_failures: usize,
    pub store_errors: usize,
    pub new_articles_added: usize,
}

/// Counters for one translation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationStats {
    pub processed: usize,
    pub translated: usize,
    pub skipped_already_done: usize,
    pub skipped_no_text: usize,
    pub errors: usize,
}
