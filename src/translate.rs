//! Translation ingestion.
//!
//! Stored articles of one media name are read in id order, a batch at a time,
//! sent to a [`Translator`], and written back as [`TranslatedRecord`]s keyed
//! by the original article id. The translator contract is "batch in,
//! same-length batch out"; a failed batch is counted and the run moves on.

use crate::error::{PipelineError, TranslateError};
use crate::models::{StoredArticle, TranslatedRecord, TranslationStats, word_count};
use crate::storage::{InsertOutcome, TranslationStore};
use crate::utils::truncate_for_log;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A batch translation backend.
pub trait Translator {
    /// Translate `texts` from `src` to `tgt`, returning one string per input in order.
    async fn translate(
        &self,
        texts: &[String],
        src: &str,
        tgt: &str,
    ) -> Result<Vec<String>, TranslateError>;
}

impl<T: Translator> Translator for &T {
    async fn translate(
        &self,
        texts: &[String],
        src: &str,
        tgt: &str,
    ) -> Result<Vec<String>, TranslateError> {
        (**self).translate(texts, src, tgt).await
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    texts: &'a [String],
    src_lang: &'a str,
    tgt_lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<String>,
}

/// Posts batches as JSON to a translation service endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: Client,
    endpoint: String,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TranslateError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl Translator for HttpTranslator {
    #[instrument(level = "debug", skip_all, fields(texts = texts.len(), %src, %tgt))]
    async fn translate(
        &self,
        texts: &[String],
        src: &str,
        tgt: &str,
    ) -> Result<Vec<String>, TranslateError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = TranslateRequest {
            texts,
            src_lang: src,
            tgt_lang: tgt,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TranslateError::Backend(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_for_log(&detail, 200)
            )));
        }
        let parsed: TranslateResponse = response.json().await?;
        check_len(texts.len(), parsed.translations)
    }
}

fn check_len(expected: usize, translations: Vec<String>) -> Result<Vec<String>, TranslateError> {
    if translations.len() != expected {
        return Err(TranslateError::LengthMismatch {
            expected,
            got: translations.len(),
        });
    }
    Ok(translations)
}

/// What to translate and how much at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOptions {
    /// Only articles stored under this media name are read.
    pub media_name: String,
    /// Source language code sent to the translator.
    pub src_lang: String,
    /// Target language code sent to the translator.
    pub tgt_lang: String,
    /// Articles per translator request; zero is treated as one.
    pub batch_size: usize,
    /// Stop after this many articles have been read.
    pub limit: Option<usize>,
}

/// Reads untranslated articles in id order and stores their translations.
pub struct TranslationJob<'a, T, S> {
    translator: &'a T,
    store: &'a S,
    options: TranslationOptions,
}

impl<'a, T, S> TranslationJob<'a, T, S>
where
    T: Translator,
    S: TranslationStore,
{
    /// # Arguments
    ///
    /// * `translator` - the backend each batch is sent to
    /// * `store` - source of articles and destination of translations
    /// * `options` - media name, languages and batching
    pub fn new(translator: &'a T, store: &'a S, options: TranslationOptions) -> Self {
        Self {
            translator,
            store,
            options,
        }
    }

    /// Translate every untranslated article of the media name, up to `limit`.
    ///
    /// Articles are paged by id, so each run moves forward even when a batch
    /// fails; already translated articles are never read again.
    ///
    /// # Returns
    ///
    /// The counters for this run. A failed batch is counted in `errors`; an
    /// `Err` means the store could not be read.
    #[instrument(level = "info", skip_all, fields(media = %self.options.media_name))]
    pub async fn run(&self) -> Result<TranslationStats, PipelineError> {
        let opts = &self.options;
        let total = self.store.count_by_media(&opts.media_name)?;
        let done = self.store.translated_count(&opts.media_name)?;
        info!(total, already_translated = done, "Starting translation");

        let batch_size = opts.batch_size.max(1);
        let mut stats = TranslationStats::default();
        let mut after_id = 0i64;

        loop {
            let remaining = opts.limit.map(|limit| limit.saturating_sub(stats.processed));
            let take = remaining.map_or(batch_size, |r| r.min(batch_size));
            if take == 0 {
                break;
            }
            let batch = self.store.untranslated_after(&opts.media_name, after_id, take)?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;
            stats.processed += batch.len();

            let (with_text, empty): (Vec<_>, Vec<_>) =
                batch.into_iter().partition(|a| !a.article_text.trim().is_empty());
            stats.skipped_no_text += empty.len();
            if with_text.is_empty() {
                continue;
            }

            match self.translate_batch(&with_text).await {
                Ok(records) => {
                    for record in &records {
                        self.store_one(record, &mut stats);
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        articles = with_text.len(),
                        after_id,
                        "Batch translation failed"
                    );
                    stats.errors += with_text.len();
                }
            }
            info!(
                processed = stats.processed,
                translated = stats.translated,
                errors = stats.errors,
                "Batch done"
            );
        }

        info!(
            processed = stats.processed,
            translated = stats.translated,
            skipped_already_done = stats.skipped_already_done,
            skipped_no_text = stats.skipped_no_text,
            errors = stats.errors,
            "Translation finished"
        );
        Ok(stats)
    }

    async fn translate_batch(
        &self,
        articles: &[StoredArticle],
    ) -> Result<Vec<TranslatedRecord>, TranslateError> {
        let opts = &self.options;
        let texts = articles.iter().map(|a| a.article_text.clone()).collect::<Vec<_>>();
        let translated_texts = self
            .translator
            .translate(&texts, &opts.src_lang, &opts.tgt_lang)
            .await?;
        let translated_texts = check_len(texts.len(), translated_texts)?;

        let titles = articles.iter().filter_map(|a| a.title.clone()).collect::<Vec<_>>();
        let mut translated_titles = if titles.is_empty() {
            Vec::new()
        } else {
            let out = self.translator.translate(&titles, &opts.src_lang, &opts.tgt_lang).await?;
            check_len(titles.len(), out)?
        }
        .into_iter();

        let now = Utc::now();
        let records = articles
            .iter()
            .zip(translated_texts)
            .map(|(article, translated_text)| TranslatedRecord {
                original_id: article.id,
                url: article.url.clone(),
                original_title: article.title.clone(),
                translated_title: article.title.as_ref().and_then(|_| translated_titles.next()),
                translated_word_count: word_count(&translated_text),
                original_text: article.article_text.clone(),
                translated_text,
                author: article.author.clone(),
                published_date: article.published_date.clone(),
                section: article.section.clone(),
                tags: article.tags.clone(),
                media_name: article.media_name.clone(),
                original_word_count: article.word_count,
                translated_at: now,
            })
            .collect();
        Ok(records)
    }

    fn store_one(&self, record: &TranslatedRecord, stats: &mut TranslationStats) {
        match self.store.insert_translation(record) {
            Ok(InsertOutcome::Inserted) => stats.translated += 1,
            Ok(InsertOutcome::Duplicate) => {
                debug!(id = record.original_id, "translation already stored");
                stats.skipped_already_done += 1;
            }
            Err(e) => {
                warn!(id = record.original_id, error = %e, "Failed to store translation");
                stats.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleRecord;
    use crate::storage::{ArticleStore, SqliteStore};
    use std::sync::Mutex;

    /// Upper-cases every text; fails any batch containing "FAIL".
    #[derive(Debug, Default)]
    struct ShoutingTranslator {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl Translator for ShoutingTranslator {
        async fn translate(
            &self,
            texts: &[String],
            _src: &str,
            _tgt: &str,
        ) -> Result<Vec<String>, TranslateError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(TranslateError::Backend("rejected".into()));
            }
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    /// Always drops the last translation.
    struct ShortTranslator;

    impl Translator for ShortTranslator {
        async fn translate(
            &self,
            texts: &[String],
            _src: &str,
            _tgt: &str,
        ) -> Result<Vec<String>, TranslateError> {
            Ok(texts.iter().skip(1).cloned().collect())
        }
    }

    fn seed(store: &SqliteStore, media: &str, url: &str, title: Option<&str>, text: &str) {
        let mut record = ArticleRecord::new(url, media);
        record.title = title.map(String::from);
        record.set_text(text.to_string());
        store.insert_article(&record).unwrap();
    }

    fn options(batch_size: usize) -> TranslationOptions {
        TranslationOptions {
            media_name: "DINAMALAR".to_string(),
            src_lang: "ta".to_string(),
            tgt_lang: "en".to_string(),
            batch_size,
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_translates_in_batches_and_skips_empty_text() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, "DINAMALAR", "https://example.com/1", Some("first"), "one text");
        seed(&store, "DINAMALAR", "https://example.com/2", None, "two text");
        seed(&store, "DINAMALAR", "https://example.com/3", Some("empty"), "   ");
        seed(&store, "OTHER", "https://example.com/4", Some("other"), "not mine");
        seed(&store, "DINAMALAR", "https://example.com/5", Some("fifth"), "five text");
        let translator = ShoutingTranslator::default();

        let stats = TranslationJob::new(&translator, &store, options(2)).run().await.unwrap();

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.translated, 3);
        assert_eq!(stats.skipped_no_text, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(store.translated_count("DINAMALAR").unwrap(), 3);
        assert_eq!(store.translated_count("OTHER").unwrap(), 0);

        let calls = translator.calls.lock().unwrap().clone();
        assert_eq!(calls[0], vec!["one text", "two text"]);
        assert_eq!(calls[1], vec!["first"]);
        assert!(calls.iter().all(|batch| !batch.iter().any(|t| t.trim().is_empty())));

        let again = TranslationJob::new(&translator, &store, options(2)).run().await.unwrap();
        assert_eq!(again.translated, 0);
        assert_eq!(again.processed, 1);
        assert_eq!(again.skipped_no_text, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_counts_every_article_and_continues() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, "DINAMALAR", "https://example.com/1", None, "FAIL here");
        seed(&store, "DINAMALAR", "https://example.com/2", None, "fine");
        seed(&store, "DINAMALAR", "https://example.com/3", None, "also fine");
        let translator = ShoutingTranslator::default();

        let stats = TranslationJob::new(&translator, &store, options(2)).run().await.unwrap();
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.translated, 1);
        assert_eq!(stats.processed, 3);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_a_batch_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, "DINAMALAR", "https://example.com/1", None, "one");
        seed(&store, "DINAMALAR", "https://example.com/2", None, "two");

        let stats = TranslationJob::new(&ShortTranslator, &store, options(10)).run().await.unwrap();
        assert_eq!(stats.errors, 2);
        assert_eq!(store.translated_count("DINAMALAR").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_limit_caps_articles_read() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            seed(&store, "DINAMALAR", &format!("https://example.com/{i}"), None, "text");
        }
        let translator = ShoutingTranslator::default();
        let opts = TranslationOptions {
            limit: Some(3),
            ..options(2)
        };
        let stats = TranslationJob::new(&translator, &store, opts).run().await.unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.translated, 3);
    }

    #[test]
    fn test_request_body_shape() {
        let texts = vec!["வணக்கம்".to_string()];
        let body = TranslateRequest {
            texts: &texts,
            src_lang: "ta",
            tgt_lang: "en",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"texts": ["வணக்கம்"], "src_lang": "ta", "tgt_lang": "en"})
        );
        let err = check_len(2, vec!["x".to_string()]).unwrap_err();
        assert!(matches!(err, TranslateError::LengthMismatch { expected: 2, got: 1 }));
    }
}
