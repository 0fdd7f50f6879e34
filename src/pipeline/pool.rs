//! Bounded concurrent extraction and insert for one unit's new links.
//!
//! At most `workers` article tasks are in flight at once. Each task turns its
//! own failure into a [`TaskOutcome`], so one bad article never cancels the
//! others, and the shared [`CrawlStats`] mutex is the only state tasks touch
//! in common.

use crate::archive::ArchiveUnit;
use crate::config::Site;
use crate::fetch::Fetcher;
use crate::models::{CandidateLink, CrawlStats};
use crate::scrapers::article::ArticleExtractor;
use crate::storage::{ArticleStore, InsertOutcome};
use crate::utils::{DelayRange, polite_pause};
use futures::stream::{self, StreamExt};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

/// What happened to one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Inserted,
    /// Another unit or run stored the URL between the batch check and the insert.
    DuplicateAtInsert,
    /// Extracted without any body text; never inserted.
    ZeroWords,
    ExtractionFailed(String),
    StoreError(String),
}

/// Extracts and stores one unit's new articles, `workers` at a time.
pub struct WorkerPool<'a, F, S> {
    extractor: ArticleExtractor<'a, F>,
    store: &'a S,
    workers: usize,
    article_delay: DelayRange,
}

impl<'a, F, S> WorkerPool<'a, F, S>
where
    F: Fetcher,
    S: ArticleStore,
{
    /// # Arguments
    ///
    /// * `site` - the descriptor articles are extracted with
    /// * `fetcher` - shared with the listing side of the crawl
    /// * `store` - receives every extracted article with text
    /// * `workers` - maximum articles in flight; zero is treated as one
    /// * `article_delay` - pause after each article, per task
    pub fn new(
        site: &'a Site,
        fetcher: &'a F,
        store: &'a S,
        workers: usize,
        article_delay: DelayRange,
    ) -> Self {
        Self {
            extractor: ArticleExtractor::new(site, fetcher),
            store,
            workers: workers.max(1),
            article_delay,
        }
    }

    /// Process every link and return the outcomes in completion order.
    ///
    /// # Arguments
    ///
    /// * `links` - new links only; dedup has already run
    /// * `unit` - the unit the links came from, used as a date fallback
    /// * `stats` - counters updated as each task finishes
    ///
    /// # Returns
    ///
    /// One [`TaskOutcome`] per link. Failures are outcomes, never errors.
    #[instrument(level = "info", skip_all, fields(unit = %unit, links = links.len()))]
    pub async fn run(
        &self,
        links: Vec<CandidateLink>,
        unit: &ArchiveUnit,
        stats: &Mutex<CrawlStats>,
    ) -> Vec<TaskOutcome> {
        let outcomes = stream::iter(links)
            .map(|link| async move {
                let outcome = self.process(&link, unit).await;
                record(stats, &outcome);
                outcome
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        let inserted = outcomes.iter().filter(|o| **o == TaskOutcome::Inserted).count();
        info!(processed = outcomes.len(), inserted, "Unit articles processed");
        outcomes
    }

    async fn process(&self, link: &CandidateLink, unit: &ArchiveUnit) -> TaskOutcome {
        let record = self.extractor.extract(&link.url, Some(unit)).await;
        if !record.success {
            return TaskOutcome::ExtractionFailed(record.error.unwrap_or_default());
        }
        if record.word_count == 0 {
            debug!(url = %link.url, "zero words; skipping");
            return TaskOutcome::ZeroWords;
        }

        let outcome = match self.store.insert_article(&record) {
            Ok(InsertOutcome::Inserted) => {
                info!(url = %link.url, words = record.word_count, "Stored article");
                TaskOutcome::Inserted
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!(url = %link.url, "already stored");
                TaskOutcome::DuplicateAtInsert
            }
            Err(e) => {
                warn!(url = %link.url, error = %e, "insert failed");
                TaskOutcome::StoreError(e.to_string())
            }
        };
        polite_pause(self.article_delay).await;
        outcome
    }
}

fn record(stats: &Mutex<CrawlStats>, outcome: &TaskOutcome) {
    let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
    match outcome {
        TaskOutcome::Inserted => stats.new_articles_added += 1,
        TaskOutcome::DuplicateAtInsert => stats.duplicates_at_insert += 1,
        TaskOutcome::ZeroWords => stats.zero_word_count_skipped += 1,
        TaskOutcome::ExtractionFailed(_) => stats.extraction_failures += 1,
        TaskOutcome::StoreError(_) => stats.store_errors += 1,
    }
}
