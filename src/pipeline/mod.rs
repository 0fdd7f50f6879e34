//! The crawl driver.
//!
//! Units are walked strictly in order by one control loop. For every unit the
//! driver reads the listing, drops links already stored, hands the rest to the
//! [`WorkerPool`](pool::WorkerPool), and only then marks the unit complete in
//! the checkpoint. Listing and extraction failures are values; only store and
//! checkpoint failures end a run with an error.

pub mod dedup;
pub mod pool;

use crate::archive::{ArchiveUnit, today};
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::Site;
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::models::CrawlStats;
use crate::scrapers::listing::{Listing, ListingParser};
use crate::storage::ArticleStore;
use crate::utils::{DelayRange, polite_pause};
use pool::WorkerPool;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Empty or failed units in a row that end a paged crawl when the site sets no limit.
pub const DEFAULT_PAGED_EMPTY_STREAK: u32 = 3;

/// Settings for one crawl run.
///
/// Built with [`CrawlOptions::from_site`] and then overridden field by field
/// from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOptions {
    /// First unit, as given on the command line. When unset the crawl resumes
    /// after the checkpoint's last unit, or begins at the site's configured
    /// start (today for date archives, page 1 for paged ones).
    pub start: Option<ArchiveUnit>,
    /// Last unit, inclusive. Date archives never go past today either way.
    pub end: Option<ArchiveUnit>,
    /// Articles fetched concurrently within one unit.
    pub workers: usize,
    /// Pause between listing fetches.
    pub unit_delay: DelayRange,
    /// Pause before each article fetch.
    pub article_delay: DelayRange,
    /// Stop after this many consecutive empty or failed units.
    pub max_empty_streak: Option<u32>,
    /// Ignore the saved checkpoint and start with no completed units.
    pub fresh: bool,
}

impl CrawlOptions {
    /// Defaults from the site descriptor: its archive end, crawl settings,
    /// and empty streak limit.
    pub fn from_site(site: &Site) -> Self {
        let archive = &site.config.archive;
        let crawl = &site.config.crawl;
        let max_empty_streak = match archive.max_empty_streak {
            Some(n) => Some(n),
            None if archive.scheme.is_paged() => Some(DEFAULT_PAGED_EMPTY_STREAK),
            None => None,
        };
        Self {
            start: None,
            end: site.default_end,
            workers: crawl.workers,
            unit_delay: crawl.unit_delay,
            article_delay: crawl.article_delay,
            max_empty_streak,
            fresh: false,
        }
    }
}

/// Where a [`Driver`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Created, or loading the checkpoint.
    Pending,
    /// Walking units; the last fetched unit had links.
    Running,
    /// Running, with this many empty or failed units in a row behind it.
    EmptyStreak(u32),
    /// The run ended, for whatever reason.
    Done,
}

/// Walks one site's archive units in order and stores the new articles.
pub struct Driver<'a, F, S> {
    site: &'a Site,
    fetcher: F,
    store: S,
    checkpoint: CheckpointStore,
    options: CrawlOptions,
    state: DriverState,
}

impl<'a, F, S> Driver<'a, F, S>
where
    F: Fetcher,
    S: ArticleStore,
{
    /// Create a driver in the [`DriverState::Pending`] state.
    ///
    /// # Arguments
    ///
    /// * `site` - the compiled descriptor of the site to crawl
    /// * `fetcher` - used for listing and article pages alike
    /// * `store` - where new articles go, and what dedup asks
    /// * `checkpoint` - the site's progress file
    /// * `options` - range, concurrency and pacing for this run
    pub fn new(
        site: &'a Site,
        fetcher: F,
        store: S,
        checkpoint: CheckpointStore,
        options: CrawlOptions,
    ) -> Self {
        Self {
            site,
            fetcher,
            store,
            checkpoint,
            options,
            state: DriverState::Pending,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Crawl from the resume point until the archive ends, the range is
    /// exhausted, or the empty streak limit is reached.
    ///
    /// Units already complete in the checkpoint are skipped. Each unit is
    /// marked complete only after all of its new articles were handled.
    ///
    /// # Returns
    ///
    /// The counters for this run. Listing and article failures are counted,
    /// not returned; an `Err` means the store or the checkpoint failed, and
    /// the unit in flight stays incomplete.
    #[instrument(level = "info", skip_all, fields(site = %self.site.name()))]
    pub async fn run(&mut self) -> Result<CrawlStats, PipelineError> {
        self.state = DriverState::Pending;
        let mut progress = if self.options.fresh {
            info!("Ignoring saved checkpoint");
            CheckpointState::default()
        } else {
            self.checkpoint.load()?
        };
        let Some(mut unit) = self.resume_point(&progress) else {
            info!("Nothing to crawl");
            self.state = DriverState::Done;
            return Ok(CrawlStats::default());
        };
        info!(
            start = %unit,
            end = ?self.options.end.map(|u| u.key()),
            checkpoint = %self.checkpoint.path().display(),
            "Starting crawl"
        );

        self.state = DriverState::Running;
        let stats = Mutex::new(CrawlStats::default());
        let listing = ListingParser::new(self.site);
        let pool = WorkerPool::new(
            self.site,
            &self.fetcher,
            &self.store,
            self.options.workers,
            self.options.article_delay,
        );
        let latest_date = today();
        let mut streak = 0u32;
        let mut fetched_any = false;

        loop {
            if self.options.end.is_some_and(|end| unit > end) {
                info!(%unit, "Reached end of range");
                break;
            }
            if unit.as_date().is_some_and(|d| d > latest_date) {
                info!(%unit, "Reached today");
                break;
            }

            if progress.is_complete(&unit) {
                debug!(%unit, "unit already complete; skipping");
                tally(&stats, |s| s.units_skipped += 1);
            } else {
                if fetched_any {
                    polite_pause(self.options.unit_delay).await;
                }
                fetched_any = true;

                match listing.fetch(&self.fetcher, &unit).await {
                    Listing::EndOfArchive => {
                        info!(%unit, "End of archive");
                        break;
                    }
                    Listing::Failed(reason) => {
                        warn!(%unit, %reason, "Unit failed; will retry on the next run");
                        tally(&stats, |s| s.units_failed += 1);
                        streak += 1;
                    }
                    Listing::Links { links, anchors_seen } if links.is_empty() => {
                        if anchors_seen > 0 {
                            warn!(
                                %unit,
                                anchors_seen,
                                signal = "empty_suspicious",
                                "Listing had anchors but no article links"
                            );
                            tally(&stats, |s| s.suspicious_empty_units += 1);
                        } else {
                            info!(%unit, "No links found");
                        }
                        tally(&stats, |s| s.empty_units += 1);
                        streak += 1;
                        self.complete(&mut progress, &unit, &stats)?;
                    }
                    Listing::Links { links, .. } => {
                        streak = 0;
                        let found = links.len();
                        let (fresh, skipped) = dedup::filter_new(&self.store, links)?;
                        info!(%unit, found, new = fresh.len(), skipped, "Listing read");
                        tally(&stats, |s| {
                            s.total_urls_found += found;
                            s.duplicates_skipped += skipped;
                        });
                        if !fresh.is_empty() {
                            pool.run(fresh, &unit, &stats).await;
                        }
                        self.complete(&mut progress, &unit, &stats)?;
                    }
                }

                self.state = match streak {
                    0 => DriverState::Running,
                    n => DriverState::EmptyStreak(n),
                };
                if self.options.max_empty_streak.is_some_and(|max| streak >= max) {
                    info!(streak, "Too many empty units in a row; stopping");
                    break;
                }
            }

            match unit.next() {
                Some(next) => unit = next,
                None => break,
            }
        }

        self.state = DriverState::Done;
        let stats = stats.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            units_completed = stats.units_completed,
            units_skipped = stats.units_skipped,
            units_failed = stats.units_failed,
            empty_units = stats.empty_units,
            suspicious_empty_units = stats.suspicious_empty_units,
            total_urls_found = stats.total_urls_found,
            duplicates_skipped = stats.duplicates_skipped,
            new_articles_added = stats.new_articles_added,
            "Crawl finished"
        );
        Ok(stats)
    }

    fn resume_point(&self, progress: &CheckpointState) -> Option<ArchiveUnit> {
        let scheme = &self.site.config.archive.scheme;
        let explicit = self.options.start;
        let start = explicit
            .or(self.site.default_start)
            .unwrap_or_else(|| scheme.default_start());
        // An explicit start re-walks a date range so failed days get retried.
        let resumable = explicit.is_none() || scheme.is_paged();
        match progress.last_unit {
            Some(last) if resumable && same_kind(&last, &start) && last >= start => {
                info!(last = %last, "Resuming after last completed unit");
                last.next()
            }
            _ => Some(start),
        }
    }

    /// Record `unit` as done, after all of its articles were handled.
    fn complete(
        &self,
        progress: &mut CheckpointState,
        unit: &ArchiveUnit,
        stats: &Mutex<CrawlStats>,
    ) -> Result<(), PipelineError> {
        progress.mark_complete(unit);
        self.checkpoint.save(progress)?;
        tally(stats, |s| s.units_completed += 1);
        Ok(())
    }
}

fn same_kind(a: &ArchiveUnit, b: &ArchiveUnit) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn tally(stats: &Mutex<CrawlStats>, update: impl FnOnce(&mut CrawlStats)) {
    update(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::error::FetchError;
    use crate::error::StoreError;
    use crate::fetch::testing::StubFetcher;
    use crate::models::ArticleRecord;
    use crate::pipeline::dedup::testing::CountingStore;
    use crate::storage::{InsertOutcome, SqliteStore};
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn site(name: &str) -> Site {
        SiteConfig::builtin(name).unwrap().compile().unwrap()
    }

    fn day(d: u32) -> ArchiveUnit {
        ArchiveUnit::Date(NaiveDate::from_ymd_opt(2024, 5, d).unwrap())
    }

    fn options(site: &Site, start: ArchiveUnit, end: Option<ArchiveUnit>) -> CrawlOptions {
        CrawlOptions {
            start: Some(start),
            end,
            unit_delay: DelayRange::none(),
            article_delay: DelayRange::none(),
            ..CrawlOptions::from_site(site)
        }
    }

    fn archive_url(d: u32) -> String {
        format!("https://indianexpress.com/archive/2024/05/{d:02}/")
    }

    fn article_page(title: &str) -> String {
        let sentence = "The committee met on Wednesday to review the plan. ";
        let paragraph = format!("<p>{}</p>", sentence.repeat(6));
        format!(
            "<html><head><title>{title}</title></head>\
             <body><div class=\"story_details\">{paragraph}</div></body></html>"
        )
    }

    const LISTING: &str = r#"<html><body>
        <a href="/article/foo-123">One</a>
        <a href="/article/foo-123?ref=home">Two</a>
        <a href="https://indianexpress.com/article/foo-123#top">Three</a>
        <a href="/article/foo-123">Again</a>
        <a href="/category/bar">Category</a>
      </body></html>"#;

    const FOO: &str = "https://indianexpress.com/article/foo-123";

    #[tokio::test]
    async fn test_end_to_end_single_unit() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let stub = StubFetcher::new()
            .with_page(&archive_url(1), 200, LISTING)
            .with_page(FOO, 200, &article_page("Plan reviewed"));
        let store = SqliteStore::open_in_memory().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());

        let opts = options(&site, day(1), Some(day(1)));
        let mut driver = Driver::new(&site, &stub, &store, checkpoint.clone(), opts);
        assert_eq!(driver.state(), DriverState::Pending);
        let stats = driver.run().await.unwrap();
        assert_eq!(driver.state(), DriverState::Done);

        assert_eq!(stats.total_urls_found, 1);
        assert_eq!(stats.new_articles_added, 1);
        assert_eq!(stats.units_completed, 1);
        assert_eq!(stub.request_count(FOO), 1);
        let stored = store.article_by_url(FOO).unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Plan reviewed"));
        assert_eq!(stored.published_date.as_deref(), Some("2024-05-01"));
        assert!(checkpoint.load().unwrap().is_complete(&day(1)));
    }

    #[tokio::test]
    async fn test_already_stored_link_completes_unit_without_inserts() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let stub = StubFetcher::new().with_page(&archive_url(1), 200, LISTING);
        let store = CountingStore::new();
        let mut existing = ArticleRecord::new(FOO, "THE INDIAN EXPRESS");
        existing.set_text("already here".to_string());
        store.inner.insert_article(&existing).unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());

        let opts = options(&site, day(1), Some(day(1)));
        let mut driver = Driver::new(&site, &stub, &store, checkpoint.clone(), opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(stats.new_articles_added, 0);
        assert!(store.inserts().is_empty());
        assert_eq!(stub.request_count(FOO), 0);
        assert!(checkpoint.load().unwrap().is_complete(&day(1)));
    }

    #[tokio::test]
    async fn test_completed_units_are_never_fetched() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let mut state = CheckpointState::default();
        state.mark_complete(&day(1));
        state.mark_complete(&day(3));
        checkpoint.save(&state).unwrap();

        let stub = StubFetcher::new()
            .with_page(&archive_url(2), 200, "<html><body></body></html>")
            .with_page(&archive_url(4), 200, "<html><body></body></html>");
        let store = SqliteStore::open_in_memory().unwrap();
        let opts = options(&site, day(1), Some(day(4)));
        let mut driver = Driver::new(&site, &stub, &store, checkpoint, opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stub.requests(), vec![archive_url(2), archive_url(4)]);
        assert_eq!(stats.units_skipped, 2);
        assert_eq!(stats.empty_units, 2);
    }

    #[tokio::test]
    async fn test_second_run_adds_nothing() {
        let site = site("indian_express");
        let stub = StubFetcher::new()
            .with_page(&archive_url(1), 200, LISTING)
            .with_page(FOO, 200, &article_page("Plan reviewed"));
        let store = SqliteStore::open_in_memory().unwrap();

        for run in 0..2 {
            let dir = TempDir::new().unwrap();
            let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
            let opts = options(&site, day(1), Some(day(1)));
            let mut driver = Driver::new(&site, &stub, &store, checkpoint, opts);
            let stats = driver.run().await.unwrap();
            if run == 1 {
                assert_eq!(stats.new_articles_added, 0);
                assert_eq!(stats.duplicates_skipped, 1);
            }
        }
        assert_eq!(store.article_count().unwrap(), 1);
        assert_eq!(stub.request_count(FOO), 1);
    }

    #[tokio::test]
    async fn test_zero_word_articles_are_not_inserted() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let listing = r#"<a href="/article/words-1">a</a><a href="/article/photos-2">b</a>"#;
        let stub = StubFetcher::new()
            .with_page(&archive_url(1), 200, listing)
            .with_page("https://indianexpress.com/article/words-1", 200, &article_page("Words"))
            .with_page(
                "https://indianexpress.com/article/photos-2",
                200,
                "<html><head><title>Photos</title></head><body><img src=x></body></html>",
            );
        let store = CountingStore::new();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let opts = options(&site, day(1), Some(day(1)));
        let mut driver = Driver::new(&site, &stub, &store, checkpoint, opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stats.zero_word_count_skipped, 1);
        assert_eq!(store.inserts(), vec!["https://indianexpress.com/article/words-1"]);
    }

    #[tokio::test]
    async fn test_failed_listing_is_retried_later() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let stub = StubFetcher::new()
            .with_error(&archive_url(1), FetchError::Timeout)
            .with_page(&archive_url(2), 200, "<html></html>");
        let store = SqliteStore::open_in_memory().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let opts = options(&site, day(1), Some(day(2)));
        let mut driver = Driver::new(&site, &stub, &store, checkpoint.clone(), opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stats.units_failed, 1);
        let saved = checkpoint.load().unwrap();
        assert!(!saved.is_complete(&day(1)));
        assert!(saved.is_complete(&day(2)));
    }

    #[tokio::test]
    async fn test_filtered_out_listing_is_suspicious() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let listing = r#"<a href="/category/india/">India</a><a href="/about/">About</a>"#;
        let stub = StubFetcher::new().with_page(&archive_url(1), 200, listing);
        let store = SqliteStore::open_in_memory().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let opts = options(&site, day(1), Some(day(1)));
        let mut driver = Driver::new(&site, &stub, &store, checkpoint.clone(), opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stats.suspicious_empty_units, 1);
        assert_eq!(stats.empty_units, 1);
        assert!(checkpoint.load().unwrap().is_complete(&day(1)));
    }

    fn publictv_page(n: u32) -> String {
        match n {
            1 => "https://publictv.in/category/states/karnataka/".to_string(),
            n => format!("https://publictv.in/category/states/karnataka/page/{n}/"),
        }
    }

    #[tokio::test]
    async fn test_empty_streak_stops_after_three_units() {
        let site = site("publictv");
        let dir = TempDir::new().unwrap();
        let stub = (1..=5).fold(StubFetcher::new(), |stub, n| {
            stub.with_page(&publictv_page(n), 200, "<html><body><p>Nothing here</p></body></html>")
        });
        let store = SqliteStore::open_in_memory().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let opts = CrawlOptions {
            start: None,
            ..options(&site, ArchiveUnit::Page(1), None)
        };
        let mut driver = Driver::new(&site, &stub, &store, checkpoint, opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stub.requests(), (1..=3).map(publictv_page).collect::<Vec<_>>());
        assert_eq!(stats.empty_units, 3);
        assert_eq!(driver.state(), DriverState::Done);
    }

    #[tokio::test]
    async fn test_paged_crawl_resumes_after_last_page_and_stops_on_404() {
        let site = site("publictv");
        let dir = TempDir::new().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let mut state = CheckpointState::default();
        state.mark_complete(&ArchiveUnit::Page(1));
        state.mark_complete(&ArchiveUnit::Page(2));
        checkpoint.save(&state).unwrap();

        let stub = StubFetcher::new();
        let store = SqliteStore::open_in_memory().unwrap();
        let opts = CrawlOptions {
            start: None,
            ..options(&site, ArchiveUnit::Page(1), None)
        };
        let mut driver = Driver::new(&site, &stub, &store, checkpoint, opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stub.requests(), vec![publictv_page(3)]);
        assert_eq!(stats.units_completed, 0);
    }

    #[tokio::test]
    async fn test_date_crawl_without_start_resumes_after_last_day() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let mut state = CheckpointState::default();
        for d in 1..=10 {
            state.mark_complete(&day(d));
        }
        checkpoint.save(&state).unwrap();

        let stub = StubFetcher::new()
            .with_page(&archive_url(11), 200, "<html><body></body></html>")
            .with_page(&archive_url(12), 200, "<html><body></body></html>");
        let store = SqliteStore::open_in_memory().unwrap();
        let opts = CrawlOptions {
            start: None,
            ..options(&site, day(1), Some(day(12)))
        };
        let mut driver = Driver::new(&site, &stub, &store, checkpoint.clone(), opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stub.requests(), vec![archive_url(11), archive_url(12)]);
        assert_eq!(stats.units_completed, 2);
        let saved = checkpoint.load().unwrap();
        assert!(saved.is_complete(&day(11)));
        assert!(saved.is_complete(&day(12)));
    }

    #[tokio::test]
    async fn test_fresh_crawl_refetches_completed_units() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let mut state = CheckpointState::default();
        state.mark_complete(&day(1));
        state.mark_complete(&day(2));
        checkpoint.save(&state).unwrap();

        let stub = StubFetcher::new()
            .with_page(&archive_url(1), 200, "<html><body></body></html>")
            .with_page(&archive_url(2), 200, "<html><body></body></html>");
        let store = SqliteStore::open_in_memory().unwrap();
        let opts = CrawlOptions {
            fresh: true,
            ..options(&site, day(1), Some(day(2)))
        };
        let mut driver = Driver::new(&site, &stub, &store, checkpoint, opts);
        let stats = driver.run().await.unwrap();

        assert_eq!(stub.requests(), vec![archive_url(1), archive_url(2)]);
        assert_eq!(stats.units_skipped, 0);
        assert_eq!(stats.units_completed, 2);
    }

    /// Answers every dedup query with an error.
    struct UnavailableStore;

    impl ArticleStore for UnavailableStore {
        fn existing_urls(&self, _urls: &[String]) -> Result<HashSet<String>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("database is unavailable")))
        }

        fn insert_article(&self, _record: &ArticleRecord) -> Result<InsertOutcome, StoreError> {
            Err(StoreError::Io(std::io::Error::other("database is unavailable")))
        }
    }

    #[tokio::test]
    async fn test_store_failure_ends_run_and_leaves_unit_incomplete() {
        let site = site("indian_express");
        let dir = TempDir::new().unwrap();
        let stub = StubFetcher::new().with_page(&archive_url(1), 200, LISTING);
        let checkpoint = CheckpointStore::for_site(dir.path(), site.name());
        let opts = options(&site, day(1), Some(day(2)));
        let mut driver = Driver::new(&site, &stub, UnavailableStore, checkpoint.clone(), opts);

        let result = driver.run().await;

        assert!(matches!(result, Err(PipelineError::Store(_))));
        assert_eq!(stub.requests(), vec![archive_url(1)]);
        assert_eq!(stub.request_count(FOO), 0);
        assert!(!checkpoint.load().unwrap().is_complete(&day(1)));
    }

    #[test]
    fn test_options_from_site_defaults() {
        let paged = CrawlOptions::from_site(&site("publictv"));
        assert_eq!(paged.max_empty_streak, Some(3));
        assert_eq!(paged.workers, 5);
        assert_eq!(paged.end, None);
        let dated = CrawlOptions::from_site(&site("indian_express"));
        assert_eq!(dated.max_empty_streak, None);
        assert_eq!(dated.start, None);
        assert_eq!(
            dated.end,
            Some(ArchiveUnit::Date(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()))
        );
        assert!(!dated.fresh);
    }
}
