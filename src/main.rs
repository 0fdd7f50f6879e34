//! # News Archiver
//!
//! Walks the date or page archives of news sites, extracts every new article
//! into a SQLite store, and can feed stored articles through a translation
//! service.
//!
//! ## Usage
//!
//! ```sh
//! news_archiver sites
//! news_archiver crawl indian_express --start 2024-05-01 --end 2024-05-31
//! news_archiver translate DINAMALAR --endpoint http://localhost:8000/translate
//! ```
//!
//! ## Architecture
//!
//! A crawl is a single control loop over archive units:
//! 1. **Listing**: fetch the unit's archive page and keep article links
//! 2. **Dedup**: drop links already stored, in one query
//! 3. **Extraction**: fetch and extract new articles, `workers` at a time
//! 4. **Checkpoint**: mark the unit complete once all of its articles are handled
//!
//! An interrupted crawl resumes from its checkpoint; the store's unique URL key
//! keeps reruns from duplicating articles.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod archive;
mod checkpoint;
mod cli;
mod config;
mod error;
mod fetch;
mod models;
mod pipeline;
mod scrapers;
mod storage;
mod translate;
mod utils;

use checkpoint::CheckpointStore;
use cli::{Cli, Command, CrawlArgs, TranslateArgs};
use config::{SiteConfig, builtin_site_names};
use fetch::{DEFAULT_TIMEOUT, HttpFetcher, RetryFetcher};
use pipeline::{CrawlOptions, Driver};
use storage::SqliteStore;
use translate::{HttpTranslator, TranslationJob, TranslationOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    let args = Cli::parse();
    info!(db = %args.db.display(), "news_archiver starting up");

    match args.command {
        Command::Sites => list_sites(),
        Command::Crawl(crawl_args) => crawl(&args.db, crawl_args).await?,
        Command::Translate(translate_args) => translate(&args.db, translate_args).await?,
    }

    info!(elapsed_secs = start_time.elapsed().as_secs_f64(), "Done");
    Ok(())
}

fn list_sites() {
    for name in builtin_site_names() {
        match SiteConfig::builtin(name) {
            Ok(site) => println!("{:<16} {:<20} {}", site.name, site.media_name, site.base_url),
            Err(e) => warn!(%name, error = %e, "Built-in site failed to load"),
        }
    }
}

#[instrument(level = "info", skip_all)]
async fn crawl(db: &Path, args: CrawlArgs) -> Result<(), Box<dyn Error>> {
    let config = match (&args.site_file, &args.site) {
        (Some(path), _) => SiteConfig::from_file(path)?,
        (None, Some(name)) => SiteConfig::builtin(name)?,
        (None, None) => return Err("a site name or --site-file is required".into()),
    };
    let site = config.compile()?;
    let scheme = &site.config.archive.scheme;

    let mut options = CrawlOptions::from_site(&site);
    options.start = args.start.as_deref().map(|s| scheme.parse_unit(s)).transpose()?;
    if let Some(end) = args.end.as_deref() {
        options.end = Some(scheme.parse_unit(end)?);
    }
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    if let Some(delay) = args.unit_delay {
        options.unit_delay = delay;
    }
    if let Some(delay) = args.article_delay {
        options.article_delay = delay;
    }
    if let Some(n) = args.max_empty_streak {
        options.max_empty_streak = (n > 0).then_some(n);
    }
    options.fresh = args.fresh;
    info!(
        site = %site.name(),
        workers = options.workers,
        max_empty_streak = ?options.max_empty_streak,
        fresh = options.fresh,
        "Crawl configured"
    );

    let store = SqliteStore::open(db)?;
    let fetcher = RetryFetcher::new(HttpFetcher::new(DEFAULT_TIMEOUT)?, 5, Duration::from_secs(1));
    let checkpoint = CheckpointStore::for_site(&args.checkpoint_dir, site.name());

    let mut driver = Driver::new(&site, fetcher, &store, checkpoint, options);
    let stats = driver.run().await?;
    info!(state = ?driver.state(), total_articles = store.article_count()?, "Store updated");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn translate(db: &Path, args: TranslateArgs) -> Result<(), Box<dyn Error>> {
    let store = SqliteStore::open(db)?;
    let translator = HttpTranslator::new(args.endpoint, Duration::from_secs(args.timeout_secs))?;
    let options = TranslationOptions {
        media_name: args.media_name,
        src_lang: args.src,
        tgt_lang: args.tgt,
        batch_size: args.batch_size,
        limit: args.limit,
    };

    let stats = TranslationJob::new(&translator, &store, options).run().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
