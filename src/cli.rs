//! Command-line interface definitions.
//!
//! Paths and the translation endpoint can also come from environment variables.

use crate::utils::DelayRange;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Crawl news archives into a local article store.
///
/// # Examples
///
/// ```sh
/// # Crawl one built-in site for the first week of May
/// news_archiver crawl indian_express --start 2024-05-01 --end 2024-05-07
///
/// # Crawl a paged site described by a custom descriptor
/// news_archiver crawl --site-file ./sites/mysite.yaml
///
/// # Translate stored Tamil articles to English
/// news_archiver translate DINAMALAR --endpoint http://localhost:8000/translate --src ta --tgt en
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database holding articles and translations
    #[arg(long, global = true, env = "NEWS_DB", default_value = "data/articles.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl one site's archive
    Crawl(CrawlArgs),
    /// Translate stored articles of one media name
    Translate(TranslateArgs),
    /// List the built-in sites
    Sites,
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Built-in site name (see `sites`)
    #[arg(required_unless_present = "site_file", conflicts_with = "site_file")]
    pub site: Option<String>,

    /// Site descriptor YAML file
    #[arg(long)]
    pub site_file: Option<PathBuf>,

    /// First unit: YYYY-MM-DD for date archives, a page number for paged ones
    #[arg(long)]
    pub start: Option<String>,

    /// Last unit, inclusive
    #[arg(long)]
    pub end: Option<String>,

    /// Directory holding one checkpoint folder per site
    #[arg(long, env = "NEWS_CHECKPOINT_DIR", default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Concurrent article workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Delay between archive units, in milliseconds (`min-max` or a single value)
    #[arg(long)]
    pub unit_delay: Option<DelayRange>,

    /// Delay after each article insert, in milliseconds (`min-max` or a single value)
    #[arg(long)]
    pub article_delay: Option<DelayRange>,

    /// Stop after this many empty units in a row (0 disables)
    #[arg(long)]
    pub max_empty_streak: Option<u32>,

    /// Ignore the saved checkpoint and revisit every unit in range
    #[arg(long)]
    pub fresh: bool,
}

#[derive(Args, Debug)]
pub struct TranslateArgs {
    /// Media name of the stored articles, e.g. "DINAMALAR"
    pub media_name: String,

    /// Translation service endpoint
    #[arg(long, env = "TRANSLATE_ENDPOINT")]
    pub endpoint: String,

    /// Source language code
    #[arg(long, default_value = "ta")]
    pub src: String,

    /// Target language code
    #[arg(long, default_value = "en")]
    pub tgt: String,

    /// Articles per translation request
    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    /// Stop after this many articles
    #[arg(long)]
    pub limit: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_builtin_site() {
        let cli = Cli::parse_from([
            "news_archiver",
            "crawl",
            "indian_express",
            "--start",
            "2024-05-01",
            "--end",
            "2024-05-07",
            "-w",
            "3",
            "--unit-delay",
            "0",
        ]);
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.site.as_deref(), Some("indian_express"));
        assert_eq!(args.start.as_deref(), Some("2024-05-01"));
        assert_eq!(args.workers, Some(3));
        assert_eq!(args.unit_delay, Some(DelayRange::none()));
        assert!(!args.fresh);
        assert_eq!(cli.db, PathBuf::from("data/articles.db"));
    }

    #[test]
    fn test_crawl_fresh_flag() {
        let cli = Cli::parse_from(["news_archiver", "crawl", "jagran", "--fresh"]);
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert!(args.fresh);
        assert_eq!(args.site.as_deref(), Some("jagran"));
    }

    #[test]
    fn test_crawl_site_file_and_global_db() {
        let cli = Cli::parse_from([
            "news_archiver",
            "crawl",
            "--site-file",
            "sites/custom.yaml",
            "--db",
            "/tmp/news.db",
            "--max-empty-streak",
            "5",
        ]);
        assert_eq!(cli.db, PathBuf::from("/tmp/news.db"));
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert!(args.site.is_none());
        assert_eq!(args.site_file, Some(PathBuf::from("sites/custom.yaml")));
        assert_eq!(args.max_empty_streak, Some(5));
    }

    #[test]
    fn test_crawl_requires_a_site() {
        assert!(Cli::try_parse_from(["news_archiver", "crawl"]).is_err());
        let both = ["news_archiver", "crawl", "publictv", "--site-file", "x.yaml"];
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn test_translate_args() {
        let cli = Cli::parse_from([
            "news_archiver",
            "translate",
            "DINAMALAR",
            "--endpoint",
            "http://localhost:8000/translate",
            "--batch-size",
            "4",
        ]);
        let Command::Translate(args) = cli.command else {
            panic!("expected translate");
        };
        assert_eq!(args.media_name, "DINAMALAR");
        assert_eq!(args.src, "ta");
        assert_eq!(args.tgt, "en");
        assert_eq!(args.batch_size, 4);
    }

    #[test]
    fn test_sites_subcommand() {
        let cli = Cli::parse_from(["news_archiver", "sites"]);
        assert!(matches!(cli.command, Command::Sites));
    }
}
