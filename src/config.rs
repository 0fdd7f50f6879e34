//! Site descriptors.
//!
//! Every supported news site is described by a YAML document: how its archive
//! is addressed, which links on a listing page are articles, and how article
//! text and metadata are pulled out of its HTML. The crawl pipeline itself has
//! no per-site branches; adding a site means adding a descriptor.
//!
//! Descriptors are deserialized into [`SiteConfig`] and then compiled into a
//! [`Site`], which holds the parsed CSS selectors and regexes. Compilation is
//! where a malformed descriptor is rejected, so a crawl never discovers a bad
//! selector halfway through an archive.
//!
//! # Built-in sites
//!
//! | Name | Archive | Listing |
//! |------|---------|---------|
//! | `indian_express` | date path | HTML, `/article/` links |
//! | `economic_times` | date + day counter | HTML, keyword links |
//! | `news18` | date path | HTML, regex with numeric id |
//! | `dinamalar` | date with month name | HTML, regex with numeric id |
//! | `publictv` | page number | HTML, slug regex, 404 ends pagination |
//! | `jagran` | page number | JSON API item list |

use crate::archive::ArchiveUnit;
use crate::error::ConfigError;
use crate::utils::DelayRange;
use chrono::NaiveDate;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, instrument};
use url::Url;

const BUILTIN_SITES: &[(&str, &str)] = &[
    ("indian_express", include_str!("../sites/indian_express.yaml")),
    ("economic_times", include_str!("../sites/economic_times.yaml")),
    ("news18", include_str!("../sites/news18.yaml")),
    ("dinamalar", include_str!("../sites/dinamalar.yaml")),
    ("publictv", include_str!("../sites/publictv.yaml")),
    ("jagran", include_str!("../sites/jagran.yaml")),
];

/// Names of the descriptors compiled into the binary.
pub fn builtin_site_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_SITES.iter().map(|(name, _)| *name)
}

/// A site descriptor as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Short identifier, also used for the checkpoint directory.
    pub name: String,
    /// Value stored in `media_name` on every article from this site.
    pub media_name: String,
    pub base_url: String,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub links: LinkFilterConfig,
    #[serde(default)]
    pub listing: ListingFormat,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub crawl: CrawlDefaults,
}

/// How archive units map to listing URLs, and when the sequence ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(flatten)]
    pub scheme: ArchiveScheme,
    /// First unit of the archive (`YYYY-MM-DD` or a page number), used when
    /// neither the command line nor the checkpoint says where to begin.
    #[serde(default)]
    pub start: Option<String>,
    /// Last unit of the archive, inclusive, unless the command line overrides it.
    #[serde(default)]
    pub end: Option<String>,
    /// Treat a 404 on a listing page as the end of the archive.
    #[serde(default)]
    pub end_on_not_found: bool,
    /// Stop after this many consecutive units without links.
    #[serde(default)]
    pub max_empty_streak: Option<u32>,
}

/// URL template placeholders: `{base}` everywhere; `{yyyy} {mm} {m} {dd} {d}
/// {Mon} {counter}` for dates; `{n}` for pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveScheme {
    Date {
        url: String,
        #[serde(default)]
        counter: Option<DayCounter>,
    },
    Page {
        url: String,
        /// URL used for page 1 when it differs from the template.
        #[serde(default)]
        first_page_url: Option<String>,
    },
}

/// `{counter}` = `offset` + days elapsed since `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounter {
    pub epoch: NaiveDate,
    pub offset: i64,
}

/// Rules deciding which anchors on a listing page are article links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkFilterConfig {
    /// At least one must appear in the URL.
    pub require_substrings: Vec<String>,
    /// At least one must appear in the URL.
    pub include_keywords: Vec<String>,
    /// None may appear in the URL.
    pub exclude_substrings: Vec<String>,
    /// Regex the absolute URL must match.
    pub pattern: Option<String>,
    /// Only keep links on the site's own host (or a subdomain of it).
    pub same_site: bool,
}

impl Default for LinkFilterConfig {
    fn default() -> Self {
        Self {
            require_substrings: Vec::new(),
            include_keywords: Vec::new(),
            exclude_substrings: Vec::new(),
            pattern: None,
            same_site: true,
        }
    }
}

/// Shape of the listing response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ListingFormat {
    #[default]
    Html,
    /// A JSON array of items; `link_template` takes `{base}`, `{slug}` and `{id}`.
    Json {
        id_field: String,
        slug_field: String,
        link_template: String,
    },
}

/// Article text extraction rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Regex with one capture group applied to the article URL; the capture
    /// fills `{article_id}` in container selectors.
    pub article_id_pattern: Option<String>,
    /// Candidate article containers, most specific first.
    pub containers: Vec<ContainerRuleConfig>,
    pub noise_tags: Vec<String>,
    pub noise_class_keywords: Vec<String>,
    pub paragraph_selector: String,
    /// Container paragraphs must be longer than this many characters.
    pub min_paragraph_chars: usize,
    pub boilerplate_phrases: Vec<String>,
    /// Below this many words the line-based fallback runs.
    pub min_words: usize,
    pub line_fallback: bool,
    pub min_line_words: usize,
    /// Page-text fallback starts after this marker when present.
    pub text_start_marker: Option<String>,
    /// Page-text fallback stops at this marker when present.
    pub text_end_marker: Option<String>,
    /// JSON-LD `articleBody` replaces text shorter than this many words.
    pub structured_data_below_words: usize,
    /// Whole-page fallback keeps paragraphs longer than this many characters.
    pub final_paragraph_min_chars: usize,
    /// Prepend `og:description` when the body is short.
    pub description_lead: bool,
    pub metadata: MetadataConfig,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            article_id_pattern: None,
            containers: vec![ContainerRuleConfig::css("article"), ContainerRuleConfig::css("main")],
            noise_tags: [
                "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript",
            ]
            .map(String::from)
            .to_vec(),
            noise_class_keywords: ["ad", "advertisement", "promo", "social", "share"]
                .map(String::from)
                .to_vec(),
            paragraph_selector: "p".to_string(),
            min_paragraph_chars: 10,
            boilerplate_phrases: [
                "advertisement",
                "also read",
                "read more",
                "subscribe",
                "follow us",
                "download app",
            ]
            .map(String::from)
            .to_vec(),
            min_words: 40,
            line_fallback: false,
            min_line_words: 3,
            text_start_marker: None,
            text_end_marker: None,
            structured_data_below_words: 1,
            final_paragraph_min_chars: 50,
            description_lead: false,
            metadata: MetadataConfig::default(),
        }
    }
}

/// One candidate container: either a CSS selector, or a tag whose class or id
/// matches a regex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerRuleConfig {
    pub css: Option<String>,
    pub tag: Option<String>,
    pub class_pattern: Option<String>,
    pub id_pattern: Option<String>,
    /// Skip matches whose visible text is shorter than this.
    pub min_chars: Option<usize>,
}

impl ContainerRuleConfig {
    pub fn css(selector: &str) -> Self {
        Self {
            css: Some(selector.to_string()),
            ..Self::default()
        }
    }
}

/// Per-field metadata rules. Site rules run first, then the generic meta tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub title: Vec<FieldRuleConfig>,
    pub author: Vec<FieldRuleConfig>,
    pub published: Vec<FieldRuleConfig>,
    pub modified: Vec<FieldRuleConfig>,
    pub section: Vec<FieldRuleConfig>,
    pub tags: Vec<FieldRuleConfig>,
    /// Stripped from the document `<title>`; defaults to the media name.
    pub title_suffix_pattern: Option<String>,
    pub author_prefix_pattern: Option<String>,
    pub fixed_author: Option<String>,
    /// A line starting with this marker carries the published date.
    pub published_marker: Option<String>,
    /// Zero-based URL path segment used as the section fallback.
    pub section_path_segment: Option<usize>,
}

/// `"css"` reads element text, `"css@attr"` reads an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRuleConfig {
    Short(String),
    Full {
        css: String,
        #[serde(default)]
        attr: Option<String>,
        #[serde(default)]
        all: bool,
    },
}

impl FieldRuleConfig {
    fn parts(&self) -> (String, Option<String>, bool) {
        match self {
            FieldRuleConfig::Full { css, attr, all } => (css.clone(), attr.clone(), *all),
            FieldRuleConfig::Short(spec) => match spec.rsplit_once('@') {
                Some((css, attr))
                    if !attr.is_empty()
                        && attr.chars().all(|c| c.is_ascii_alphanumeric() || "-_:".contains(c)) =>
                {
                    (css.to_string(), Some(attr.to_string()), false)
                }
                _ => (spec.clone(), None, false),
            },
        }
    }
}

/// Request headers that vary per site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub accept_language: String,
    /// Defaults to the base URL.
    pub referer: Option<String>,
    /// Environment variable holding a bearer token for listing requests.
    pub bearer_token_env: Option<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            accept_language: "en-US,en;q=0.5".to_string(),
            referer: None,
            bearer_token_env: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlDefaults {
    pub workers: usize,
    pub unit_delay: DelayRange,
    pub article_delay: DelayRange,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            workers: 5,
            unit_delay: DelayRange::new(1000, 2000),
            article_delay: DelayRange::new(500, 1500),
        }
    }
}

impl SiteConfig {
    /// Load one of the descriptors compiled into the binary.
    pub fn builtin(name: &str) -> Result<Self, ConfigError> {
        let (_, yaml) = BUILTIN_SITES
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| ConfigError::UnknownSite(name.to_string()))?;
        Self::from_yaml(yaml)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Validate the descriptor and parse every selector and regex in it.
    pub fn compile(self) -> Result<Site, ConfigError> {
        let base = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::BaseUrl(self.base_url.clone()))?;
        let archive = &self.archive;
        let extract = &self.extract;

        let range_bound = |value: &Option<String>| {
            value
                .as_deref()
                .map(|s| archive.scheme.parse_unit(s))
                .transpose()
        };
        let default_start = range_bound(&archive.start)?;
        let default_end = range_bound(&archive.end)?;

        let link_pattern = self.links.pattern.as_deref().map(compile_regex).transpose()?;
        let article_id_pattern = extract
            .article_id_pattern
            .as_deref()
            .map(compile_regex)
            .transpose()?;

        let containers = extract
            .containers
            .iter()
            .map(ContainerRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let paragraph_selector = compile_selector(&extract.paragraph_selector)?;

        let meta = &extract.metadata;
        let title_suffix = match meta.title_suffix_pattern.as_deref() {
            Some(pattern) => compile_regex(pattern)?,
            None => compile_regex(&format!(
                r"(?i)\s*[-|–]\s*{}.*$",
                regex::escape(&self.media_name)
            ))?,
        };
        let author_prefix = compile_regex(
            meta.author_prefix_pattern
                .as_deref()
                .unwrap_or(r"(?i)^(written by|by|author:)\s*"),
        )?;

        let metadata = MetadataRules {
            title: field_rules(&meta.title, &["meta[property='og:title']@content"])?,
            author: field_rules(&meta.author, &["meta[name='author']@content"])?,
            published: field_rules(
                &meta.published,
                &[
                    "meta[property='article:published_time']@content",
                    "meta[itemprop='datePublished']@content",
                ],
            )?,
            modified: field_rules(
                &meta.modified,
                &[
                    "meta[property='article:modified_time']@content",
                    "meta[itemprop='dateModified']@content",
                ],
            )?,
            section: field_rules(&meta.section, &["meta[property='article:section']@content"])?,
            tags: field_rules(
                &meta.tags,
                &["meta[name='keywords']@content", "meta[property='article:tag']@content"],
            )?,
            title_suffix,
            author_prefix,
        };

        let bearer_token = self
            .request
            .bearer_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.is_empty());

        debug!(site = %self.name, containers = containers.len(), "Compiled site descriptor");
        Ok(Site {
            base,
            default_start,
            default_end,
            link_pattern,
            article_id_pattern,
            containers,
            paragraph_selector,
            metadata,
            bearer_token,
            config: self,
        })
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_selector(css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::Selector(format!("{css} ({e:?})")))
}

fn field_rules(site: &[FieldRuleConfig], generic: &[&str]) -> Result<Vec<FieldRule>, ConfigError> {
    site.iter()
        .cloned()
        .chain(generic.iter().map(|s| FieldRuleConfig::Short(s.to_string())))
        .map(|rule| {
            let (css, attr, all) = rule.parts();
            Ok(FieldRule {
                selector: compile_selector(&css)?,
                attr,
                all,
            })
        })
        .collect()
}

/// A compiled site descriptor.
///
/// Built once by [`SiteConfig::compile`]; every selector and pattern is
/// already parsed, so extraction never fails on configuration.
#[derive(Debug)]
pub struct Site {
    /// The descriptor this site was compiled from.
    pub config: SiteConfig,
    /// Parsed `base_url`, the base for resolving relative links.
    pub base: Url,
    /// Parsed `archive.start`.
    pub default_start: Option<ArchiveUnit>,
    /// Parsed `archive.end`.
    pub default_end: Option<ArchiveUnit>,
    /// Links must match this to count as articles, when set.
    pub link_pattern: Option<Regex>,
    /// Captures the site's article id from a URL in group 1.
    pub article_id_pattern: Option<Regex>,
    /// Content container rules, tried in order.
    pub containers: Vec<ContainerRule>,
    /// Paragraphs inside a matched container.
    pub paragraph_selector: Selector,
    /// Site-specific metadata rules followed by the generic fallbacks.
    pub metadata: MetadataRules,
    /// Resolved from `request.bearer_token_env`; empty values are dropped.
    pub bearer_token: Option<String>,
}

impl Site {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn media_name(&self) -> &str {
        &self.config.media_name
    }

    pub fn referer(&self) -> &str {
        self.config
            .request
            .referer
            .as_deref()
            .unwrap_or(&self.config.base_url)
    }

    pub fn accept_language(&self) -> &str {
        &self.config.request.accept_language
    }

    /// The base URL without a trailing slash, for `{base}` substitution.
    pub fn base_str(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Article id captured from `url`, if the site defines a pattern for it.
    pub fn article_id(&self, url: &str) -> Option<String> {
        self.article_id_pattern
            .as_ref()?
            .captures(url)?
            .get(1)
            .map(|m| m.as_str().to_string())
    }
}

/// A compiled container rule.
#[derive(Debug)]
pub struct ContainerRule {
    pub matcher: ContainerMatcher,
    pub min_chars: usize,
}

#[derive(Debug)]
pub enum ContainerMatcher {
    Css(Selector),
    /// Selector text containing `{article_id}`, parsed per article.
    ArticleIdCss(String),
    Pattern {
        tag: Selector,
        class: Option<Regex>,
        id: Option<Regex>,
    },
}

impl ContainerRule {
    fn compile(rule: &ContainerRuleConfig) -> Result<Self, ConfigError> {
        let matcher = match (&rule.css, &rule.class_pattern, &rule.id_pattern) {
            (Some(css), _, _) if css.contains("{article_id}") => {
                ContainerMatcher::ArticleIdCss(css.clone())
            }
            (Some(css), _, _) => ContainerMatcher::Css(compile_selector(css)?),
            (None, class, id) => ContainerMatcher::Pattern {
                tag: compile_selector(rule.tag.as_deref().unwrap_or("*"))?,
                class: class.as_deref().map(compile_regex).transpose()?,
                id: id.as_deref().map(compile_regex).transpose()?,
            },
        };
        Ok(Self {
            matcher,
            min_chars: rule.min_chars.unwrap_or(1),
        })
    }
}

/// A compiled metadata field rule.
#[derive(Debug)]
pub struct FieldRule {
    pub selector: Selector,
    pub attr: Option<String>,
    /// Join every match instead of taking the first.
    pub all: bool,
}

#[derive(Debug)]
pub struct MetadataRules {
    pub title: Vec<FieldRule>,
    pub author: Vec<FieldRule>,
    pub published: Vec<FieldRule>,
    pub modified: Vec<FieldRule>,
    pub section: Vec<FieldRule>,
    pub tags: Vec<FieldRule>,
    pub title_suffix: Regex,
    pub author_prefix: Regex,
}
