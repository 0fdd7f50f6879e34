//! Article extraction.
//!
//! [`ArticleExtractor::extract`] fetches one article page and always returns
//! an [`ArticleRecord`]; failures come back as `success == false` with the
//! reason in `error`. The HTML itself is handled by [`ArticleParser`], which
//! runs the fallback chain for the body text:
//!
//! 1. the first site container with visible text,
//! 2. paragraphs inside it, skipping noise subtrees, short fragments and boilerplate,
//! 3. line-based text from the container and then the page, when still short,
//! 4. an optional `og:description` lead,
//! 5. JSON-LD `articleBody`,
//! 6. every long paragraph on the page.
//!
//! Metadata fields follow their own chain: site rules, generic meta tags, page
//! heuristics, JSON-LD, and for the published date, the archive unit's date.

use super::jsonld::{self, StructuredArticle};
use super::text::{self, Boilerplate, LineFilter, NoiseFilter};
use crate::archive::ArchiveUnit;
use crate::config::{ContainerMatcher, FieldRule, Site};
use crate::error::ExtractError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::models::{ArticleRecord, word_count};
use crate::utils::{collapse_whitespace, normalize_date};
use chrono::Utc;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static OG_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[property='og:description']").unwrap());

/// Fetches article pages and turns them into records.
#[derive(Debug)]
pub struct ArticleExtractor<'a, F> {
    fetcher: &'a F,
    parser: ArticleParser<'a>,
}

impl<'a, F: Fetcher> ArticleExtractor<'a, F> {
    pub fn new(site: &'a Site, fetcher: &'a F) -> Self {
        Self {
            fetcher,
            parser: ArticleParser::new(site),
        }
    }

    /// Fetch and extract one article. Never fails: transport errors, non-200
    /// statuses and unusable pages produce a record with `success == false`.
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn extract(&self, url: &str, unit: Option<&ArchiveUnit>) -> ArticleRecord {
        let site = self.parser.site;
        let req = FetchRequest::new(url)
            .with_referer(site.referer())
            .with_accept_language(site.accept_language());

        let outcome = match self.fetcher.get(&req).await {
            Err(e) => Err(ExtractError::from(e)),
            Ok(resp) if !resp.is_ok() => Err(ExtractError::HttpStatus(resp.status)),
            Ok(resp) => self.parser.parse(url, &resp.body, unit),
        };

        let mut record = match outcome {
            Ok(record) => record,
            Err(e) => {
                warn!(%url, error = %e, "article extraction failed");
                ArticleRecord::failed(url, site.media_name(), e.to_string())
            }
        };
        record.unit_key = unit.map(ArchiveUnit::key);
        record.scraped_at = Some(Utc::now());
        record
    }
}

/// Pure HTML-to-record extraction for one site.
#[derive(Debug)]
pub struct ArticleParser<'a> {
    site: &'a Site,
    noise: NoiseFilter,
    boilerplate: Boilerplate,
}

impl<'a> ArticleParser<'a> {
    pub fn new(site: &'a Site) -> Self {
        let extract = &site.config.extract;
        Self {
            site,
            noise: NoiseFilter::new(&extract.noise_tags, &extract.noise_class_keywords),
            boilerplate: Boilerplate::new(&extract.boilerplate_phrases),
        }
    }

    /// Extract a record from an article page. Fails with
    /// [`ExtractError::Parse`] only when neither text nor a title was found;
    /// a titled page without text is returned with a zero word count.
    pub fn parse(
        &self,
        url: &str,
        html: &str,
        unit: Option<&ArchiveUnit>,
    ) -> Result<ArticleRecord, ExtractError> {
        let document = Html::parse_document(html);
        let page_text = text::page_lines(&document);
        let structured = jsonld::structured_article(&document);
        let mut record = ArticleRecord::new(url, self.site.media_name());

        self.fill_metadata(&document, &page_text, url, &mut record);
        let body = self.body_text(&document, &page_text, record.title.as_deref(), url, &structured);
        record.set_text(body);
        self.fill_from_structured(&mut record, structured);

        record.published_date = record.published_date.as_deref().map(normalize_date);
        record.modified_date = record.modified_date.as_deref().map(normalize_date);
        if record.published_date.is_none() {
            record.published_date = unit
                .and_then(ArchiveUnit::as_date)
                .map(|d| d.format("%Y-%m-%d").to_string());
        }

        if record.article_text.is_empty() && record.title.is_none() {
            return Err(ExtractError::Parse);
        }
        debug!(words = record.word_count, title = ?record.title, "extracted article");
        Ok(record)
    }

    fn body_text(
        &self,
        document: &Html,
        page_text: &str,
        title: Option<&str>,
        url: &str,
        structured: &StructuredArticle,
    ) -> String {
        let extract = &self.site.config.extract;
        let container = self.find_container(document, url);

        let mut parts = container
            .map(|c| {
                text::paragraphs(
                    c,
                    &self.site.paragraph_selector,
                    &self.noise,
                    extract.min_paragraph_chars,
                    &self.boilerplate,
                )
            })
            .unwrap_or_default();

        if extract.line_fallback && words(&parts) < extract.min_words {
            let markers = [&extract.text_start_marker, &extract.metadata.published_marker]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect();
            let filter = LineFilter {
                title,
                markers,
                boilerplate: &self.boilerplate,
                min_words: extract.min_line_words,
            };
            if let Some(c) = container {
                filter.extend(&mut parts, &text::visible_lines(c, &self.noise));
            }
            if words(&parts) < extract.min_words {
                let segment = text::between_markers(
                    page_text,
                    extract.text_start_marker.as_deref(),
                    extract.text_end_marker.as_deref(),
                );
                filter.extend(&mut parts, segment);
            }
        }

        if extract.description_lead {
            self.prepend_description(document, &mut parts);
        }

        let mut body = parts.join("\n\n");

        if word_count(&body) < extract.structured_data_below_words {
            if let Some(article_body) = &structured.body {
                debug!("using JSON-LD articleBody");
                body = article_body.trim().to_string();
            }
        }

        if body.trim().is_empty() {
            body = document
                .select(&PARAGRAPH)
                .map(|p| collapse_whitespace(&p.text().collect::<String>()))
                .filter(|t| t.chars().count() > extract.final_paragraph_min_chars)
                .unique()
                .join("\n\n");
        }
        body
    }

    /// The first container rule that matches an element with enough visible text.
    fn find_container<'d>(&self, document: &'d Html, url: &str) -> Option<ElementRef<'d>> {
        for rule in &self.site.containers {
            let found = match &rule.matcher {
                ContainerMatcher::Css(selector) => {
                    self.first_with_text(document.select(selector), rule.min_chars)
                }
                ContainerMatcher::ArticleIdCss(template) => {
                    let Some(id) = self.site.article_id(url) else {
                        continue;
                    };
                    let css = template.replace("{article_id}", &id);
                    match Selector::parse(&css) {
                        Ok(selector) => {
                            self.first_with_text(document.select(&selector), rule.min_chars)
                        }
                        Err(e) => {
                            debug!(%css, error = ?e, "skipping container rule");
                            continue;
                        }
                    }
                }
                ContainerMatcher::Pattern { tag, class, id } => {
                    let candidates = document.select(tag).filter(|el| {
                        let attr_matches = |name: &str, re: &Option<regex::Regex>| {
                            re.as_ref().is_none_or(|re| {
                                el.value().attr(name).is_some_and(|v| re.is_match(v))
                            })
                        };
                        attr_matches("class", class) && attr_matches("id", id)
                    });
                    self.first_with_text(candidates, rule.min_chars)
                }
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn first_with_text<'d>(
        &self,
        mut candidates: impl Iterator<Item = ElementRef<'d>>,
        min_chars: usize,
    ) -> Option<ElementRef<'d>> {
        candidates.find(|el| {
            !self.noise.is_noise(*el)
                && text::visible_text(*el, &self.noise).chars().count() >= min_chars
        })
    }

    fn prepend_description(&self, document: &Html, parts: &mut Vec<String>) {
        let Some(desc) = document
            .select(&OG_DESCRIPTION)
            .find_map(|m| m.value().attr("content"))
            .map(collapse_whitespace)
        else {
            return;
        };
        let short = parts.is_empty() || words(parts) < self.site.config.extract.min_words;
        if word_count(&desc) > 3 && short && !parts.contains(&desc) {
            parts.insert(0, desc);
        }
    }

    fn fill_metadata(
        &self,
        document: &Html,
        page_text: &str,
        url: &str,
        record: &mut ArticleRecord,
    ) {
        let rules = &self.site.metadata;
        let meta = &self.site.config.extract.metadata;

        record.title = first_value(document, &rules.title)
            .or_else(|| {
                document
                    .select(&TITLE)
                    .next()
                    .map(|t| collapse_whitespace(&t.text().collect::<String>()))
            })
            .map(|t| rules.title_suffix.replace(&t, "").trim().to_string())
            .filter(|t| !t.is_empty());

        record.author = match &meta.fixed_author {
            Some(fixed) => Some(fixed.clone()),
            None => first_value(document, &rules.author)
                .map(|a| rules.author_prefix.replace(&a, "").trim().to_string())
                .filter(|a| !a.is_empty()),
        };

        record.published_date = first_value(document, &rules.published).or_else(|| {
            let marker = meta.published_marker.as_deref()?;
            page_text
                .lines()
                .map(str::trim)
                .find_map(|line| strip_prefix_ignore_case(line, marker))
                .map(|rest| rest.trim().to_string())
                .filter(|rest| !rest.is_empty())
        });
        record.modified_date = first_value(document, &rules.modified);

        record.section = first_value(document, &rules.section).or_else(|| {
            let index = meta.section_path_segment?;
            let parsed = Url::parse(url).ok()?;
            let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).nth(index)?;
            Some(segment.to_string())
        });

        record.tags = rules
            .tags
            .iter()
            .map(|rule| {
                rule_values(document, rule)
                    .iter()
                    .flat_map(|v| v.split(','))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .unique()
                    .collect::<Vec<_>>()
            })
            .find(|tags| !tags.is_empty())
            .unwrap_or_default();
    }

    fn fill_from_structured(&self, record: &mut ArticleRecord, structured: StructuredArticle) {
        if record.title.is_none() {
            record.title = structured.headline;
        }
        if record.author.is_none() {
            record.author = structured
                .author
                .map(|a| self.site.metadata.author_prefix.replace(&a, "").trim().to_string());
        }
        if record.published_date.is_none() {
            record.published_date = structured.published;
        }
        if record.modified_date.is_none() {
            record.modified_date = structured.modified;
        }
        if record.section.is_none() {
            record.section = structured.section;
        }
        if record.tags.is_empty() {
            record.tags = structured.keywords;
        }
    }
}

fn words(parts: &[String]) -> usize {
    parts.iter().map(|p| word_count(p)).sum()
}

fn strip_prefix_ignore_case<'t>(line: &'t str, prefix: &str) -> Option<&'t str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

/// Values of one rule: every match when `all` is set, otherwise the first
/// non-empty one.
fn rule_values(document: &Html, rule: &FieldRule) -> Vec<String> {
    let values = document.select(&rule.selector).filter_map(|el| {
        let value = match &rule.attr {
            Some(attr) => el.value().attr(attr).map(collapse_whitespace),
            None => Some(collapse_whitespace(&el.text().collect::<String>())),
        };
        value.filter(|v| !v.is_empty())
    });
    if rule.all {
        values.unique().collect()
    } else {
        values.take(1).collect()
    }
}

fn first_value(document: &Html, rules: &[FieldRule]) -> Option<String> {
    rules
        .iter()
        .map(|rule| rule_values(document, rule))
        .find(|values| !values.is_empty())
        .map(|values| values.join(", "))
}
