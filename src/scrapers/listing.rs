//! Archive listing pages.
//!
//! A listing is fetched for one archive unit and reduced to the article links
//! on it, in discovery order with exact duplicates removed. The caller never
//! sees an error: transport failures become [`Listing::Failed`] and non-200
//! responses an empty list, except a 404 on a site whose pagination ends that
//! way, which is [`Listing::EndOfArchive`].

use crate::archive::ArchiveUnit;
use crate::config::{ListingFormat, Site};
use crate::fetch::{FetchRequest, Fetcher};
use crate::models::CandidateLink;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Result of reading one archive unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    /// Candidate links, plus how many raw anchors or items the page carried
    /// before filtering.
    Links {
        links: Vec<CandidateLink>,
        anchors_seen: usize,
    },
    /// The archive has no more units.
    EndOfArchive,
    /// The listing could not be read this run.
    Failed(String),
}

impl Listing {
    fn empty() -> Self {
        Listing::Links {
            links: Vec::new(),
            anchors_seen: 0,
        }
    }
}

/// Fetches and parses listing pages for one site.
#[derive(Debug, Clone, Copy)]
pub struct ListingParser<'a> {
    site: &'a Site,
}

impl<'a> ListingParser<'a> {
    pub fn new(site: &'a Site) -> Self {
        Self { site }
    }

    pub fn unit_url(&self, unit: &ArchiveUnit) -> String {
        self.site.config.archive.scheme.unit_url(self.site.base_str(), unit)
    }

    #[instrument(level = "info", skip_all, fields(site = %self.site.name(), unit = %unit))]
    pub async fn fetch<F: Fetcher>(&self, fetcher: &F, unit: &ArchiveUnit) -> Listing {
        let url = self.unit_url(unit);
        let req = FetchRequest::new(&url)
            .with_referer(self.site.referer())
            .with_accept_language(self.site.accept_language())
            .with_bearer_token(self.site.bearer_token.as_deref());

        let response = match fetcher.get(&req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "listing request failed");
                return Listing::Failed(e.to_string());
            }
        };

        if response.status == 404 && self.site.config.archive.end_on_not_found {
            debug!(%url, "listing returned 404; end of archive");
            return Listing::EndOfArchive;
        }
        if !response.is_ok() {
            warn!(
                %url,
                status = response.status,
                "listing returned non-200; treating unit as empty"
            );
            return Listing::empty();
        }

        self.parse(&response.body, &unit.key())
    }

    /// Parse a listing body according to the site's listing format.
    pub fn parse(&self, body: &str, unit_key: &str) -> Listing {
        match &self.site.config.listing {
            ListingFormat::Html => self.parse_html(body, unit_key),
            ListingFormat::Json {
                id_field,
                slug_field,
                link_template,
            } => self.parse_json(body, unit_key, id_field, slug_field, link_template),
        }
    }

    fn parse_html(&self, html: &str, unit_key: &str) -> Listing {
        let document = Html::parse_document(html);
        let mut anchors_seen = 0usize;

        let links = document
            .select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .inspect(|_| anchors_seen += 1)
            .filter_map(|href| normalize_link(&self.site.base, href))
            .filter(|url| self.accept(url))
            .map(String::from)
            .unique()
            .map(|url| self.candidate(url, unit_key))
            .collect::<Vec<_>>();

        debug!(anchors_seen, links = links.len(), "parsed HTML listing");
        Listing::Links { links, anchors_seen }
    }

    fn parse_json(
        &self,
        body: &str,
        unit_key: &str,
        id_field: &str,
        slug_field: &str,
        link_template: &str,
    ) -> Listing {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "listing is not valid JSON");
                return Listing::Failed(format!("invalid JSON listing: {e}"));
            }
        };
        let Some(items) = value.as_array() else {
            debug!("JSON listing is not an array; treating unit as empty");
            return Listing::empty();
        };

        let links = items
            .iter()
            .filter_map(|item| {
                let id = scalar_text(item.get(id_field)?)?;
                let slug = scalar_text(item.get(slug_field)?)?;
                Some(
                    link_template
                        .replace("{base}", self.site.base_str())
                        .replace("{slug}", &slug)
                        .replace("{id}", &id),
                )
            })
            .unique()
            .map(|url| self.candidate(url, unit_key))
            .collect::<Vec<_>>();

        debug!(items = items.len(), links = links.len(), "parsed JSON listing");
        Listing::Links {
            links,
            anchors_seen: items.len(),
        }
    }

    fn candidate(&self, url: String, unit_key: &str) -> CandidateLink {
        CandidateLink {
            source_name: self.site.name().to_string(),
            url,
            unit_key: unit_key.to_string(),
        }
    }

    /// Whether an absolute, query-stripped URL is an article link for this site.
    pub fn accept(&self, url: &Url) -> bool {
        let rules = &self.site.config.links;
        if rules.same_site && !same_site(&self.site.base, url) {
            return false;
        }
        let text = url.as_str();
        if rules.exclude_substrings.iter().any(|s| text.contains(s.as_str())) {
            return false;
        }
        if !rules.require_substrings.is_empty()
            && !rules.require_substrings.iter().any(|s| text.contains(s.as_str()))
        {
            return false;
        }
        if !rules.include_keywords.is_empty()
            && !rules.include_keywords.iter().any(|k| text.contains(k.as_str()))
        {
            return false;
        }
        self.site
            .link_pattern
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(text))
    }
}

/// Resolve `href` against `base`, keep only http(s), drop query and fragment,
/// and drop links to the site root.
pub fn normalize_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    if url.path().is_empty() || url.path() == "/" {
        return None;
    }
    Some(url)
}

fn same_site(base: &Url, url: &Url) -> bool {
    let (Some(base_host), Some(host)) = (base.host_str(), url.host_str()) else {
        return false;
    };
    let bare = base_host.strip_prefix("www.").unwrap_or(base_host);
    host == base_host || host == bare || host.ends_with(&format!(".{bare}"))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
