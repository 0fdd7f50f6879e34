//! Embedded JSON-LD (`<script type="application/ld+json">`).

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

static LD_JSON: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

const ARTICLE_TYPES: &[&str] = &[
    "NewsArticle",
    "Article",
    "ReportageNewsArticle",
    "BlogPosting",
    "WebPage",
];

/// Article fields recovered from structured data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredArticle {
    pub body: Option<String>,
    pub headline: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
    pub modified: Option<String>,
    pub section: Option<String>,
    pub keywords: Vec<String>,
}

impl StructuredArticle {
    fn merge(&mut self, other: StructuredArticle) {
        self.body = self.body.take().or(other.body);
        self.headline = self.headline.take().or(other.headline);
        self.author = self.author.take().or(other.author);
        self.published = self.published.take().or(other.published);
        self.modified = self.modified.take().or(other.modified);
        self.section = self.section.take().or(other.section);
        if self.keywords.is_empty() {
            self.keywords = other.keywords;
        }
    }
}

/// Collect article fields from every JSON-LD block on the page. Earlier
/// blocks win; malformed blocks are skipped.
pub fn structured_article(document: &Html) -> StructuredArticle {
    let mut found = StructuredArticle::default();
    for script in document.select(&LD_JSON) {
        let raw = script.text().collect::<String>();
        let value: Value = match serde_json::from_str(raw.trim()) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "skipping malformed JSON-LD block");
                continue;
            }
        };
        for node in article_nodes(&value) {
            found.merge(from_node(node));
        }
    }
    found
}

/// Article-like objects in a block: the block itself, array members, or
/// `@graph` members. Untyped objects are accepted.
fn article_nodes(value: &Value) -> Vec<&Value> {
    let candidates: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("@graph") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![value],
        },
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .filter(|node| node.is_object() && is_article_type(node.get("@type")))
        .collect()
}

fn is_article_type(ty: Option<&Value>) -> bool {
    match ty {
        None => true,
        Some(Value::String(s)) => ARTICLE_TYPES.contains(&s.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|s| ARTICLE_TYPES.contains(&s)),
        Some(_) => false,
    }
}

fn from_node(node: &Value) -> StructuredArticle {
    StructuredArticle {
        body: string_field(node, "articleBody"),
        headline: string_field(node, "headline"),
        author: node.get("author").and_then(person_names),
        published: string_field(node, "datePublished"),
        modified: string_field(node, "dateModified"),
        section: string_field(node, "articleSection"),
        keywords: node.get("keywords").map(keyword_list).unwrap_or_default(),
    }
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    match node.get(key)? {
        Value::String(s) => non_empty(s),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().and_then(non_empty)),
        _ => None,
    }
}

/// `author` as a string, a `{name}` object, or a list of either.
fn person_names(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Object(map) => map.get("name").and_then(Value::as_str).and_then(non_empty),
        Value::Array(items) => {
            let names = items.iter().filter_map(person_names).collect::<Vec<_>>();
            (!names.is_empty()).then(|| names.join(", "))
        }
        _ => None,
    }
}

fn keyword_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s.split(',').filter_map(non_empty).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(non_empty)
            .collect(),
        _ => Vec::new(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
