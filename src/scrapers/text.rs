//! Visible-text helpers shared by the article extractor.
//!
//! Noise subtrees are skipped while walking the DOM rather than removed from
//! it, so the parsed document stays immutable and shareable.

use crate::utils::collapse_whitespace;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;

/// Tags whose text is never visible, regardless of the site's noise list.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Decides which elements are page furniture rather than article content.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    tags: Vec<String>,
    class_keywords: Vec<String>,
}

impl NoiseFilter {
    pub fn new(tags: &[String], class_keywords: &[String]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_ascii_lowercase()).collect(),
            class_keywords: class_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// A filter that only hides script-like elements.
    pub fn none() -> Self {
        Self::new(&[], &[])
    }

    pub fn is_noise(&self, el: ElementRef<'_>) -> bool {
        let name = el.value().name();
        if HIDDEN_TAGS.contains(&name) || self.tags.iter().any(|t| t == name) {
            return true;
        }
        el.value().classes().any(|class| {
            let class = class.to_lowercase();
            self.class_keywords.iter().any(|kw| has_keyword(&class, kw))
        })
    }
}

/// `keyword` occurs in `token` delimited by the token edges, `-` or `_`.
/// `ad` matches `ad-slot` and `top_ad` but not `header` or `badge`.
fn has_keyword(token: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    let is_sep = |c: Option<char>| c.is_none_or(|c| c == '-' || c == '_');
    token.match_indices(keyword).any(|(start, _)| {
        let before = token[..start].chars().next_back();
        let after = token[start + keyword.len()..].chars().next();
        is_sep(before) && is_sep(after)
    })
}

/// Text nodes under `el`, in document order, skipping noise subtrees.
/// `el` itself is not tested.
pub fn text_nodes<'a>(el: ElementRef<'a>, noise: &NoiseFilter) -> Vec<&'a str> {
    let mut out = Vec::new();
    walk(el, noise, &mut out);
    out
}

fn walk<'a>(el: ElementRef<'a>, noise: &NoiseFilter, out: &mut Vec<&'a str>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push(&**text),
            Node::Element(_) => match ElementRef::wrap(child) {
                Some(child_el) if !noise.is_noise(child_el) => walk(child_el, noise, out),
                _ => {}
            },
            _ => {}
        }
    }
}

/// Visible text of `el` on one line.
pub fn visible_text(el: ElementRef<'_>, noise: &NoiseFilter) -> String {
    collapse_whitespace(&text_nodes(el, noise).join(" "))
}

/// Visible text of `el`, one trimmed text node per line.
pub fn visible_lines(el: ElementRef<'_>, noise: &NoiseFilter) -> String {
    text_nodes(el, noise)
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Visible text of the whole page, one text node per line.
pub fn page_lines(document: &Html) -> String {
    visible_lines(document.root_element(), &NoiseFilter::none())
}

/// Case-insensitive phrase list for template noise such as "read more".
#[derive(Debug, Clone, Default)]
pub struct Boilerplate {
    phrases: Vec<String>,
}

impl Boilerplate {
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }
}

/// Text of every `selector` match inside `container` that is not itself
/// noise or inside a noise element, longer than `min_chars` and free of
/// boilerplate. Repeated fragments are kept once.
pub fn paragraphs(
    container: ElementRef<'_>,
    selector: &Selector,
    noise: &NoiseFilter,
    min_chars: usize,
    boilerplate: &Boilerplate,
) -> Vec<String> {
    let mut seen = HashSet::new();
    container
        .select(selector)
        .filter(|p| !inside_noise(*p, container, noise))
        .map(|p| visible_text(p, noise))
        .filter(|text| text.chars().count() > min_chars && !boilerplate.matches(text))
        .filter(|text| seen.insert(text.clone()))
        .collect()
}

fn inside_noise(el: ElementRef<'_>, container: ElementRef<'_>, noise: &NoiseFilter) -> bool {
    if noise.is_noise(el) {
        return true;
    }
    el.ancestors()
        .take_while(|node| node.id() != container.id())
        .filter_map(ElementRef::wrap)
        .any(|ancestor| noise.is_noise(ancestor))
}

/// Rules for the line-based fallback.
#[derive(Debug)]
pub struct LineFilter<'a> {
    pub title: Option<&'a str>,
    /// Lines starting with any of these are metadata, not body text.
    pub markers: Vec<&'a str>,
    pub boilerplate: &'a Boilerplate,
    pub min_words: usize,
}

impl LineFilter<'_> {
    /// Append the usable lines of `text` to `parts`, skipping anything
    /// already in `parts`.
    pub fn extend(&self, parts: &mut Vec<String>, text: &str) {
        let mut seen: HashSet<String> = parts.iter().cloned().collect();
        for line in text.lines().map(str::trim) {
            if line.is_empty()
                || self.title.is_some_and(|t| t == line)
                || self.markers.iter().any(|m| starts_with_ignore_case(line, m))
                || self.boilerplate.matches(line)
                || line.split_whitespace().count() < self.min_words
            {
                continue;
            }
            if seen.insert(line.to_string()) {
                parts.push(line.to_string());
            }
        }
    }
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    !prefix.is_empty()
        && line
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// The lines of `text` after the line holding the first `start` marker and
/// before the next `end` marker. Missing markers leave that side untouched.
pub fn between_markers<'a>(text: &'a str, start: Option<&str>, end: Option<&str>) -> &'a str {
    let mut segment = text;
    if let Some((_, rest)) = start.filter(|s| !s.is_empty()).and_then(|s| segment.split_once(s)) {
        segment = rest.split_once('\n').map_or("", |(_, after)| after);
    }
    if let Some((head, _)) = end.filter(|s| !s.is_empty()).and_then(|s| segment.split_once(s)) {
        segment = head;
    }
    segment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_noise() -> NoiseFilter {
        NoiseFilter::new(
            &["nav".to_string(), "aside".to_string()],
            &["ad".to_string(), "share".to_string(), "also-read".to_string()],
        )
    }

    #[test]
    fn test_class_keyword_boundaries() {
        assert!(has_keyword("ad-slot", "ad"));
        assert!(has_keyword("top_ad", "ad"));
        assert!(has_keyword("ad", "ad"));
        assert!(!has_keyword("header", "ad"));
        assert!(!has_keyword("badge", "ad"));
        assert!(has_keyword("story-also-read-box", "also-read"));
        assert!(!has_keyword("sharethrough", "share"));
    }

    #[test]
    fn test_visible_text_skips_noise_subtrees() {
        let html = Html::parse_fragment(
            r#"<div id="c"><p>Keep this</p><script>var x = 1;</script>
               <div class="ad-slot">Buy now</div><nav>Menu</nav>
               <p>and <b>this</b></p><div class="header">Header stays</div></div>"#,
        );
        let sel = Selector::parse("div#c").unwrap();
        let container = html.select(&sel).next().unwrap();
        let text = visible_text(container, &default_noise());
        assert_eq!(text, "Keep this and this Header stays");
    }

    #[test]
    fn test_paragraphs_filters_short_boilerplate_noise_and_repeats() {
        let html = Html::parse_fragment(
            r#"<article>
                 <p>The first paragraph of the story is long enough.</p>
                 <p>Short</p>
                 <p>Also Read: another story entirely elsewhere</p>
                 <div class="share-box"><p>Share this story on every network now</p></div>
                 <p>The first paragraph of the story is long enough.</p>
                 <p>The second paragraph carries on with the report.</p>
               </article>"#,
        );
        let sel = Selector::parse("article").unwrap();
        let container = html.select(&sel).next().unwrap();
        let p = Selector::parse("p").unwrap();
        let boilerplate = Boilerplate::new(&["also read".to_string()]);
        let parts = paragraphs(container, &p, &default_noise(), 10, &boilerplate);
        assert_eq!(
            parts,
            vec![
                "The first paragraph of the story is long enough.",
                "The second paragraph carries on with the report.",
            ]
        );
    }

    #[test]
    fn test_boilerplate_matches_non_latin_phrases() {
        let boilerplate = Boilerplate::new(&["ಇದನ್ನೂ ಓದಿ".to_string(), "Read More".to_string()]);
        assert!(boilerplate.matches("ಇದನ್ನೂ ಓದಿ: ಬೇರೆ ಸುದ್ದಿ"));
        assert!(boilerplate.matches("click to READ MORE"));
        assert!(!boilerplate.matches("ordinary sentence"));
    }

    #[test]
    fn test_line_filter() {
        let boilerplate = Boilerplate::new(&["subscribe".to_string()]);
        let filter = LineFilter {
            title: Some("Headline Of The Day"),
            markers: vec!["ADDED :"],
            boilerplate: &boilerplate,
            min_words: 3,
        };
        let mut parts = vec!["Already kept line here".to_string()];
        filter.extend(
            &mut parts,
            "Headline Of The Day\nADDED : Nov 30, 2025\ntwo words\n\
             Subscribe to our channel now\nAlready kept line here\n\
             A real sentence of the story\nA real sentence of the story",
        );
        assert_eq!(parts, vec!["Already kept line here", "A real sentence of the story"]);
    }

    #[test]
    fn test_between_markers() {
        let text =
            "menu\nADDED : Nov 30\nbody line one\nbody line two\nOur Apps Available On\nfooter";
        let segment = between_markers(text, Some("ADDED :"), Some("Our Apps Available On"));
        assert_eq!(segment, "body line one\nbody line two\n");
        assert_eq!(between_markers("plain", Some("X"), Some("Y")), "plain");
    }

    #[test]
    fn test_page_lines() {
        let html =
            Html::parse_document("<html><body><h1>Title</h1><p>Line <i>two</i></p></body></html>");
        assert_eq!(page_lines(&html), "Title\nLine\ntwo");
    }
}
