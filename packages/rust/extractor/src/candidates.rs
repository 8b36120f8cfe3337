//! Main-content candidate scoring.
//!
//! Paragraph-like elements award points to their parent (full) and grandparent
//! (half). Class/id hints and link density adjust the total, and the best-scoring
//! element that is not page chrome wins.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Tags that never hold article content.
const CHROME_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe", "svg",
    "button", "select", "template", "dialog", "canvas",
];

/// Paragraphs shorter than this (in chars) do not score.
const MIN_PARAGRAPH_LEN: usize = 25;

static UNLIKELY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)-ad-|ad-break|agegate|banner|breadcrumb|combx|comment|community|cookie|disqus|extra|gdpr|legends|menu|modal|newsletter|pager|pagination|popup|promo|related|remark|replies|rss|share|shoutbox|sidebar|skyscraper|social|sponsor|subscribe|supplemental",
    )
    .expect("valid regex")
});

static MAYBE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)and|article|body|column|content|main|post|entry|story").expect("valid regex")
});

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|main|page|post|text|blog|story")
        .expect("valid regex")
});

static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)-ad-|hidden|banner|combx|comment|contact|foot|footer|footnote|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget",
    )
    .expect("valid regex")
});

static PARAGRAPH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, pre, blockquote, td").expect("valid selector"));

static SEMANTIC_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"article, main, [role="main"], [itemprop="articleBody"], .post-content, .entry-content, .article-body"#,
    )
    .expect("valid selector")
});

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid selector"));

/// A scored main-content candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<'a> {
    pub element: ElementRef<'a>,
    pub score: f64,
}

/// `class` and `id` joined for pattern checks.
fn class_and_id(el: &ElementRef) -> String {
    let value = el.value();
    format!(
        "{} {}",
        value.attr("class").unwrap_or(""),
        value.attr("id").unwrap_or("")
    )
}

/// Whether `el` is navigation, widgets, hidden, or other non-article chrome.
pub(crate) fn is_chrome(el: &ElementRef) -> bool {
    let value = el.value();
    let name = value.name();

    if matches!(name, "html" | "body" | "article" | "main") {
        return false;
    }
    if CHROME_TAGS.contains(&name) {
        return true;
    }
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if let Some(style) = value.attr("style") {
        let style = style.replace(' ', "").to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    if value.attr("role").is_some_and(|r| {
        matches!(r, "navigation" | "banner" | "complementary" | "contentinfo" | "dialog")
    }) {
        return true;
    }

    let hints = class_and_id(el);
    UNLIKELY_RE.is_match(&hints) && !MAYBE_RE.is_match(&hints)
}

fn inside_chrome(el: &ElementRef) -> bool {
    is_chrome(el)
        || el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| is_chrome(&ancestor))
}

/// Bonus or penalty from class/id naming conventions.
fn class_weight(el: &ElementRef) -> f64 {
    let hints = class_and_id(el);
    let mut weight = 0.0;
    if NEGATIVE_RE.is_match(&hints) {
        weight -= 25.0;
    }
    if POSITIVE_RE.is_match(&hints) {
        weight += 25.0;
    }
    weight
}

fn text_len(el: &ElementRef) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

/// Fraction of an element's text that sits inside links.
pub(crate) fn link_density(el: &ElementRef) -> f64 {
    let total = text_len(el);
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el.select(&LINK_SEL).map(|a| text_len(&a)).sum();
    linked as f64 / total as f64
}

fn paragraph_score(text: &str) -> f64 {
    let len = text.chars().count();
    let commas = text.matches([',', '，']).count();
    1.0 + commas as f64 + (len as f64 / 100.0).min(3.0)
}

fn base_score(el: &ElementRef) -> f64 {
    let tag_bonus = match el.value().name() {
        "article" | "main" => 10.0,
        "div" | "section" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "ol" | "ul" | "dl" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };
    tag_bonus + class_weight(el)
}

/// Score every paragraph container and return the best candidate, if any.
pub(crate) fn best_candidate(doc: &Html) -> Option<Candidate<'_>> {
    let mut scores = HashMap::new();

    for paragraph in doc.select(&PARAGRAPH_SEL) {
        if inside_chrome(&paragraph) {
            continue;
        }
        let text: String = paragraph.text().collect();
        let text = text.trim();
        if text.chars().count() < MIN_PARAGRAPH_LEN {
            continue;
        }
        let points = paragraph_score(text);

        let mut ancestors = paragraph.ancestors().filter_map(ElementRef::wrap);
        if let Some(parent) = ancestors.next() {
            scores
                .entry(parent.id())
                .or_insert_with(|| (parent, base_score(&parent)))
                .1 += points;

            if let Some(grandparent) = ancestors.next() {
                scores
                    .entry(grandparent.id())
                    .or_insert_with(|| (grandparent, base_score(&grandparent)))
                    .1 += points / 2.0;
            }
        }
    }

    scores
        .into_values()
        .filter(|(el, _)| !matches!(el.value().name(), "html" | "head"))
        .map(|(element, score)| Candidate {
            element,
            score: score * (1.0 - link_density(&element)),
        })
        .filter(|c| c.score > 0.0)
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// First semantic content container that is not chrome.
pub(crate) fn semantic_container(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&SEMANTIC_SEL).find(|el| !inside_chrome(el))
}

/// The document body, if any.
pub(crate) fn body(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&BODY_SEL).next()
}
