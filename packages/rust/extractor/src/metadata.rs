//! Document-level metadata: title, byline, excerpt, site name, language, canonical URL.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use crate::text::inline_text;

/// Separators sites put between an article title and their own name.
const TITLE_SEPARATORS: &[&str] = &[" | ", " - ", " – ", " — ", " » ", " :: ", " / "];

/// Longest excerpt taken from the first paragraph, in chars.
const EXCERPT_MAX_CHARS: usize = 200;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("valid selector"));
    };
}

selector!(TITLE_SEL, "head title, title");
selector!(OG_TITLE_SEL, r#"meta[property="og:title"], meta[name="twitter:title"]"#);
selector!(H1_SEL, "h1");
selector!(
    BYLINE_SEL,
    r#"meta[name="author"], meta[property="article:author"]"#
);
selector!(BYLINE_EL_SEL, r#"[rel="author"], [itemprop="author"], .byline, .author"#);
selector!(
    DESCRIPTION_SEL,
    r#"meta[name="description"], meta[property="og:description"], meta[name="twitter:description"]"#
);
selector!(SITE_NAME_SEL, r#"meta[property="og:site_name"]"#);
selector!(HTML_SEL, "html");
selector!(CANONICAL_SEL, r#"link[rel="canonical"]"#);

/// Metadata gathered from the whole document.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Metadata {
    pub title: String,
    pub byline: Option<String>,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub lang: Option<String>,
    pub canonical_url: Option<String>,
}

fn meta_content(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Drop a trailing (or leading) site-name segment from a `<title>`.
///
/// The shorter side is only dropped when what remains still reads like a
/// headline (three words or more); otherwise the title is kept whole.
pub(crate) fn clean_title(raw: &str) -> String {
    let raw = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for sep in TITLE_SEPARATORS {
        if let Some((head, _)) = raw.rsplit_once(sep) {
            if word_count(head) >= 3 {
                return head.trim().to_string();
            }
            return match raw.split_once(sep) {
                Some((_, tail)) if word_count(tail) >= 3 => tail.trim().to_string(),
                _ => raw,
            };
        }
    }
    raw
}

fn title(doc: &Html) -> String {
    if let Some(og) = meta_content(doc, &OG_TITLE_SEL) {
        return clean_title(&og);
    }
    let from_title = doc
        .select(&TITLE_SEL)
        .map(inline_text)
        .find(|t| !t.is_empty());
    if let Some(t) = from_title {
        return clean_title(&t);
    }
    doc.select(&H1_SEL)
        .map(inline_text)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

fn byline(doc: &Html) -> Option<String> {
    meta_content(doc, &BYLINE_SEL).or_else(|| {
        doc.select(&BYLINE_EL_SEL)
            .map(inline_text)
            .find(|t| !t.is_empty() && t.chars().count() < 100)
    })
}

fn canonical_url(doc: &Html, base: &Url) -> Option<String> {
    let href = doc
        .select(&CANONICAL_SEL)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())?;
    base.join(href).ok().map(String::from)
}

/// Read metadata from `doc`, resolving relative links against `base`.
pub(crate) fn read(doc: &Html, base: &Url) -> Metadata {
    Metadata {
        title: title(doc),
        byline: byline(doc),
        description: meta_content(doc, &DESCRIPTION_SEL),
        site_name: meta_content(doc, &SITE_NAME_SEL),
        lang: doc
            .select(&HTML_SEL)
            .next()
            .and_then(|html| html.value().attr("lang"))
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_string),
        canonical_url: canonical_url(doc, base),
    }
}

/// First paragraph of `text`, cut at a word boundary.
pub(crate) fn excerpt_from_text(text: &str) -> Option<String> {
    let first = text.split("\n\n").map(str::trim).find(|p| !p.is_empty())?;
    if first.chars().count() <= EXCERPT_MAX_CHARS {
        return Some(first.to_string());
    }
    let mut excerpt = String::new();
    for word in first.split_whitespace() {
        if excerpt.chars().count() + word.chars().count() + 1 > EXCERPT_MAX_CHARS {
            break;
        }
        if !excerpt.is_empty() {
            excerpt.push(' ');
        }
        excerpt.push_str(word);
    }
    excerpt.push('…');
    Some(excerpt)
}
