//! Readable-article extraction from rendered HTML.
//!
//! [`extract`] picks the main content block of a page (scored paragraph
//! containers, then semantic containers, then `<body>`), flattens it to plain
//! text, and reads document metadata alongside.

mod candidates;
mod metadata;
mod text;

use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use pagecast_shared::{ExtractedArticle, PagecastError, RenderedPage, Result};

/// Extract the readable article from a rendered page.
pub fn extract_page(page: &RenderedPage) -> Result<ExtractedArticle> {
    extract(&page.html, &page.source_url)
}

/// Extract the readable article from `html` fetched from `source_url`.
///
/// Fails with [`PagecastError::Extraction`] when no readable text remains.
#[instrument(skip_all, fields(url = %source_url, html_len = html.len()))]
pub fn extract(html: &str, source_url: &Url) -> Result<ExtractedArticle> {
    let doc = Html::parse_document(html);
    let meta = metadata::read(&doc, source_url);

    let text = match candidates::best_candidate(&doc) {
        Some(candidate) => {
            debug!(
                tag = candidate.element.value().name(),
                score = candidate.score,
                "selected content candidate"
            );
            text::flatten(candidate.element)
        }
        None => candidates::semantic_container(&doc)
            .or_else(|| candidates::body(&doc))
            .map(text::flatten)
            .unwrap_or_default(),
    };

    if text.trim().is_empty() {
        return Err(PagecastError::extraction(format!(
            "no readable content found at {source_url}"
        )));
    }

    let excerpt = meta
        .description
        .clone()
        .or_else(|| metadata::excerpt_from_text(&text));
    let word_count = text.split_whitespace().count();
    debug!(word_count, "article extracted");

    Ok(ExtractedArticle {
        title: meta.title,
        text,
        byline: meta.byline,
        excerpt,
        site_name: meta.site_name,
        lang: meta.lang,
        canonical_url: meta.canonical_url,
        word_count,
    })
}
