//! Flatten an element subtree to paragraph-separated plain text.

use scraper::{ElementRef, Node};

use crate::candidates::is_chrome;

/// Elements that start and end a paragraph.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure", "h1",
    "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section", "table", "tr",
    "ul",
];

#[derive(Default)]
struct Blocks {
    paragraphs: Vec<String>,
    current: String,
}

impl Blocks {
    /// Append inline text, collapsing whitespace runs to one space.
    fn push_inline(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                if !self.current.is_empty() && !self.current.ends_with([' ', '\n']) {
                    self.current.push(' ');
                }
            } else {
                self.current.push(ch);
            }
        }
    }

    /// Append preformatted text verbatim.
    fn push_raw(&mut self, text: &str) {
        self.current.push_str(text);
    }

    fn line_break(&mut self) {
        let trimmed = self.current.trim_end_matches(' ').len();
        self.current.truncate(trimmed);
        if !self.current.is_empty() {
            self.current.push('\n');
        }
    }

    fn end_block(&mut self) {
        let paragraph = self.current.trim();
        if !paragraph.is_empty() {
            self.paragraphs.push(paragraph.to_string());
        }
        self.current.clear();
    }

    fn finish(mut self) -> String {
        self.end_block();
        self.paragraphs.join("\n\n")
    }
}

fn walk(element: ElementRef, out: &mut Blocks, preformatted: bool) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                if preformatted {
                    out.push_raw(text);
                } else {
                    out.push_inline(text);
                }
            }
            Node::Element(_) => {
                let Some(el) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_chrome(&el) {
                    continue;
                }
                let name = el.value().name();
                if name == "br" {
                    out.line_break();
                    continue;
                }
                if name == "img" {
                    continue;
                }

                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.end_block();
                }
                if name == "li" {
                    out.push_inline("- ");
                }
                if matches!(name, "td" | "th") && !out.current.is_empty() {
                    out.push_inline(" ");
                }
                walk(el, out, preformatted || name == "pre");
                if block {
                    out.end_block();
                }
            }
            _ => {}
        }
    }
}

/// Plain text of `element` with chrome removed and paragraphs joined by a blank line.
pub(crate) fn flatten(element: ElementRef) -> String {
    let mut out = Blocks::default();
    walk(element, &mut out, false);
    out.finish()
}

/// Whitespace-collapsed text of a small element (titles, bylines).
pub(crate) fn inline_text(element: ElementRef) -> String {
    let mut out = Blocks::default();
    out.push_inline(&element.text().collect::<String>());
    out.current.trim().to_string()
}

#[cfg(test)]
mod tests {
    use scraper::{Html, Selector};

    use super::*;

    fn flatten_body(html: &str) -> String {
        let doc = Html::parse_document(html);
        let body = doc
            .select(&Selector::parse("body").unwrap())
            .next()
            .unwrap();
        flatten(body)
    }

    #[test]
    fn paragraphs_are_separated_by_blank_lines() {
        let text = flatten_body("<body><p>One   two\n three.</p><p>Four <b>five</b>.</p></body>");
        assert_eq!(text, "One two three.\n\nFour five.");
    }

    #[test]
    fn chrome_is_dropped() {
        let text = flatten_body(
            "<body><nav>Home About</nav><p>Body text.</p><script>var x = 1;</script>\
             <div class=\"share-buttons\">Tweet</div></body>",
        );
        assert_eq!(text, "Body text.");
    }

    #[test]
    fn lists_and_breaks() {
        let text = flatten_body("<body><ul><li>alpha</li><li>beta</li></ul><p>a<br>b</p></body>");
        assert_eq!(text, "- alpha\n\n- beta\n\na\nb");
    }

    #[test]
    fn preformatted_keeps_whitespace() {
        let text = flatten_body("<body><pre>fn main() {\n    run();\n}</pre></body>");
        assert_eq!(text, "fn main() {\n    run();\n}");
    }
}
