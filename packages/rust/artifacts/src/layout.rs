//! Text layout for the built-in Helvetica faces: charset folding, width
//! estimates, word wrapping, and pagination into positioned lines.

/// A4 portrait, millimetres.
pub const PAGE_WIDTH_MM: f32 = 210.0;
pub const PAGE_HEIGHT_MM: f32 = 297.0;

/// Millimetres per PostScript point.
const MM_PER_PT: f32 = 25.4 / 72.0;

/// Baseline-to-baseline distance as a multiple of the font size.
const LINE_SPACING: f32 = 1.4;

/// Fold `s` into the printable ASCII range the built-in fonts encode reliably.
///
/// Typographic punctuation is transliterated, other characters become `?`.
pub fn to_font_charset(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            ' '..='~' | '\n' => out.push(ch),
            '\t' => out.push_str("    "),
            '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' => out.push(' '),
            '\u{200B}' | '\u{FEFF}' | '\r' => {}
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' | '«' | '»' => out.push('"'),
            '\u{2010}'..='\u{2015}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{2022}' | '\u{00B7}' => out.push('*'),
            '©' => out.push_str("(c)"),
            '®' => out.push_str("(R)"),
            '™' => out.push_str("(TM)"),
            _ => out.push('?'),
        }
    }
    out
}

/// Approximate Helvetica advance width of `ch`, in ems.
fn char_em(ch: char, bold: bool) -> f32 {
    let base = match ch {
        'i' | 'j' | 'l' | '\'' | '|' | '.' | ',' | ':' | ';' | '!' => 0.24,
        ' ' | 'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | '-' | '/' => 0.32,
        'm' | 'w' | 'M' | 'W' | '@' => 0.85,
        'A'..='Z' | '%' | '&' => 0.68,
        _ => 0.54,
    };
    if bold { base * 1.06 } else { base }
}

/// Estimated rendered width of `s` in millimetres.
pub fn text_width_mm(s: &str, font_size: f32, bold: bool) -> f32 {
    s.chars().map(|c| char_em(c, bold)).sum::<f32>() * font_size * MM_PER_PT
}

/// Line height in millimetres for a font size in points.
pub fn line_height_mm(font_size: f32) -> f32 {
    font_size * LINE_SPACING * MM_PER_PT
}

/// Break `paragraph` into lines no wider than `max_width_mm`.
///
/// Words wider than a full line are split across lines.
pub fn wrap(paragraph: &str, font_size: f32, bold: bool, max_width_mm: f32) -> Vec<String> {
    let fits = |s: &str| text_width_mm(s, font_size, bold) <= max_width_mm;
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if fits(&candidate) {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if fits(word) {
            current = word.to_string();
            continue;
        }
        // Hard-break an over-long word.
        for ch in word.chars() {
            current.push(ch);
            if !fits(&current) {
                current.pop();
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Font faces a line may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    Regular,
    Bold,
}

/// One line of text at an absolute position on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub face: Face,
    pub font_size: f32,
    pub x_mm: f32,
    pub y_mm: f32,
    /// Underline length when the line is underlined.
    pub underline_mm: Option<f32>,
}

/// Layout parameters in document units.
#[derive(Debug, Clone, Copy)]
pub struct LayoutMetrics {
    pub title_font_size: f32,
    pub body_font_size: f32,
    pub margin_mm: f32,
}

impl LayoutMetrics {
    fn content_width(&self) -> f32 {
        (PAGE_WIDTH_MM - 2.0 * self.margin_mm).max(10.0)
    }
}

struct Cursor {
    pages: Vec<Vec<PlacedLine>>,
    y: f32,
    top: f32,
    bottom: f32,
}

impl Cursor {
    fn new(margin: f32) -> Self {
        let top = PAGE_HEIGHT_MM - margin;
        Self {
            pages: vec![Vec::new()],
            y: top,
            top,
            bottom: margin,
        }
    }

    /// Move down one line, starting a new page when it would cross the bottom margin.
    fn advance(&mut self, height: f32) -> f32 {
        if self.y - height < self.bottom && self.pages.last().is_some_and(|p| !p.is_empty()) {
            self.pages.push(Vec::new());
            self.y = self.top;
        }
        self.y -= height;
        self.y
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn place(&mut self, line: PlacedLine) {
        if let Some(page) = self.pages.last_mut() {
            page.push(line);
        }
    }
}

/// Lay out an underlined title followed by paragraphs across as many pages as needed.
///
/// Paragraphs are separated by a blank line in `body`; single newlines are kept
/// as line breaks. Always yields at least one page.
pub fn paginate(title: &str, body: &str, metrics: &LayoutMetrics) -> Vec<Vec<PlacedLine>> {
    let width = metrics.content_width();
    let x = metrics.margin_mm;
    let mut cursor = Cursor::new(metrics.margin_mm);

    let title_height = line_height_mm(metrics.title_font_size);
    for line in wrap(&to_font_charset(title), metrics.title_font_size, true, width) {
        let y = cursor.advance(title_height);
        let underline = text_width_mm(&line, metrics.title_font_size, true).min(width);
        cursor.place(PlacedLine {
            text: line,
            face: Face::Bold,
            font_size: metrics.title_font_size,
            x_mm: x,
            y_mm: y,
            underline_mm: Some(underline),
        });
    }
    cursor.gap(title_height * 0.6);

    let body_height = line_height_mm(metrics.body_font_size);
    let body = to_font_charset(body);
    for paragraph in body.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for source_line in paragraph.lines() {
            for line in wrap(source_line, metrics.body_font_size, false, width) {
                let y = cursor.advance(body_height);
                cursor.place(PlacedLine {
                    text: line,
                    face: Face::Regular,
                    font_size: metrics.body_font_size,
                    x_mm: x,
                    y_mm: y,
                    underline_mm: None,
                });
            }
        }
        cursor.gap(body_height * 0.5);
    }

    cursor.pages
}
