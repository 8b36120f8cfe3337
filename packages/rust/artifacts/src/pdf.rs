//! PDF rendering of laid-out pages with `printpdf`.

use printpdf::{BuiltinFont, Line, Mm, PdfDocument, Point};
use tracing::debug;

use pagecast_shared::{PagecastError, Result};

use crate::layout::{self, Face, LayoutMetrics, PAGE_HEIGHT_MM, PAGE_WIDTH_MM};

const LAYER: &str = "content";

/// Gap between a heading's baseline and its underline.
const UNDERLINE_OFFSET_MM: f32 = 1.2;

fn build_error(context: &str, e: impl std::fmt::Display) -> PagecastError {
    PagecastError::ArtifactBuild(format!("{context}: {e}"))
}

/// Render `title` and `body` to PDF bytes. Blocking.
pub fn render(title: &str, body: &str, metrics: &LayoutMetrics) -> Result<Vec<u8>> {
    let pages = layout::paginate(title, body, metrics);

    let (doc, first_page, first_layer) =
        PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER);
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| build_error("failed to load font", e))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| build_error("failed to load font", e))?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    for (index, lines) in pages.iter().enumerate() {
        if index > 0 {
            let (page, page_layer) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER);
            layer = doc.get_page(page).get_layer(page_layer);
        }
        for line in lines {
            layer.use_text(
                line.text.as_str(),
                line.font_size,
                Mm(line.x_mm),
                Mm(line.y_mm),
                match line.face {
                    Face::Regular => &regular,
                    Face::Bold => &bold,
                },
            );
            if let Some(width) = line.underline_mm {
                let y = line.y_mm - UNDERLINE_OFFSET_MM;
                layer.set_outline_thickness(0.6);
                layer.add_line(Line {
                    points: vec![
                        (Point::new(Mm(line.x_mm), Mm(y)), false),
                        (Point::new(Mm(line.x_mm + width), Mm(y)), false),
                    ],
                    is_closed: false,
                });
            }
        }
    }

    let bytes = doc
        .save_to_bytes()
        .map_err(|e| build_error("failed to serialize document", e))?;
    debug!(pages = pages.len(), bytes = bytes.len(), "pdf rendered");
    Ok(bytes)
}
