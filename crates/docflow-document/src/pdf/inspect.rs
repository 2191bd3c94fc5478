// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF inspection: decide whether and how a PDF should be OCR'd by looking
// at its existing text layer, using the `lopdf` crate.

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::capability::DocumentInspector;
use docflow_core::error::CapabilityError;
use docflow_core::{OcrMode, PdfInspection, TextQuality};
use lopdf::{Document, Object};
use tracing::{debug, info, instrument, warn};

/// Characters taken from each sampled page for quality analysis.
const SAMPLE_CHARS: usize = 2000;

/// Always sample this many leading pages.
const LEADING_SAMPLE_PAGES: usize = 5;

/// Average indicators per sample above which text counts as poor.
const POOR_QUALITY_SCORE: f64 = 0.8;

/// Inspects PDFs in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfInspector;

impl PdfInspector {
    pub fn new() -> Self {
        Self
    }

    /// Analyse raw PDF bytes.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn analyze(data: &[u8]) -> Result<PdfInspection, CapabilityError> {
        let document = Document::load_mem(data)
            .map_err(|err| CapabilityError::Malformed(format!("failed to load PDF: {err}")))?;

        let pages = document.get_pages();
        let page_count = pages.len();
        let sample_stride = (page_count / 10).max(1);

        let mut pages_with_text = 0;
        let mut samples: Vec<String> = Vec::new();
        for (index, page_number) in pages.keys().enumerate() {
            let text = match document.extract_text(&[*page_number]) {
                Ok(text) => text,
                Err(err) => {
                    debug!(page_number, %err, "no extractable text on page");
                    continue;
                }
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            pages_with_text += 1;
            if index < LEADING_SAMPLE_PAGES || index % sample_stride == 0 {
                samples.push(text.chars().take(SAMPLE_CHARS).collect());
            }
        }

        let is_tagged = is_tagged(&document);
        let has_text = !samples.is_empty();
        let text_quality = if has_text {
            let indicators: usize = samples.iter().map(|s| poor_quality_indicators(s)).sum();
            let score = indicators as f64 / samples.len() as f64;
            debug!(score, "text quality score");
            if score > POOR_QUALITY_SCORE {
                TextQuality::Poor
            } else {
                TextQuality::Good
            }
        } else {
            TextQuality::Unknown
        };

        let (needs_ocr, recommended_mode) = recommend(has_text, is_tagged, text_quality);

        info!(
            page_count,
            pages_with_text,
            is_tagged,
            ?text_quality,
            ?recommended_mode,
            "PDF inspected"
        );

        Ok(PdfInspection {
            page_count,
            pages_with_text,
            has_text,
            is_tagged,
            needs_ocr,
            text_quality,
            recommended_mode,
        })
    }

    /// Text of the leading pages, for language detection.
    pub fn leading_text(data: &[u8]) -> Result<Option<String>, CapabilityError> {
        let document = Document::load_mem(data)
            .map_err(|err| CapabilityError::Malformed(format!("failed to load PDF: {err}")))?;
        let numbers: Vec<u32> = document
            .get_pages()
            .keys()
            .take(LEADING_SAMPLE_PAGES)
            .copied()
            .collect();
        let text = numbers
            .iter()
            .filter_map(|n| document.extract_text(&[*n]).ok())
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

#[async_trait]
impl DocumentInspector for PdfInspector {
    async fn inspect(&self, document: Arc<[u8]>) -> Result<PdfInspection, CapabilityError> {
        tokio::task::spawn_blocking(move || Self::analyze(&document))
            .await
            .map_err(|err| CapabilityError::Failed(format!("inspection task failed: {err}")))?
    }

    async fn text_layer(&self, document: Arc<[u8]>) -> Result<Option<String>, CapabilityError> {
        tokio::task::spawn_blocking(move || Self::leading_text(&document))
            .await
            .map_err(|err| CapabilityError::Failed(format!("text extraction failed: {err}")))?
    }
}

/// Choose an OCR mode from what the text layer looks like.
fn recommend(has_text: bool, is_tagged: bool, quality: TextQuality) -> (bool, OcrMode) {
    match (has_text, is_tagged, quality) {
        (true, true, TextQuality::Good) => (false, OcrMode::Skip),
        (true, _, TextQuality::Poor) => (true, OcrMode::Force),
        (true, false, _) => (true, OcrMode::Redo),
        _ => (true, OcrMode::Force),
    }
}

/// Whether the catalog carries `/MarkInfo << /Marked true >>`.
fn is_tagged(document: &Document) -> bool {
    let catalog = match document.catalog() {
        Ok(catalog) => catalog,
        Err(err) => {
            warn!(%err, "PDF has no readable catalog");
            return false;
        }
    };
    let Ok(mark_info) = catalog.get(b"MarkInfo") else {
        return false;
    };
    let mark_info = match mark_info {
        Object::Reference(id) => match document.get_object(*id) {
            Ok(object) => object,
            Err(_) => return false,
        },
        other => other,
    };
    mark_info
        .as_dict()
        .ok()
        .and_then(|dict| dict.get(b"Marked").ok())
        .and_then(|marked| marked.as_bool().ok())
        .unwrap_or(false)
}

/// Count script-independent signs of a bad text layer in one sample.
fn poor_quality_indicators(sample: &str) -> usize {
    let total = sample.chars().count().max(1) as f64;
    let mut indicators = 0;

    let control = sample
        .chars()
        .filter(|c| c.is_control() && !c.is_whitespace())
        .count();
    if control as f64 / total > 0.03 {
        indicators += 1;
    }

    let symbols = sample
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control())
        .count();
    if symbols as f64 / total > 0.30 {
        indicators += 1;
    }

    // Literal `\xx` hex escapes left behind by broken encodings.
    if count_hex_escapes(sample) > 5 {
        indicators += 2;
    }

    let runs: Vec<usize> = sample
        .split(|c| c != ' ')
        .map(str::len)
        .filter(|len| *len > 0)
        .collect();
    if !runs.is_empty() {
        let average = runs.iter().sum::<usize>() as f64 / runs.len() as f64;
        if average > 2.5 {
            indicators += 1;
        }
    }

    indicators + sample.matches('\u{FFFD}').count()
}

fn count_hex_escapes(sample: &str) -> usize {
    let bytes = sample.as_bytes();
    bytes
        .windows(3)
        .filter(|w| w[0] == b'\\' && w[1].is_ascii_hexdigit() && w[2].is_ascii_hexdigit())
        .count()
}

/// Build a small PDF with one page per entry in `pages`.
///
/// Empty entries produce pages without a text layer. Used by tests and
/// benchmarks across the workspace.
pub fn build_text_pdf(pages: &[&str], tagged: bool) -> Result<Vec<u8>, String> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for text in pages {
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        };
        if !text.is_empty() {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let encoded = content.encode().map_err(|err| err.to_string())?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
            page.set("Contents", content_id);
        }
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if tagged {
        catalog.set("MarkInfo", dictionary! { "Marked" => true });
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    let mut output = Vec::new();
    doc.save_to(&mut output).map_err(|err| err.to_string())?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanned_pdf_needs_force() {
        let pdf = build_text_pdf(&["", ""], false).unwrap();
        let inspection = PdfInspector::analyze(&pdf).unwrap();
        assert_eq!(inspection.page_count, 2);
        assert!(!inspection.has_text);
        assert_eq!(inspection.text_quality, TextQuality::Unknown);
        assert_eq!(inspection.recommended_mode, OcrMode::Force);
        assert!(inspection.needs_ocr);
    }

    #[test]
    fn untagged_text_pdf_recommends_redo() {
        let pdf = build_text_pdf(&["Quarterly report for the board", ""], false).unwrap();
        let inspection = PdfInspector::analyze(&pdf).unwrap();
        assert!(inspection.has_text);
        assert_eq!(inspection.pages_with_text, 1);
        assert_eq!(inspection.recommended_mode, OcrMode::Redo);
    }

    #[test]
    fn tagged_good_pdf_is_skipped() {
        let pdf = build_text_pdf(&["Born digital document text"], true).unwrap();
        let inspection = PdfInspector::analyze(&pdf).unwrap();
        assert!(inspection.is_tagged);
        assert_eq!(inspection.recommended_mode, OcrMode::Skip);
        assert!(!inspection.needs_ocr);
    }

    #[test]
    fn leading_text_reads_text_layer() {
        let pdf = build_text_pdf(&["Hello", ""], false).unwrap();
        let text = PdfInspector::leading_text(&pdf).unwrap().unwrap();
        assert!(text.contains("Hello"));

        let scanned = build_text_pdf(&[""], false).unwrap();
        assert!(PdfInspector::leading_text(&scanned).unwrap().is_none());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = PdfInspector::analyze(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[test]
    fn symbol_soup_scores_poor() {
        assert!(poor_quality_indicators("#$%& *@!^ ~~|| {}[] <>?/") >= 1);
        assert_eq!(poor_quality_indicators("plain readable words here"), 0);
        assert_eq!(poor_quality_indicators("bad \u{FFFD}\u{FFFD} glyphs"), 2);
    }

    #[test]
    fn poor_text_forces_even_when_tagged() {
        assert_eq!(recommend(true, true, TextQuality::Poor), (true, OcrMode::Force));
    }
}
