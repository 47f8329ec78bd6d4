//! PDF Segmenter: splits a call transcript PDF into Presentation and Q&A
//! text using typographic analysis, with no dependence on any vendor text
//! layer beyond raw font size/name per text run.
//!
//! There is no teacher counterpart for this algorithm — the teacher
//! rasterises pages for a VLM and never reads per-span text — but it reuses
//! the teacher's own `pdfium-render` dependency, through its page *text
//! object* API rather than its rasterization API, to get exactly the
//! `{text, font_size, font_name}` triples this analysis needs. The algorithm
//! itself (body-font-size mode, back-to-front heading scan, tail trim) is
//! ported from `pdf_processor.py`'s `analyze_font_styles` /
//! `find_qa_section_title` / `extract_text_sections`, with the heading
//! qualification rules following SPEC_FULL.md §4.1 rather than that file's
//! (slightly redundant) original branching.

use crate::error::AppError;
use pdfium_render::prelude::*;
use std::collections::HashMap;

/// Case-insensitive Q&A heading patterns, in no particular priority order —
/// every line is checked against all of them.
const QA_PATTERNS: &[&str] = &[
    "questions and answers",
    "question and answer",
    "questions and answer",
    "question and answers",
    "questions & answers",
    "question & answer",
    "question & answers",
    "questions & answer",
];

/// A maximal run of text drawn with one font at one size.
#[derive(Debug, Clone)]
struct Span {
    text: String,
    font_size: f32,
    font_name: String,
    top: f32,
    left: f32,
}

/// Spans on one page grouped into a reading-order line.
#[derive(Debug, Clone)]
struct Line {
    text: String,
    max_font_size: f32,
    any_bold: bool,
}

/// The two transcript halves produced by segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedTranscript {
    pub presentation: String,
    pub q_a: String,
}

/// Segment `pdf_bytes` into Presentation and Q&A sections.
///
/// `filename` is used only for error messages. `max_size_bytes` bounds the
/// accepted upload; callers should check size before even reading the
/// bytes when possible, but this function re-validates it for callers that
/// already have the bytes in hand.
pub async fn segment(
    pdf_bytes: Vec<u8>,
    filename: &str,
    max_size_bytes: u64,
) -> Result<SegmentedTranscript, AppError> {
    if pdf_bytes.len() as u64 > max_size_bytes {
        return Err(AppError::FileTooLarge {
            size_bytes: pdf_bytes.len() as u64,
            limit_bytes: max_size_bytes,
        });
    }
    if pdf_bytes.len() < 4 || &pdf_bytes[0..4] != b"%PDF" {
        return Err(AppError::InvalidFileType {
            content_type: "unknown (missing %PDF magic)".to_string(),
        });
    }

    let filename = filename.to_string();
    tokio::task::spawn_blocking(move || segment_blocking(&pdf_bytes, &filename))
        .await
        .map_err(|e| AppError::Internal(format!("segmenter task panicked: {e}")))?
}

/// CPU-bound body: parses the PDF and walks every page's text objects.
/// Pdfium bindings are not safe to hold across an `.await`, so this entire
/// function runs inside `spawn_blocking`, the same treatment the teacher
/// gives its (also CPU-bound, thread-local) rasterization calls.
fn segment_blocking(pdf_bytes: &[u8], filename: &str) -> Result<SegmentedTranscript, AppError> {
    let pdfium = Pdfium::new(
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| AppError::PdfProcessingError {
                filename: filename.to_string(),
                detail: format!("failed to bind pdfium library: {e}"),
            })?,
    );

    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| AppError::PdfProcessingError {
            filename: filename.to_string(),
            detail: format!("failed to open PDF: {e}"),
        })?;

    let mut page_spans: Vec<Vec<Span>> = Vec::new();
    let mut page_texts: Vec<String> = Vec::new();

    for page in document.pages().iter() {
        let spans = extract_page_spans(&page);
        let lines = group_into_lines(&spans);
        let text = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        page_texts.push(text);
        page_spans.push(spans);
    }

    if page_spans.is_empty() {
        return Err(AppError::PdfProcessingError {
            filename: filename.to_string(),
            detail: "document has no pages".to_string(),
        });
    }

    let body_font_size = compute_body_font_size(page_spans.iter().flatten(), filename)?;

    let page_lines: Vec<Vec<Line>> = page_spans.iter().map(|spans| group_into_lines(spans)).collect();

    let qa_page = find_qa_heading_page(&page_lines, body_font_size);

    let (mut presentation, mut q_a) = match qa_page {
        None => (page_texts.join("\n\n"), String::new()),
        Some(idx) => {
            let presentation_pages = page_texts[..idx].join("\n\n");
            let (before, after) = split_at_earliest_pattern(&page_texts[idx]);
            let mut presentation = presentation_pages;
            if !presentation.is_empty() && !before.is_empty() {
                presentation.push_str("\n\n");
            }
            presentation.push_str(&before);

            let mut q_a = after;
            if idx + 1 < page_texts.len() {
                if !q_a.is_empty() {
                    q_a.push_str("\n\n");
                }
                q_a.push_str(&page_texts[idx + 1..].join("\n\n"));
            }
            (presentation, q_a)
        }
    };

    // Tail trim: a copyright trailer on the last page, detected by its
    // maximum font size falling strictly below body size.
    if page_texts.len() > 1 {
        if let Some(last_lines) = page_lines.last() {
            let last_max_size = last_lines
                .iter()
                .map(|l| l.max_font_size)
                .fold(0.0_f32, f32::max);
            if last_max_size > 0.0 && last_max_size < body_font_size - 0.05 {
                let last_page_text = page_texts.last().unwrap().trim();
                if !last_page_text.is_empty() {
                    if presentation.trim_end().ends_with(last_page_text) {
                        presentation = strip_trailing(&presentation, last_page_text);
                    } else if q_a.trim_end().ends_with(last_page_text) {
                        q_a = strip_trailing(&q_a, last_page_text);
                    }
                }
            }
        }
    }

    Ok(SegmentedTranscript {
        presentation: presentation.trim().to_string(),
        q_a: q_a.trim().to_string(),
    })
}

fn strip_trailing(haystack: &str, suffix: &str) -> String {
    let trimmed = haystack.trim_end();
    trimmed[..trimmed.len() - suffix.len()].to_string()
}

/// Extract per-text-object spans from a page. Each `PdfPageTextObject`
/// corresponds to one run of text drawn with a single font at a single
/// (unscaled) size — the PDF-native unit this analysis is built on.
fn extract_page_spans(page: &PdfPage) -> Vec<Span> {
    let mut spans = Vec::new();
    for object in page.objects().iter() {
        if let Some(text_object) = object.as_text_object() {
            let text = text_object.text();
            if text.trim().is_empty() {
                continue;
            }
            let font_size = text_object.unscaled_font_size().value;
            let font_name = text_object.font().name();
            let bounds = text_object
                .bounds()
                .map(|b| (b.top().value, b.left().value))
                .unwrap_or((0.0, 0.0));
            spans.push(Span {
                text,
                font_size,
                font_name,
                top: bounds.0,
                left: bounds.1,
            });
        }
    }
    spans
}

/// Group spans sharing a baseline (within a small tolerance) into
/// reading-order lines, left to right.
fn group_into_lines(spans: &[Span]) -> Vec<Line> {
    const TOLERANCE: f32 = 2.0;

    let mut sorted: Vec<&Span> = spans.iter().collect();
    sorted.sort_by(|a, b| b.top.partial_cmp(&a.top).unwrap_or(std::cmp::Ordering::Equal));

    let mut groups: Vec<Vec<&Span>> = Vec::new();
    for span in sorted {
        if let Some(last_group) = groups.last_mut() {
            if (last_group[0].top - span.top).abs() <= TOLERANCE {
                last_group.push(span);
                continue;
            }
        }
        groups.push(vec![span]);
    }

    groups
        .into_iter()
        .map(|mut group| {
            group.sort_by(|a, b| a.left.partial_cmp(&b.left).unwrap_or(std::cmp::Ordering::Equal));
            let text = group.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("");
            let max_font_size = group.iter().map(|s| s.font_size).fold(0.0_f32, f32::max);
            let any_bold = group.iter().any(|s| {
                let lower = s.font_name.to_lowercase();
                lower.contains("bold") || lower.contains("heavy")
            });
            Line {
                text,
                max_font_size,
                any_bold,
            }
        })
        .collect()
}

/// Body font size = statistical mode of rounded (1dp) positive font sizes;
/// falls back to the median when there is no unique mode.
fn compute_body_font_size<'a>(
    spans: impl Iterator<Item = &'a Span>,
    filename: &str,
) -> Result<f32, AppError> {
    let sizes: Vec<i32> = spans
        .map(|s| s.font_size)
        .filter(|&size| size > 0.0)
        .map(|size| (size * 10.0).round() as i32)
        .collect();

    if sizes.is_empty() {
        return Err(AppError::PdfProcessingError {
            filename: filename.to_string(),
            detail: "no text spans with a positive font size".to_string(),
        });
    }

    let mut counts: HashMap<i32, usize> = HashMap::new();
    for size in &sizes {
        *counts.entry(*size).or_insert(0) += 1;
    }
    let max_count = *counts.values().max().unwrap();
    let mut modes: Vec<i32> = counts
        .iter()
        .filter(|(_, &count)| count == max_count)
        .map(|(&size, _)| size)
        .collect();
    modes.sort_unstable();

    let chosen = if modes.len() == 1 {
        modes[0]
    } else {
        let mut sorted_sizes = sizes.clone();
        sorted_sizes.sort_unstable();
        sorted_sizes[sorted_sizes.len() / 2]
    };

    Ok(chosen as f32 / 10.0)
}

/// Scan pages from last to first; return the 0-based index of the first
/// page (from the back) containing a qualifying Q&A heading line.
fn find_qa_heading_page(page_lines: &[Vec<Line>], body_font_size: f32) -> Option<usize> {
    for (idx, lines) in page_lines.iter().enumerate().rev() {
        if lines.iter().any(|line| line_qualifies(line, body_font_size)) {
            return Some(idx);
        }
    }
    None
}

/// A line qualifies as the Q&A heading per SPEC_FULL.md §4.1 condition
/// (a)/(b)/(c).
fn line_qualifies(line: &Line, body_font_size: f32) -> bool {
    const EPS: f32 = 0.05;
    let lower = line.text.to_lowercase();

    for pattern in QA_PATTERNS {
        let Some(idx) = lower.find(pattern) else {
            continue;
        };

        if line.max_font_size > body_font_size + EPS {
            return true;
        }
        if (line.max_font_size - body_font_size).abs() <= EPS {
            if line.any_bold {
                return true;
            }
            let remainder = format!("{}{}", &lower[..idx], &lower[idx + pattern.len()..]);
            let word_count = remainder.split_whitespace().count();
            if word_count <= 3 {
                return true;
            }
        }
    }
    false
}

/// Split `page_text` at the earliest case-insensitive occurrence of any
/// pattern. Returns `(before, from_match_onward)`.
fn split_at_earliest_pattern(page_text: &str) -> (String, String) {
    let lowered = page_text.to_lowercase();
    let earliest = QA_PATTERNS
        .iter()
        .filter_map(|pattern| lowered.find(pattern).map(|idx| idx))
        .min();

    match earliest {
        Some(idx) => (page_text[..idx].to_string(), page_text[idx..].to_string()),
        None => (page_text.to_string(), String::new()),
    }
}

/// Minimum alphabetic character count for a segmented transcript to be
/// considered valid content, rather than noise or a near-empty scan.
/// Supplemental check, not named in SPEC_FULL.md's component design but
/// present in the system it was distilled from
/// (`pdf_processor.py::validate_content`).
const MIN_ALPHABETIC_CHARS: usize = 250;

/// Whether the combined Presentation + Q&A text has enough alphabetic
/// content to be treated as a real transcript rather than a scan artifact.
pub fn has_sufficient_content(segmented: &SegmentedTranscript) -> bool {
    let alphabetic_count = segmented
        .presentation
        .chars()
        .chain(segmented.q_a.chars())
        .filter(|c| c.is_alphabetic())
        .count();
    alphabetic_count >= MIN_ALPHABETIC_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, max_font_size: f32, any_bold: bool) -> Line {
        Line {
            text: text.to_string(),
            max_font_size,
            any_bold,
        }
    }

    #[test]
    fn heading_qualifies_on_larger_font() {
        let l = line("Questions and Answers", 14.0, false);
        assert!(line_qualifies(&l, 10.0));
    }

    #[test]
    fn heading_qualifies_on_same_size_bold() {
        let l = line("Question & Answer", 10.0, true);
        assert!(line_qualifies(&l, 10.0));
    }

    #[test]
    fn heading_qualifies_on_same_size_short_line() {
        let l = line("Questions and Answers Session", 10.0, false);
        assert!(line_qualifies(&l, 10.0));
    }

    #[test]
    fn heading_rejected_when_same_size_plain_and_long() {
        let l = line(
            "This paragraph happens to mention questions and answers in passing discussion",
            10.0,
            false,
        );
        assert!(!line_qualifies(&l, 10.0));
    }

    #[test]
    fn heading_scan_picks_last_qualifying_page() {
        let pages = vec![
            vec![line("Questions and Answers", 14.0, false)],
            vec![line("Some body text", 10.0, false)],
            vec![line("Questions and Answers", 14.0, false)],
        ];
        assert_eq!(find_qa_heading_page(&pages, 10.0), Some(2));
    }

    #[test]
    fn heading_scan_returns_none_when_absent() {
        let pages = vec![vec![line("Just some prose.", 10.0, false)]];
        assert_eq!(find_qa_heading_page(&pages, 10.0), None);
    }

    #[test]
    fn body_font_size_uses_mode() {
        let spans = vec![10.0, 10.0, 10.0, 14.0]
            .into_iter()
            .map(|sz| Span {
                text: "x".into(),
                font_size: sz,
                font_name: "Arial".into(),
                top: 0.0,
                left: 0.0,
            })
            .collect::<Vec<_>>();
        let body = compute_body_font_size(spans.iter(), "doc.pdf").unwrap();
        assert_eq!(body, 10.0);
    }

    #[test]
    fn body_font_size_falls_back_to_median_without_unique_mode() {
        let spans = vec![10.0, 10.0, 14.0, 14.0, 20.0]
            .into_iter()
            .map(|sz| Span {
                text: "x".into(),
                font_size: sz,
                font_name: "Arial".into(),
                top: 0.0,
                left: 0.0,
            })
            .collect::<Vec<_>>();
        // two modes tie (10.0 and 14.0); median of [10,10,14,14,20] is 14.0
        let body = compute_body_font_size(spans.iter(), "doc.pdf").unwrap();
        assert_eq!(body, 14.0);
    }

    #[test]
    fn split_at_earliest_pattern_splits_page_text() {
        let text = "Intro material.\n\nQuestions and Answers\n\nFirst question.";
        let (before, after) = split_at_earliest_pattern(text);
        assert_eq!(before, "Intro material.\n\n");
        assert!(after.starts_with("Questions and Answers"));
    }

    #[test]
    fn split_at_earliest_pattern_with_no_match_returns_whole_text_as_before() {
        let text = "No heading here at all.";
        let (before, after) = split_at_earliest_pattern(text);
        assert_eq!(before, text);
        assert!(after.is_empty());
    }

    #[test]
    fn sufficient_content_respects_minimum_alphabetic_count() {
        let short = SegmentedTranscript {
            presentation: "too short".to_string(),
            q_a: String::new(),
        };
        assert!(!has_sufficient_content(&short));

        let long = SegmentedTranscript {
            presentation: "word ".repeat(100),
            q_a: String::new(),
        };
        assert!(has_sufficient_content(&long));
    }
}
