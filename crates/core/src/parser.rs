use crate::chunking::ParentChildChunker;
use crate::error::IngestError;
use crate::extractor::extract_page_texts;
use crate::models::RawChunk;
use crate::traits::DocumentParser;
use regex::Regex;
use std::path::Path;

/// (heading pattern, canonical section name) pairs, checked in order.
const SECTION_PATTERNS: [(&str, &str); 11] = [
    (r"(?im)^\s*(?:\d+\.?\s*)?abstract\b", "Abstract"),
    (r"(?im)^\s*(?:\d+\.?\s*)?introduction\b", "Introduction"),
    (r"(?im)^\s*(?:\d+\.?\s*)?related\s+work\b", "Related Work"),
    (r"(?im)^\s*(?:\d+\.?\s*)?background\b", "Background"),
    (
        r"(?im)^\s*(?:\d+\.?\s*)?(?:method(?:ology)?|approach|model|architecture)\b",
        "Method",
    ),
    (r"(?im)^\s*(?:\d+\.?\s*)?algorithm\b", "Algorithm"),
    (
        r"(?im)^\s*(?:\d+\.?\s*)?(?:experiments?|results?|evaluation)\b",
        "Results",
    ),
    (r"(?im)^\s*(?:\d+\.?\s*)?discussion\b", "Discussion"),
    (r"(?im)^\s*(?:\d+\.?\s*)?conclusions?\b", "Conclusion"),
    (r"(?im)^\s*(?:\d+\.?\s*)?references\b", "References"),
    (r"(?im)^\s*(?:\d+\.?\s*)?appendix\b", "Appendix"),
];

/// Layout-aware parser for academic PDFs: extracts page text, tracks the
/// current section across pages, and chunks each section run with the
/// parent/child chunker. Its output is chunk-ready, so ingestion skips the
/// separate chunking stage for PDFs.
pub struct AcademicPdfParser {
    patterns: Vec<(Regex, &'static str)>,
    chunker: ParentChildChunker,
}

impl AcademicPdfParser {
    pub fn new() -> Result<Self, IngestError> {
        let mut patterns = Vec::with_capacity(SECTION_PATTERNS.len());
        for (pattern, section) in SECTION_PATTERNS {
            patterns.push((Regex::new(pattern)?, section));
        }
        Ok(Self {
            patterns,
            chunker: ParentChildChunker::default(),
        })
    }

    fn detect_section(&self, page_text: &str) -> Option<&'static str> {
        // Headings live near the top of a page; scanning the whole page
        // would misfire on inline mentions of "results" etc.
        let head: String = page_text.lines().take(12).collect::<Vec<_>>().join("\n");
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(&head))
            .map(|(_, section)| *section)
    }
}

impl DocumentParser for AcademicPdfParser {
    fn parse(&self, path: &Path) -> Result<Vec<RawChunk>, IngestError> {
        let pages = extract_page_texts(path)?;

        let mut chunks = Vec::new();
        let mut current_section = "General";
        // Contiguous pages of one section are chunked as a single run so
        // parents can span page breaks.
        let mut run_text = String::new();
        let mut run_start: Option<u32> = None;
        let mut run_end: Option<u32> = None;

        for page in &pages {
            if let Some(section) = self.detect_section(&page.text) {
                if section != current_section {
                    if !run_text.trim().is_empty() {
                        chunks.extend(self.chunker.chunk(
                            &run_text,
                            current_section,
                            run_start,
                            run_end,
                        ));
                    }
                    run_text.clear();
                    run_start = None;
                    current_section = section;
                }
            }

            run_start.get_or_insert(page.number);
            run_end = Some(page.number);
            if !run_text.is_empty() {
                run_text.push_str("\n\n");
            }
            run_text.push_str(&page.text);
        }

        if !run_text.trim().is_empty() {
            chunks.extend(
                self.chunker
                    .chunk(&run_text, current_section, run_start, run_end),
            );
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_detection_matches_numbered_headings() {
        let parser = AcademicPdfParser::new().expect("parser");
        assert_eq!(parser.detect_section("3. Methodology\nwe do things"), Some("Method"));
        assert_eq!(parser.detect_section("Abstract\nThis paper..."), Some("Abstract"));
        assert_eq!(parser.detect_section("5 Results\ntable 1 shows"), Some("Results"));
        assert_eq!(parser.detect_section("plain body text only"), None);
    }

    #[test]
    fn section_detection_ignores_deep_inline_mentions() {
        let parser = AcademicPdfParser::new().expect("parser");
        let body = format!("{}\nthe results were good", "filler line\n".repeat(15));
        assert_eq!(parser.detect_section(&body), None);
    }

    #[test]
    fn missing_pdf_is_an_error() {
        let parser = AcademicPdfParser::new().expect("parser");
        assert!(parser.parse(Path::new("/nonexistent/file.pdf")).is_err());
    }
}
