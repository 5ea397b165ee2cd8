use crate::models::{Importance, RawChunk};

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Pack paragraphs into pieces of at most `max_chars`, splitting oversized
/// paragraphs on char windows as a last resort.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let paragraphs = text
        .split("\n\n")
        .map(|paragraph| normalize_whitespace(paragraph))
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut packed = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current = paragraph;
            continue;
        }
        if current.len() + paragraph.len() + 1 <= max_chars {
            current.push(' ');
            current.push_str(&paragraph);
        } else {
            packed.push(std::mem::replace(&mut current, paragraph));
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }

    let mut pieces = Vec::new();
    for piece in packed {
        if piece.len() <= max_chars {
            pieces.push(piece);
            continue;
        }
        let chars: Vec<char> = piece.chars().collect();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + max_chars).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let window = window.trim().to_string();
            if !window.is_empty() {
                pieces.push(window);
            }
            start = end;
        }
    }

    pieces
}

/// Classify chunk importance from section and content heuristics.
pub fn classify_importance(text: &str, section: &str) -> Importance {
    let text_lower = text.to_lowercase();
    let section_lower = section.to_lowercase();
    let lead: String = text_lower.chars().take(500).collect();

    const CORE_SECTIONS: [&str; 3] = ["abstract", "conclusion", "summary"];
    const CORE_KEYWORDS: [&str; 6] = [
        "key finding",
        "contribution",
        "main result",
        "we propose",
        "we present",
        "novel",
    ];
    if CORE_SECTIONS.iter().any(|kw| section_lower.contains(kw))
        || CORE_KEYWORDS.iter().any(|kw| lead.contains(kw))
    {
        return Importance::CoreContribution;
    }

    const METHOD_SECTIONS: [&str; 3] = ["method", "approach", "algorithm"];
    const METHOD_KEYWORDS: [&str; 5] = [
        "method",
        "algorithm",
        "architecture",
        "procedure",
        "implementation",
    ];
    if METHOD_SECTIONS.iter().any(|kw| section_lower.contains(kw))
        || METHOD_KEYWORDS.iter().any(|kw| text_lower.contains(kw))
    {
        return Importance::Methodology;
    }

    const EXPERIMENT_SECTIONS: [&str; 3] = ["result", "experiment", "evaluation"];
    const EXPERIMENT_KEYWORDS: [&str; 6] = [
        "experiment",
        "dataset",
        "benchmark",
        "accuracy",
        "ablation",
        "baseline",
    ];
    if EXPERIMENT_SECTIONS
        .iter()
        .any(|kw| section_lower.contains(kw))
        || EXPERIMENT_KEYWORDS.iter().any(|kw| text_lower.contains(kw))
    {
        return Importance::Experiment;
    }

    const BACKGROUND_SECTIONS: [&str; 3] = ["introduction", "related work", "background"];
    if BACKGROUND_SECTIONS
        .iter()
        .any(|kw| section_lower.contains(kw))
    {
        return Importance::Background;
    }

    Importance::General
}

/// Small-to-big chunking: large parent passages for context, small child
/// chunks for retrieval precision. Children carry the full parent text so
/// query-time context expansion needs no second lookup.
#[derive(Debug, Clone, Copy)]
pub struct ParentChildChunker {
    pub parent_chars: usize,
    pub child_chars: usize,
    pub min_chars: usize,
}

impl Default for ParentChildChunker {
    fn default() -> Self {
        Self {
            parent_chars: 1_024,
            child_chars: 256,
            min_chars: 24,
        }
    }
}

impl ParentChildChunker {
    pub fn chunk(
        &self,
        text: &str,
        section: &str,
        page_start: Option<u32>,
        page_end: Option<u32>,
    ) -> Vec<RawChunk> {
        let mut chunks = Vec::new();

        for parent in split_text(text, self.parent_chars) {
            if parent.len() < self.min_chars {
                continue;
            }
            let children = split_text(&parent, self.child_chars);
            let lone_child = children.len() == 1;

            for child in children {
                if child.len() < self.min_chars && !lone_child {
                    continue;
                }
                let importance = classify_importance(&child, section);
                chunks.push(RawChunk {
                    text: child,
                    section: section.to_string(),
                    importance,
                    page_start,
                    page_end,
                    // A parent that fits in one child gains nothing from
                    // the indirection.
                    is_child: !lone_child,
                    parent_content: (!lone_child).then(|| parent.clone()),
                });
            }
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn split_packs_small_paragraphs_together() {
        let text = "one two\n\nthree four\n\nfive six";
        let pieces = split_text(text, 40);
        assert_eq!(pieces, vec!["one two three four five six".to_string()]);
    }

    #[test]
    fn split_windows_oversized_paragraphs() {
        let text = "a".repeat(250);
        let pieces = split_text(&text, 100);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|piece| piece.len() <= 100));
    }

    #[test]
    fn children_carry_parent_content() {
        let chunker = ParentChildChunker {
            parent_chars: 120,
            child_chars: 40,
            min_chars: 8,
        };
        let text = "The proposed method uses a two stage pipeline. \
                    The first stage filters candidates aggressively. \
                    The second stage rescores the survivors carefully.";
        let chunks = chunker.chunk(text, "Method", Some(3), Some(3));

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            if chunk.is_child {
                let parent = chunk.parent_content.as_deref().expect("child has parent");
                assert!(parent.contains(chunk.text.trim()));
            }
            assert_eq!(chunk.section, "Method");
            assert_eq!(chunk.page_start, Some(3));
        }
    }

    #[test]
    fn single_child_parents_stay_flat() {
        let chunker = ParentChildChunker::default();
        let chunks = chunker.chunk("Just one short paragraph here.", "General", None, None);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].is_child);
        assert!(chunks[0].parent_content.is_none());
    }

    #[test]
    fn importance_heuristics_follow_section_first() {
        assert_eq!(
            classify_importance("We summarize the study.", "Abstract"),
            Importance::CoreContribution
        );
        assert_eq!(
            classify_importance("The algorithm runs in two passes.", "Method"),
            Importance::Methodology
        );
        assert_eq!(
            classify_importance("Accuracy on the benchmark improved.", "Results"),
            Importance::Experiment
        );
        assert_eq!(
            classify_importance("Prior studies looked at this.", "Related Work"),
            Importance::Background
        );
        assert_eq!(
            classify_importance("Completely unremarkable text.", "General"),
            Importance::General
        );
    }
}
