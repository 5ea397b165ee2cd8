//! Query intent classification.
//!
//! Intents are detected with keyword patterns and mapped to the document
//! sections worth searching first. Classification never fails at query
//! time; pattern compilation happens once at construction.

use regex::Regex;

use crate::error::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Formula,
    Overview,
    Metrics,
    Limitations,
    Methodology,
    General,
}

impl QueryIntent {
    /// Sections to prioritize for this intent, empty for [`QueryIntent::General`].
    ///
    /// Targets are matched case-insensitively as substrings of the chunk's
    /// section name, so "method" also covers "Methodology".
    pub fn target_sections(self) -> &'static [&'static str] {
        match self {
            QueryIntent::Formula => &["method", "algorithm", "background"],
            QueryIntent::Overview => &["abstract", "introduction", "conclusion"],
            QueryIntent::Metrics => &["results", "discussion"],
            QueryIntent::Limitations => &["discussion", "conclusion"],
            QueryIntent::Methodology => &["method", "algorithm"],
            QueryIntent::General => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryIntent::Formula => "formula",
            QueryIntent::Overview => "overview",
            QueryIntent::Metrics => "metrics",
            QueryIntent::Limitations => "limitations",
            QueryIntent::Methodology => "methodology",
            QueryIntent::General => "general",
        }
    }
}

pub struct IntentClassifier {
    rules: Vec<(QueryIntent, Regex)>,
}

impl IntentClassifier {
    pub fn new() -> Result<Self, RetrievalError> {
        // Ordered by specificity; the first matching rule wins.
        let table: &[(QueryIntent, &str)] = &[
            (
                QueryIntent::Formula,
                r"(?i)\b(formula|equation|derivation|proof|theorem|notation)\b",
            ),
            (
                QueryIntent::Limitations,
                r"(?i)\b(limitation|weakness|drawback|shortcoming|caveat|fail(s|ure)?s?\b)",
            ),
            (
                QueryIntent::Metrics,
                r"(?i)\b(accuracy|f1|bleu|rouge|perplexity|benchmark|baseline|score[sd]?|metric|performance|result)s?\b",
            ),
            (
                QueryIntent::Methodology,
                r"(?i)\b(method(ology)?|approach|architecture|algorithm|implementation|training|pipeline|setup)\b",
            ),
            (
                QueryIntent::Overview,
                r"(?i)\b(summar(y|ize|ise)|overview|about|main (idea|contribution)|tl;?dr|gist)\b",
            ),
        ];

        let mut rules = Vec::with_capacity(table.len());
        for (intent, pattern) in table {
            rules.push((*intent, Regex::new(pattern)?));
        }
        Ok(Self { rules })
    }

    pub fn classify(&self, query: &str) -> QueryIntent {
        for (intent, pattern) in &self.rules {
            if pattern.is_match(query) {
                return *intent;
            }
        }
        QueryIntent::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new().unwrap()
    }

    #[test]
    fn detects_each_intent() {
        let c = classifier();
        assert_eq!(c.classify("what is the attention equation"), QueryIntent::Formula);
        assert_eq!(c.classify("summarize this paper"), QueryIntent::Overview);
        assert_eq!(c.classify("what accuracy did they reach"), QueryIntent::Metrics);
        assert_eq!(
            c.classify("what are the limitations of the model"),
            QueryIntent::Limitations
        );
        assert_eq!(
            c.classify("describe the training approach"),
            QueryIntent::Methodology
        );
    }

    #[test]
    fn unmatched_queries_are_general() {
        let c = classifier();
        assert_eq!(c.classify("tell me something interesting"), QueryIntent::General);
        assert!(QueryIntent::General.target_sections().is_empty());
    }

    #[test]
    fn first_matching_rule_wins() {
        let c = classifier();
        // Mentions both a formula and a metric; formula rules run first.
        assert_eq!(
            c.classify("equation behind the f1 score"),
            QueryIntent::Formula
        );
    }

    #[test]
    fn targeted_sections_are_lowercase_section_names() {
        for intent in [
            QueryIntent::Formula,
            QueryIntent::Overview,
            QueryIntent::Metrics,
            QueryIntent::Limitations,
            QueryIntent::Methodology,
        ] {
            assert!(!intent.target_sections().is_empty());
            for section in intent.target_sections() {
                assert_eq!(*section, section.to_lowercase());
            }
        }
    }
}
