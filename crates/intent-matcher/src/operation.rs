//! Lexical operation-type detection
//!
//! Indicator words ("查询", "新增", "修改", "删除", ...) reveal whether an
//! utterance asks to read, create, update or delete something. The lexicon
//! comes from the catalog's `[operation_indicators]` table.
//!
//! CJK indicators are matched as substrings. ASCII indicators must stand
//! as whole words, so "add" does not fire inside "address"; CJK characters
//! next to an ASCII word count as a boundary ("show库存").

use regex::Regex;

use intent_core::{ConfigError, OperationIndicators, OperationType};

#[derive(Debug, Clone)]
struct OperationRule {
    operation: OperationType,
    /// Lowercased non-ASCII indicators
    substrings: Vec<String>,
    /// Alternation over the ASCII indicators
    words: Option<Regex>,
}

impl OperationRule {
    fn matches(&self, lowered: &str) -> bool {
        self.substrings.iter().any(|w| lowered.contains(w.as_str()))
            || self.words.as_ref().is_some_and(|re| re.is_match(lowered))
    }
}

/// Compiled operation indicator lexicon
#[derive(Debug, Clone)]
pub struct OperationDetector {
    rules: Vec<OperationRule>,
}

impl OperationDetector {
    pub fn new(indicators: &OperationIndicators) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(4);

        for (operation, list) in indicators.lists() {
            let (ascii, other): (Vec<String>, Vec<String>) = list
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .partition(|w| w.is_ascii());

            let words = if ascii.is_empty() {
                None
            } else {
                let alternation = ascii
                    .iter()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join("|");
                let pattern = format!("(?:^|[^a-z0-9_])(?:{alternation})(?:[^a-z0-9_]|$)");
                let re = Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
                    key: format!("operation_indicators.{operation}"),
                    value: e.to_string(),
                })?;
                Some(re)
            };

            rules.push(OperationRule {
                operation,
                substrings: other,
                words,
            });
        }

        Ok(Self { rules })
    }

    /// Operation types whose indicators occur in any of the texts
    pub fn detect(&self, texts: &[&str]) -> Vec<OperationType> {
        let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();

        self.rules
            .iter()
            .filter(|rule| lowered.iter().any(|t| rule.matches(t)))
            .map(|rule| rule.operation)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> OperationDetector {
        OperationDetector::new(&OperationIndicators::default()).unwrap()
    }

    #[test]
    fn test_detect_query() {
        assert_eq!(detector().detect(&["还有多少库存"]), vec![OperationType::Query]);
    }

    #[test]
    fn test_detect_multiple_and_none() {
        let ops = detector().detect(&["删除批次", "Update the record"]);
        assert_eq!(ops, vec![OperationType::Update, OperationType::Delete]);
        assert!(detector().detect(&["面粉"]).is_empty());
    }

    #[test]
    fn test_ascii_indicator_needs_word_boundary() {
        let d = detector();
        assert_eq!(
            d.detect(&["show the supplier address"]),
            vec![OperationType::Query]
        );
        assert!(d.detect(&["renewal changelog"]).is_empty());
        assert_eq!(d.detect(&["Add a batch"]), vec![OperationType::Create]);
        assert_eq!(d.detect(&["how many"]), vec![OperationType::Query]);
    }

    #[test]
    fn test_ascii_indicator_next_to_cjk() {
        assert_eq!(detector().detect(&["show库存"]), vec![OperationType::Query]);
    }

    #[test]
    fn test_custom_lexicon() {
        let indicators = OperationIndicators {
            query: vec!["瞅瞅".to_string()],
            create: vec!["c++".to_string()],
            update: Vec::new(),
            delete: Vec::new(),
        };
        let d = OperationDetector::new(&indicators).unwrap();
        assert_eq!(d.detect(&["瞅瞅库存"]), vec![OperationType::Query]);
        assert!(d.detect(&["查询库存"]).is_empty());
        // Regex metacharacters are escaped
        assert_eq!(d.detect(&["learn c++ today"]), vec![OperationType::Create]);
    }
}
