//! Colloquial phrase standardization
//!
//! Rewrites colloquial phrases to their standard form before scoring, e.g.
//! "还有多少库存" becomes "查询库存数量". Matching is greedy longest-match
//! over a phrase trie; text outside any phrase is kept as-is.

use intent_core::PhraseMapping;

use crate::trie::TrieEntityIndex;

/// Phrase rewriter built from the catalog's phrase mappings
#[derive(Debug, Clone, Default)]
pub struct PhraseStandardizer {
    phrases: TrieEntityIndex<String>,
}

impl PhraseStandardizer {
    pub fn new(mappings: &[PhraseMapping]) -> Self {
        let mut phrases = TrieEntityIndex::new();
        for mapping in mappings {
            phrases.insert(&mapping.colloquial, mapping.standard.clone(), false);
        }
        Self { phrases }
    }

    /// Number of known phrases
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Rewrite every known phrase in `text`
    pub fn standardize(&self, text: &str) -> String {
        if self.phrases.is_empty() {
            return text.to_string();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;

        for m in self.phrases.scan(text) {
            out.extend(&chars[pos..m.start]);
            out.push_str(m.payload);
            pos = m.end;
        }
        out.extend(&chars[pos..]);
        out
    }
}
