//! Generic prefix tree for longest-match term recognition
//!
//! Edges are keyed by `char`, so CJK terms are walked one code point at a
//! time and every offset reported by the index is a char offset. ASCII
//! letters are folded to lowercase on insert and on lookup.
//!
//! [`TrieEntityIndex::longest_matches_in`] runs over an Aho-Corasick
//! automaton compiled from the stored terms on first use after an insert,
//! so one pass costs the text length plus the hits reported.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use aho_corasick::AhoCorasick;
use once_cell::sync::OnceCell;
use tracing::warn;

/// Confidence of a hit on a canonical term
pub const CANONICAL_CONFIDENCE: f32 = 1.0;

/// Confidence of a hit on an alias
pub const ALIAS_CONFIDENCE: f32 = 0.9;

// ============================================================================
// Process-wide statistics
// ============================================================================

static TOTAL_SCANS: AtomicU64 = AtomicU64::new(0);
static TOTAL_MATCHES: AtomicU64 = AtomicU64::new(0);

/// Scan counters shared by every index in the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrieStatistics {
    pub total_scans: u64,
    pub total_matches: u64,
}

/// Current scan counters
pub fn statistics() -> TrieStatistics {
    TrieStatistics {
        total_scans: TOTAL_SCANS.load(Ordering::Relaxed),
        total_matches: TOTAL_MATCHES.load(Ordering::Relaxed),
    }
}

/// Reset the scan counters
pub fn reset_statistics() {
    TOTAL_SCANS.store(0, Ordering::Relaxed);
    TOTAL_MATCHES.store(0, Ordering::Relaxed);
}

fn record_scan(matches: usize) {
    TOTAL_SCANS.fetch_add(1, Ordering::Relaxed);
    TOTAL_MATCHES.fetch_add(matches as u64, Ordering::Relaxed);
}

// ============================================================================
// Index
// ============================================================================

#[derive(Debug, Clone)]
struct Terminal<P> {
    payload: P,
    is_alias: bool,
}

#[derive(Debug, Clone)]
struct TrieNode<P> {
    children: HashMap<char, TrieNode<P>>,
    terminal: Option<Terminal<P>>,
}

impl<P> TrieNode<P> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            terminal: None,
        }
    }
}

/// A terminal hit found while scanning text
#[derive(Debug, Clone, PartialEq)]
pub struct TrieMatch<'a, P> {
    /// Start offset (inclusive, in chars)
    pub start: usize,
    /// End offset (exclusive, in chars)
    pub end: usize,
    /// Surface text as it appears in the scanned input
    pub text: String,
    pub payload: &'a P,
    pub is_alias: bool,
    pub confidence: f32,
}

/// Prefix tree mapping terms to payloads
///
/// For alias terms the payload is the canonical entry's payload, which acts
/// as the back-reference to the canonical normalized name.
#[derive(Debug, Clone)]
pub struct TrieEntityIndex<P> {
    root: TrieNode<P>,
    terms: usize,
    /// Compiled on demand, dropped by `insert`
    automaton: OnceCell<Option<Automaton>>,
}

/// Overlapping-match automaton over every stored term
#[derive(Debug, Clone)]
struct Automaton {
    matcher: AhoCorasick,
    /// Folded term per pattern id
    terms: Vec<String>,
}

impl<P> Default for TrieEntityIndex<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn fold(c: char) -> char {
    c.to_ascii_lowercase()
}

/// Every terminal path below `node`, folded
fn collect_terms<P>(node: &TrieNode<P>, prefix: &mut String, out: &mut Vec<String>) {
    if node.terminal.is_some() {
        out.push(prefix.clone());
    }
    for (c, child) in &node.children {
        prefix.push(*c);
        collect_terms(child, prefix, out);
        prefix.pop();
    }
}

impl<P> TrieEntityIndex<P> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            terms: 0,
            automaton: OnceCell::new(),
        }
    }

    /// Insert a term
    ///
    /// Returns `false` when the term was ignored: empty terms, and alias
    /// inserts that would overwrite a canonical terminal.
    pub fn insert(&mut self, term: &str, payload: P, is_alias: bool) -> bool {
        if term.is_empty() {
            return false;
        }

        self.automaton = OnceCell::new();

        let mut node = &mut self.root;
        for c in term.chars() {
            node = node.children.entry(fold(c)).or_insert_with(TrieNode::new);
        }

        let existing_alias = node.terminal.as_ref().map(|t| t.is_alias);
        match existing_alias {
            Some(false) if is_alias => false,
            Some(_) => {
                node.terminal = Some(Terminal { payload, is_alias });
                true
            }
            None => {
                node.terminal = Some(Terminal { payload, is_alias });
                self.terms += 1;
                true
            }
        }
    }

    fn terminal(&self, term: &str) -> Option<&Terminal<P>> {
        let mut node = &self.root;
        for c in term.chars() {
            node = node.children.get(&fold(c))?;
        }
        node.terminal.as_ref()
    }

    /// Exact lookup of a whole term
    pub fn get(&self, term: &str) -> Option<&P> {
        self.terminal(term).map(|t| &t.payload)
    }

    pub fn contains(&self, term: &str) -> bool {
        self.get(term).is_some()
    }

    /// Number of distinct terms stored
    pub fn len(&self) -> usize {
        self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms == 0
    }

    /// Longest terminal starting at `start`, as (end, terminal)
    fn longest_at<'a>(&'a self, chars: &[char], start: usize) -> Option<(usize, &'a Terminal<P>)> {
        let mut node = &self.root;
        let mut best = None;

        for (i, c) in chars.iter().enumerate().skip(start) {
            match node.children.get(&fold(*c)) {
                Some(next) => {
                    node = next;
                    if let Some(terminal) = &node.terminal {
                        best = Some((i + 1, terminal));
                    }
                }
                None => break,
            }
        }

        best
    }

    fn to_match<'a>(
        chars: &[char],
        start: usize,
        end: usize,
        terminal: &'a Terminal<P>,
    ) -> TrieMatch<'a, P> {
        TrieMatch {
            start,
            end,
            text: chars[start..end].iter().collect(),
            payload: &terminal.payload,
            is_alias: terminal.is_alias,
            confidence: if terminal.is_alias {
                ALIAS_CONFIDENCE
            } else {
                CANONICAL_CONFIDENCE
            },
        }
    }

    fn automaton(&self) -> Option<&Automaton> {
        self.automaton
            .get_or_init(|| {
                let mut terms = Vec::with_capacity(self.terms);
                collect_terms(&self.root, &mut String::new(), &mut terms);
                if terms.is_empty() {
                    return None;
                }
                // Terms are stored folded, so ASCII case folding on the
                // automaton side matches the trie's lookup rules
                match AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(&terms)
                {
                    Ok(matcher) => Some(Automaton { matcher, terms }),
                    Err(e) => {
                        warn!(error = %e, terms = terms.len(), "Failed to build term automaton");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// For every start offset, the single longest terminal match
    ///
    /// Matches starting at different offsets may overlap. Results are
    /// ordered by start offset.
    pub fn longest_matches_in(&self, text: &str) -> Vec<TrieMatch<'_, P>> {
        let chars: Vec<char> = text.chars().collect();
        let matches = match self.automaton() {
            Some(automaton) => self.overlapping_longest(automaton, text, &chars),
            None if self.is_empty() => Vec::new(),
            // Automaton unavailable: walk the trie from every offset
            None => (0..chars.len())
                .filter_map(|start| {
                    self.longest_at(&chars, start)
                        .map(|(end, terminal)| Self::to_match(&chars, start, end, terminal))
                })
                .collect(),
        };

        record_scan(matches.len());
        matches
    }

    fn overlapping_longest<'a>(
        &'a self,
        automaton: &Automaton,
        text: &str,
        chars: &[char],
    ) -> Vec<TrieMatch<'a, P>> {
        // byte offset -> char offset, valid at char boundaries
        let mut char_at = vec![0; text.len() + 1];
        for (idx, (byte, _)) in text.char_indices().enumerate() {
            char_at[byte] = idx;
        }
        char_at[text.len()] = chars.len();

        // start char -> (end char, pattern id) of the longest hit
        let mut longest: Vec<Option<(usize, usize)>> = vec![None; chars.len()];
        for hit in automaton.matcher.find_overlapping_iter(text) {
            let start = char_at[hit.start()];
            let end = char_at[hit.end()];
            match longest[start] {
                Some((best, _)) if best >= end => {}
                _ => longest[start] = Some((end, hit.pattern().as_usize())),
            }
        }

        longest
            .into_iter()
            .enumerate()
            .filter_map(|(start, hit)| {
                let (end, pattern) = hit?;
                let terminal = self.terminal(&automaton.terms[pattern])?;
                Some(Self::to_match(chars, start, end, terminal))
            })
            .collect()
    }

    /// Greedy left-to-right scan returning non-overlapping longest matches
    pub fn scan(&self, text: &str) -> Vec<TrieMatch<'_, P>> {
        let chars: Vec<char> = text.chars().collect();
        let mut matches = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            match self.longest_at(&chars, pos) {
                Some((end, terminal)) => {
                    matches.push(Self::to_match(&chars, pos, end, terminal));
                    pos = end;
                }
                None => pos += 1,
            }
        }

        record_scan(matches.len());
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TrieEntityIndex<&'static str> {
        let mut trie = TrieEntityIndex::new();
        trie.insert("北京", "北京", false);
        trie.insert("北京市", "北京", true);
        trie.insert("京", "北京", true);
        trie.insert("GMV", "成交总额", true);
        trie.insert("销售额", "销售额", false);
        trie
    }

    #[test]
    fn test_longest_match_per_offset() {
        let trie = index();
        let matches = trie.longest_matches_in("北京市销售额");

        let spans: Vec<(usize, usize)> = matches.iter().map(|m| (m.start, m.end)).collect();
        // "北京市" at 0, "京" at 1 (only match starting there), "销售额" at 3
        assert_eq!(spans, vec![(0, 3), (1, 2), (3, 6)]);
        assert_eq!(*matches[0].payload, "北京");
        assert!(matches[0].is_alias);
        assert_eq!(matches[0].confidence, ALIAS_CONFIDENCE);
    }

    #[test]
    fn test_longest_matches_after_insert() {
        let mut trie = index();
        assert_eq!(trie.longest_matches_in("华东销售额").len(), 1);

        // The compiled automaton must pick up later inserts
        trie.insert("华东", "华东", false);
        trie.insert("华东区", "华东", true);
        let matches = trie.longest_matches_in("华东区GMV销售额");
        let spans: Vec<(usize, usize)> = matches.iter().map(|m| (m.start, m.end)).collect();
        assert_eq!(spans, vec![(0, 3), (3, 6), (6, 9)]);
        assert_eq!(matches[1].text, "GMV");
        assert_eq!(*matches[1].payload, "成交总额");
    }

    #[test]
    fn test_scan_is_non_overlapping() {
        let trie = index();
        let matches = trie.scan("北京市销售额");
        let texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["北京市", "销售额"]);
        assert_eq!(matches[1].confidence, CANONICAL_CONFIDENCE);
    }

    #[test]
    fn test_ascii_folding() {
        let trie = index();
        let matches = trie.scan("看下gmv");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "gmv");
        assert_eq!((matches[0].start, matches[0].end), (2, 5));
        assert!(trie.contains("Gmv"));
    }

    #[test]
    fn test_alias_does_not_downgrade_canonical() {
        let mut trie = TrieEntityIndex::new();
        assert!(trie.insert("华东", "华东", false));
        assert!(!trie.insert("华东", "东部", true));
        assert_eq!(trie.get("华东"), Some(&"华东"));
        assert_eq!(trie.len(), 1);

        let matches = trie.scan("华东");
        assert!(!matches[0].is_alias);
    }

    #[test]
    fn test_canonical_replaces_alias() {
        let mut trie = TrieEntityIndex::new();
        trie.insert("华南", "南方", true);
        trie.insert("华南", "华南", false);
        assert_eq!(trie.get("华南"), Some(&"华南"));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let trie = index();
        assert!(trie.scan("").is_empty());
        assert!(trie.longest_matches_in("").is_empty());
        assert!(!TrieEntityIndex::<()>::new().insert("", (), false));
    }

    #[test]
    fn test_statistics_advance() {
        let trie = index();
        let before = statistics();
        trie.scan("北京销售额");
        let after = statistics();
        // Other tests scan concurrently, so only lower bounds hold
        assert!(after.total_scans >= before.total_scans + 1);
        assert!(after.total_matches >= before.total_matches + 2);
    }
}
