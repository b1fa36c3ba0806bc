//! Dictionary-backed entity recognizers
//!
//! Each recognizer owns an immutable [`DictionarySnapshot`] (trie plus
//! compiled patterns) behind `RwLock<Arc<_>>`. Readers clone the `Arc` and
//! work on a consistent snapshot; `reload()` builds a fresh snapshot off to
//! the side and swaps it in one write. `stage_reload()` splits the two steps
//! so a pipeline can swap several domains together.

use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use regex::Regex;
use tracing::{info, warn};

use intent_core::{ConfigError, EntityMatch, EntityType};

use crate::dictionary::{DictionaryFile, DictionarySource};
use crate::numeral;
use crate::trie::TrieEntityIndex;
use crate::{EntityRecognizer, StagedReload};

/// Confidence of a numbered sub-department match
const SUB_DEPARTMENT_CONFIDENCE: f32 = 0.95;

/// Extra validation run on a dictionary before it becomes active
pub type DictionaryValidator = fn(&DictionaryFile) -> Result<(), ConfigError>;

// ============================================================================
// Snapshot
// ============================================================================

/// Payload stored at every trie terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermPayload {
    pub normalized_name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    regex: Regex,
    normalized: Option<String>,
    parent: Option<String>,
    confidence: f32,
}

/// Numbered sub-departments ("销售三部") built from department stems
#[derive(Debug, Clone)]
struct SubDepartmentRule {
    regex: Regex,
    /// stem -> canonical department
    parents: Vec<(String, String)>,
}

/// Immutable recognition state for one domain
#[derive(Debug, Clone)]
pub struct DictionarySnapshot {
    domain: EntityType,
    trie: TrieEntityIndex<TermPayload>,
    patterns: Vec<CompiledPattern>,
    sub_departments: Option<SubDepartmentRule>,
}

impl DictionarySnapshot {
    /// Build a snapshot, compiling every pattern
    pub fn build(file: &DictionaryFile) -> Result<Self, ConfigError> {
        let mut trie = TrieEntityIndex::new();

        for term in &file.terms {
            let payload = TermPayload {
                normalized_name: term.name.clone(),
                parent: term.parent.clone(),
            };
            trie.insert(&term.name, payload.clone(), false);
            for alias in &term.aliases {
                trie.insert(alias, payload.clone(), true);
            }
        }

        let patterns = file
            .patterns
            .iter()
            .map(|p| {
                let regex = Regex::new(&p.regex).map_err(|e| ConfigError::InvalidValue {
                    key: format!("{}.patterns.regex", file.domain),
                    value: format!("{}: {e}", p.regex),
                })?;
                Ok(CompiledPattern {
                    regex,
                    normalized: p.normalized.clone(),
                    parent: p.parent.clone(),
                    confidence: p.confidence,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let sub_departments = if file.domain == EntityType::Department {
            build_sub_department_rule(file)?
        } else {
            None
        };

        Ok(Self {
            domain: file.domain,
            trie,
            patterns,
            sub_departments,
        })
    }

    pub fn domain(&self) -> EntityType {
        self.domain
    }

    /// Number of terms (canonical and alias) in the trie
    pub fn term_count(&self) -> usize {
        self.trie.len()
    }

    /// Trie pass followed by the pattern pass
    pub fn recognize(&self, text: &str) -> Vec<EntityMatch> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let trie_matches: Vec<EntityMatch> = self
            .trie
            .scan(text)
            .into_iter()
            .map(|m| EntityMatch {
                text: m.text,
                start: m.start,
                end: m.end,
                entity_type: self.domain,
                normalized_name: m.payload.normalized_name.clone(),
                parent: m.payload.parent.clone(),
                confidence: m.confidence,
                matched_via_alias: m.is_alias,
                value: None,
            })
            .collect();

        let mut pattern_matches = Vec::new();
        for pattern in &self.patterns {
            for caps in pattern.regex.captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                if whole.as_str().is_empty() {
                    continue;
                }
                let normalized = match &pattern.normalized {
                    Some(template) if template.contains('$') => {
                        let mut out = String::new();
                        caps.expand(template, &mut out);
                        out
                    }
                    Some(literal) => literal.clone(),
                    None => whole.as_str().to_string(),
                };
                pattern_matches.push(EntityMatch {
                    text: whole.as_str().to_string(),
                    start: char_offset(text, whole.start()),
                    end: char_offset(text, whole.end()),
                    entity_type: self.domain,
                    normalized_name: normalized,
                    parent: pattern.parent.clone(),
                    confidence: pattern.confidence,
                    matched_via_alias: false,
                    value: None,
                });
            }
        }

        if let Some(rule) = &self.sub_departments {
            pattern_matches.extend(rule.find(text, self.domain));
        }

        merge_pattern_matches(trie_matches, pattern_matches)
    }
}

fn build_sub_department_rule(file: &DictionaryFile) -> Result<Option<SubDepartmentRule>, ConfigError> {
    let mut parents: Vec<(String, String)> = file
        .terms
        .iter()
        .filter_map(|t| {
            let stem = t.name.strip_suffix('部')?;
            (stem.chars().count() >= 2).then(|| (stem.to_string(), t.name.clone()))
        })
        .collect();

    if parents.is_empty() {
        return Ok(None);
    }

    // Longer stems first so the alternation prefers them
    parents.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then(a.0.cmp(&b.0)));
    parents.dedup_by(|a, b| a.0 == b.0);

    let stems: Vec<String> = parents.iter().map(|(s, _)| regex::escape(s)).collect();
    let pattern = format!(
        "({})([0-9]+|[零一二两三四五六七八九十百]+)部",
        stems.join("|")
    );
    let regex = Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
        key: "department.sub_departments".to_string(),
        value: e.to_string(),
    })?;

    Ok(Some(SubDepartmentRule { regex, parents }))
}

impl SubDepartmentRule {
    fn find(&self, text: &str, domain: EntityType) -> Vec<EntityMatch> {
        let mut matches = Vec::new();

        for caps in self.regex.captures_iter(text) {
            let (Some(whole), Some(stem), Some(number)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let Some(n) = numeral::parse_count(number.as_str()).filter(|n| *n > 0) else {
                continue;
            };
            let Some((_, parent)) = self.parents.iter().find(|(s, _)| s == stem.as_str()) else {
                continue;
            };

            matches.push(EntityMatch {
                text: whole.as_str().to_string(),
                start: char_offset(text, whole.start()),
                end: char_offset(text, whole.end()),
                entity_type: domain,
                normalized_name: format!("{}{}部", stem.as_str(), numeral::to_chinese(n)),
                parent: Some(parent.clone()),
                confidence: SUB_DEPARTMENT_CONFIDENCE,
                matched_via_alias: false,
                value: None,
            });
        }

        matches
    }
}

/// Char offset of a byte offset into `text`
pub(crate) fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// Layer pattern matches over trie matches
///
/// A pattern match survives only if it overlaps no trie match, or if it
/// strictly contains every trie match it overlaps, in which case those trie
/// matches are dropped. Equal spans, partial overlaps and patterns inside a
/// trie match are discarded. Patterns are taken left to right, longest
/// first, and never overlap each other.
pub(crate) fn merge_pattern_matches(
    trie_matches: Vec<EntityMatch>,
    mut pattern_matches: Vec<EntityMatch>,
) -> Vec<EntityMatch> {
    pattern_matches.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(b.char_len().cmp(&a.char_len()))
            .then(b.confidence.total_cmp(&a.confidence))
    });

    let mut kept = trie_matches;
    let mut accepted: Vec<EntityMatch> = Vec::new();

    for pattern in pattern_matches {
        if accepted.iter().any(|a| a.overlaps(&pattern)) {
            continue;
        }

        let replaces_all = kept
            .iter()
            .filter(|t| t.overlaps(&pattern))
            .all(|t| pattern.strictly_contains(t));

        if replaces_all {
            kept.retain(|t| !t.overlaps(&pattern));
            accepted.push(pattern);
        }
    }

    kept.extend(accepted);
    kept.sort_by_key(|m| m.start);
    kept
}

// ============================================================================
// Recognizer
// ============================================================================

/// Recognizer for one dictionary domain (region, department, metric, ...)
pub struct DictionaryRecognizer {
    domain: EntityType,
    source: Arc<dyn DictionarySource>,
    validator: Option<DictionaryValidator>,
    snapshot: RwLock<Arc<DictionarySnapshot>>,
}

impl DictionaryRecognizer {
    /// Load the domain dictionary and build the initial snapshot
    pub fn new(domain: EntityType, source: Arc<dyn DictionarySource>) -> Result<Self, ConfigError> {
        Self::build(domain, source, None)
    }

    /// Same as [`DictionaryRecognizer::new`] with an extra validation step,
    /// applied on startup and on every reload
    pub fn with_validator(
        domain: EntityType,
        source: Arc<dyn DictionarySource>,
        validator: DictionaryValidator,
    ) -> Result<Self, ConfigError> {
        Self::build(domain, source, Some(validator))
    }

    fn build(
        domain: EntityType,
        source: Arc<dyn DictionarySource>,
        validator: Option<DictionaryValidator>,
    ) -> Result<Self, ConfigError> {
        let snapshot = load_snapshot(domain, source.as_ref(), validator)?;
        info!(
            domain = %domain,
            terms = snapshot.term_count(),
            "Dictionary loaded"
        );

        Ok(Self {
            domain,
            source,
            validator,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<DictionarySnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

fn load_snapshot(
    domain: EntityType,
    source: &dyn DictionarySource,
    validator: Option<DictionaryValidator>,
) -> Result<DictionarySnapshot, ConfigError> {
    let file = source.load(domain)?;
    file.validate(domain)?;
    if let Some(validate) = validator {
        validate(&file)?;
    }
    DictionarySnapshot::build(&file)
}

impl EntityRecognizer for DictionaryRecognizer {
    fn domain(&self) -> EntityType {
        self.domain
    }

    fn recognize(&self, text: &str, _today: NaiveDate) -> Vec<EntityMatch> {
        self.snapshot().recognize(text)
    }

    fn stage_reload(&self) -> Result<Box<dyn StagedReload + '_>, ConfigError> {
        match load_snapshot(self.domain, self.source.as_ref(), self.validator) {
            Ok(fresh) => Ok(Box::new(StagedSnapshot {
                recognizer: self,
                fresh,
            })),
            Err(e) => {
                warn!(domain = %self.domain, error = %e, "Dictionary reload failed, keeping previous snapshot");
                Err(e)
            }
        }
    }
}

struct StagedSnapshot<'a> {
    recognizer: &'a DictionaryRecognizer,
    fresh: DictionarySnapshot,
}

impl StagedReload for StagedSnapshot<'_> {
    fn domain(&self) -> EntityType {
        self.recognizer.domain
    }

    fn commit(self: Box<Self>) {
        let StagedSnapshot { recognizer, fresh } = *self;
        let terms = fresh.term_count();
        let mut guard = match recognizer.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(fresh);
        drop(guard);

        info!(domain = %recognizer.domain, terms, "Dictionary reloaded");
    }
}
