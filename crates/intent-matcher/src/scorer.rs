//! Multi-layer candidate scorer
//!
//! Layers, each toggleable through [`MatcherConfig`]:
//! 1. exact expression lookup over the normalized utterance
//! 2. regex rules
//! 3. keywords with diminishing per-keyword weights
//! 4. semantic similarity from a [`SimilarityOracle`]
//!
//! Bonuses and penalties (domain, operation type, negative keywords) apply
//! only to intents that already have a signal. Scoring is split in two
//! steps so the caller can decide whether to pay for an utterance
//! embedding: [`CandidateScorer::begin`] runs the lexical layers, and
//! [`ScoringPass::finish`] adds the semantic layer and ranks.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use intent_core::{
    normalize_text, Candidate, CandidateSignals, ConfigError, EntityMatch, EntityType,
    IntentCatalog, IntentDefinition, MatcherConfig, OperationIndicators, OperationType,
    ScoreBreakdown, SimilarityOracle,
};

use crate::operation::OperationDetector;

/// Everything the scorer looks at for one utterance
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    /// Utterance as received
    pub original: &'a str,
    /// Utterance after phrase standardization
    pub standardized: &'a str,
    /// Recognized entities
    pub entities: &'a [EntityMatch],
    /// Business domain supplied by the caller, if any
    pub domain_hint: Option<&'a str>,
}

impl<'a> ScoringInput<'a> {
    /// Input without standardization, entities or domain hint
    pub fn plain(text: &'a str) -> Self {
        Self {
            original: text,
            standardized: text,
            entities: &[],
            domain_hint: None,
        }
    }
}

struct CompiledIntent {
    definition: IntentDefinition,
    patterns: Vec<Regex>,
}

/// Scores every catalog intent against an utterance
pub struct CandidateScorer {
    intents: Vec<CompiledIntent>,
    /// normalized expression -> intent index
    exact: HashMap<String, usize>,
    operations: OperationDetector,
    oracle: Option<Arc<dyn SimilarityOracle>>,
    config: MatcherConfig,
}

impl CandidateScorer {
    /// Compile the catalog's rules and operation indicator lexicon
    pub fn new(catalog: &IntentCatalog, config: MatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut intents = Vec::with_capacity(catalog.len());
        let mut exact = HashMap::new();

        for (idx, definition) in catalog.intents.iter().enumerate() {
            let patterns = definition
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| ConfigError::InvalidValue {
                        key: format!("intents.{}.patterns", definition.code),
                        value: format!("{p}: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            for expression in &definition.exact_expressions {
                let key = normalize_text(expression);
                if key.is_empty() {
                    continue;
                }
                if let Some(other) = exact.insert(key, idx) {
                    if other != idx {
                        return Err(ConfigError::InvalidValue {
                            key: format!("intents.{}.exact_expressions", definition.code),
                            value: format!(
                                "{expression} also belongs to {}",
                                catalog.intents[other].code
                            ),
                        });
                    }
                }
            }

            intents.push(CompiledIntent {
                definition: definition.clone(),
                patterns,
            });
        }

        Ok(Self {
            intents,
            exact,
            operations: OperationDetector::new(&catalog.operation_indicators)?,
            oracle: None,
            config,
        })
    }

    /// Attach the semantic layer's oracle
    pub fn with_oracle(mut self, oracle: Arc<dyn SimilarityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Replace the catalog's operation indicator lexicon
    pub fn with_indicators(
        mut self,
        indicators: &OperationIndicators,
    ) -> Result<Self, ConfigError> {
        self.operations = OperationDetector::new(indicators)?;
        Ok(self)
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Score without the semantic layer unless an embedding is supplied
    pub fn score(&self, input: &ScoringInput<'_>, embedding: Option<&[f32]>) -> Vec<Candidate> {
        self.begin(input).finish(embedding)
    }

    /// Run the lexical layers
    pub fn begin(&self, input: &ScoringInput<'_>) -> ScoringPass<'_> {
        let texts = [input.original, input.standardized];
        let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
        let contains = |word: &str| {
            let word = word.to_lowercase();
            lowered.iter().any(|t| t.contains(&word))
        };

        // Exact layer
        let mut exact_idx = None;
        if self.config.exact_enabled {
            exact_idx = texts
                .iter()
                .map(|t| normalize_text(t))
                .filter(|k| !k.is_empty())
                .find_map(|k| self.exact.get(&k).copied());
        }

        let mut rows = Vec::with_capacity(self.intents.len());
        for (idx, intent) in self.intents.iter().enumerate() {
            let mut signals = CandidateSignals {
                exact: exact_idx == Some(idx),
                ..Default::default()
            };
            let mut breakdown = ScoreBreakdown::default();

            // Regex layer
            if self.config.regex_enabled {
                if let Some(rule) = intent
                    .patterns
                    .iter()
                    .find(|re| texts.iter().any(|t| re.is_match(t)))
                {
                    signals.regex = Some(rule.as_str().to_string());
                    breakdown.regex = self.config.regex_base_points / self.config.points_scale
                        * self.config.regex_weight;
                }
            }

            // Keyword layer
            if self.config.keyword_enabled {
                let mut matched: Vec<(usize, &String)> = intent
                    .definition
                    .keywords
                    .iter()
                    .enumerate()
                    .filter(|(_, k)| contains(k.as_str()))
                    .collect();
                // Longer keywords are more specific and take the larger weights
                matched.sort_by(|(ia, a), (ib, b)| {
                    b.chars().count().cmp(&a.chars().count()).then(ia.cmp(ib))
                });

                breakdown.keyword = self.config.keyword_weight * self.keyword_sum(matched.len());
                signals.keywords = matched.into_iter().map(|(_, k)| k.clone()).collect();
            }

            signals.negative_keywords = intent
                .definition
                .negative_keywords
                .iter()
                .filter(|k| contains(k.as_str()))
                .cloned()
                .collect();

            rows.push(Row { signals, breakdown });
        }

        let mut pass = ScoringPass {
            scorer: self,
            rows,
            exact_hit: exact_idx.is_some(),
            best_lexical: 0.0,
            operations: self.operations.detect(&texts),
            entity_types: input.entities.iter().map(|e| e.entity_type).collect(),
            domain_hint: input.domain_hint.map(str::to_string),
        };
        pass.best_lexical = (0..pass.rows.len())
            .filter(|i| pass.rows[*i].has_signal())
            .map(|i| pass.final_score(i))
            .fold(0.0, f32::max);
        pass
    }

    /// Sum of the first `count` diminishing keyword weights
    fn keyword_sum(&self, count: usize) -> f32 {
        let weights = &self.config.keyword_weights;
        let head: f32 = weights.iter().take(count).sum();
        let tail = count.saturating_sub(weights.len()) as f32 * self.config.keyword_tail_weight;
        head + tail
    }
}

impl std::fmt::Debug for CandidateScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateScorer")
            .field("intents", &self.intents.len())
            .field("exact_expressions", &self.exact.len())
            .field("has_oracle", &self.oracle.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Row {
    signals: CandidateSignals,
    breakdown: ScoreBreakdown,
}

impl Row {
    fn has_signal(&self) -> bool {
        self.signals.exact || self.breakdown.base() > 0.0
    }
}

/// Lexical scoring state awaiting the optional semantic layer
pub struct ScoringPass<'s> {
    scorer: &'s CandidateScorer,
    rows: Vec<Row>,
    exact_hit: bool,
    best_lexical: f32,
    operations: Vec<OperationType>,
    entity_types: Vec<EntityType>,
    domain_hint: Option<String>,
}

impl ScoringPass<'_> {
    /// Whether the semantic layer would be consulted
    ///
    /// Requires the layer to be enabled, an oracle, no exact hit, and a
    /// best lexical score below the trigger threshold.
    pub fn needs_semantic(&self) -> bool {
        let config = &self.scorer.config;
        config.semantic_enabled
            && self.scorer.oracle.is_some()
            && !self.exact_hit
            && self.best_lexical < config.semantic_trigger_threshold
    }

    /// Best score from the lexical layers alone
    pub fn best_lexical_score(&self) -> f32 {
        self.best_lexical
    }

    /// Operation types detected in the utterance
    pub fn operations(&self) -> &[OperationType] {
        &self.operations
    }

    fn adjustment(&self, idx: usize) -> f32 {
        let config = &self.scorer.config;
        let definition = &self.scorer.intents[idx].definition;
        let row = &self.rows[idx];
        let mut adjustment = 0.0;

        let domain_match = self.domain_hint.as_deref() == Some(definition.domain.as_str())
            || definition
                .entity_types
                .iter()
                .any(|t| self.entity_types.contains(t));
        if domain_match {
            adjustment += config.domain_bonus;
        }

        if !self.operations.is_empty() {
            if self.operations.contains(&definition.operation) {
                adjustment += config.operation_match_bonus;
            } else {
                adjustment -= config.operation_mismatch_penalty;
            }
        }

        adjustment -= config.negative_keyword_penalty * row.signals.negative_keywords.len() as f32;
        adjustment
    }

    fn final_score(&self, idx: usize) -> f32 {
        let row = &self.rows[idx];
        if row.signals.exact {
            return 1.0;
        }
        (row.breakdown.base() + self.adjustment(idx)).clamp(0.0, 1.0)
    }

    /// Apply the semantic layer (when needed and an embedding is given),
    /// then rank and keep the top `max_candidates`
    pub fn finish(mut self, embedding: Option<&[f32]>) -> Vec<Candidate> {
        let config = &self.scorer.config;

        if let (true, Some(embedding), Some(oracle)) =
            (self.needs_semantic(), embedding, self.scorer.oracle.as_ref())
        {
            for (idx, intent) in self.scorer.intents.iter().enumerate() {
                let Some(similarity) = oracle.similarity(embedding, &intent.definition.code) else {
                    continue;
                };
                if similarity >= config.min_semantic_similarity {
                    let row = &mut self.rows[idx];
                    row.signals.semantic = Some(similarity);
                    row.breakdown.semantic = config.semantic_weight * similarity;
                }
            }
        }

        let mut candidates = Vec::new();
        for idx in 0..self.rows.len() {
            if !self.rows[idx].has_signal() {
                continue;
            }

            let adjustment = self.adjustment(idx);
            let normalized = self.final_score(idx);
            if normalized <= 0.0 {
                continue;
            }

            let definition = &self.scorer.intents[idx].definition;
            let row = &self.rows[idx];
            candidates.push(Candidate {
                intent_code: definition.code.clone(),
                raw_score: row.breakdown.base() + adjustment,
                normalized_score: normalized,
                signals: row.signals.clone(),
                breakdown: ScoreBreakdown {
                    adjustment,
                    ..row.breakdown
                },
                domain: definition.domain.clone(),
                operation: definition.operation,
            });
        }

        candidates.sort_by(|a, b| a.rank_cmp(b));
        candidates.truncate(config.max_candidates);

        debug!(
            candidates = candidates.len(),
            top = candidates.first().map(|c| c.intent_code.as_str()).unwrap_or("-"),
            top_score = candidates.first().map(|c| c.normalized_score).unwrap_or(0.0),
            "Scoring complete"
        );
        candidates
    }
}
