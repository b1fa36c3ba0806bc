//! Intent Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the intent
//! resolution pipeline:
//! - Entity matches produced by the recognizers
//! - Scored candidates and match methods
//! - Tournament records and resolution results
//! - Common error types
//! - Collaborator traits (LLM, judge, fallback classifier, embeddings)
//! - Configuration management
//! - Intent catalog loading

pub mod catalog;
pub mod config;

pub use catalog::{
    ConfusingPairEntry, IntentCatalog, IntentDefinition, OperationIndicators, PhraseMapping,
};
pub use config::{
    AppConfig, CacheConfig, ConfigError, DataConfig, LlmConfig, LlmProvider, LoggingConfig,
    MatcherConfig, ResolutionConfig, TournamentConfig,
};

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for intent resolution
#[derive(Error, Debug)]
pub enum IntentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Judge timed out after {timeout_ms}ms")]
    JudgeTimeout { timeout_ms: u64 },

    #[error("LLM call budget exhausted after {calls} calls")]
    BudgetExhausted { calls: usize },

    #[error("No signal scored above zero")]
    AllSignalsEmpty,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for IntentError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IntentError>;

// ============================================================================
// Entities
// ============================================================================

/// Entity domains served by the recognizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Time,
    Region,
    Department,
    Metric,
    Dimension,
}

impl EntityType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Region => "region",
            Self::Department => "department",
            Self::Metric => "metric",
            Self::Dimension => "dimension",
        }
    }

    /// All domains, in recognizer order
    pub fn all() -> [EntityType; 5] {
        [
            Self::Time,
            Self::Region,
            Self::Department,
            Self::Metric,
            Self::Dimension,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "time" => Ok(Self::Time),
            "region" => Ok(Self::Region),
            "department" => Ok(Self::Department),
            "metric" => Ok(Self::Metric),
            "dimension" => Ok(Self::Dimension),
            _ => Err(ConfigError::InvalidValue {
                key: "domain".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Value resolved from an open-ended construct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedValue {
    /// Inclusive calendar date range
    DateRange { start: NaiveDate, end: NaiveDate },
}

/// An entity recognized in an utterance
///
/// Spans are expressed in Unicode scalar offsets, not bytes, so that
/// CJK text can be sliced consistently by every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    /// Surface text as it appears in the utterance
    pub text: String,

    /// Start offset (inclusive, in chars)
    pub start: usize,

    /// End offset (exclusive, in chars)
    pub end: usize,

    /// Entity domain
    pub entity_type: EntityType,

    /// Canonical name of the entity
    pub normalized_name: String,

    /// Parent entity (e.g. region of a city, department of a sub-team)
    pub parent: Option<String>,

    /// Match confidence (0.0 - 1.0)
    pub confidence: f32,

    /// Whether the surface text was an alias of the canonical name
    pub matched_via_alias: bool,

    /// Resolved value for open-ended constructs
    pub value: Option<ResolvedValue>,
}

impl EntityMatch {
    /// Number of chars covered by the match
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }

    /// Check whether two matches share at least one char
    pub fn overlaps(&self, other: &EntityMatch) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check whether this match strictly contains the other one
    pub fn strictly_contains(&self, other: &EntityMatch) -> bool {
        self.start <= other.start && other.end <= self.end && self.char_len() > other.char_len()
    }

    /// Resolved date range, if any
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self.value {
            Some(ResolvedValue::DateRange { start, end }) => Some((start, end)),
            None => None,
        }
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Business operation type of an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Query,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// How the final intent was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    Exact,
    Regex,
    Keyword,
    Semantic,
    Fusion,
    Tournament,
    LlmFallback,
    Unknown,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Exact => "EXACT",
            Self::Regex => "REGEX",
            Self::Keyword => "KEYWORD",
            Self::Semantic => "SEMANTIC",
            Self::Fusion => "FUSION",
            Self::Tournament => "TOURNAMENT",
            Self::LlmFallback => "LLM_FALLBACK",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Evidence collected for a candidate, one entry per scoring layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignals {
    /// Exact expression hit
    pub exact: bool,

    /// Regex rule that matched
    pub regex: Option<String>,

    /// Keywords that matched, in weighting order
    pub keywords: Vec<String>,

    /// Raw similarity reported by the semantic oracle
    pub semantic: Option<f32>,

    /// Negative keywords that matched
    pub negative_keywords: Vec<String>,
}

/// Weighted contribution of each layer to the fused score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub regex: f32,
    pub keyword: f32,
    pub semantic: f32,
    /// Sum of bonuses and penalties (may be negative)
    pub adjustment: f32,
}

impl ScoreBreakdown {
    /// Sum of the base (layer) contributions
    pub fn base(&self) -> f32 {
        self.regex + self.keyword + self.semantic
    }
}

/// A scored (intent, confidence) hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub intent_code: String,

    /// Unclamped weighted sum
    pub raw_score: f32,

    /// Clamped score in [0, 1]
    pub normalized_score: f32,

    pub signals: CandidateSignals,

    pub breakdown: ScoreBreakdown,

    pub domain: String,

    pub operation: OperationType,
}

impl Candidate {
    /// Ranking order: score desc, exact hit first, more keywords first,
    /// then intent code ascending
    pub fn rank_cmp(&self, other: &Candidate) -> Ordering {
        other
            .normalized_score
            .total_cmp(&self.normalized_score)
            .then_with(|| other.signals.exact.cmp(&self.signals.exact))
            .then_with(|| {
                other
                    .signals
                    .keywords
                    .len()
                    .cmp(&self.signals.keywords.len())
            })
            .then_with(|| self.intent_code.cmp(&other.intent_code))
    }

    /// Layer that dominates the score
    ///
    /// Returns `Fusion` when no single layer carries at least
    /// `dominance_ratio` of the positive base sum.
    pub fn dominant_signal(&self, dominance_ratio: f32) -> MatchMethod {
        if self.signals.exact {
            return MatchMethod::Exact;
        }

        let parts = [
            (MatchMethod::Regex, self.breakdown.regex),
            (MatchMethod::Keyword, self.breakdown.keyword),
            (MatchMethod::Semantic, self.breakdown.semantic),
        ];
        let total: f32 = parts.iter().map(|(_, v)| v.max(0.0)).sum();
        if total <= 0.0 {
            return MatchMethod::Fusion;
        }

        let Some((method, best)) = parts
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return MatchMethod::Fusion;
        };

        if best / total >= dominance_ratio {
            method
        } else {
            MatchMethod::Fusion
        }
    }
}

// ============================================================================
// Judge Types
// ============================================================================

/// Description of an intent as presented to an LLM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentBrief {
    pub code: String,
    pub name: String,
    pub description: String,
}

/// Which of the two presented intents the judge preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeChoice {
    First,
    Second,
}

/// Single pairwise judgment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairwiseVerdict {
    pub winner: JudgeChoice,
    pub confidence: f32,
}

/// Single-shot classification over a candidate set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent_code: String,
    pub confidence: f32,
}

// ============================================================================
// Tournament Records
// ============================================================================

/// Bracket format used by the tournament engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentMode {
    #[default]
    SeededSingleElimination,
    SimpleSingleElimination,
    SwissSystem,
    RoundRobin,
}

impl std::fmt::Display for TournamentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeededSingleElimination => write!(f, "seeded_single_elimination"),
            Self::SimpleSingleElimination => write!(f, "simple_single_elimination"),
            Self::SwissSystem => write!(f, "swiss_system"),
            Self::RoundRobin => write!(f, "round_robin"),
        }
    }
}

impl std::str::FromStr for TournamentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "seeded" | "seeded_single_elimination" => Ok(Self::SeededSingleElimination),
            "simple" | "simple_single_elimination" => Ok(Self::SimpleSingleElimination),
            "swiss" | "swiss_system" => Ok(Self::SwissSystem),
            "round_robin" => Ok(Self::RoundRobin),
            _ => Err(ConfigError::InvalidValue {
                key: "TOURNAMENT_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of one tournament invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentState {
    Seeded,
    BracketBuilt,
    Running,
    Completed,
    TimedOut,
    BudgetExhausted,
}

impl TournamentState {
    /// Whether the bracket stopped before all scheduled comparisons ran
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TimedOut | Self::BudgetExhausted)
    }
}

/// How a match result was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResolution {
    /// Decided by the judge
    Judged,
    /// Reused from the judgment cache
    Cached,
    /// Judge failed or timed out, higher seed advanced
    SeedFallback,
    /// Closing record naming the overall winner, no judge call
    Standings,
}

/// Outcome of the reversed-order comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseCheck {
    pub winner: String,
    pub confidence: f32,
    pub agreed: bool,
}

/// One pairwise comparison in a tournament log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentMatch {
    pub round_index: u32,
    pub candidate_a: String,
    pub candidate_b: String,
    pub winner: String,
    pub judge_confidence: f32,
    pub latency_ms: u64,
    pub reversed_check: Option<ReverseCheck>,
    pub resolution: MatchResolution,
}

/// Per-contender standing at the end of a tournament
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub intent_code: String,
    /// 1-based seed from the scorer ranking
    pub seed: usize,
    pub wins: u32,
    pub losses: u32,
    /// Round in which the contender was knocked out (elimination formats)
    pub eliminated_in_round: Option<u32>,
    pub cumulative_confidence: f32,
}

/// Audit summary of a tournament attached to a resolution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentSummary {
    pub mode: TournamentMode,
    pub state: TournamentState,
    pub truncated: bool,
    pub log: Vec<TournamentMatch>,
    pub standings: Vec<Standing>,
    pub llm_calls: usize,
    pub elapsed_ms: u64,
}

// ============================================================================
// Resolution Result
// ============================================================================

/// Terminal artifact returned by the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub request_id: Uuid,

    /// Utterance as received
    pub utterance: String,

    /// Utterance after phrase standardization
    pub standardized: String,

    /// Resolved intent, `None` for UNKNOWN
    pub intent_code: Option<String>,

    pub confidence: f32,

    pub match_method: MatchMethod,

    /// Ranked candidates considered for the decision
    pub candidates: Vec<Candidate>,

    /// Entities recognized in the utterance
    pub entities: Vec<EntityMatch>,

    /// Tournament audit trail, when arbitration ran
    pub tournament: Option<TournamentSummary>,

    /// Result came from a truncated tournament or a degraded fallback
    pub truncated: bool,

    pub elapsed_ms: u64,
}

impl ResolutionResult {
    /// Keywords that contributed to the chosen candidate
    pub fn matched_keywords(&self) -> &[String] {
        self.intent_code
            .as_deref()
            .and_then(|code| self.candidates.iter().find(|c| c.intent_code == code))
            .map(|c| c.signals.keywords.as_slice())
            .unwrap_or(&[])
    }

    /// Tournament log, if arbitration ran
    pub fn tournament_log(&self) -> Option<&[TournamentMatch]> {
        self.tournament.as_ref().map(|t| t.log.as_slice())
    }
}

// ============================================================================
// Text Helpers
// ============================================================================

/// Normalize an utterance for lookups: ASCII lowercase, whitespace and
/// punctuation removed
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '，' | '。' | '？' | '！' | '、' | '；' | '：' | '“' | '”' | '‘' | '’' | '（' | '）'
                | '…' | '～'
        )
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for LLM clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get client name for logging
    fn name(&self) -> &str;
}

/// Trait for embedding generation
#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

/// Similarity oracle over precomputed intent exemplars
pub trait SimilarityOracle: Send + Sync {
    /// Similarity in [0, 1] between the utterance and an intent, `None`
    /// when the intent has no exemplars
    fn similarity(&self, utterance_embedding: &[f32], intent_code: &str) -> Option<f32>;
}

/// Pairwise judge used by the tournament
#[async_trait::async_trait]
pub trait PairwiseJudge: Send + Sync {
    /// Decide which of `first` and `second` better matches the utterance
    async fn compare(
        &self,
        utterance: &str,
        first: &IntentBrief,
        second: &IntentBrief,
    ) -> Result<PairwiseVerdict>;
}

/// Single-shot classifier used when the tournament cannot decide
#[async_trait::async_trait]
pub trait FallbackClassifier: Send + Sync {
    async fn classify(&self, utterance: &str, candidates: &[IntentBrief])
        -> Result<Classification>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(code: &str, score: f32, exact: bool, keywords: usize) -> Candidate {
        Candidate {
            intent_code: code.to_string(),
            raw_score: score,
            normalized_score: score,
            signals: CandidateSignals {
                exact,
                keywords: (0..keywords).map(|i| format!("k{i}")).collect(),
                ..Default::default()
            },
            breakdown: ScoreBreakdown {
                keyword: score,
                ..Default::default()
            },
            domain: "material".to_string(),
            operation: OperationType::Query,
        }
    }

    #[test]
    fn test_candidate_ranking_tie_breaks() {
        let mut list = vec![
            candidate("B_INTENT", 0.7, false, 1),
            candidate("A_INTENT", 0.7, false, 1),
            candidate("C_INTENT", 0.7, false, 3),
            candidate("D_INTENT", 0.7, true, 0),
            candidate("E_INTENT", 0.9, false, 0),
        ];
        list.sort_by(|a, b| a.rank_cmp(b));

        let codes: Vec<&str> = list.iter().map(|c| c.intent_code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["E_INTENT", "D_INTENT", "C_INTENT", "A_INTENT", "B_INTENT"]
        );
    }

    #[test]
    fn test_dominant_signal() {
        let mut c = candidate("X", 0.9, false, 2);
        assert_eq!(c.dominant_signal(0.75), MatchMethod::Keyword);

        c.breakdown = ScoreBreakdown {
            regex: 0.5,
            keyword: 0.4,
            semantic: 0.0,
            adjustment: 0.0,
        };
        assert_eq!(c.dominant_signal(0.75), MatchMethod::Fusion);

        c.signals.exact = true;
        assert_eq!(c.dominant_signal(0.75), MatchMethod::Exact);
    }

    #[test]
    fn test_entity_overlap() {
        let m = |start, end| EntityMatch {
            text: String::new(),
            start,
            end,
            entity_type: EntityType::Region,
            normalized_name: String::new(),
            parent: None,
            confidence: 1.0,
            matched_via_alias: false,
            value: None,
        };
        assert!(m(0, 3).overlaps(&m(2, 4)));
        assert!(!m(0, 2).overlaps(&m(2, 4)));
        assert!(m(0, 4).strictly_contains(&m(0, 2)));
        assert!(!m(0, 2).strictly_contains(&m(0, 2)));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text(" 查询 库存，GMV? "), "查询库存gmv");
    }

    #[test]
    fn test_tournament_mode_parse() {
        assert_eq!(
            "swiss".parse::<TournamentMode>().unwrap(),
            TournamentMode::SwissSystem
        );
        assert_eq!(
            "round-robin".parse::<TournamentMode>().unwrap(),
            TournamentMode::RoundRobin
        );
        assert!("knockout".parse::<TournamentMode>().is_err());
    }

    #[test]
    fn test_match_method_serde() {
        let json = serde_json::to_string(&MatchMethod::LlmFallback).unwrap();
        assert_eq!(json, "\"LLM_FALLBACK\"");
    }
}
