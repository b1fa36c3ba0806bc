//! Intent Resolution Configuration Management
//!
//! Handles configuration from environment variables and TOML config files.
//! Every section is an explicit typed struct that is built once at startup
//! and handed to the component constructors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::TournamentMode;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Candidate scoring configuration
    pub matcher: MatcherConfig,

    /// Decision thresholds
    pub resolution: ResolutionConfig,

    /// Tournament (arbitration) configuration
    pub tournament: TournamentConfig,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Dictionary and catalog locations
    pub data: DataConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.llm.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.llm.openai_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.llm.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }

        // Data
        if let Ok(dir) = std::env::var("INTENT_DATA_DIR") {
            config.data.data_dir = PathBuf::from(dir);
        }

        // Tournament
        if let Ok(mode) = std::env::var("TOURNAMENT_MODE") {
            config.tournament.mode = mode.parse()?;
        }
        if let Ok(calls) = std::env::var("TOURNAMENT_MAX_LLM_CALLS") {
            config.tournament.max_llm_calls =
                calls.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "TOURNAMENT_MAX_LLM_CALLS".to_string(),
                    value: calls,
                })?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        // Only override if env values differ from defaults
        if env_config.llm.provider != defaults.llm.provider {
            self.llm.provider = env_config.llm.provider;
        }
        if env_config.llm.model != defaults.llm.model {
            self.llm.model = env_config.llm.model;
        }
        if env_config.llm.embedding_model != defaults.llm.embedding_model {
            self.llm.embedding_model = env_config.llm.embedding_model;
        }
        if env_config.llm.ollama_url != defaults.llm.ollama_url {
            self.llm.ollama_url = env_config.llm.ollama_url;
        }
        if env_config.data.data_dir != defaults.data.data_dir {
            self.data.data_dir = env_config.data.data_dir;
        }
        if env_config.tournament.mode != defaults.tournament.mode {
            self.tournament.mode = env_config.tournament.mode;
        }
        if env_config.tournament.max_llm_calls != defaults.tournament.max_llm_calls {
            self.tournament.max_llm_calls = env_config.tournament.max_llm_calls;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }

        // Always use env for sensitive values
        if env_config.llm.openai_api_key.is_some() {
            self.llm.openai_api_key = env_config.llm.openai_api_key;
        }
        if env_config.llm.openai_base_url.is_some() {
            self.llm.openai_base_url = env_config.llm.openai_base_url;
        }

        Ok(self)
    }

    /// Reject invalid weights, thresholds and budgets
    ///
    /// Called once at startup; an invalid configuration is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matcher.validate()?;
        self.resolution.validate()?;
        self.tournament.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

fn check_unit(key: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn check_positive(key: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use for judging and fallback classification
    pub model: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            // Verdicts are a short JSON object
            max_tokens: 256,
            temperature: 0.0,
            timeout_secs: 30,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Azure,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Candidate scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Enable exact expression lookup
    pub exact_enabled: bool,

    /// Enable regex rules
    pub regex_enabled: bool,

    /// Enable keyword matching
    pub keyword_enabled: bool,

    /// Enable the semantic layer
    pub semantic_enabled: bool,

    /// Points awarded for a regex hit before normalization
    pub regex_base_points: f32,

    /// Points that map to a normalized score of 1.0
    pub points_scale: f32,

    /// Weight of the regex layer
    pub regex_weight: f32,

    /// Weight of the keyword layer
    pub keyword_weight: f32,

    /// Descending per-keyword weights for the first matched keywords
    pub keyword_weights: Vec<f32>,

    /// Weight of every keyword beyond `keyword_weights`
    pub keyword_tail_weight: f32,

    /// Weight of the semantic layer
    pub semantic_weight: f32,

    /// Consult the semantic layer only when the best score is below this
    pub semantic_trigger_threshold: f32,

    /// Similarities below this do not create a signal
    pub min_semantic_similarity: f32,

    /// Bonus when the intent's domain matches the context
    pub domain_bonus: f32,

    /// Bonus when the detected operation matches the intent's operation
    pub operation_match_bonus: f32,

    /// Penalty when operations were detected but none matches the intent
    pub operation_mismatch_penalty: f32,

    /// Penalty per matched negative keyword
    pub negative_keyword_penalty: f32,

    /// Share of the base score a layer needs to be reported as dominant
    pub dominance_ratio: f32,

    /// Candidates retained for disambiguation
    pub max_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            exact_enabled: true,
            regex_enabled: true,
            keyword_enabled: true,
            semantic_enabled: true,
            regex_base_points: 100.0,
            points_scale: 100.0,
            regex_weight: 0.8,
            keyword_weight: 1.0,
            keyword_weights: vec![0.30, 0.25, 0.20, 0.15, 0.10],
            keyword_tail_weight: 0.05,
            semantic_weight: 0.7,
            semantic_trigger_threshold: 0.7,
            min_semantic_similarity: 0.5,
            domain_bonus: 0.05,
            operation_match_bonus: 0.05,
            operation_mismatch_penalty: 0.10,
            negative_keyword_penalty: 0.30,
            dominance_ratio: 0.75,
            max_candidates: 4,
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("matcher.regex_base_points", self.regex_base_points)?;
        check_positive("matcher.points_scale", self.points_scale)?;
        check_unit("matcher.regex_weight", self.regex_weight)?;
        check_unit("matcher.keyword_weight", self.keyword_weight)?;
        check_unit("matcher.keyword_tail_weight", self.keyword_tail_weight)?;
        check_unit("matcher.semantic_weight", self.semantic_weight)?;
        check_unit(
            "matcher.semantic_trigger_threshold",
            self.semantic_trigger_threshold,
        )?;
        check_unit("matcher.min_semantic_similarity", self.min_semantic_similarity)?;
        check_unit("matcher.domain_bonus", self.domain_bonus)?;
        check_unit("matcher.operation_match_bonus", self.operation_match_bonus)?;
        check_unit(
            "matcher.operation_mismatch_penalty",
            self.operation_mismatch_penalty,
        )?;
        check_unit(
            "matcher.negative_keyword_penalty",
            self.negative_keyword_penalty,
        )?;
        check_unit("matcher.dominance_ratio", self.dominance_ratio)?;

        if self.keyword_weights.is_empty() {
            return Err(ConfigError::MissingRequired(
                "matcher.keyword_weights".to_string(),
            ));
        }
        for w in &self.keyword_weights {
            check_unit("matcher.keyword_weights", *w)?;
        }
        // Diminishing returns: the sequence may never increase
        let increasing = self.keyword_weights.windows(2).any(|w| w[1] > w[0]);
        let tail_above = self
            .keyword_weights
            .last()
            .is_some_and(|last| self.keyword_tail_weight > *last);
        if increasing || tail_above {
            return Err(ConfigError::InvalidValue {
                key: "matcher.keyword_weights".to_string(),
                value: format!("{:?}", self.keyword_weights),
            });
        }

        if self.max_candidates < 2 {
            return Err(ConfigError::InvalidValue {
                key: "matcher.max_candidates".to_string(),
                value: self.max_candidates.to_string(),
            });
        }
        Ok(())
    }
}

/// Decision thresholds used by the resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Accept top-1 immediately at or above this score
    pub high_confidence_threshold: f32,

    /// Per-domain overrides of `high_confidence_threshold`
    pub domain_thresholds: HashMap<String, f32>,

    /// Minimum gap between top-1 and top-2 to skip arbitration
    pub ambiguity_threshold: f32,

    /// Ambiguity only triggers arbitration below this top-1 score
    pub min_trigger_confidence: f32,

    /// Multiplier applied to the confidence of truncated tournaments
    pub truncated_confidence_factor: f32,

    /// Use the single-shot classifier when the tournament cannot decide
    pub fallback_enabled: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.85,
            domain_thresholds: HashMap::new(),
            ambiguity_threshold: 0.15,
            min_trigger_confidence: 0.85,
            truncated_confidence_factor: 0.8,
            fallback_enabled: true,
        }
    }
}

impl ResolutionConfig {
    /// High-confidence threshold for an intent domain
    pub fn threshold_for(&self, domain: &str) -> f32 {
        self.domain_thresholds
            .get(domain)
            .copied()
            .unwrap_or(self.high_confidence_threshold)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit(
            "resolution.high_confidence_threshold",
            self.high_confidence_threshold,
        )?;
        for (domain, threshold) in &self.domain_thresholds {
            check_unit(&format!("resolution.domain_thresholds.{domain}"), *threshold)?;
        }
        check_unit("resolution.ambiguity_threshold", self.ambiguity_threshold)?;
        check_unit(
            "resolution.min_trigger_confidence",
            self.min_trigger_confidence,
        )?;
        check_unit(
            "resolution.truncated_confidence_factor",
            self.truncated_confidence_factor,
        )?;
        Ok(())
    }
}

/// Tournament (arbitration) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    /// Run arbitration at all; when disabled ambiguous results go to the fallback
    pub enabled: bool,

    /// Bracket format
    pub mode: TournamentMode,

    /// Maximum judge calls per tournament (reverse checks count)
    pub max_llm_calls: usize,

    /// Hard wall-clock deadline for one tournament
    pub total_timeout_ms: u64,

    /// Deadline for a single judge call
    pub per_comparison_timeout_ms: u64,

    /// Comparisons dispatched concurrently within one round
    pub max_concurrency: usize,

    /// Also judge every pair in reversed order
    pub bidirectional_comparison: bool,

    /// Confidence delta above which disagreeing judgments fall back to the
    /// lower-confidence one
    pub bidirectional_discrepancy_threshold: f32,

    /// Seed for random pairings
    pub random_seed: u64,

    /// Swiss rounds; defaults to ceil(log2 N)
    pub swiss_rounds: Option<u32>,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: TournamentMode::SeededSingleElimination,
            max_llm_calls: 12,
            total_timeout_ms: 15_000,
            per_comparison_timeout_ms: 5_000,
            max_concurrency: 4,
            bidirectional_comparison: true,
            bidirectional_discrepancy_threshold: 0.3,
            random_seed: 42,
            swiss_rounds: None,
        }
    }
}

impl TournamentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tournament.total_timeout_ms".to_string(),
                value: "0".to_string(),
            });
        }
        if self.per_comparison_timeout_ms == 0
            || self.per_comparison_timeout_ms > self.total_timeout_ms
        {
            return Err(ConfigError::InvalidValue {
                key: "tournament.per_comparison_timeout_ms".to_string(),
                value: self.per_comparison_timeout_ms.to_string(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tournament.max_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.swiss_rounds == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "tournament.swiss_rounds".to_string(),
                value: "0".to_string(),
            });
        }
        check_unit(
            "tournament.bidirectional_discrepancy_threshold",
            self.bidirectional_discrepancy_threshold,
        )
    }
}

/// Configuration for cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached pairwise judgments
    pub judgment_max_capacity: u64,

    /// Time-to-live for judgments (in seconds)
    pub judgment_ttl_seconds: u64,

    /// Maximum number of cached utterance embeddings
    pub embedding_max_capacity: u64,

    /// Time-to-live for embeddings (in seconds)
    pub embedding_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            judgment_max_capacity: 10_000,
            // Judgments depend on the model and prompt, refresh hourly
            judgment_ttl_seconds: 3600,
            // 10k embeddings @ ~6KB each = ~60MB
            embedding_max_capacity: 10_000,
            embedding_ttl_seconds: 3600,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.judgment_ttl_seconds == 0 || self.embedding_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.ttl_seconds".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Locations of the catalog, dictionaries and exemplar vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Base directory for data files
    pub data_dir: PathBuf,

    /// Intent catalog file, relative to `data_dir`
    pub catalog_file: PathBuf,

    /// Directory holding one TOML dictionary per domain, relative to `data_dir`
    pub dictionary_dir: PathBuf,

    /// Exemplar embeddings (JSON), relative to `data_dir`
    pub exemplars_file: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            catalog_file: PathBuf::from("catalog.toml"),
            dictionary_dir: PathBuf::from("dictionaries"),
            exemplars_file: None,
        }
    }
}

impl DataConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }

    pub fn dictionary_path(&self) -> PathBuf {
        self.data_dir.join(&self.dictionary_dir)
    }

    pub fn exemplars_path(&self) -> Option<PathBuf> {
        self.exemplars_file.as_ref().map(|f| self.data_dir.join(f))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
