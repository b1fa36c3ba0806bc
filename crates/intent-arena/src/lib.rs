//! Intent Arena - Resolution orchestrator
//!
//! Wires entity recognition, phrase standardization and candidate scoring
//! into the end-to-end decision, and arbitrates near-ties with a pairwise
//! LLM tournament:
//!
//! 1. score the utterance
//! 2. accept a clearly decided leader (unless it forms a confusing pair
//!    with the runner-up)
//! 3. otherwise run the tournament over the top candidates
//! 4. fall back to a single-shot classifier when the tournament could not
//!    compare anything
//!
//! `resolve` never fails: degraded outcomes are encoded in the result.
//!
//! Author: hephaex@gmail.com

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use intent_core::{
    AppConfig, Candidate, ConfigError, EmbeddingClient, EntityMatch, FallbackClassifier,
    IntentBrief, IntentCatalog, LlmClient, MatchMethod, PairwiseJudge, ResolutionResult, Result,
    SimilarityOracle, TournamentSummary,
};
use intent_extractor::{EntityPipeline, FileDictionarySource, PhraseStandardizer};
use intent_matcher::{CandidateScorer, ConfusingPairPolicy, ExemplarIndex, ScoringInput};

pub mod bracket;
pub mod cache;
pub mod embedding;
pub mod judge;
pub mod llm;
pub mod prompt;
pub mod tournament;

pub use bracket::{Bracket, Pairing, Round, Table};
pub use cache::{
    CacheStats, CacheStatsReport, CachedJudgment, EmbeddingCache, JudgmentCache, ResolverCaches,
};
pub use embedding::{create_embedding_client, OllamaEmbedding, OpenAiEmbedding};
pub use judge::{LlmFallbackClassifier, LlmPairwiseJudge};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use prompt::PromptBuilder;
pub use tournament::{reconcile, Judgment, TournamentEngine, TournamentOutcome};

// ============================================================================
// Per-call Context
// ============================================================================

/// State scoped to one `resolve` call, owned by the caller
///
/// Holds the domain hint and memoizes the utterance embedding, so a caller
/// that resolves the same utterance again with the same context does not
/// re-embed it. Dropping the context releases everything.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Business domain the caller expects, earns the domain bonus
    pub domain_hint: Option<String>,

    embedding: Option<(String, Vec<f32>)>,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain_hint(mut self, domain: impl Into<String>) -> Self {
        self.domain_hint = Some(domain.into());
        self
    }

    /// Embedding computed during the last call, if any
    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_ref().map(|(_, e)| e.as_slice())
    }

    fn embedding_for(&self, text: &str) -> Option<&[f32]> {
        match &self.embedding {
            Some((t, e)) if t == text => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct ResolverCounters {
    resolutions: AtomicU64,
    recognitions: AtomicU64,
    entities: AtomicU64,
    tournaments: AtomicU64,
    truncations: AtomicU64,
    fallbacks: AtomicU64,
    unknowns: AtomicU64,
}

impl ResolverCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.resolutions,
            &self.recognitions,
            &self.entities,
            &self.tournaments,
            &self.truncations,
            &self.fallbacks,
            &self.unknowns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of resolver counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverStatistics {
    pub resolutions: u64,
    /// Recognition passes run
    pub recognitions: u64,
    /// Entities produced by those passes
    pub entities: u64,
    pub tournaments: u64,
    pub truncations: u64,
    /// Truncated tournaments / tournaments
    pub truncation_rate: f64,
    pub fallbacks: u64,
    pub unknowns: u64,
    /// Process-wide trie counters
    pub trie_scans: u64,
    pub trie_matches: u64,
    pub caches: Vec<CacheStatsReport>,
}

// ============================================================================
// Resolver
// ============================================================================

struct Decision {
    intent_code: Option<String>,
    confidence: f32,
    method: MatchMethod,
    tournament: Option<TournamentSummary>,
    truncated: bool,
}

impl Decision {
    fn unknown() -> Self {
        Self {
            intent_code: None,
            confidence: 0.0,
            method: MatchMethod::Unknown,
            tournament: None,
            truncated: false,
        }
    }

    fn accept(candidate: &Candidate, method: MatchMethod) -> Self {
        Self {
            intent_code: Some(candidate.intent_code.clone()),
            confidence: candidate.normalized_score,
            method,
            tournament: None,
            truncated: false,
        }
    }
}

/// End-to-end intent resolver
pub struct IntentResolver {
    config: AppConfig,
    catalog: Arc<IntentCatalog>,
    pipeline: Arc<EntityPipeline>,
    standardizer: PhraseStandardizer,
    scorer: CandidateScorer,
    policy: ConfusingPairPolicy,
    tournament: Option<TournamentEngine>,
    fallback: Option<Arc<dyn FallbackClassifier>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    caches: ResolverCaches,
    counters: ResolverCounters,
}

impl IntentResolver {
    /// Resolver without arbitration, fallback or semantic layer
    ///
    /// Validates the configuration and compiles the catalog; any problem is
    /// fatal.
    pub fn new(config: AppConfig, catalog: IntentCatalog, pipeline: EntityPipeline) -> Result<Self> {
        config.validate()?;
        catalog.validate()?;

        let scorer = CandidateScorer::new(&catalog, config.matcher.clone())?;
        let policy = ConfusingPairPolicy::from_catalog(&catalog);
        let standardizer = PhraseStandardizer::new(&catalog.phrases);
        let caches = ResolverCaches::with_config(&config.cache);

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            pipeline: Arc::new(pipeline),
            standardizer,
            scorer,
            policy,
            tournament: None,
            fallback: None,
            embedder: None,
            caches,
            counters: ResolverCounters::default(),
        })
    }

    /// Build everything from configuration: data files, LLM clients and
    /// the optional exemplar index
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let catalog = IntentCatalog::from_file(config.data.catalog_path())?;
        let source = Arc::new(FileDictionarySource::new(config.data.dictionary_path()));
        let pipeline = EntityPipeline::from_source(source)?;
        let exemplars = config.data.exemplars_path();
        let llm_config = config.llm.clone();

        let mut resolver = Self::new(config, catalog, pipeline)?;

        match create_llm_client(&llm_config) {
            Ok(client) => {
                let client: Arc<dyn LlmClient> = Arc::from(client);
                info!(client = client.name(), model = %llm_config.model, "LLM arbitration enabled");
                resolver = resolver
                    .with_judge(Arc::new(LlmPairwiseJudge::new(client.clone())))
                    .with_fallback(Arc::new(LlmFallbackClassifier::new(client)));
            }
            Err(e) => warn!(error = %e, "LLM client unavailable, arbitration disabled"),
        }

        if let Some(path) = exemplars {
            resolver = resolver.with_exemplars(&path, &llm_config)?;
        }

        info!(
            intents = resolver.catalog.len(),
            domains = resolver.pipeline.domains().len(),
            phrases = resolver.standardizer.len(),
            "intent resolver ready"
        );
        Ok(resolver)
    }

    fn with_exemplars(self, path: &Path, llm: &intent_core::LlmConfig) -> Result<Self> {
        let index = ExemplarIndex::from_file(path)?;
        let embedder = create_embedding_client(llm)?;
        if embedder.dimension() != index.dimension() {
            warn!(
                embedder = embedder.dimension(),
                exemplars = index.dimension(),
                "embedding dimension differs from exemplars, semantic layer will stay silent"
            );
        }
        info!(intents = index.len(), path = %path.display(), "exemplar index loaded");
        Ok(self.with_semantic(Arc::from(embedder), Arc::new(index)))
    }

    /// Enable tournament arbitration with the given judge
    pub fn with_judge(mut self, judge: Arc<dyn PairwiseJudge>) -> Self {
        self.tournament = Some(
            TournamentEngine::new(self.config.tournament.clone(), judge)
                .with_cache(self.caches.judgment.clone()),
        );
        self
    }

    /// Classifier used when the tournament cannot compare anything
    pub fn with_fallback(mut self, classifier: Arc<dyn FallbackClassifier>) -> Self {
        self.fallback = Some(classifier);
        self
    }

    /// Enable the semantic layer
    pub fn with_semantic(
        mut self,
        embedder: Arc<dyn EmbeddingClient>,
        oracle: Arc<dyn SimilarityOracle>,
    ) -> Self {
        self.scorer = self.scorer.with_oracle(oracle);
        self.embedder = Some(embedder);
        self
    }

    /// Replace the confusing-pair policy built from the catalog
    pub fn with_policy(mut self, policy: ConfusingPairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &IntentCatalog {
        &self.catalog
    }

    pub fn pipeline(&self) -> &EntityPipeline {
        &self.pipeline
    }

    pub fn standardizer(&self) -> &PhraseStandardizer {
        &self.standardizer
    }

    pub fn caches(&self) -> &ResolverCaches {
        &self.caches
    }

    /// Reload every entity dictionary; failing domains keep their old state
    pub fn reload_dictionaries(&self) -> std::result::Result<(), ConfigError> {
        self.pipeline.reload()
    }

    /// Resolve an utterance to an intent
    pub async fn resolve(
        &self,
        utterance: &str,
        now: NaiveDateTime,
        ctx: &mut ResolveContext,
    ) -> ResolutionResult {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        ResolverCounters::bump(&self.counters.resolutions);

        let text = utterance.trim();
        if text.is_empty() {
            debug!(%request_id, "empty utterance");
            ResolverCounters::bump(&self.counters.unknowns);
            return self.finish(
                request_id,
                utterance,
                String::new(),
                Vec::new(),
                Vec::new(),
                Decision::unknown(),
                started,
            );
        }

        let entities = self.pipeline.recognize(text, now.date());
        ResolverCounters::bump(&self.counters.recognitions);
        self.counters
            .entities
            .fetch_add(entities.len() as u64, Ordering::Relaxed);

        let standardized = self.standardizer.standardize(text);
        let input = ScoringInput {
            original: text,
            standardized: &standardized,
            entities: &entities,
            domain_hint: ctx.domain_hint.as_deref(),
        };
        let pass = self.scorer.begin(&input);
        let embedding = if pass.needs_semantic() {
            self.utterance_embedding(&standardized, ctx).await
        } else {
            None
        };
        let candidates = pass.finish(embedding.as_deref());
        debug!(
            %request_id,
            standardized = %standardized,
            entities = entities.len(),
            candidates = candidates.len(),
            "scored"
        );

        let decision = self.decide(text, &candidates).await;
        match decision.method {
            MatchMethod::Unknown => ResolverCounters::bump(&self.counters.unknowns),
            MatchMethod::LlmFallback => ResolverCounters::bump(&self.counters.fallbacks),
            _ => {}
        }

        self.finish(
            request_id,
            utterance,
            standardized,
            candidates,
            entities,
            decision,
            started,
        )
    }

    async fn decide(&self, utterance: &str, candidates: &[Candidate]) -> Decision {
        let Some(top1) = candidates.first() else {
            debug!("no signal fired");
            return Decision::unknown();
        };
        let resolution = &self.config.resolution;
        let dominance_ratio = self.scorer.config().dominance_ratio;

        let top2 = candidates.get(1);
        let gap = top2.map_or(top1.normalized_score, |t| {
            top1.normalized_score - t.normalized_score
        });
        let confusing = top2.is_some_and(|t| {
            self.policy
                .force_arbitration(&top1.intent_code, &t.intent_code, gap)
        });

        if top1.normalized_score >= resolution.threshold_for(&top1.domain) && !confusing {
            return Decision::accept(top1, top1.dominant_signal(dominance_ratio));
        }

        if top2.is_none() {
            return Decision::accept(top1, MatchMethod::Fusion);
        }

        let ambiguous = gap < resolution.ambiguity_threshold
            && top1.normalized_score < resolution.min_trigger_confidence;
        if !confusing && !ambiguous {
            return Decision::accept(top1, top1.dominant_signal(dominance_ratio));
        }

        debug!(
            top1 = %top1.intent_code,
            gap,
            confusing,
            ambiguous,
            "arbitration required"
        );
        self.arbitrate(utterance, candidates).await
    }

    async fn arbitrate(&self, utterance: &str, candidates: &[Candidate]) -> Decision {
        let resolution = &self.config.resolution;
        let briefs: Vec<IntentBrief> = candidates
            .iter()
            .map(|c| self.catalog.brief(&c.intent_code))
            .collect();

        let mut summary = None;
        if let Some(engine) = self
            .tournament
            .as_ref()
            .filter(|_| self.config.tournament.enabled)
        {
            ResolverCounters::bump(&self.counters.tournaments);
            match engine.run(utterance, &briefs).await {
                Ok(outcome) => {
                    if outcome.truncated() {
                        ResolverCounters::bump(&self.counters.truncations);
                    }
                    if !outcome.summary.log.is_empty() {
                        let truncated = outcome.truncated();
                        let confidence = if truncated {
                            outcome.confidence * resolution.truncated_confidence_factor
                        } else {
                            outcome.confidence
                        };
                        return Decision {
                            intent_code: Some(outcome.winner),
                            confidence,
                            method: MatchMethod::Tournament,
                            tournament: Some(outcome.summary),
                            truncated,
                        };
                    }
                    summary = Some(outcome.summary);
                }
                Err(e) => warn!(error = %e, "tournament failed"),
            }
        }

        let tournament_truncated = summary.as_ref().is_some_and(|s| s.truncated);
        if let Some(classifier) = self.fallback.as_ref().filter(|_| resolution.fallback_enabled) {
            match classifier.classify(utterance, &briefs).await {
                Ok(c) if briefs.iter().any(|b| b.code == c.intent_code) => {
                    return Decision {
                        intent_code: Some(c.intent_code),
                        confidence: c.confidence.clamp(0.0, 1.0),
                        method: MatchMethod::LlmFallback,
                        tournament: summary,
                        truncated: tournament_truncated,
                    };
                }
                Ok(c) => warn!(intent = %c.intent_code, "fallback chose a non-candidate"),
                Err(e) => warn!(error = %e, "fallback classifier failed"),
            }
        }

        // Nothing could arbitrate: degrade to the scorer's leader
        let top1 = &candidates[0];
        Decision {
            intent_code: Some(top1.intent_code.clone()),
            confidence: top1.normalized_score,
            method: MatchMethod::Fusion,
            tournament: summary,
            truncated: true,
        }
    }

    /// Utterance embedding from the context, the cache, or the embedder
    async fn utterance_embedding(&self, text: &str, ctx: &mut ResolveContext) -> Option<Vec<f32>> {
        if let Some(embedding) = ctx.embedding_for(text) {
            return Some(embedding.to_vec());
        }
        let embedder = self.embedder.as_ref()?;

        let embedding = match self.caches.embedding.get(text).await {
            Some(embedding) => embedding,
            None => match embedder.embed(text).await {
                Ok(embedding) => {
                    self.caches.embedding.put(text, embedding.clone()).await;
                    embedding
                }
                Err(e) => {
                    warn!(error = %e, "embedding failed, semantic layer skipped");
                    return None;
                }
            },
        };

        ctx.embedding = Some((text.to_string(), embedding.clone()));
        Some(embedding)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        request_id: Uuid,
        utterance: &str,
        standardized: String,
        candidates: Vec<Candidate>,
        entities: Vec<EntityMatch>,
        decision: Decision,
        started: Instant,
    ) -> ResolutionResult {
        let result = ResolutionResult {
            request_id,
            utterance: utterance.to_string(),
            standardized,
            intent_code: decision.intent_code,
            confidence: decision.confidence,
            match_method: decision.method,
            candidates,
            entities,
            tournament: decision.tournament,
            truncated: decision.truncated,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %request_id,
            intent = result.intent_code.as_deref().unwrap_or("UNKNOWN"),
            method = %result.match_method,
            confidence = result.confidence,
            truncated = result.truncated,
            elapsed_ms = result.elapsed_ms,
            "resolved"
        );
        result
    }

    /// Counter snapshot
    pub fn statistics(&self) -> ResolverStatistics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let tournaments = load(&self.counters.tournaments);
        let truncations = load(&self.counters.truncations);
        let trie = intent_extractor::trie::statistics();

        ResolverStatistics {
            resolutions: load(&self.counters.resolutions),
            recognitions: load(&self.counters.recognitions),
            entities: load(&self.counters.entities),
            tournaments,
            truncations,
            truncation_rate: if tournaments == 0 {
                0.0
            } else {
                truncations as f64 / tournaments as f64
            },
            fallbacks: load(&self.counters.fallbacks),
            unknowns: load(&self.counters.unknowns),
            trie_scans: trie.total_scans,
            trie_matches: trie.total_matches,
            caches: self.caches.all_stats(),
        }
    }

    /// Reset resolver, trie and cache counters; cached entries are kept
    pub fn reset_statistics(&self) {
        self.counters.reset();
        intent_extractor::trie::reset_statistics();
        self.caches.reset_stats();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use intent_core::{
        Classification, IntentError, JudgeChoice, MatcherConfig, PairwiseVerdict,
    };
    use intent_extractor::StaticDictionarySource;

    const CATALOG: &str = r#"
[[intents]]
code = "STOCK_QUERY"
name = "库存查询"
domain = "material"
keywords = ["库存", "数量"]

[[intents]]
code = "STOCK_REPORT"
name = "库存报表"
domain = "report"
keywords = ["库存", "报表"]

[[intents]]
code = "BATCH_DELETE"
name = "删除批次"
domain = "material"
operation = "delete"
exact_expressions = ["删除这个批次"]
keywords = ["删除", "批次"]

[[confusing_pairs]]
intents = ["STOCK_QUERY", "STOCK_REPORT"]
min_gap = 0.2
"#;

    struct FixedJudge(&'static str);

    #[async_trait]
    impl PairwiseJudge for FixedJudge {
        async fn compare(
            &self,
            _utterance: &str,
            first: &IntentBrief,
            _second: &IntentBrief,
        ) -> Result<PairwiseVerdict> {
            let winner = if first.code == self.0 {
                JudgeChoice::First
            } else {
                JudgeChoice::Second
            };
            Ok(PairwiseVerdict {
                winner,
                confidence: 0.9,
            })
        }
    }

    struct FixedClassifier(Option<&'static str>);

    #[async_trait]
    impl FallbackClassifier for FixedClassifier {
        async fn classify(
            &self,
            _utterance: &str,
            _candidates: &[IntentBrief],
        ) -> Result<Classification> {
            match self.0 {
                Some(code) => Ok(Classification {
                    intent_code: code.to_string(),
                    confidence: 0.7,
                }),
                None => Err(IntentError::Llm("offline".to_string())),
            }
        }
    }

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap()
    }

    fn resolver(config: AppConfig) -> IntentResolver {
        let catalog = IntentCatalog::from_toml_str(CATALOG).unwrap();
        let pipeline =
            EntityPipeline::from_source(Arc::new(StaticDictionarySource::new())).unwrap();
        IntentResolver::new(config, catalog, pipeline).unwrap()
    }

    fn flat_weights() -> AppConfig {
        AppConfig {
            matcher: MatcherConfig {
                keyword_weights: vec![0.30, 0.25],
                keyword_tail_weight: 0.05,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_utterance_is_unknown() {
        let r = resolver(AppConfig::default());
        let result = r.resolve("   ", now(), &mut ResolveContext::new()).await;
        assert_eq!(result.match_method, MatchMethod::Unknown);
        assert_eq!(result.intent_code, None);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(r.statistics().unknowns, 1);
    }

    #[tokio::test]
    async fn test_no_signal_is_unknown() {
        let r = resolver(AppConfig::default());
        let result = r.resolve("天气不错", now(), &mut ResolveContext::new()).await;
        assert_eq!(result.match_method, MatchMethod::Unknown);
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_exact_expression_accepted() {
        let r = resolver(AppConfig::default());
        let result = r
            .resolve("删除这个批次", now(), &mut ResolveContext::new())
            .await;
        assert_eq!(result.intent_code.as_deref(), Some("BATCH_DELETE"));
        assert_eq!(result.match_method, MatchMethod::Exact);
        assert_eq!(result.confidence, 1.0);
        assert!(result.tournament.is_none());
    }

    #[tokio::test]
    async fn test_catalog_operation_indicators_reach_scoring() {
        let builtin = resolver(flat_weights());
        let result = builtin
            .resolve("清掉批次", now(), &mut ResolveContext::new())
            .await;
        assert_eq!(result.intent_code.as_deref(), Some("BATCH_DELETE"));
        assert!((result.confidence - 0.30).abs() < 1e-5);

        let content = format!("{CATALOG}\n[operation_indicators]\ndelete = [\"清掉\"]\n");
        let catalog = IntentCatalog::from_toml_str(&content).unwrap();
        let pipeline =
            EntityPipeline::from_source(Arc::new(StaticDictionarySource::new())).unwrap();
        let custom = IntentResolver::new(flat_weights(), catalog, pipeline).unwrap();
        let result = custom
            .resolve("清掉批次", now(), &mut ResolveContext::new())
            .await;
        assert_eq!(result.intent_code.as_deref(), Some("BATCH_DELETE"));
        assert!((result.confidence - 0.35).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_confusing_pair_goes_to_tournament() {
        // "库存" hits both intents equally
        let r = resolver(flat_weights()).with_judge(Arc::new(FixedJudge("STOCK_REPORT")));
        let result = r.resolve("库存", now(), &mut ResolveContext::new()).await;

        assert_eq!(result.match_method, MatchMethod::Tournament);
        assert_eq!(result.intent_code.as_deref(), Some("STOCK_REPORT"));
        let log = result.tournament_log().unwrap();
        assert_eq!(log.last().unwrap().winner, "STOCK_REPORT");
        assert_eq!(r.statistics().tournaments, 1);
    }

    #[tokio::test]
    async fn test_zero_budget_uses_fallback() {
        let mut config = flat_weights();
        config.tournament.max_llm_calls = 0;
        let r = resolver(config)
            .with_judge(Arc::new(FixedJudge("STOCK_REPORT")))
            .with_fallback(Arc::new(FixedClassifier(Some("STOCK_QUERY"))));

        let result = r.resolve("库存", now(), &mut ResolveContext::new()).await;
        assert_eq!(result.match_method, MatchMethod::LlmFallback);
        assert_eq!(result.intent_code.as_deref(), Some("STOCK_QUERY"));
        assert!(result.truncated);
        assert!(result.tournament_log().unwrap().is_empty());

        let stats = r.statistics();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.truncations, 1);
        assert!((stats.truncation_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_fallback_degrades_to_top_candidate() {
        let r = resolver(flat_weights()).with_fallback(Arc::new(FixedClassifier(None)));
        let result = r.resolve("库存", now(), &mut ResolveContext::new()).await;
        assert_eq!(result.match_method, MatchMethod::Fusion);
        assert!(result.truncated);
        assert_eq!(
            result.intent_code.as_deref(),
            Some(result.candidates[0].intent_code.as_str())
        );
    }

    #[tokio::test]
    async fn test_reset_statistics() {
        let r = resolver(AppConfig::default());
        r.resolve("库存数量", now(), &mut ResolveContext::new()).await;
        assert_eq!(r.statistics().resolutions, 1);
        assert_eq!(r.statistics().recognitions, 1);

        r.reset_statistics();
        let stats = r.statistics();
        assert_eq!(stats.resolutions, 0);
        assert_eq!(stats.recognitions, 0);
        assert_eq!(stats.caches.len(), 2);
    }

    struct CountingEmbedder(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl EmbeddingClient for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    struct ReportOracle;

    impl SimilarityOracle for ReportOracle {
        fn similarity(&self, _embedding: &[f32], intent_code: &str) -> Option<f32> {
            (intent_code == "STOCK_REPORT").then_some(0.9)
        }
    }

    #[tokio::test]
    async fn test_embedding_memoized_in_context_and_cache() {
        let embedder = Arc::new(CountingEmbedder(Default::default()));
        let r = resolver(AppConfig::default()).with_semantic(embedder.clone(), Arc::new(ReportOracle));

        let mut ctx = ResolveContext::new();
        let first = r.resolve("库存", now(), &mut ctx).await;
        assert!(ctx.embedding().is_some());
        r.resolve("库存", now(), &mut ctx).await;
        r.resolve("库存", now(), &mut ResolveContext::new()).await;

        assert_eq!(embedder.0.load(Ordering::SeqCst), 1);
        assert_eq!(r.caches().embedding.stats().hits(), 1);
        assert_eq!(first.candidates[0].intent_code, "STOCK_REPORT");
        assert!(first.candidates[0].signals.semantic.is_some());
    }

    #[tokio::test]
    async fn test_domain_hint_breaks_tie() {
        let r = resolver(AppConfig::default());
        let mut ctx = ResolveContext::new().with_domain_hint("report");
        let result = r.resolve("库存", now(), &mut ctx).await;
        assert_eq!(result.candidates[0].intent_code, "STOCK_REPORT");
        assert!(result.candidates[0].breakdown.adjustment > 0.0);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let catalog = IntentCatalog::from_toml_str(CATALOG).unwrap();
        let pipeline =
            EntityPipeline::from_source(Arc::new(StaticDictionarySource::new())).unwrap();
        let mut config = AppConfig::default();
        config.matcher.max_candidates = 1;
        assert!(matches!(
            IntentResolver::new(config, catalog, pipeline),
            Err(IntentError::Configuration(_))
        ));
    }
}
