//! Resolver Integration Tests
//!
//! Drive `IntentResolver` end to end with the shipped data files and with
//! small inline catalogs, using deterministic judges in place of an LLM.
//!
//! Author: hephaex@gmail.com

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use intent_arena::{IntentResolver, ResolveContext};
use intent_core::{
    AppConfig, Classification, EntityType, FallbackClassifier, IntentBrief, IntentCatalog,
    JudgeChoice, MatchMethod, MatchResolution, MatcherConfig, PairwiseJudge, PairwiseVerdict,
    Result, TournamentState,
};
use intent_extractor::{EntityPipeline, FileDictionarySource, StaticDictionarySource};

// =============================================================================
// Helpers
// =============================================================================

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data")
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

fn shipped_resolver() -> IntentResolver {
    let mut config = AppConfig::default();
    config.data.data_dir = data_dir();
    let catalog = IntentCatalog::from_file(config.data.catalog_path()).unwrap();
    let source = Arc::new(FileDictionarySource::new(config.data.dictionary_path()));
    let pipeline = EntityPipeline::from_source(source).unwrap();
    IntentResolver::new(config, catalog, pipeline).unwrap()
}

fn inline_resolver(catalog: &str, config: AppConfig) -> IntentResolver {
    let catalog = IntentCatalog::from_toml_str(catalog).unwrap();
    let pipeline = EntityPipeline::from_source(Arc::new(StaticDictionarySource::new())).unwrap();
    IntentResolver::new(config, catalog, pipeline).unwrap()
}

/// Judge with a fixed strength per intent, independent of position
struct StrengthJudge {
    strength: HashMap<&'static str, u32>,
    calls: AtomicUsize,
}

impl StrengthJudge {
    fn new(strength: &[(&'static str, u32)]) -> Self {
        Self {
            strength: strength.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PairwiseJudge for StrengthJudge {
    async fn compare(
        &self,
        _utterance: &str,
        first: &IntentBrief,
        second: &IntentBrief,
    ) -> Result<PairwiseVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let score = |b: &IntentBrief| self.strength.get(b.code.as_str()).copied().unwrap_or(0);
        let winner = if score(second) > score(first) {
            JudgeChoice::Second
        } else {
            JudgeChoice::First
        };
        Ok(PairwiseVerdict {
            winner,
            confidence: 0.9,
        })
    }
}

struct FixedClassifier(&'static str);

#[async_trait]
impl FallbackClassifier for FixedClassifier {
    async fn classify(
        &self,
        _utterance: &str,
        _candidates: &[IntentBrief],
    ) -> Result<Classification> {
        Ok(Classification {
            intent_code: self.0.to_string(),
            confidence: 0.66,
        })
    }
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

// =============================================================================
// Shipped Data
// =============================================================================

#[tokio::test]
async fn test_colloquial_inventory_question() {
    let resolver = shipped_resolver();
    let result = resolver
        .resolve("还有多少库存", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(result.standardized, "查询库存数量");
    assert_eq!(result.intent_code.as_deref(), Some("MATERIAL_BATCH_QUERY"));
    assert_eq!(result.match_method, MatchMethod::Keyword);
    assert!(close(result.confidence, 0.95));
    assert!(result.matched_keywords().iter().any(|k| k == "库存数量"));
    assert!(result.tournament.is_none());
    assert!(!result.truncated);
    assert_eq!(result.candidates[1].intent_code, "REPORT_INVENTORY_QUERY");
}

#[tokio::test]
async fn test_exact_expression_from_shipped_catalog() {
    let resolver = shipped_resolver();
    let result = resolver
        .resolve("删除这个批次", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(result.intent_code.as_deref(), Some("MATERIAL_BATCH_DELETE"));
    assert_eq!(result.match_method, MatchMethod::Exact);
    assert_eq!(result.confidence, 1.0);
}

#[tokio::test]
async fn test_entities_feed_domain_bonus() {
    let resolver = shipped_resolver();
    let result = resolver
        .resolve("上周华东的库存报表", now(), &mut ResolveContext::new())
        .await;

    let time = result
        .entities
        .iter()
        .find(|e| e.entity_type == EntityType::Time)
        .unwrap();
    assert_eq!(time.normalized_name, "last_week");
    assert_eq!(
        time.date_range(),
        Some((
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        ))
    );
    assert!(result
        .entities
        .iter()
        .any(|e| e.entity_type == EntityType::Region && e.normalized_name == "华东"));

    // The negative keyword removes the batch query; only the report is left
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.intent_code.as_deref(), Some("REPORT_INVENTORY_QUERY"));
    assert_eq!(result.match_method, MatchMethod::Fusion);
    assert!(close(result.confidence, 0.60));
}

#[tokio::test]
async fn test_unrelated_utterance_is_unknown() {
    let resolver = shipped_resolver();
    let result = resolver
        .resolve("今天天气怎么样", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(result.match_method, MatchMethod::Unknown);
    assert!(result.intent_code.is_none());
    assert!(result.candidates.is_empty());
    // Recognition still ran
    assert!(result
        .entities
        .iter()
        .any(|e| e.entity_type == EntityType::Time && e.normalized_name == "today"));
}

// =============================================================================
// Arbitration
// =============================================================================

const NEAR_TIE: &str = r#"
[[intents]]
code = "A_QUERY"
name = "甲查询"
domain = "material"
keywords = ["库存", "数量"]

[[intents]]
code = "B_QUERY"
name = "乙查询"
domain = "material"
keywords = ["库存"]
"#;

fn steep_weights() -> AppConfig {
    AppConfig {
        matcher: MatcherConfig {
            keyword_weights: vec![0.60, 0.02],
            keyword_tail_weight: 0.01,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_near_tie_resolved_by_tournament() {
    let judge = Arc::new(StrengthJudge::new(&[("B_QUERY", 2), ("A_QUERY", 1)]));
    let resolver = inline_resolver(NEAR_TIE, steep_weights()).with_judge(judge.clone());

    let result = resolver
        .resolve("库存数量", now(), &mut ResolveContext::new())
        .await;

    assert!(close(result.candidates[0].normalized_score, 0.62));
    assert!(close(result.candidates[1].normalized_score, 0.60));
    assert_eq!(result.match_method, MatchMethod::Tournament);
    assert_eq!(result.intent_code.as_deref(), Some("B_QUERY"));
    assert!(close(result.confidence, 0.9));
    assert!(!result.truncated);

    let summary = result.tournament.as_ref().unwrap();
    assert_eq!(summary.state, TournamentState::Completed);
    assert_eq!(summary.log.len(), 1);
    assert_eq!(summary.llm_calls, 2);
    let only = &summary.log[0];
    assert_eq!(only.winner, "B_QUERY");
    assert_eq!(only.resolution, MatchResolution::Judged);
    assert!(only.reversed_check.as_ref().is_some_and(|r| r.agreed));
    assert_eq!(judge.calls(), 2);
}

#[tokio::test]
async fn test_repeat_resolution_reuses_cached_judgment() {
    let judge = Arc::new(StrengthJudge::new(&[("B_QUERY", 2)]));
    let resolver = inline_resolver(NEAR_TIE, steep_weights()).with_judge(judge.clone());

    let first = resolver
        .resolve("库存数量", now(), &mut ResolveContext::new())
        .await;
    let second = resolver
        .resolve("库存数量", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(first.intent_code, second.intent_code);
    assert_eq!(judge.calls(), 2);
    let summary = second.tournament.as_ref().unwrap();
    assert_eq!(summary.log[0].resolution, MatchResolution::Cached);
    assert_eq!(summary.llm_calls, 0);
    assert!(resolver.caches().judgment.stats().hits() >= 1);
}

#[tokio::test]
async fn test_confusing_pair_forces_arbitration() {
    const CATALOG: &str = r#"
[[intents]]
code = "P_QUERY"
name = "批次查询"
domain = "material"
keywords = ["库存", "数量", "查询", "批次"]

[[intents]]
code = "Q_QUERY"
name = "库存报表"
domain = "report"
keywords = ["库存"]

[[confusing_pairs]]
intents = ["P_QUERY", "Q_QUERY"]
min_gap = 0.7
"#;
    let judge = Arc::new(StrengthJudge::new(&[("Q_QUERY", 5)]));
    let resolver = inline_resolver(CATALOG, AppConfig::default()).with_judge(judge);

    let result = resolver
        .resolve("查询库存数量批次", now(), &mut ResolveContext::new())
        .await;

    // High enough to accept outright, but the pair needs a 0.7 gap
    assert!(close(result.candidates[0].normalized_score, 0.95));
    assert_eq!(result.match_method, MatchMethod::Tournament);
    assert_eq!(result.intent_code.as_deref(), Some("Q_QUERY"));
}

const FOUR_WAY: &str = r#"
[[intents]]
code = "W_A"
name = "甲"
domain = "material"
keywords = ["库存"]

[[intents]]
code = "W_B"
name = "乙"
domain = "material"
keywords = ["库存"]

[[intents]]
code = "W_C"
name = "丙"
domain = "material"
keywords = ["库存"]

[[intents]]
code = "W_D"
name = "丁"
domain = "material"
keywords = ["库存"]
"#;

#[tokio::test]
async fn test_budget_exhaustion_truncates() {
    let mut config = AppConfig::default();
    config.tournament.max_llm_calls = 3;
    let judge = Arc::new(StrengthJudge::new(&[("W_D", 4), ("W_C", 3), ("W_B", 2)]));
    let resolver = inline_resolver(FOUR_WAY, config).with_judge(judge.clone());

    let result = resolver
        .resolve("库存", now(), &mut ResolveContext::new())
        .await;

    // Seeds 1 and 4 meet first; the second pairing cannot reserve two calls
    assert_eq!(result.match_method, MatchMethod::Tournament);
    assert!(result.truncated);
    assert_eq!(result.intent_code.as_deref(), Some("W_D"));
    assert!(close(result.confidence, 0.9 * 0.8));

    let summary = result.tournament.as_ref().unwrap();
    assert_eq!(summary.state, TournamentState::BudgetExhausted);
    assert_eq!(summary.llm_calls, 2);
    assert_eq!(judge.calls(), 2);

    let stats = resolver.statistics();
    assert_eq!(stats.tournaments, 1);
    assert_eq!(stats.truncations, 1);
}

#[tokio::test]
async fn test_round_robin_full_schedule() {
    let mut config = AppConfig::default();
    config.tournament.mode = intent_core::TournamentMode::RoundRobin;
    config.tournament.bidirectional_comparison = false;
    let judge = Arc::new(StrengthJudge::new(&[("W_C", 9)]));
    let resolver = inline_resolver(FOUR_WAY, config).with_judge(judge.clone());

    let result = resolver
        .resolve("库存", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(result.intent_code.as_deref(), Some("W_C"));
    assert_eq!(judge.calls(), 6);
    assert_eq!(result.tournament.as_ref().unwrap().standings.len(), 4);
}

#[tokio::test]
async fn test_disabled_tournament_uses_fallback() {
    let mut config = AppConfig::default();
    config.tournament.enabled = false;
    let judge = Arc::new(StrengthJudge::new(&[]));
    let resolver = inline_resolver(FOUR_WAY, config)
        .with_judge(judge.clone())
        .with_fallback(Arc::new(FixedClassifier("W_B")));

    let result = resolver
        .resolve("库存", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(result.match_method, MatchMethod::LlmFallback);
    assert_eq!(result.intent_code.as_deref(), Some("W_B"));
    assert!(close(result.confidence, 0.66));
    assert!(result.tournament.is_none());
    assert!(!result.truncated);
    assert_eq!(judge.calls(), 0);
}

#[tokio::test]
async fn test_fallback_disabled_degrades_to_leader() {
    let mut config = AppConfig::default();
    config.tournament.enabled = false;
    config.resolution.fallback_enabled = false;
    let resolver =
        inline_resolver(FOUR_WAY, config).with_fallback(Arc::new(FixedClassifier("W_B")));

    let result = resolver
        .resolve("库存", now(), &mut ResolveContext::new())
        .await;

    assert_eq!(result.match_method, MatchMethod::Fusion);
    assert_eq!(result.intent_code.as_deref(), Some("W_A"));
    assert!(result.truncated);
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_statistics_serialize() {
    let resolver = shipped_resolver();
    tokio_test::block_on(resolver.resolve("还有多少库存", now(), &mut ResolveContext::new()));
    tokio_test::block_on(resolver.resolve("", now(), &mut ResolveContext::new()));

    let stats = resolver.statistics();
    assert_eq!(stats.resolutions, 2);
    assert_eq!(stats.recognitions, 1);
    assert_eq!(stats.unknowns, 1);
    assert_eq!(stats.truncation_rate, 0.0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["resolutions"], 2);
    assert_eq!(json["caches"].as_array().unwrap().len(), 2);
}
