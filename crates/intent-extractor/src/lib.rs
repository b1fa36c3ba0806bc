//! Intent Extractor - Entity recognition pipeline
//!
//! Recognizes time, region, department, metric and dimension entities in
//! an utterance using one shared trie engine plus per-domain pattern
//! passes, and standardizes colloquial phrases before scoring.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use intent_core::{ConfigError, EntityMatch, EntityType};

pub mod dictionary;
pub mod numeral;
pub mod recognizer;
pub mod standardize;
pub mod time;
pub mod trie;

pub use dictionary::{
    DictionaryFile, DictionarySource, FileDictionarySource, PatternEntry, StaticDictionarySource,
    TermEntry,
};
pub use recognizer::{DictionaryRecognizer, DictionarySnapshot};
pub use standardize::PhraseStandardizer;
pub use time::TimeRecognizer;
pub use trie::{TrieEntityIndex, TrieMatch, TrieStatistics};

/// Trait for per-domain entity recognizers
///
/// `recognize` is a pure function of the text, `today` and the loaded
/// dictionary; it returns matches sorted by start offset that never
/// overlap.
pub trait EntityRecognizer: Send + Sync {
    fn domain(&self) -> EntityType;

    fn recognize(&self, text: &str, today: NaiveDate) -> Vec<EntityMatch>;

    /// Rebuild from the dictionary source without publishing the result
    fn stage_reload(&self) -> Result<Box<dyn StagedReload + '_>, ConfigError>;

    /// Rebuild from the dictionary source and swap atomically
    fn reload(&self) -> Result<(), ConfigError> {
        self.stage_reload()?.commit();
        Ok(())
    }
}

/// A rebuilt snapshot that readers cannot see yet
pub trait StagedReload: Send {
    fn domain(&self) -> EntityType;

    /// Swap the staged snapshot in
    fn commit(self: Box<Self>);
}

/// Runs every recognizer and merges their output
pub struct EntityPipeline {
    recognizers: Vec<Box<dyn EntityRecognizer>>,
    /// Shared by recognition passes, exclusive while a reload commits
    generation: RwLock<()>,
}

impl EntityPipeline {
    /// Pipeline over explicit recognizers; earlier ones win ties
    pub fn new(recognizers: Vec<Box<dyn EntityRecognizer>>) -> Self {
        Self {
            recognizers,
            generation: RwLock::new(()),
        }
    }

    /// Time recognizer plus one dictionary recognizer per remaining domain
    pub fn from_source(source: Arc<dyn DictionarySource>) -> Result<Self, ConfigError> {
        let mut recognizers: Vec<Box<dyn EntityRecognizer>> =
            vec![Box::new(TimeRecognizer::new(source.clone())?)];

        for domain in EntityType::all() {
            if domain != EntityType::Time {
                recognizers.push(Box::new(DictionaryRecognizer::new(domain, source.clone())?));
            }
        }

        Ok(Self::new(recognizers))
    }

    pub fn domains(&self) -> Vec<EntityType> {
        self.recognizers.iter().map(|r| r.domain()).collect()
    }

    /// Recognize entities across all domains
    ///
    /// Cross-domain overlaps keep the longest match, then the more
    /// confident one, then the one from the earlier recognizer.
    pub fn recognize(&self, text: &str, today: NaiveDate) -> Vec<EntityMatch> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let _pass = self
            .generation
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut all: Vec<(usize, EntityMatch)> = self
            .recognizers
            .iter()
            .enumerate()
            .flat_map(|(order, r)| {
                r.recognize(text, today)
                    .into_iter()
                    .map(move |m| (order, m))
            })
            .collect();

        all.sort_by(|(oa, a), (ob, b)| {
            b.char_len()
                .cmp(&a.char_len())
                .then(b.confidence.total_cmp(&a.confidence))
                .then(oa.cmp(ob))
                .then(a.start.cmp(&b.start))
        });

        let mut selected: Vec<EntityMatch> = Vec::new();
        for (_, m) in all {
            if !selected.iter().any(|s| s.overlaps(&m)) {
                selected.push(m);
            }
        }
        selected.sort_by_key(|m| m.start);

        debug!(entities = selected.len(), "Entities recognized");
        selected
    }

    /// Reload every recognizer as one unit
    ///
    /// Every domain is rebuilt first. If any rebuild fails, nothing is
    /// swapped and that error is returned; otherwise all snapshots are
    /// swapped together, so a recognition pass never mixes old and new
    /// dictionaries.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let mut staged = Vec::with_capacity(self.recognizers.len());
        for recognizer in &self.recognizers {
            match recognizer.stage_reload() {
                Ok(reload) => staged.push(reload),
                Err(e) => {
                    warn!(
                        domain = %recognizer.domain(),
                        error = %e,
                        "Reload failed, keeping every previous snapshot"
                    );
                    return Err(e);
                }
            }
        }

        let _exclusive = self
            .generation
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for reload in staged {
            reload.commit();
        }
        info!(domains = self.recognizers.len(), "Entity dictionaries reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn source() -> Arc<dyn DictionarySource> {
        Arc::new(dictionaries())
    }

    fn dictionaries() -> StaticDictionarySource {
        StaticDictionarySource::new()
            .with_toml(
                r#"
domain = "time"
[[terms]]
name = "last_month"
aliases = ["上个月"]
[[terms]]
name = "recently"
aliases = ["最近"]
"#,
            )
            .and_then(|s| {
                s.with_toml(
                    r#"
domain = "region"
[[terms]]
name = "华东"
aliases = ["华东区"]
"#,
                )
            })
            .and_then(|s| {
                s.with_toml(
                    r#"
domain = "metric"
[[terms]]
name = "销售额"
aliases = ["销售", "营收"]
[[terms]]
name = "库存数量"
aliases = ["库存"]
"#,
                )
            })
            .and_then(|s| {
                s.with_toml(
                    r#"
domain = "department"
[[terms]]
name = "销售部"
aliases = ["销售团队"]
"#,
                )
            })
            .unwrap()
    }

    /// Source whose dictionaries can be replaced, or one domain broken
    struct SwappableSource {
        current: Mutex<StaticDictionarySource>,
        broken: Mutex<Option<EntityType>>,
    }

    impl DictionarySource for SwappableSource {
        fn load(&self, domain: EntityType) -> Result<DictionaryFile, ConfigError> {
            if *self.broken.lock().unwrap() == Some(domain) {
                return Err(ConfigError::MissingRequired(format!("{domain} dictionary")));
            }
            self.current.lock().unwrap().load(domain)
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
    }

    #[test]
    fn test_pipeline_across_domains() {
        let pipeline = EntityPipeline::from_source(source()).unwrap();
        assert_eq!(pipeline.domains().len(), 5);

        let matches = pipeline.recognize("华东区上个月的销售额", today());
        let found: Vec<(EntityType, &str)> = matches
            .iter()
            .map(|m| (m.entity_type, m.normalized_name.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                (EntityType::Region, "华东"),
                (EntityType::Time, "last_month"),
                (EntityType::Metric, "销售额"),
            ]
        );
        assert!(matches[1].date_range().is_some());
    }

    #[test]
    fn test_cross_domain_longest_wins() {
        let pipeline = EntityPipeline::from_source(source()).unwrap();
        // "销售团队" (department) beats "销售" (metric alias)
        let matches = pipeline.recognize("销售团队业绩", today());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entity_type, EntityType::Department);
    }

    #[test]
    fn test_reload_swaps_all_domains_or_none() {
        let source = Arc::new(SwappableSource {
            current: Mutex::new(StaticDictionarySource::new()),
            broken: Mutex::new(None),
        });
        let pipeline = EntityPipeline::from_source(source.clone()).unwrap();
        assert!(pipeline.recognize("华东销售额", today()).is_empty());

        *source.current.lock().unwrap() = dictionaries();
        *source.broken.lock().unwrap() = Some(EntityType::Department);
        assert!(pipeline.reload().is_err());
        // Region and metric rebuilt fine but stay unpublished
        assert!(pipeline.recognize("华东销售额", today()).is_empty());

        *source.broken.lock().unwrap() = None;
        pipeline.reload().unwrap();
        let found: Vec<EntityType> = pipeline
            .recognize("华东销售额", today())
            .iter()
            .map(|m| m.entity_type)
            .collect();
        assert_eq!(found, vec![EntityType::Region, EntityType::Metric]);
    }

    #[test]
    fn test_blank_utterance() {
        let pipeline = EntityPipeline::from_source(source()).unwrap();
        assert!(pipeline.recognize("  ", today()).is_empty());
    }

    proptest! {
        #[test]
        fn prop_pipeline_sorted_and_disjoint(
            pieces in prop::collection::vec(
                prop::sample::select(vec!["华东", "区", "上个月", "最近", "3天", "销售", "团队", "额", "库存", "的"]),
                0..10,
            )
        ) {
            let pipeline = EntityPipeline::from_source(source()).unwrap();
            let text = pieces.concat();
            let matches = pipeline.recognize(&text, today());
            for pair in matches.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
        }

        #[test]
        fn prop_pipeline_reload_idempotent(
            pieces in prop::collection::vec(
                prop::sample::select(vec!["华东区", "上个月", "最近7天", "销售额", "销售团队", "x"]),
                0..8,
            )
        ) {
            let pipeline = EntityPipeline::from_source(source()).unwrap();
            let text = pieces.concat();
            let before = pipeline.recognize(&text, today());
            pipeline.reload().unwrap();
            prop_assert_eq!(before, pipeline.recognize(&text, today()));
        }
    }
}
