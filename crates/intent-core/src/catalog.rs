//! Intent catalog
//!
//! The catalog is the static description of every intent the resolver can
//! return: scoring rules (exact expressions, regex patterns, keywords),
//! confusing pairs that always require arbitration, the colloquial
//! phrase mappings used by the standardizer, and the operation indicator
//! lexicon.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::{EntityType, IntentBrief, OperationType};

/// One intent definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDefinition {
    /// Stable intent code (e.g. `MATERIAL_BATCH_QUERY`)
    pub code: String,

    /// Human readable name
    pub name: String,

    /// Description shown to the judge
    #[serde(default)]
    pub description: String,

    /// Business domain (e.g. `material`, `report`)
    pub domain: String,

    /// Operation performed by the intent
    #[serde(default = "default_operation")]
    pub operation: OperationType,

    /// Keywords in catalog order
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Keywords that argue against this intent
    #[serde(default)]
    pub negative_keywords: Vec<String>,

    /// Regex rules
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Whole-utterance expressions that resolve directly to this intent
    #[serde(default)]
    pub exact_expressions: Vec<String>,

    /// Entity types whose presence earns the domain bonus
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
}

fn default_operation() -> OperationType {
    OperationType::Query
}

impl IntentDefinition {
    /// Brief used in judge and classifier prompts
    pub fn brief(&self) -> IntentBrief {
        IntentBrief {
            code: self.code.clone(),
            name: self.name.clone(),
            description: if self.description.is_empty() {
                self.name.clone()
            } else {
                self.description.clone()
            },
        }
    }
}

/// Two intents that are easily confused, with the score gap required to
/// skip arbitration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusingPairEntry {
    pub intents: [String; 2],
    pub min_gap: f32,
}

/// Colloquial phrase and its standard form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseMapping {
    pub colloquial: String,
    pub standard: String,
}

/// Indicator words per operation type
///
/// A catalog without an `[operation_indicators]` table gets the built-in
/// lexicon; a table that names only some operations leaves the others
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationIndicators {
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default)]
    pub create: Vec<String>,
    #[serde(default)]
    pub update: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for OperationIndicators {
    fn default() -> Self {
        Self {
            query: words(&[
                "查询", "查看", "查一下", "看看", "看下", "多少", "哪些", "统计", "显示", "列出",
                "是否", "情况", "query", "show", "list", "how many",
            ]),
            create: words(&[
                "新增", "添加", "创建", "新建", "录入", "登记", "入库", "add", "create", "new",
            ]),
            update: words(&[
                "修改", "更新", "调整", "变更", "编辑", "更改", "update", "modify", "change",
            ]),
            delete: words(&["删除", "移除", "作废", "删掉", "delete", "remove"]),
        }
    }
}

impl OperationIndicators {
    /// Indicator lists in operation order
    pub fn lists(&self) -> [(OperationType, &[String]); 4] {
        [
            (OperationType::Query, &self.query),
            (OperationType::Create, &self.create),
            (OperationType::Update, &self.update),
            (OperationType::Delete, &self.delete),
        ]
    }
}

/// Full intent catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentCatalog {
    #[serde(default)]
    pub intents: Vec<IntentDefinition>,

    #[serde(default)]
    pub confusing_pairs: Vec<ConfusingPairEntry>,

    #[serde(default)]
    pub phrases: Vec<PhraseMapping>,

    #[serde(default)]
    pub operation_indicators: OperationIndicators,
}

impl IntentCatalog {
    /// Parse and validate a catalog from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let catalog: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<catalog>".into(),
            message: e.to_string(),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load and validate a catalog file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let catalog: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check codes, regexes and pair references
    ///
    /// Regex syntax is checked by the scorer when it compiles the rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut codes = HashSet::new();
        for intent in &self.intents {
            if intent.code.trim().is_empty() {
                return Err(ConfigError::MissingRequired("intents.code".to_string()));
            }
            if !codes.insert(intent.code.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "intents.code".to_string(),
                    value: format!("duplicate code {}", intent.code),
                });
            }
            if intent.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("intents.{}.keywords", intent.code),
                    value: "empty keyword".to_string(),
                });
            }
        }

        for pair in &self.confusing_pairs {
            let [a, b] = &pair.intents;
            if a == b {
                return Err(ConfigError::InvalidValue {
                    key: "confusing_pairs.intents".to_string(),
                    value: format!("{a} paired with itself"),
                });
            }
            for code in [a, b] {
                if !codes.contains(code.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        key: "confusing_pairs.intents".to_string(),
                        value: format!("unknown intent {code}"),
                    });
                }
            }
            if !(pair.min_gap > 0.0 && pair.min_gap <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    key: format!("confusing_pairs.{a}/{b}.min_gap"),
                    value: pair.min_gap.to_string(),
                });
            }
        }

        for phrase in &self.phrases {
            if phrase.colloquial.trim().is_empty() {
                return Err(ConfigError::MissingRequired(
                    "phrases.colloquial".to_string(),
                ));
            }
        }

        for (op, indicators) in self.operation_indicators.lists() {
            if indicators.iter().any(|w| w.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("operation_indicators.{op}"),
                    value: "empty indicator".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Look up an intent by code
    pub fn get(&self, code: &str) -> Option<&IntentDefinition> {
        self.intents.iter().find(|i| i.code == code)
    }

    /// Brief for an intent, falling back to the bare code
    pub fn brief(&self, code: &str) -> IntentBrief {
        self.get(code).map(IntentDefinition::brief).unwrap_or_else(|| IntentBrief {
            code: code.to_string(),
            name: code.to_string(),
            description: code.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}
