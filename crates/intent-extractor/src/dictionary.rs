//! Dictionary sources
//!
//! A dictionary is one TOML document per entity domain:
//!
//! ```toml
//! domain = "region"
//!
//! [[terms]]
//! name = "华东"
//! aliases = ["华东区", "华东地区"]
//!
//! [[patterns]]
//! regex = "([\\p{Han}]{2})省"
//! normalized = "${1}省"
//! confidence = 0.8
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use intent_core::{ConfigError, EntityType};

/// A canonical term with its aliases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermEntry {
    /// Canonical normalized name
    pub name: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub parent: Option<String>,
}

fn default_pattern_confidence() -> f32 {
    0.85
}

/// Regex rule for open-ended constructs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub regex: String,

    /// Normalized name; `$1`-style references expand capture groups.
    /// Defaults to the matched text.
    #[serde(default)]
    pub normalized: Option<String>,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default = "default_pattern_confidence")]
    pub confidence: f32,
}

/// Parsed dictionary for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryFile {
    pub domain: EntityType,

    #[serde(default)]
    pub terms: Vec<TermEntry>,

    #[serde(default)]
    pub patterns: Vec<PatternEntry>,
}

impl DictionaryFile {
    /// Empty dictionary for a domain
    pub fn empty(domain: EntityType) -> Self {
        Self {
            domain,
            terms: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// Parse a dictionary from TOML text
    pub fn from_toml_str(content: &str, origin: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.into(),
            message: e.to_string(),
        })
    }

    /// Structural checks; regex syntax is checked when the snapshot is built
    pub fn validate(&self, expected: EntityType) -> Result<(), ConfigError> {
        if self.domain != expected {
            return Err(ConfigError::InvalidValue {
                key: format!("{expected}.domain"),
                value: self.domain.to_string(),
            });
        }
        for term in &self.terms {
            if term.name.trim().is_empty() || term.aliases.iter().any(|a| a.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{expected}.terms"),
                    value: format!("empty term or alias near {:?}", term.name),
                });
            }
        }
        for pattern in &self.patterns {
            if !(pattern.confidence > 0.0 && pattern.confidence <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{expected}.patterns.confidence"),
                    value: pattern.confidence.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Where recognizers load their dictionaries from
pub trait DictionarySource: Send + Sync {
    fn load(&self, domain: EntityType) -> Result<DictionaryFile, ConfigError>;
}

/// Reads `<dir>/<domain>.toml`
#[derive(Debug, Clone)]
pub struct FileDictionarySource {
    dir: PathBuf,
}

impl FileDictionarySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, domain: EntityType) -> PathBuf {
        self.dir.join(format!("{}.toml", domain.as_str()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DictionarySource for FileDictionarySource {
    fn load(&self, domain: EntityType) -> Result<DictionaryFile, ConfigError> {
        let path = self.path_for(domain);
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let file = DictionaryFile::from_toml_str(&content, path)?;
        file.validate(domain)?;
        Ok(file)
    }
}

/// In-memory dictionaries, mostly for tests and embedding callers
///
/// Domains without a registered dictionary load as empty.
#[derive(Debug, Clone, Default)]
pub struct StaticDictionarySource {
    files: HashMap<EntityType, DictionaryFile>,
}

impl StaticDictionarySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dictionary(mut self, file: DictionaryFile) -> Self {
        self.files.insert(file.domain, file);
        self
    }

    /// Register a dictionary given as TOML text
    pub fn with_toml(self, content: &str) -> Result<Self, ConfigError> {
        let file = DictionaryFile::from_toml_str(content, "<static>")?;
        Ok(self.with_dictionary(file))
    }
}

impl DictionarySource for StaticDictionarySource {
    fn load(&self, domain: EntityType) -> Result<DictionaryFile, ConfigError> {
        let file = self
            .files
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| DictionaryFile::empty(domain));
        file.validate(domain)?;
        Ok(file)
    }
}
