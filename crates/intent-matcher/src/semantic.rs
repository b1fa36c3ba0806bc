//! Exemplar-based similarity oracle
//!
//! Holds precomputed exemplar embeddings per intent (produced offline) and
//! answers cosine similarity queries against an utterance embedding. The
//! best exemplar of an intent decides its similarity.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use intent_core::{ConfigError, SimilarityOracle};

/// One exemplar as stored in the exemplar file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExemplarRecord {
    pub intent_code: String,

    /// Exemplar utterance (informational)
    #[serde(default)]
    pub text: String,

    pub embedding: Vec<f32>,
}

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize vector to unit length
pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let n = l2_norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

/// Cosine similarity of two vectors; 0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (na, nb) = (l2_norm(a), l2_norm(b));
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() / (na * nb)
}

/// In-memory exemplar index
#[derive(Debug, Clone, Default)]
pub struct ExemplarIndex {
    dimension: usize,
    /// intent code -> unit-length exemplar vectors
    exemplars: HashMap<String, Vec<Vec<f32>>>,
}

impl ExemplarIndex {
    /// Build from records; all embeddings must share one dimension
    pub fn new(records: Vec<ExemplarRecord>) -> Result<Self, ConfigError> {
        let mut dimension = 0;
        let mut exemplars: HashMap<String, Vec<Vec<f32>>> = HashMap::new();

        for record in records {
            if record.embedding.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "exemplars.embedding".to_string(),
                    value: format!("empty embedding for {}", record.intent_code),
                });
            }
            if dimension == 0 {
                dimension = record.embedding.len();
            } else if record.embedding.len() != dimension {
                return Err(ConfigError::InvalidValue {
                    key: "exemplars.embedding".to_string(),
                    value: format!(
                        "dimension {} for {}, expected {dimension}",
                        record.embedding.len(),
                        record.intent_code
                    ),
                });
            }
            exemplars
                .entry(record.intent_code)
                .or_default()
                .push(normalize(record.embedding));
        }

        Ok(Self {
            dimension,
            exemplars,
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let records: Vec<ExemplarRecord> =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
                path: "<exemplars>".into(),
                message: e.to_string(),
            })?;
        Self::new(records)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let records: Vec<ExemplarRecord> =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::new(records)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of intents with at least one exemplar
    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }
}

impl SimilarityOracle for ExemplarIndex {
    fn similarity(&self, utterance_embedding: &[f32], intent_code: &str) -> Option<f32> {
        if utterance_embedding.len() != self.dimension {
            return None;
        }
        let query = normalize(utterance_embedding.to_vec());

        self.exemplars
            .get(intent_code)?
            .iter()
            .map(|e| e.iter().zip(&query).map(|(x, y)| x * y).sum::<f32>())
            .max_by(|a, b| a.total_cmp(b))
            .map(|s| s.clamp(0.0, 1.0))
    }
}
