//! Intent Matcher - Candidate scoring
//!
//! Turns an utterance (plus recognized entities) into a ranked list of
//! intent candidates, and decides when a pair of near-tied candidates is
//! too easily confused to accept without arbitration.

pub mod confusing;
pub mod operation;
pub mod scorer;
pub mod semantic;

pub use confusing::{ConfusingPairPolicy, ConfusingPairTable, StaticConfusingPairs};
pub use intent_core::OperationIndicators;
pub use operation::OperationDetector;
pub use scorer::{CandidateScorer, ScoringInput, ScoringPass};
pub use semantic::{cosine_similarity, ExemplarIndex, ExemplarRecord};
