//! Confusing-pair policy
//!
//! Some intent pairs are known to be mixed up. For those, a stricter gap
//! between the top two scores is required before the top candidate may be
//! accepted without arbitration. The decision depends on the gap only, so
//! inflating the leader's absolute score cannot bypass it.

use std::collections::HashMap;
use std::sync::Arc;

use intent_core::IntentCatalog;

/// Lookup of the gap required for an unordered intent pair
pub trait ConfusingPairTable: Send + Sync {
    fn required_gap(&self, a: &str, b: &str) -> Option<f32>;
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Immutable pair table
#[derive(Debug, Clone, Default)]
pub struct StaticConfusingPairs {
    gaps: HashMap<(String, String), f32>,
}

impl StaticConfusingPairs {
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S, f32)>,
        S: AsRef<str>,
    {
        let gaps = pairs
            .into_iter()
            .map(|(a, b, gap)| (pair_key(a.as_ref(), b.as_ref()), gap))
            .collect();
        Self { gaps }
    }

    /// Table from the catalog's `[[confusing_pairs]]`
    pub fn from_catalog(catalog: &IntentCatalog) -> Self {
        Self::new(
            catalog
                .confusing_pairs
                .iter()
                .map(|p| (p.intents[0].as_str(), p.intents[1].as_str(), p.min_gap)),
        )
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }
}

impl ConfusingPairTable for StaticConfusingPairs {
    fn required_gap(&self, a: &str, b: &str) -> Option<f32> {
        self.gaps.get(&pair_key(a, b)).copied()
    }
}

/// Gap rule for known ambiguous pairs
#[derive(Clone)]
pub struct ConfusingPairPolicy {
    table: Arc<dyn ConfusingPairTable>,
}

impl ConfusingPairPolicy {
    pub fn new(table: Arc<dyn ConfusingPairTable>) -> Self {
        Self { table }
    }

    pub fn from_catalog(catalog: &IntentCatalog) -> Self {
        Self::new(Arc::new(StaticConfusingPairs::from_catalog(catalog)))
    }

    /// Required gap, 0 for pairs that are not confusing
    pub fn required_gap(&self, a: &str, b: &str) -> f32 {
        self.table.required_gap(a, b).unwrap_or(0.0)
    }

    /// Whether the observed gap is too small for this pair
    pub fn force_arbitration(&self, a: &str, b: &str, observed_gap: f32) -> bool {
        observed_gap < self.required_gap(a, b)
    }
}

impl std::fmt::Debug for ConfusingPairPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfusingPairPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> ConfusingPairPolicy {
        ConfusingPairPolicy::new(Arc::new(StaticConfusingPairs::new([(
            "MATERIAL_BATCH_QUERY",
            "REPORT_INVENTORY_QUERY",
            0.2,
        )])))
    }

    #[test]
    fn test_unordered_lookup() {
        let p = policy();
        assert_eq!(p.required_gap("MATERIAL_BATCH_QUERY", "REPORT_INVENTORY_QUERY"), 0.2);
        assert_eq!(p.required_gap("REPORT_INVENTORY_QUERY", "MATERIAL_BATCH_QUERY"), 0.2);
        assert_eq!(p.required_gap("MATERIAL_BATCH_QUERY", "OTHER"), 0.0);
    }

    #[test]
    fn test_force_arbitration() {
        let p = policy();
        assert!(p.force_arbitration("MATERIAL_BATCH_QUERY", "REPORT_INVENTORY_QUERY", 0.1));
        assert!(!p.force_arbitration("MATERIAL_BATCH_QUERY", "REPORT_INVENTORY_QUERY", 0.25));
        assert!(!p.force_arbitration("A", "B", 0.0));
    }

    proptest! {
        /// The decision sees only the gap: a leader with any absolute
        /// score, even above every acceptance threshold, is still sent to
        /// arbitration while the gap stays below the pair's minimum
        #[test]
        fn prop_high_leader_still_arbitrated(
            top1 in 0.2f32..=1.0,
            gap in 0.0f32..0.19,
        ) {
            let p = policy();
            let top2 = top1 - gap;
            prop_assert!(p.force_arbitration(
                "MATERIAL_BATCH_QUERY",
                "REPORT_INVENTORY_QUERY",
                top1 - top2,
            ));
            prop_assert!(p.force_arbitration(
                "REPORT_INVENTORY_QUERY",
                "MATERIAL_BATCH_QUERY",
                top1 - top2,
            ));
        }
    }
}
