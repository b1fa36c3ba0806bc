//! LLM-backed pairwise judge and fallback classifier

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use intent_core::{
    Classification, FallbackClassifier, IntentBrief, IntentError, JudgeChoice, LlmClient,
    PairwiseJudge, PairwiseVerdict, Result,
};

use crate::prompt::{classification_prompt, pairwise_prompt};

/// Confidence assumed when the model omits one
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// First JSON object embedded in a model response
///
/// Models wrap answers in prose or code fences; everything outside the
/// outermost braces is ignored.
fn extract_json(response: &str) -> Result<Value> {
    let start = response.find('{');
    let end = response.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(IntentError::Llm(format!(
            "No JSON object in response: {}",
            response.trim()
        )));
    };
    if end < start {
        return Err(IntentError::Llm("Malformed JSON object".to_string()));
    }

    serde_json::from_str(&response[start..=end])
        .map_err(|e| IntentError::Llm(format!("Failed to parse verdict: {e}")))
}

fn confidence_of(value: &Value) -> f32 {
    let raw = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().map(|v| v as f32),
        Some(Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    };
    raw.filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0)
}

/// Parse a pairwise verdict
///
/// `winner` may name the position ("first"/"second", "A"/"B", "1"/"2") or
/// one of the two intent codes.
pub fn parse_verdict(
    response: &str,
    first: &IntentBrief,
    second: &IntentBrief,
) -> Result<PairwiseVerdict> {
    let value = extract_json(response)?;
    let winner = value
        .get("winner")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| IntentError::Llm("Verdict without winner".to_string()))?;

    let choice = match winner.to_lowercase().as_str() {
        "first" | "a" | "1" => JudgeChoice::First,
        "second" | "b" | "2" => JudgeChoice::Second,
        _ if winner == first.code => JudgeChoice::First,
        _ if winner == second.code => JudgeChoice::Second,
        other => {
            return Err(IntentError::Llm(format!("Unknown winner: {other}")));
        }
    };

    Ok(PairwiseVerdict {
        winner: choice,
        confidence: confidence_of(&value),
    })
}

/// Parse a single-shot classification restricted to the candidate set
pub fn parse_classification(response: &str, candidates: &[IntentBrief]) -> Result<Classification> {
    let value = extract_json(response)?;
    let code = value
        .get("intent_code")
        .or_else(|| value.get("intent"))
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| IntentError::Llm("Classification without intent_code".to_string()))?;

    if !candidates.iter().any(|c| c.code == code) {
        return Err(IntentError::Llm(format!(
            "Classifier chose {code}, which is not a candidate"
        )));
    }

    Ok(Classification {
        intent_code: code.to_string(),
        confidence: confidence_of(&value),
    })
}

// ============================================================================
// Pairwise Judge
// ============================================================================

/// Pairwise judge that prompts an LLM for a JSON verdict
pub struct LlmPairwiseJudge {
    client: Arc<dyn LlmClient>,
}

impl LlmPairwiseJudge {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PairwiseJudge for LlmPairwiseJudge {
    async fn compare(
        &self,
        utterance: &str,
        first: &IntentBrief,
        second: &IntentBrief,
    ) -> Result<PairwiseVerdict> {
        let prompt = pairwise_prompt(utterance, first, second);
        let response = self.client.generate(&prompt).await?;
        debug!(
            client = self.client.name(),
            first = %first.code,
            second = %second.code,
            "judge responded"
        );
        parse_verdict(&response, first, second)
    }
}

// ============================================================================
// Fallback Classifier
// ============================================================================

/// Single-shot classifier over the whole candidate set
pub struct LlmFallbackClassifier {
    client: Arc<dyn LlmClient>,
}

impl LlmFallbackClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FallbackClassifier for LlmFallbackClassifier {
    async fn classify(&self, utterance: &str, candidates: &[IntentBrief]) -> Result<Classification> {
        if candidates.is_empty() {
            return Err(IntentError::AllSignalsEmpty);
        }
        let prompt = classification_prompt(utterance, candidates);
        let response = self.client.generate(&prompt).await?;
        parse_classification(&response, candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedClient(&'static str);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn brief(code: &str) -> IntentBrief {
        IntentBrief {
            code: code.to_string(),
            name: code.to_lowercase(),
            description: String::new(),
        }
    }

    #[test]
    fn test_parse_verdict_positions() {
        let (a, b) = (brief("A_QUERY"), brief("B_QUERY"));

        let v = parse_verdict(r#"{"winner": "second", "confidence": 0.8}"#, &a, &b).unwrap();
        assert_eq!(v.winner, JudgeChoice::Second);
        assert!((v.confidence - 0.8).abs() < 1e-6);

        let v = parse_verdict(r#"{"winner": "A", "confidence": "0.7"}"#, &a, &b).unwrap();
        assert_eq!(v.winner, JudgeChoice::First);
        assert!((v.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_parse_verdict_with_surrounding_text() {
        let (a, b) = (brief("A_QUERY"), brief("B_QUERY"));
        let response = "Sure.\n```json\n{\"winner\": \"B_QUERY\", \"confidence\": 1.7}\n```";
        let v = parse_verdict(response, &a, &b).unwrap();
        assert_eq!(v.winner, JudgeChoice::Second);
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn test_parse_verdict_defaults_and_errors() {
        let (a, b) = (brief("A_QUERY"), brief("B_QUERY"));
        let v = parse_verdict(r#"{"winner": "first"}"#, &a, &b).unwrap();
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);

        assert!(parse_verdict("first, clearly", &a, &b).is_err());
        assert!(parse_verdict(r#"{"winner": "third"}"#, &a, &b).is_err());
        assert!(parse_verdict(r#"{"confidence": 0.9}"#, &a, &b).is_err());
    }

    #[test]
    fn test_parse_classification_restricted_to_candidates() {
        let candidates = [brief("A_QUERY"), brief("B_QUERY")];
        let c = parse_classification(
            r#"{"intent_code": "B_QUERY", "confidence": 0.66}"#,
            &candidates,
        )
        .unwrap();
        assert_eq!(c.intent_code, "B_QUERY");

        assert!(parse_classification(r#"{"intent_code": "C"}"#, &candidates).is_err());
    }

    #[tokio::test]
    async fn test_llm_judge_round_trip() {
        let judge = LlmPairwiseJudge::new(Arc::new(CannedClient(
            r#"{"winner": "first", "confidence": 0.9}"#,
        )));
        let verdict = judge
            .compare("还有多少库存", &brief("A_QUERY"), &brief("B_QUERY"))
            .await
            .unwrap();
        assert_eq!(verdict.winner, JudgeChoice::First);
    }

    #[tokio::test]
    async fn test_fallback_classifier() {
        let classifier = LlmFallbackClassifier::new(Arc::new(CannedClient(
            r#"{"intent_code": "A_QUERY", "confidence": 0.6}"#,
        )));
        let c = classifier
            .classify("库存", &[brief("A_QUERY"), brief("B_QUERY")])
            .await
            .unwrap();
        assert_eq!(c.intent_code, "A_QUERY");

        assert!(matches!(
            classifier.classify("库存", &[]).await,
            Err(IntentError::AllSignalsEmpty)
        ));
    }
}
