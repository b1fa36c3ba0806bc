//! Tournament engine
//!
//! Arbitrates between near-tied candidates with pairwise judge calls
//! organized as a bracket. Lifecycle:
//!
//! ```text
//! Seeded -> BracketBuilt -> Running -> Completed | TimedOut | BudgetExhausted
//! ```
//!
//! Judge calls are reserved against `max_llm_calls` before a comparison is
//! scheduled, each call runs under `per_comparison_timeout_ms`, and the
//! whole bracket under the hard `total_timeout_ms` deadline. A failed
//! comparison is decided by seed; an interrupted bracket returns the best
//! contender so far with `truncated` set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use intent_core::{
    IntentBrief, IntentError, JudgeChoice, MatchResolution, PairwiseJudge, Result, ReverseCheck,
    Standing, TournamentConfig, TournamentMatch, TournamentState, TournamentSummary,
};

use crate::bracket::{Bracket, Pairing, Table};
use crate::cache::{hash_text, CachedJudgment, JudgmentCache};

/// Confidence of a comparison decided by seed order
pub const SEED_FALLBACK_CONFIDENCE: f32 = 0.5;

/// One judgment, already mapped from position to intent code
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub winner: String,
    pub confidence: f32,
}

/// Combine a forward and a reversed judgment of the same pair
///
/// - both agree: their mean confidence
/// - they disagree by more than `threshold`: the lower-confidence judgment
/// - they disagree within `threshold` (equal confidences included): the
///   forward winner with the lower of the two confidences
/// - only one is present: that one
pub fn reconcile(
    forward: Option<Judgment>,
    reverse: Option<Judgment>,
    threshold: f32,
) -> Option<(Judgment, Option<ReverseCheck>)> {
    match (forward, reverse) {
        (Some(f), Some(r)) => {
            let agreed = f.winner == r.winner;
            let check = ReverseCheck {
                winner: r.winner.clone(),
                confidence: r.confidence,
                agreed,
            };
            let decided = if agreed {
                Judgment {
                    winner: f.winner,
                    confidence: (f.confidence + r.confidence) / 2.0,
                }
            } else if (f.confidence - r.confidence).abs() > threshold {
                if r.confidence < f.confidence {
                    r
                } else {
                    f
                }
            } else {
                Judgment {
                    confidence: f.confidence.min(r.confidence),
                    winner: f.winner,
                }
            };
            Some((decided, Some(check)))
        }
        (Some(f), None) => Some((f, None)),
        (None, Some(r)) => {
            let check = ReverseCheck {
                winner: r.winner.clone(),
                confidence: r.confidence,
                agreed: false,
            };
            Some((r, Some(check)))
        }
        (None, None) => None,
    }
}

/// Result of one tournament
#[derive(Debug, Clone, PartialEq)]
pub struct TournamentOutcome {
    /// Intent code of the chosen contender
    pub winner: String,
    /// Confidence of the comparison that decided the winner
    pub confidence: f32,
    pub summary: TournamentSummary,
}

impl TournamentOutcome {
    pub fn truncated(&self) -> bool {
        self.summary.truncated
    }
}

#[derive(Debug)]
struct CallBudget {
    limit: usize,
    reserved: usize,
}

impl CallBudget {
    fn try_reserve(&mut self, calls: usize) -> bool {
        if self.reserved + calls > self.limit {
            return false;
        }
        self.reserved += calls;
        true
    }
}

enum Job {
    Cached(Pairing, CachedJudgment),
    Judge(Pairing),
}

struct PlayedMatch {
    pairing: Pairing,
    winner: usize,
    loser: usize,
    record: TournamentMatch,
}

fn advance(state: &mut TournamentState, next: TournamentState) {
    debug!(from = ?*state, to = ?next, "tournament state");
    *state = next;
}

/// Pairwise-judge tournament over ranked contenders
pub struct TournamentEngine {
    config: TournamentConfig,
    judge: Arc<dyn PairwiseJudge>,
    cache: Option<JudgmentCache>,
}

impl TournamentEngine {
    pub fn new(config: TournamentConfig, judge: Arc<dyn PairwiseJudge>) -> Self {
        Self {
            config,
            judge,
            cache: None,
        }
    }

    /// Reuse judgments across tournaments
    pub fn with_cache(mut self, cache: JudgmentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &TournamentConfig {
        &self.config
    }

    /// Run a bracket over `contenders`, ordered by seed (best first)
    pub async fn run(&self, utterance: &str, contenders: &[IntentBrief]) -> Result<TournamentOutcome> {
        if contenders.is_empty() {
            return Err(IntentError::AllSignalsEmpty);
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.total_timeout_ms);
        let mut state = TournamentState::Seeded;

        let mut table = Table::new(contenders.len());
        let mut bracket = Bracket::new(
            self.config.mode,
            contenders.len(),
            self.config.random_seed ^ hash_text(utterance),
            self.config.swiss_rounds,
        );
        advance(&mut state, TournamentState::BracketBuilt);
        debug!(
            mode = %self.config.mode,
            contenders = contenders.len(),
            planned = bracket.planned_comparisons(),
            "bracket built"
        );

        let calls_per_comparison = if self.config.bidirectional_comparison { 2 } else { 1 };
        let mut budget = CallBudget {
            limit: self.config.max_llm_calls,
            reserved: 0,
        };
        let mut log: Vec<TournamentMatch> = Vec::new();

        advance(&mut state, TournamentState::Running);
        while let Some(round) = bracket.next_round(&mut table) {
            if tokio::time::Instant::now() >= deadline {
                advance(&mut state, TournamentState::TimedOut);
                break;
            }

            let mut jobs = Vec::with_capacity(round.pairings.len());
            let mut exhausted = false;
            for pairing in &round.pairings {
                if let Some(hit) = self.cached(utterance, contenders, pairing).await {
                    jobs.push(Job::Cached(*pairing, hit));
                    continue;
                }
                if !budget.try_reserve(calls_per_comparison) {
                    exhausted = true;
                    break;
                }
                jobs.push(Job::Judge(*pairing));
            }

            let mut played = Vec::with_capacity(jobs.len());
            let mut timed_out = false;
            let mut matches = stream::iter(jobs)
                .map(|job| self.play(utterance, contenders, round.index, job))
                .buffered(self.config.max_concurrency.max(1));
            loop {
                match tokio::time::timeout_at(deadline, matches.next()).await {
                    Ok(Some(played_match)) => played.push(played_match),
                    Ok(None) => break,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                }
            }
            // Dropping the stream cancels whatever is still in flight
            drop(matches);

            let mut results = Vec::with_capacity(played.len());
            for m in played {
                table.record_result(
                    round.index,
                    m.winner,
                    m.loser,
                    m.record.judge_confidence,
                    bracket.eliminates(),
                );
                results.push((m.pairing, m.winner));
                log.push(m.record);
            }

            if timed_out {
                advance(&mut state, TournamentState::TimedOut);
                break;
            }
            if exhausted {
                advance(&mut state, TournamentState::BudgetExhausted);
                break;
            }
            bracket.complete_round(&results);
        }
        if state == TournamentState::Running {
            advance(&mut state, TournamentState::Completed);
        }

        let truncated = state.is_truncated();
        let winner_idx = if truncated {
            table.best_so_far()
        } else {
            bracket.champion(&table)
        };
        let winner = contenders[winner_idx].code.clone();
        let confidence = decisive_confidence(&log, &winner);

        // Close the log on the decision
        if let Some(last) = log.last() {
            if last.winner != winner {
                log.push(TournamentMatch {
                    round_index: last.round_index,
                    candidate_a: winner.clone(),
                    candidate_b: last.winner.clone(),
                    winner: winner.clone(),
                    judge_confidence: confidence,
                    latency_ms: 0,
                    reversed_check: None,
                    resolution: MatchResolution::Standings,
                });
            }
        }

        let standings = contenders
            .iter()
            .enumerate()
            .map(|(idx, c)| {
                let record = table.get(idx);
                Standing {
                    intent_code: c.code.clone(),
                    seed: idx + 1,
                    wins: record.wins,
                    losses: record.losses,
                    eliminated_in_round: record.eliminated_in_round,
                    cumulative_confidence: record.cumulative_confidence,
                }
            })
            .collect();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            mode = %self.config.mode,
            state = ?state,
            winner = %winner,
            comparisons = log.len(),
            llm_calls = budget.reserved,
            elapsed_ms,
            "tournament finished"
        );

        Ok(TournamentOutcome {
            winner,
            confidence,
            summary: TournamentSummary {
                mode: self.config.mode,
                state,
                truncated,
                log,
                standings,
                llm_calls: budget.reserved,
                elapsed_ms,
            },
        })
    }

    async fn cached(
        &self,
        utterance: &str,
        contenders: &[IntentBrief],
        pairing: &Pairing,
    ) -> Option<CachedJudgment> {
        let cache = self.cache.as_ref()?;
        let (a, b) = (&contenders[pairing.first].code, &contenders[pairing.second].code);
        let hit = cache.get(utterance, a, b).await?;
        // Ignore entries that name neither contender
        (hit.winner == *a || hit.winner == *b).then_some(hit)
    }

    async fn play(
        &self,
        utterance: &str,
        contenders: &[IntentBrief],
        round_index: u32,
        job: Job,
    ) -> PlayedMatch {
        let started = Instant::now();
        let (pairing, decided, reversed_check, resolution) = match job {
            Job::Cached(pairing, hit) => (
                pairing,
                Judgment {
                    winner: hit.winner,
                    confidence: hit.confidence,
                },
                None,
                MatchResolution::Cached,
            ),
            Job::Judge(pairing) => {
                let first = &contenders[pairing.first];
                let second = &contenders[pairing.second];

                let (forward, reverse) = if self.config.bidirectional_comparison {
                    let (f, r) = tokio::join!(
                        self.judge_once(utterance, first, second),
                        self.judge_once(utterance, second, first)
                    );
                    (f, Some(r))
                } else {
                    (self.judge_once(utterance, first, second).await, None)
                };

                match reconcile(
                    forward.ok(),
                    reverse.and_then(|r| r.ok()),
                    self.config.bidirectional_discrepancy_threshold,
                ) {
                    Some((judgment, check)) => {
                        if let Some(cache) = &self.cache {
                            cache
                                .put(
                                    utterance,
                                    &first.code,
                                    &second.code,
                                    CachedJudgment {
                                        winner: judgment.winner.clone(),
                                        confidence: judgment.confidence,
                                    },
                                )
                                .await;
                        }
                        (pairing, judgment, check, MatchResolution::Judged)
                    }
                    None => {
                        warn!(
                            first = %first.code,
                            second = %second.code,
                            "judge failed, higher seed advances"
                        );
                        (
                            pairing,
                            Judgment {
                                winner: first.code.clone(),
                                confidence: SEED_FALLBACK_CONFIDENCE,
                            },
                            None,
                            MatchResolution::SeedFallback,
                        )
                    }
                }
            }
        };

        let (winner, loser) = if decided.winner == contenders[pairing.second].code {
            (pairing.second, pairing.first)
        } else {
            (pairing.first, pairing.second)
        };

        PlayedMatch {
            pairing,
            winner,
            loser,
            record: TournamentMatch {
                round_index,
                candidate_a: contenders[pairing.first].code.clone(),
                candidate_b: contenders[pairing.second].code.clone(),
                winner: contenders[winner].code.clone(),
                judge_confidence: decided.confidence,
                latency_ms: started.elapsed().as_millis() as u64,
                reversed_check,
                resolution,
            },
        }
    }

    /// One judge call under the per-comparison timeout
    async fn judge_once(
        &self,
        utterance: &str,
        first: &IntentBrief,
        second: &IntentBrief,
    ) -> Result<Judgment> {
        let timeout_ms = self.config.per_comparison_timeout_ms;
        let verdict = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.judge.compare(utterance, first, second),
        )
        .await
        .map_err(|_| IntentError::JudgeTimeout { timeout_ms })
        .and_then(|r| r);

        match verdict {
            Ok(v) => Ok(Judgment {
                winner: match v.winner {
                    JudgeChoice::First => first.code.clone(),
                    JudgeChoice::Second => second.code.clone(),
                },
                confidence: v.confidence.clamp(0.0, 1.0),
            }),
            Err(e) => {
                warn!(first = %first.code, second = %second.code, error = %e, "judge call failed");
                Err(e)
            }
        }
    }
}

/// Confidence of the last comparison the winner won, or the seed fallback
/// value when it never played
fn decisive_confidence(log: &[TournamentMatch], winner: &str) -> f32 {
    log.iter()
        .rev()
        .find(|m| m.winner == winner && m.resolution != MatchResolution::Standings)
        .map(|m| m.judge_confidence)
        .unwrap_or(SEED_FALLBACK_CONFIDENCE)
}
