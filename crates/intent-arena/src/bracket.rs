//! Bracket formats for the tournament
//!
//! Contenders are addressed by index into the scorer ranking, so index 0 is
//! seed 1. Brackets only decide who meets whom; results are recorded in a
//! [`Table`] by the engine.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use intent_core::TournamentMode;

/// Two contenders to compare; `first` is always the higher seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pairing {
    pub first: usize,
    pub second: usize,
}

impl Pairing {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }
}

/// Comparisons scheduled together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    /// 1-based round number
    pub index: u32,
    pub pairings: Vec<Pairing>,
    /// Contenders sitting this round out
    pub byes: Vec<usize>,
}

// ============================================================================
// Results Table
// ============================================================================

/// Running record of one contender
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
    pub cumulative_confidence: f32,
    pub eliminated_in_round: Option<u32>,
    /// Sequence number of the most recent win
    pub last_win: Option<u64>,
    pub byes: u32,
    pub opponents: Vec<usize>,
}

/// Results for all contenders of one tournament
#[derive(Debug, Clone)]
pub struct Table {
    records: Vec<Record>,
    sequence: u64,
}

impl Table {
    pub fn new(contenders: usize) -> Self {
        Self {
            records: vec![Record::default(); contenders],
            sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Record {
        &self.records[idx]
    }

    pub fn has_played(&self, a: usize, b: usize) -> bool {
        self.records[a].opponents.contains(&b)
    }

    /// Record a decided comparison; `eliminate` marks the loser as knocked out
    pub fn record_result(
        &mut self,
        round: u32,
        winner: usize,
        loser: usize,
        confidence: f32,
        eliminate: bool,
    ) {
        self.sequence += 1;

        let w = &mut self.records[winner];
        w.wins += 1;
        w.cumulative_confidence += confidence;
        w.last_win = Some(self.sequence);
        w.opponents.push(loser);

        let l = &mut self.records[loser];
        l.losses += 1;
        l.opponents.push(winner);
        if eliminate {
            l.eliminated_in_round = Some(round);
        }
    }

    pub fn record_bye(&mut self, idx: usize) {
        self.records[idx].byes += 1;
    }

    fn by<F>(&self, cmp: F) -> Vec<usize>
    where
        F: Fn(usize, usize) -> std::cmp::Ordering,
    {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.sort_by(|&a, &b| cmp(a, b));
        order
    }

    /// Wins desc, then seed
    pub fn ranking_by_wins(&self) -> Vec<usize> {
        self.by(|a, b| {
            self.records[b]
                .wins
                .cmp(&self.records[a].wins)
                .then(a.cmp(&b))
        })
    }

    /// Wins desc, then seed, then cumulative confidence desc
    ///
    /// Seeds are unique, so the confidence key only matters for callers
    /// that compare contenders without a seed.
    pub fn ranking_round_robin(&self) -> Vec<usize> {
        self.by(|a, b| {
            self.records[b]
                .wins
                .cmp(&self.records[a].wins)
                .then(a.cmp(&b))
                .then(
                    self.records[b]
                        .cumulative_confidence
                        .total_cmp(&self.records[a].cumulative_confidence),
                )
        })
    }

    /// Best contender of an interrupted bracket: wins desc, survived
    /// deeper, most recent win, seed
    pub fn best_so_far(&self) -> usize {
        let depth = |r: &Record| r.eliminated_in_round.unwrap_or(u32::MAX);
        self.by(|a, b| {
            let (ra, rb) = (&self.records[a], &self.records[b]);
            rb.wins
                .cmp(&ra.wins)
                .then(depth(rb).cmp(&depth(ra)))
                .then(rb.last_win.cmp(&ra.last_win))
                .then(a.cmp(&b))
        })
        .first()
        .copied()
        .unwrap_or(0)
    }
}

// ============================================================================
// Bracket
// ============================================================================

/// Pairing schedule for one tournament
#[derive(Debug, Clone)]
pub enum Bracket {
    Elimination(Elimination),
    Swiss(Swiss),
    RoundRobin(RoundRobin),
}

impl Bracket {
    /// Build the bracket for `contenders` seeds
    ///
    /// `shuffle_seed` only affects simple single elimination.
    pub fn new(
        mode: TournamentMode,
        contenders: usize,
        shuffle_seed: u64,
        swiss_rounds: Option<u32>,
    ) -> Self {
        match mode {
            TournamentMode::SeededSingleElimination => {
                Self::Elimination(Elimination::new((0..contenders).collect()))
            }
            TournamentMode::SimpleSingleElimination => {
                let mut order: Vec<usize> = (0..contenders).collect();
                let mut rng = StdRng::seed_from_u64(shuffle_seed);
                order.shuffle(&mut rng);
                Self::Elimination(Elimination::new(order))
            }
            TournamentMode::SwissSystem => Self::Swiss(Swiss::new(contenders, swiss_rounds)),
            TournamentMode::RoundRobin => Self::RoundRobin(RoundRobin::new(contenders)),
        }
    }

    /// Comparisons needed to finish the bracket
    pub fn planned_comparisons(&self) -> usize {
        match self {
            Self::Elimination(e) => e.contenders.saturating_sub(1),
            Self::Swiss(s) => s.rounds as usize * (s.contenders / 2),
            Self::RoundRobin(r) => r.schedule.iter().map(Vec::len).sum::<usize>() + r.played,
        }
    }

    /// Whether losers leave the bracket
    pub fn eliminates(&self) -> bool {
        matches!(self, Self::Elimination(_))
    }

    /// Next round to play, `None` once the bracket is finished
    pub fn next_round(&mut self, table: &mut Table) -> Option<Round> {
        match self {
            Self::Elimination(e) => e.next_round(),
            Self::Swiss(s) => s.next_round(table),
            Self::RoundRobin(r) => r.next_round(),
        }
    }

    /// Feed back the winners of the round returned by `next_round`
    pub fn complete_round(&mut self, results: &[(Pairing, usize)]) {
        if let Self::Elimination(e) = self {
            e.complete_round(results);
        }
    }

    /// Winner of a finished bracket
    pub fn champion(&self, table: &Table) -> usize {
        match self {
            Self::Elimination(e) => e
                .slots
                .iter()
                .flatten()
                .next()
                .copied()
                .unwrap_or_else(|| table.best_so_far()),
            Self::Swiss(_) => table.ranking_by_wins().first().copied().unwrap_or(0),
            Self::RoundRobin(_) => table.ranking_round_robin().first().copied().unwrap_or(0),
        }
    }
}

/// Seed order of bracket slots, 1-based: 1 vs N, 2 vs N-1, ... with the
/// top seeds kept apart until the late rounds
pub fn seeding_order(size: usize) -> Vec<usize> {
    let mut order = vec![1];
    while order.len() < size {
        let n = order.len() * 2;
        order = order.iter().flat_map(|&s| [s, n + 1 - s]).collect();
    }
    order
}

// ============================================================================
// Single Elimination
// ============================================================================

#[derive(Debug, Clone)]
pub struct Elimination {
    contenders: usize,
    /// Surviving contender per slot, `None` for byes
    slots: Vec<Option<usize>>,
    round: u32,
}

impl Elimination {
    /// `order[k]` is placed where seed `k + 1` goes
    fn new(order: Vec<usize>) -> Self {
        let contenders = order.len();
        let size = contenders.max(1).next_power_of_two();
        let slots = seeding_order(size)
            .into_iter()
            .map(|seed| order.get(seed - 1).copied())
            .collect();
        Self {
            contenders,
            slots,
            round: 0,
        }
    }

    fn next_round(&mut self) -> Option<Round> {
        if self.slots.len() <= 1 {
            return None;
        }
        self.round += 1;

        let mut pairings = Vec::new();
        let mut byes = Vec::new();
        for pair in self.slots.chunks(2) {
            match (pair[0], pair.get(1).copied().flatten()) {
                (Some(a), Some(b)) => pairings.push(Pairing::new(a, b)),
                (Some(a), None) | (None, Some(a)) => byes.push(a),
                (None, None) => {}
            }
        }

        Some(Round {
            index: self.round,
            pairings,
            byes,
        })
    }

    fn complete_round(&mut self, results: &[(Pairing, usize)]) {
        self.slots = self
            .slots
            .chunks(2)
            .map(|pair| match (pair[0], pair.get(1).copied().flatten()) {
                (Some(a), Some(b)) => results
                    .iter()
                    .find(|(p, _)| *p == Pairing::new(a, b))
                    .map(|(_, winner)| *winner),
                (Some(a), None) | (None, Some(a)) => Some(a),
                (None, None) => None,
            })
            .collect();
    }
}

// ============================================================================
// Swiss System
// ============================================================================

#[derive(Debug, Clone)]
pub struct Swiss {
    contenders: usize,
    rounds: u32,
    round: u32,
}

impl Swiss {
    fn new(contenders: usize, rounds: Option<u32>) -> Self {
        // ceil(log2 N)
        let default_rounds = contenders.max(2).next_power_of_two().trailing_zeros();
        Self {
            contenders,
            rounds: rounds.unwrap_or(default_rounds),
            round: 0,
        }
    }

    fn next_round(&mut self, table: &mut Table) -> Option<Round> {
        if self.round >= self.rounds || self.contenders < 2 {
            return None;
        }
        self.round += 1;

        let mut ranking = table.ranking_by_wins();
        let mut byes = Vec::new();
        if ranking.len() % 2 == 1 {
            let pos = ranking
                .iter()
                .rposition(|&idx| table.get(idx).byes == 0)
                .unwrap_or(ranking.len() - 1);
            let idx = ranking.remove(pos);
            table.record_bye(idx);
            byes.push(idx);
        }

        let mut pairings = Vec::new();
        while let Some(top) = ranking.first().copied() {
            ranking.remove(0);
            // Closest-ranked opponent not met before, else the closest one
            let pos = ranking
                .iter()
                .position(|&other| !table.has_played(top, other))
                .unwrap_or(0);
            if ranking.is_empty() {
                break;
            }
            let other = ranking.remove(pos);
            pairings.push(Pairing::new(top, other));
        }

        Some(Round {
            index: self.round,
            pairings,
            byes,
        })
    }
}

// ============================================================================
// Round Robin
// ============================================================================

#[derive(Debug, Clone)]
pub struct RoundRobin {
    /// Remaining rounds, front first
    schedule: Vec<Vec<Pairing>>,
    played: usize,
    round: u32,
}

impl RoundRobin {
    /// Circle method: seed 1 stays put, everyone else rotates
    fn new(contenders: usize) -> Self {
        let mut ring: Vec<Option<usize>> = (0..contenders).map(Some).collect();
        if ring.len() % 2 == 1 {
            ring.push(None);
        }
        let m = ring.len();

        let mut schedule = Vec::new();
        for _ in 1..m {
            let round: Vec<Pairing> = (0..m / 2)
                .filter_map(|i| match (ring[i], ring[m - 1 - i]) {
                    (Some(a), Some(b)) => Some(Pairing::new(a, b)),
                    _ => None,
                })
                .collect();
            schedule.push(round);
            ring[1..].rotate_right(1);
        }

        Self {
            schedule,
            played: 0,
            round: 0,
        }
    }

    fn next_round(&mut self) -> Option<Round> {
        if self.schedule.is_empty() {
            return None;
        }
        let pairings = self.schedule.remove(0);
        self.played += pairings.len();
        self.round += 1;
        Some(Round {
            index: self.round,
            pairings,
            byes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Plays a bracket to completion with the higher seed always winning
    fn play_out(bracket: &mut Bracket, n: usize) -> (Table, Vec<Round>) {
        let mut table = Table::new(n);
        let mut rounds = Vec::new();
        while let Some(round) = bracket.next_round(&mut table) {
            let results: Vec<(Pairing, usize)> =
                round.pairings.iter().map(|p| (*p, p.first)).collect();
            for (p, w) in &results {
                table.record_result(round.index, *w, p.second, 0.8, bracket.eliminates());
            }
            bracket.complete_round(&results);
            rounds.push(round);
        }
        (table, rounds)
    }

    fn comparisons(rounds: &[Round]) -> usize {
        rounds.iter().map(|r| r.pairings.len()).sum()
    }

    #[test]
    fn test_seeding_order() {
        assert_eq!(seeding_order(1), vec![1]);
        assert_eq!(seeding_order(4), vec![1, 4, 2, 3]);
        assert_eq!(seeding_order(8), vec![1, 8, 4, 5, 2, 7, 3, 6]);
    }

    #[test]
    fn test_seeded_four_contenders() {
        let mut bracket = Bracket::new(TournamentMode::SeededSingleElimination, 4, 0, None);
        assert_eq!(bracket.planned_comparisons(), 3);

        let (table, rounds) = play_out(&mut bracket, 4);
        assert_eq!(comparisons(&rounds), 3);
        assert_eq!(
            rounds[0].pairings,
            vec![Pairing::new(0, 3), Pairing::new(1, 2)]
        );
        assert_eq!(rounds[1].pairings, vec![Pairing::new(0, 1)]);
        assert_eq!(bracket.champion(&table), 0);
        assert_eq!(table.get(3).eliminated_in_round, Some(1));
        assert_eq!(table.get(1).eliminated_in_round, Some(2));
    }

    #[test]
    fn test_seeded_byes_go_to_top_seeds() {
        for n in 2..=8 {
            let mut bracket = Bracket::new(TournamentMode::SeededSingleElimination, n, 0, None);
            let (_, rounds) = play_out(&mut bracket, n);
            assert_eq!(comparisons(&rounds), n - 1, "n = {n}");
        }

        let mut bracket = Bracket::new(TournamentMode::SeededSingleElimination, 3, 0, None);
        let mut table = Table::new(3);
        let first = bracket.next_round(&mut table).unwrap();
        assert_eq!(first.byes, vec![0]);
        assert_eq!(first.pairings, vec![Pairing::new(1, 2)]);
    }

    #[test]
    fn test_simple_elimination_is_reproducible() {
        let first_rounds = |seed| {
            let mut bracket = Bracket::new(TournamentMode::SimpleSingleElimination, 6, seed, None);
            let (_, rounds) = play_out(&mut bracket, 6);
            rounds
        };
        let a = first_rounds(42);
        assert_eq!(a, first_rounds(42));
        assert_eq!(comparisons(&a), 5);
    }

    #[test]
    fn test_round_robin_covers_every_pair_once() {
        for n in 2..=7 {
            let mut bracket = Bracket::new(TournamentMode::RoundRobin, n, 0, None);
            assert_eq!(bracket.planned_comparisons(), n * (n - 1) / 2);

            let (_, rounds) = play_out(&mut bracket, n);
            let pairs: HashSet<Pairing> =
                rounds.iter().flat_map(|r| r.pairings.clone()).collect();
            assert_eq!(comparisons(&rounds), n * (n - 1) / 2);
            assert_eq!(pairs.len(), n * (n - 1) / 2);

            // Nobody plays twice in one round
            for round in &rounds {
                let mut seen = HashSet::new();
                for p in &round.pairings {
                    assert!(seen.insert(p.first) && seen.insert(p.second));
                }
            }
        }
    }

    #[test]
    fn test_round_robin_tie_broken_by_seed() {
        // Three-way cycle: every contender ends with one win
        let mut table = Table::new(3);
        table.record_result(1, 0, 1, 0.6, false);
        table.record_result(2, 1, 2, 0.9, false);
        table.record_result(3, 2, 0, 0.9, false);
        let bracket = Bracket::new(TournamentMode::RoundRobin, 3, 0, None);
        assert_eq!(bracket.champion(&table), 0);
        assert_eq!(table.ranking_round_robin(), vec![0, 1, 2]);
    }

    #[test]
    fn test_swiss_rounds_and_byes() {
        let mut bracket = Bracket::new(TournamentMode::SwissSystem, 5, 0, None);
        let (table, rounds) = play_out(&mut bracket, 5);

        // ceil(log2 5) = 3 rounds, two matches each
        assert_eq!(rounds.len(), 3);
        assert_eq!(comparisons(&rounds), 6);

        // Each round one pointless bye, never to the same contender twice
        let bye_holders: Vec<usize> = rounds.iter().flat_map(|r| r.byes.clone()).collect();
        assert_eq!(bye_holders.len(), 3);
        let unique: HashSet<usize> = bye_holders.iter().copied().collect();
        assert_eq!(unique.len(), 3);

        let total_wins: u32 = (0..5).map(|i| table.get(i).wins).sum();
        assert_eq!(total_wins, 6);
        assert_eq!(bracket.champion(&table), 0);
    }

    #[test]
    fn test_swiss_avoids_repeat_pairings() {
        let mut bracket = Bracket::new(TournamentMode::SwissSystem, 4, 0, Some(3));
        let (_, rounds) = play_out(&mut bracket, 4);
        let pairs: Vec<Pairing> = rounds.iter().flat_map(|r| r.pairings.clone()).collect();
        let unique: HashSet<Pairing> = pairs.iter().copied().collect();
        assert_eq!(pairs.len(), 6);
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn test_best_so_far_ordering() {
        let mut table = Table::new(4);
        // Seed 4 upsets seed 1, seed 2 beats seed 3
        table.record_result(1, 3, 0, 0.7, true);
        table.record_result(1, 1, 2, 0.7, true);
        // Equal wins, both alive: most recent win decides
        assert_eq!(table.best_so_far(), 1);

        table.record_result(2, 3, 1, 0.6, true);
        assert_eq!(table.best_so_far(), 3);
    }
}
