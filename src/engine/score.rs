use super::Engine;
use crate::error::EngineResult;
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Per-round vote aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    /// Raw votes per candidate; candidates without votes are absent
    pub counts: BTreeMap<PlayerId, u32>,
    /// Every candidate sharing the highest count
    pub round_winners: BTreeSet<PlayerId>,
    /// Every candidate at or above the star threshold
    pub star_winners: BTreeSet<PlayerId>,
}

impl VoteTally {
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Winner shown to clients: the smallest id among the round winners
    pub fn display_winner(&self) -> Option<&PlayerId> {
        self.round_winners.iter().next()
    }

    pub fn total_cast(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn votes_for(&self, candidate: &str) -> u32 {
        self.counts.get(candidate).copied().unwrap_or(0)
    }
}

/// Result of scoring one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringOutcome {
    pub tally: VoteTally,
    /// The round had already been merged into the scores; nothing was written
    pub already_scored: bool,
}

/// Count ballots and work out round and star winners
pub fn tally_votes(votes: &HashMap<VoterId, PlayerId>, star_threshold: u32) -> VoteTally {
    let mut counts: BTreeMap<PlayerId, u32> = BTreeMap::new();
    for candidate in votes.values() {
        *counts.entry(candidate.clone()).or_insert(0) += 1;
    }

    let max = counts.values().copied().max().unwrap_or(0);
    let round_winners = counts
        .iter()
        .filter(|&(_, &count)| count == max)
        .map(|(id, _)| id.clone())
        .collect();
    let star_winners = counts
        .iter()
        .filter(|&(_, &count)| count >= star_threshold)
        .map(|(id, _)| id.clone())
        .collect();

    VoteTally {
        counts,
        round_winners,
        star_winners,
    }
}

/// Merge a round's tally into cumulative scores
pub fn apply_tally(scores: &mut HashMap<PlayerId, Score>, tally: &VoteTally) {
    for (candidate, &count) in &tally.counts {
        let score = scores.entry(candidate.clone()).or_default();
        score.total_votes += count;
        if tally.round_winners.contains(candidate) {
            score.round_wins += 1;
        }
        if tally.star_winners.contains(candidate) {
            score.stars += 1;
        }
    }
}

impl Engine {
    /// Tally a round's ballots and commit the new scores in one write.
    ///
    /// Guarded by `Room::last_scored_round`, so replaying a round after a
    /// resume never counts its votes twice. Ballots for ids that are not
    /// players of the room are dropped.
    pub async fn score_round(
        &self,
        room_id: &str,
        round_number: u32,
        votes: &HashMap<VoterId, PlayerId>,
    ) -> EngineResult<ScoringOutcome> {
        let room = self.fetch_room(room_id).await?;
        let ballots: HashMap<VoterId, PlayerId> = votes
            .iter()
            .filter(|&(_, candidate)| room.has_player(candidate))
            .map(|(voter, candidate)| (voter.clone(), candidate.clone()))
            .collect();
        if ballots.len() < votes.len() {
            warn!(
                room_id,
                round_number,
                dropped = votes.len() - ballots.len(),
                "Ignoring ballots for candidates outside the room"
            );
        }
        let tally = tally_votes(&ballots, self.config.star_threshold);

        if room.last_scored_round >= round_number {
            warn!(
                "Round {} of room {} was already scored; skipping",
                round_number, room_id
            );
            return Ok(ScoringOutcome {
                tally,
                already_scored: true,
            });
        }

        if tally.is_empty() {
            debug!("No votes in round {} of room {}", round_number, room_id);
        }

        // An empty tally leaves the scores untouched but still marks the round
        let mut scores = room.scores.clone();
        apply_tally(&mut scores, &tally);

        let rooms = &self.stores.rooms;
        self.with_retry("commit round scores", || {
            rooms.commit_round_scores(room_id, round_number, scores.clone())
        })
        .await?;

        info!(
            room_id,
            round_number,
            votes = tally.total_cast(),
            winners = ?tally.round_winners,
            stars = ?tally.star_winners,
            "Round scored"
        );

        let display = tally.display_winner().cloned();
        let round_states = &self.stores.round_states;
        if let Err(e) = self
            .with_retry("set round winner", || {
                round_states.set_round_winner(room_id, display.clone())
            })
            .await
        {
            warn!("Failed to publish round winner for room {}: {}", room_id, e);
        }

        Ok(ScoringOutcome {
            tally,
            already_scored: false,
        })
    }
}
