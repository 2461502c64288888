use super::score::VoteTally;
use super::Engine;
use crate::types::*;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{error, info};

/// Which side of a ballot earns the voting-participation bonus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingBonusBasis {
    /// The player received at least one vote this round
    ReceivedVote,
    /// The player cast a ballot this round
    CastVote,
}

impl FromStr for VotingBonusBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "received" => Ok(VotingBonusBasis::ReceivedVote),
            "cast" => Ok(VotingBonusBasis::CastVote),
            other => Err(format!("unknown voting bonus basis: {}", other)),
        }
    }
}

/// XP granted per round and per match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardConfig {
    pub participation_xp: u64,
    pub round_win_xp: u64,
    pub star_xp: u64,
    pub voting_xp: u64,
    pub game_win_xp: u64,
    pub voting_bonus_basis: VotingBonusBasis,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            participation_xp: 10,
            round_win_xp: 50,
            star_xp: 25,
            voting_xp: 5,
            game_win_xp: 100,
            voting_bonus_basis: VotingBonusBasis::ReceivedVote,
        }
    }
}

/// One increment per player for a completed round
pub fn compute_round_rewards(
    players: &[RoomPlayer],
    tally: &VoteTally,
    votes: &HashMap<VoterId, PlayerId>,
    config: &RewardConfig,
) -> Vec<ProfileIncrement> {
    players
        .iter()
        .map(|player| {
            let id = player.id.as_str();
            let won = tally.round_winners.contains(id);
            let starred = tally.star_winners.contains(id);
            let voted = match config.voting_bonus_basis {
                VotingBonusBasis::ReceivedVote => tally.counts.contains_key(id),
                VotingBonusBasis::CastVote => votes.contains_key(id),
            };

            let mut xp = config.participation_xp;
            if won {
                xp += config.round_win_xp;
            }
            if starred {
                xp += config.star_xp;
            }
            if voted {
                xp += config.voting_xp;
            }

            ProfileIncrement {
                xp,
                rounds_won: won as u32,
                stars_earned: starred as u32,
                total_votes: tally.votes_for(id),
                ..ProfileIncrement::for_user(id)
            }
        })
        .collect()
}

impl Engine {
    /// Grant round rewards to every player in one batch.
    /// Failures are logged; the round carries on regardless.
    pub async fn dispatch_round(
        &self,
        room_id: &str,
        round_number: u32,
        tally: &VoteTally,
        votes: &HashMap<VoterId, PlayerId>,
    ) {
        let room = match self.fetch_room(room_id).await {
            Ok(room) => room,
            Err(e) => {
                error!("Skipping round {} rewards for room {}: {}", round_number, room_id, e);
                return;
            }
        };

        let batch = compute_round_rewards(&room.players, tally, votes, &self.config.rewards);
        if batch.is_empty() {
            return;
        }

        let profiles = &self.stores.profiles;
        match self
            .with_retry("apply round rewards", || profiles.apply_increments(&batch))
            .await
        {
            Ok(()) => info!(
                "Granted round {} rewards to {} players in room {}",
                round_number,
                batch.len(),
                room_id
            ),
            Err(e) => error!(
                "Failed to grant round {} rewards in room {}: {}",
                round_number, room_id, e
            ),
        }
    }
}
