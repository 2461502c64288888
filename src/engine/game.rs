use super::finalize::FinalizeOutcome;
use super::Engine;
use crate::error::EngineResult;
use crate::types::*;
use tracing::info;

/// What the match loop does next, decided from persisted room state alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Room is no longer active
    Stop,
    Finalize(FinishReason),
    PlayRound,
}

/// Exit conditions, checked at every round boundary.
/// Only `total_votes` can win a match; round wins and stars never do.
pub fn decide(room: &Room) -> LoopDecision {
    if room.status != RoomStatus::Active {
        return LoopDecision::Stop;
    }
    if room.leading_total_votes() >= room.settings.win_threshold {
        return LoopDecision::Finalize(FinishReason::WinThreshold);
    }
    if room.connected_count() < room.settings.min_players {
        return LoopDecision::Finalize(FinishReason::InsufficientPlayers);
    }
    LoopDecision::PlayRound
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Rounds played by this run
    pub rounds_played: u32,
    /// `None` when the loop stopped because the room left the active state
    pub finalized: Option<FinalizeOutcome>,
}

impl Engine {
    /// Drive a room from its current state to the end of the match
    pub async fn run_match(&self, room_id: &str) -> EngineResult<MatchOutcome> {
        let mut rounds_played = 0;

        loop {
            let room = self.fetch_room(room_id).await?;

            match decide(&room) {
                LoopDecision::Stop => {
                    info!("Room {} is {:?}; match loop stopping", room_id, room.status);
                    return Ok(MatchOutcome {
                        rounds_played,
                        finalized: None,
                    });
                }
                LoopDecision::Finalize(reason) => {
                    let finalized = self.finalize(room_id, reason).await?;
                    return Ok(MatchOutcome {
                        rounds_played,
                        finalized: Some(finalized),
                    });
                }
                LoopDecision::PlayRound => {
                    self.play_round(&room).await?;
                    rounds_played += 1;
                }
            }
        }
    }
}
