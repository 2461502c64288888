use super::reward::RewardConfig;
use super::Engine;
use crate::error::EngineResult;
use crate::types::*;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Finished {
        winner_id: Option<PlayerId>,
        reason: FinishReason,
    },
    /// The room was finished before this call; nothing was written
    AlreadyFinished,
}

/// Match winner among the room's players: highest `total_votes`, ties broken
/// by the smaller player id. Nobody wins a match in which no player received
/// a vote, e.g. one that ended early before the first round.
pub fn select_winner(room: &Room) -> Option<PlayerId> {
    let mut ranked: Vec<(u32, &PlayerId)> = room
        .players
        .iter()
        .map(|p| (room.score_of(&p.id).total_votes, &p.id))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    ranked
        .into_iter()
        .next()
        .filter(|&(votes, _)| votes > 0)
        .map(|(_, id)| id.clone())
}

/// Games-played for every player, plus the game-win bonus for the winner.
/// A winner id that is not one of `players` earns nothing.
pub fn compute_game_rewards(
    players: &[RoomPlayer],
    winner_id: Option<&str>,
    config: &RewardConfig,
) -> Vec<ProfileIncrement> {
    players
        .iter()
        .map(|p| {
            let won = winner_id == Some(p.id.as_str());
            ProfileIncrement {
                games_played: 1,
                games_won: u32::from(won),
                xp: if won { config.game_win_xp } else { 0 },
                ..ProfileIncrement::for_user(&p.id)
            }
        })
        .collect()
}

impl Engine {
    /// End the match: mark the room finished, then write history, pay the
    /// game rewards and drop transient state. After the room is flipped each
    /// write stands on its own; a failure is logged and the rest still run.
    pub async fn finalize(&self, room_id: &str, reason: FinishReason) -> EngineResult<FinalizeOutcome> {
        let room = self.fetch_room(room_id).await?;
        if room.status == RoomStatus::Finished {
            warn!("Room {} is already finished", room_id);
            return Ok(FinalizeOutcome::AlreadyFinished);
        }

        let winner_id = select_winner(&room);
        let record = FinishRecord {
            winner_id: winner_id.clone(),
            ended_at: chrono::Utc::now().to_rfc3339(),
            reason,
        };

        let rooms = &self.stores.rooms;
        let flipped = self
            .with_retry("finish room", || rooms.finish_room(room_id, &record))
            .await?;
        if !flipped {
            warn!("Room {} was finished concurrently", room_id);
            return Ok(FinalizeOutcome::AlreadyFinished);
        }

        info!(
            room_id,
            winner = ?winner_id,
            ?reason,
            rounds = room.current_round,
            "Match finished"
        );

        let history = &self.stores.history;
        let snapshot = MatchHistory::from_room(&room, &record);
        match self
            .with_retry("append history", || history.append(snapshot.clone()))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("History for room {} already recorded", room_id),
            Err(e) => error!("Failed to write history for room {}: {}", room_id, e),
        }

        let batch = compute_game_rewards(&room.players, winner_id.as_deref(), &self.config.rewards);
        let profiles = &self.stores.profiles;
        if let Err(e) = self
            .with_retry("apply game rewards", || profiles.apply_increments(&batch))
            .await
        {
            error!("Failed to grant game rewards in room {}: {}", room_id, e);
        }

        let round_states = &self.stores.round_states;
        if let Err(e) = self
            .with_retry("remove round state", || round_states.remove_round_state(room_id))
            .await
        {
            warn!("Failed to remove round state for room {}: {}", room_id, e);
        }

        let checkpoints = &self.stores.checkpoints;
        if let Err(e) = self
            .with_retry("clear checkpoint", || checkpoints.clear_checkpoint(room_id))
            .await
        {
            warn!("Failed to clear checkpoint for room {}: {}", room_id, e);
        }

        Ok(FinalizeOutcome::Finished { winner_id, reason })
    }
}
