use super::Engine;
use crate::error::EngineResult;
use crate::types::*;
use std::collections::HashMap;
use tracing::debug;

impl Engine {
    /// Copy the round's submissions into the round state for display
    pub async fn collect_submissions(
        &self,
        room_id: &str,
        round_number: u32,
    ) -> EngineResult<HashMap<PlayerId, String>> {
        let inbox = &self.stores.inbox;
        let submissions = self
            .with_retry("read submissions", || inbox.submissions(room_id, round_number))
            .await?;

        debug!(
            "Collected {} submissions for round {} of room {}",
            submissions.len(),
            round_number,
            room_id
        );

        let round_states = &self.stores.round_states;
        self.with_retry("store submissions", || {
            round_states.set_submissions(room_id, submissions.clone())
        })
        .await?;

        Ok(submissions)
    }

    /// Copy the round's ballots into the round state and hand them to scoring
    pub async fn collect_votes(
        &self,
        room_id: &str,
        round_number: u32,
    ) -> EngineResult<HashMap<VoterId, PlayerId>> {
        let inbox = &self.stores.inbox;
        let votes = self
            .with_retry("read votes", || inbox.votes(room_id, round_number))
            .await?;

        debug!(
            "Collected {} votes for round {} of room {}",
            votes.len(),
            round_number,
            room_id
        );

        let round_states = &self.stores.round_states;
        self.with_retry("store votes", || round_states.set_votes(room_id, votes.clone()))
            .await?;

        Ok(votes)
    }
}
