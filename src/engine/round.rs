use super::phase::{PhaseHook, PhaseMachine};
use super::Engine;
use crate::error::{EngineError, EngineResult};
use crate::types::*;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

impl Engine {
    /// Play one round to the end of `results`.
    ///
    /// Resumes from a checkpoint when one exists for the room's current round,
    /// otherwise picks a fresh prompt and starts round `current_round + 1`.
    /// Returns the number of the round that was played.
    pub async fn play_round(&self, room: &Room) -> EngineResult<u32> {
        let mut machine = match self.resume_round(room).await? {
            Some(machine) => machine,
            None => self.begin_round(room).await?,
        };

        loop {
            self.run_phase_timer(&mut machine).await?;

            if let Some(hook) = machine.boundary_hook() {
                self.run_hook(hook, &machine).await;
            }

            if machine.advance().is_none() {
                break;
            }
            self.enter_phase(&machine).await?;
        }

        let checkpoints = &self.stores.checkpoints;
        if let Err(e) = self
            .with_retry("clear checkpoint", || checkpoints.clear_checkpoint(&room.id))
            .await
        {
            warn!("Failed to clear checkpoint for room {}: {}", room.id, e);
        }

        info!("Round {} of room {} complete", machine.round_number, room.id);
        Ok(machine.round_number)
    }

    /// Pick a prompt and persist the start of a new round
    async fn begin_round(&self, room: &Room) -> EngineResult<PhaseMachine> {
        let prompts = &self.stores.prompts;
        let prompt = self
            .with_retry("pick prompt", || prompts.random_prompt(&room.used_prompts))
            .await?
            .ok_or_else(|| EngineError::PromptCatalogExhausted(room.id.clone()))?;

        let round_number = room.current_round + 1;
        let rooms = &self.stores.rooms;
        self.with_retry("record round start", || {
            rooms.record_round_start(&room.id, round_number, &prompt)
        })
        .await?;

        let machine = PhaseMachine::new(&room.id, round_number, prompt, self.config.phase_durations);
        let state = RoundState::new(
            &room.id,
            round_number,
            &machine.prompt,
            machine.phase,
            machine.remaining_secs,
        );
        let round_states = &self.stores.round_states;
        self.with_retry("create round state", || round_states.put_round_state(state.clone()))
            .await?;

        info!(
            "Starting round {} in room {} with prompt {}",
            round_number, room.id, machine.prompt.id
        );
        self.persist_transition(&machine).await?;
        Ok(machine)
    }

    /// Load a checkpoint left behind by an interrupted run of the current round
    async fn resume_round(&self, room: &Room) -> EngineResult<Option<PhaseMachine>> {
        let checkpoints = &self.stores.checkpoints;
        let Some(mut machine) = self
            .with_retry("load checkpoint", || checkpoints.load_checkpoint(&room.id))
            .await?
        else {
            return Ok(None);
        };

        if room.current_round == 0 || machine.round_number != room.current_round {
            debug!(
                "Ignoring stale checkpoint for round {} of room {} (room is at round {})",
                machine.round_number, room.id, room.current_round
            );
            return Ok(None);
        }

        // Results of a scored round left behind by a failed clear; the round is over
        if machine.phase == Phase::Results && room.last_scored_round >= machine.round_number {
            debug!(
                "Round {} of room {} already finished; starting the next one",
                machine.round_number, room.id
            );
            return Ok(None);
        }

        machine.restart_phase();
        info!(
            "Resuming round {} of room {} at {:?}",
            machine.round_number, room.id, machine.phase
        );

        let round_states = &self.stores.round_states;
        let existing = self
            .with_retry("load round state", || round_states.get_round_state(&room.id))
            .await?;
        if existing.map(|s| s.round_number) != Some(machine.round_number) {
            let state = RoundState::new(
                &room.id,
                machine.round_number,
                &machine.prompt,
                machine.phase,
                machine.remaining_secs,
            );
            self.with_retry("recreate round state", || {
                round_states.put_round_state(state.clone())
            })
            .await?;
        }

        self.enter_phase(&machine).await?;
        Ok(Some(machine))
    }

    /// Count the current phase down to zero, publishing and renewing the lease
    /// every second. Ticks follow a fixed schedule, so slow store writes do not
    /// push the phase boundary back.
    async fn run_phase_timer(&self, machine: &mut PhaseMachine) -> EngineResult<()> {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);

        while !machine.is_expired() {
            ticker.tick().await;
            let remaining = machine.tick();

            // The next tick republishes, so a missed update is only logged
            if let Err(e) = self
                .stores
                .round_states
                .update_timer(&machine.room_id, machine.phase, remaining)
                .await
            {
                warn!("Failed to publish timer for room {}: {}", machine.room_id, e);
            }

            self.refresh_lease().await?;
        }
        Ok(())
    }

    async fn run_hook(&self, hook: PhaseHook, machine: &PhaseMachine) {
        let room_id = machine.room_id.as_str();
        let round_number = machine.round_number;

        let result = match hook {
            PhaseHook::SubmissionComplete => self
                .collect_submissions(room_id, round_number)
                .await
                .map(|_| ()),
            PhaseHook::VotingComplete => self.complete_voting(room_id, round_number).await,
        };

        if let Err(e) = result {
            error!(
                "{:?} hook failed for round {} of room {}: {}",
                hook, round_number, room_id, e
            );
        }
    }

    /// Voting-complete hook: collect ballots, score them, pay out rewards
    async fn complete_voting(&self, room_id: &str, round_number: u32) -> EngineResult<()> {
        let votes = self.collect_votes(room_id, round_number).await?;
        let outcome = self.score_round(room_id, round_number, &votes).await?;
        if !outcome.already_scored {
            self.dispatch_round(room_id, round_number, &outcome.tally, &votes)
                .await;
        }
        Ok(())
    }

    /// Publish a freshly entered phase and checkpoint it
    async fn enter_phase(&self, machine: &PhaseMachine) -> EngineResult<()> {
        let room_id = machine.room_id.as_str();
        debug!("Room {} entering {:?}", room_id, machine.phase);

        let round_states = &self.stores.round_states;
        self.with_retry("publish phase", || {
            round_states.update_timer(room_id, machine.phase, machine.remaining_secs)
        })
        .await?;

        self.persist_transition(machine).await
    }

    /// Room phase, checkpoint and lease, updated on every transition
    async fn persist_transition(&self, machine: &PhaseMachine) -> EngineResult<()> {
        let room_id = machine.room_id.as_str();

        let rooms = &self.stores.rooms;
        self.with_retry("set phase", || rooms.set_phase(room_id, machine.phase))
            .await?;

        let checkpoints = &self.stores.checkpoints;
        self.with_retry("save checkpoint", || checkpoints.save_checkpoint(machine))
            .await?;

        self.renew_lease().await
    }
}
