//! The per-round phase state machine.
//!
//! A round walks `prompt → submission → waiting → voting → results`, spending
//! its full budget in each phase. The machine is a plain value so it can be
//! checkpointed after every transition and picked up again after a restart.

use crate::types::*;
use serde::{Deserialize, Serialize};

/// Hooks fired when a phase's timer runs out, before the next phase starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseHook {
    /// `submission → waiting`
    SubmissionComplete,
    /// `voting → results`
    VotingComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseMachine {
    pub room_id: RoomId,
    pub round_number: u32,
    pub prompt: Prompt,
    pub phase: Phase,
    pub remaining_secs: u32,
    pub durations: PhaseDurations,
}

impl PhaseMachine {
    /// A fresh round, sitting at the start of `prompt`
    pub fn new(room_id: &str, round_number: u32, prompt: Prompt, durations: PhaseDurations) -> Self {
        Self {
            room_id: room_id.to_string(),
            round_number,
            prompt,
            phase: Phase::Prompt,
            remaining_secs: Phase::Prompt.budget(&durations),
            durations,
        }
    }

    /// One second elapsed. Returns the new remaining time.
    pub fn tick(&mut self) -> u32 {
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        self.remaining_secs
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }

    /// Hook owed at the end of the current phase, if any
    pub fn boundary_hook(&self) -> Option<PhaseHook> {
        match self.phase {
            Phase::Submission => Some(PhaseHook::SubmissionComplete),
            Phase::Voting => Some(PhaseHook::VotingComplete),
            _ => None,
        }
    }

    /// Move to the next phase with its full budget.
    /// Returns `None` once `results` is done; the machine is then terminal.
    pub fn advance(&mut self) -> Option<Phase> {
        let next = self.phase.next()?;
        self.phase = next;
        self.remaining_secs = next.budget(&self.durations);
        Some(next)
    }

    /// Rewind the current phase to its full budget (used when resuming from a checkpoint)
    pub fn restart_phase(&mut self) {
        self.remaining_secs = self.phase.budget(&self.durations);
    }
}
