//! Collaborator stores the engine talks to.
//!
//! The engine never owns persistence: rooms, ephemeral round state, prompts,
//! inboxes, profiles, history, leases and checkpoints all sit behind the traits
//! below. [`MemoryStore`] implements every one of them for the binary and the
//! tests; [`FileCheckpointStore`] keeps FSM checkpoints on disk.

mod error;
mod file;
mod memory;

pub use error::{StoreError, StoreResult};
pub use file::FileCheckpointStore;
pub use memory::{MemoryStore, StoreOp};

use crate::engine::phase::PhaseMachine;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Structured room records with partial-field updates
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn insert_room(&self, room: Room) -> StoreResult<()>;

    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>>;

    async fn list_rooms_with_status(&self, status: RoomStatus) -> StoreResult<Vec<RoomId>>;

    /// Move a room between waiting and active. Finishing goes through [`RoomStore::finish_room`].
    async fn set_status(&self, room_id: &str, status: RoomStatus) -> StoreResult<()>;

    async fn set_player_connected(
        &self,
        room_id: &str,
        player_id: &str,
        connected: bool,
    ) -> StoreResult<()>;

    /// Persist `current_round` and `current_prompt` and mark the prompt as used
    async fn record_round_start(
        &self,
        room_id: &str,
        round_number: u32,
        prompt: &Prompt,
    ) -> StoreResult<()>;

    async fn set_phase(&self, room_id: &str, phase: Phase) -> StoreResult<()>;

    /// Replace the score map and mark `round_number` as scored, in one write
    async fn commit_round_scores(
        &self,
        room_id: &str,
        round_number: u32,
        scores: HashMap<PlayerId, Score>,
    ) -> StoreResult<()>;

    /// Flip the room to finished. Returns `false` if it was already finished.
    async fn finish_room(&self, room_id: &str, record: &FinishRecord) -> StoreResult<bool>;

    fn subscribe_status_changes(&self) -> broadcast::Receiver<RoomStatusChange>;
}

/// Low-latency store holding one [`RoundState`] per active room
#[async_trait]
pub trait RoundStateStore: Send + Sync {
    async fn put_round_state(&self, state: RoundState) -> StoreResult<()>;

    async fn update_timer(&self, room_id: &str, phase: Phase, remaining_secs: u32) -> StoreResult<()>;

    async fn set_submissions(
        &self,
        room_id: &str,
        submissions: HashMap<PlayerId, String>,
    ) -> StoreResult<()>;

    async fn set_votes(&self, room_id: &str, votes: HashMap<VoterId, PlayerId>) -> StoreResult<()>;

    async fn set_round_winner(&self, room_id: &str, winner: Option<PlayerId>) -> StoreResult<()>;

    async fn get_round_state(&self, room_id: &str) -> StoreResult<Option<RoundState>>;

    /// Removing a missing round state is not an error
    async fn remove_round_state(&self, room_id: &str) -> StoreResult<()>;
}

/// Read-only prompt content
#[async_trait]
pub trait PromptCatalog: Send + Sync {
    /// Random prompt not in `exclude`; `None` once the catalog is exhausted
    async fn random_prompt(&self, exclude: &[PromptId]) -> StoreResult<Option<Prompt>>;
}

/// Per-room, per-round maps filled by clients
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn record_submission(
        &self,
        room_id: &str,
        round_number: u32,
        player_id: &str,
        text: String,
    ) -> StoreResult<()>;

    /// One ballot per voter; a later vote replaces the earlier one
    async fn record_vote(
        &self,
        room_id: &str,
        round_number: u32,
        voter_id: &str,
        candidate_id: &str,
    ) -> StoreResult<()>;

    async fn submissions(&self, room_id: &str, round_number: u32) -> StoreResult<HashMap<PlayerId, String>>;

    async fn votes(&self, room_id: &str, round_number: u32) -> StoreResult<HashMap<VoterId, PlayerId>>;
}

/// User profile and statistics counters
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Apply every increment or none of them
    async fn apply_increments(&self, batch: &[ProfileIncrement]) -> StoreResult<()>;

    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;
}

/// Append-only sink for finished matches
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns `false` when the room already has a history record
    async fn append(&self, record: MatchHistory) -> StoreResult<bool>;

    async fn get_by_room(&self, room_id: &str) -> StoreResult<Option<MatchHistory>>;
}

/// Time-bounded per-room ownership, so at most one orchestrator drives a room
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn try_acquire(&self, room_id: &str, holder: &str, ttl: Duration) -> StoreResult<bool>;

    /// Extend our lease. Fails (returns `false`) if another holder owns it.
    async fn renew(&self, room_id: &str, holder: &str, ttl: Duration) -> StoreResult<bool>;

    async fn release(&self, room_id: &str, holder: &str) -> StoreResult<()>;
}

/// Durable home of the per-room phase machine
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, machine: &PhaseMachine) -> StoreResult<()>;

    async fn load_checkpoint(&self, room_id: &str) -> StoreResult<Option<PhaseMachine>>;

    async fn clear_checkpoint(&self, room_id: &str) -> StoreResult<()>;
}

/// Every collaborator the engine needs, bundled for cheap cloning into tasks
#[derive(Clone)]
pub struct Stores {
    pub rooms: Arc<dyn RoomStore>,
    pub round_states: Arc<dyn RoundStateStore>,
    pub prompts: Arc<dyn PromptCatalog>,
    pub inbox: Arc<dyn InboxStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub history: Arc<dyn HistoryStore>,
    pub leases: Arc<dyn LeaseStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl Stores {
    /// Back every collaborator with the same in-memory store
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            rooms: store.clone(),
            round_states: store.clone(),
            prompts: store.clone(),
            inbox: store.clone(),
            profiles: store.clone(),
            history: store.clone(),
            leases: store.clone(),
            checkpoints: store,
        }
    }

    /// Swap the checkpoint backend (e.g. for [`FileCheckpointStore`])
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }
}
