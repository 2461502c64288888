//! Round-and-game orchestration.
//!
//! [`Engine`] carries the collaborator stores and configuration; its behavior is
//! split across the submodules (`game` for the match loop, `round` for the
//! phase-driven round, `score`, `reward`, `finalize`, `submission`).
//! [`scheduler::Scheduler`] owns the per-room tasks.

mod finalize;
mod game;
pub mod phase;
pub mod retry;
pub mod reward;
mod round;
pub mod scheduler;
pub mod score;
mod submission;

pub use finalize::{compute_game_rewards, select_winner, FinalizeOutcome};
pub use game::{decide, LoopDecision, MatchOutcome};
pub use phase::{PhaseHook, PhaseMachine};
pub use retry::{retry_transient, RetryPolicy};
pub use reward::{compute_round_rewards, RewardConfig, VotingBonusBasis};
pub use scheduler::{DeadLetterQueue, LeaseHandle, Scheduler};
pub use score::{apply_tally, tally_votes, ScoringOutcome, VoteTally};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{StoreResult, Stores};
use crate::types::Room;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct Engine {
    pub stores: Stores,
    pub config: Arc<EngineConfig>,
    /// Set when running under the scheduler; renewed every second and at every
    /// phase transition
    lease: Option<LeaseHandle>,
}

impl Engine {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        Self {
            stores,
            config: Arc::new(config),
            lease: None,
        }
    }

    /// Same engine, bound to a lease it must keep renewing
    pub fn with_lease(&self, lease: LeaseHandle) -> Self {
        Self {
            lease: Some(lease),
            ..self.clone()
        }
    }

    /// Store call wrapped in the configured retry policy
    async fn with_retry<T, F, Fut>(&self, label: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        retry_transient(&self.config.retry, label, op).await
    }

    async fn fetch_room(&self, room_id: &str) -> EngineResult<Room> {
        let rooms = &self.stores.rooms;
        self.with_retry("get room", || rooms.get_room(room_id))
            .await?
            .ok_or_else(|| EngineError::RoomNotFound(room_id.to_string()))
    }

    /// Extend our lease, failing the run if another orchestrator took the room
    async fn renew_lease(&self) -> EngineResult<()> {
        let Some(lease) = &self.lease else {
            return Ok(());
        };
        let leases = &self.stores.leases;
        let renewed = self
            .with_retry("renew lease", || {
                leases.renew(&lease.room_id, &lease.holder, self.config.lease_ttl)
            })
            .await?;
        if renewed {
            Ok(())
        } else {
            Err(EngineError::LeaseLost(lease.room_id.clone()))
        }
    }

    /// Per-tick renewal. A store error is only logged since the next tick
    /// renews again; losing the lease still ends the run.
    async fn refresh_lease(&self) -> EngineResult<()> {
        let Some(lease) = &self.lease else {
            return Ok(());
        };
        match self
            .stores
            .leases
            .renew(&lease.room_id, &lease.holder, self.config.lease_ttl)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::LeaseLost(lease.room_id.clone())),
            Err(e) => {
                warn!("Failed to renew lease on room {}: {}", lease.room_id, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::*;
    use std::time::Duration;

    pub fn prompts(n: usize) -> Vec<Prompt> {
        (1..=n)
            .map(|i| Prompt {
                id: format!("prompt-{}", i),
                text: format!("Prompt number {}", i),
            })
            .collect()
    }

    pub fn player(id: &str, connected: bool) -> RoomPlayer {
        RoomPlayer {
            id: id.to_string(),
            display_name: Some(id.to_uppercase()),
            connected,
        }
    }

    /// Config with fast retries so failure tests stay short
    pub fn test_config() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
            },
            ..EngineConfig::default()
        }
    }

    pub fn engine_with(store: &Arc<MemoryStore>) -> Engine {
        Engine::new(Stores::in_memory(store.clone()), test_config())
    }

    /// An active room with the given players, inserted into `store`
    pub async fn active_room(store: &MemoryStore, room_id: &str, players: Vec<RoomPlayer>) -> Room {
        use crate::store::RoomStore;

        store
            .insert_room(Room::new(room_id, players, RoomSettings::default()))
            .await
            .unwrap();
        store.set_status(room_id, RoomStatus::Active).await.unwrap();
        store.get_room(room_id).await.unwrap().unwrap()
    }

    pub fn three_players() -> Vec<RoomPlayer> {
        vec![player("a", true), player("b", true), player("c", true)]
    }
}
