//! Per-room task ownership.
//!
//! A room is driven by at most one task at a time: [`Scheduler::launch`] takes a
//! lease on the room before spawning, and the task renews it at every phase
//! transition. Failed runs are restarted a bounded number of times, after which
//! the room is parked in the [`DeadLetterQueue`].

use super::Engine;
use crate::error::{EngineError, EngineResult};
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Proof that the holder owns a room until the TTL runs out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    pub room_id: RoomId,
    pub holder: String,
    pub ttl: Duration,
}

/// Rooms whose match runs kept failing
#[derive(Clone, Default)]
pub struct DeadLetterQueue {
    entries: Arc<RwLock<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    /// Park a room; a room that is already parked keeps one entry, the latest
    pub async fn push(&self, letter: DeadLetter) {
        let mut entries = self.entries.write().await;
        entries.retain(|l| l.room_id != letter.room_id);
        entries.push(letter);
    }

    pub async fn list(&self) -> Vec<DeadLetter> {
        self.entries.read().await.clone()
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.entries.read().await.iter().any(|l| l.room_id == room_id)
    }
}

#[derive(Clone)]
pub struct Scheduler {
    engine: Engine,
    dead_letters: DeadLetterQueue,
}

impl Scheduler {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            dead_letters: DeadLetterQueue::default(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Start driving a room in the background.
    /// Returns `None` when another task already holds the room's lease.
    pub async fn launch(&self, room_id: &str) -> EngineResult<Option<JoinHandle<()>>> {
        let lease = LeaseHandle {
            room_id: room_id.to_string(),
            holder: ulid::Ulid::new().to_string(),
            ttl: self.engine.config.lease_ttl,
        };

        let leases = &self.engine.stores.leases;
        let acquired = self
            .engine
            .with_retry("acquire lease", || {
                leases.try_acquire(&lease.room_id, &lease.holder, lease.ttl)
            })
            .await?;
        if !acquired {
            info!("Room {} is already being driven; not launching", room_id);
            return Ok(None);
        }

        info!("Launching match task for room {}", room_id);
        let scheduler = self.clone();
        Ok(Some(tokio::spawn(async move {
            scheduler.supervise(lease).await;
        })))
    }

    /// Run the match, restarting transient failures with back-off
    async fn supervise(&self, lease: LeaseHandle) {
        let room_id = lease.room_id.clone();
        let engine = self.engine.with_lease(lease.clone());
        let policy = self.engine.config.retry;
        let max_attempts = self.engine.config.max_run_attempts;
        let mut delay = policy.initial_delay;
        let mut attempt = 1;

        loop {
            match engine.run_match(&room_id).await {
                Ok(outcome) => {
                    info!(
                        room_id = %room_id,
                        rounds = outcome.rounds_played,
                        "Match task finished"
                    );
                    break;
                }
                Err(EngineError::LeaseLost(_)) => {
                    warn!("Lost lease on room {}; another task owns it now", room_id);
                    return;
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        room_id = %room_id,
                        attempt,
                        error = %e,
                        "Match run failed; restarting in {:?}", delay
                    );
                    sleep(delay).await;
                    delay = policy.next_delay(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        room_id = %room_id,
                        attempts = attempt,
                        error = %e,
                        "Match run failed for good; moving room to dead-letter queue"
                    );
                    self.dead_letters
                        .push(DeadLetter {
                            room_id: room_id.clone(),
                            attempts: attempt,
                            last_error: e.to_string(),
                            failed_at: chrono::Utc::now().to_rfc3339(),
                        })
                        .await;
                    break;
                }
            }
        }

        if let Err(e) = self
            .engine
            .stores
            .leases
            .release(&lease.room_id, &lease.holder)
            .await
        {
            warn!("Failed to release lease on room {}: {}", room_id, e);
        }
    }

    /// Launch every active room, e.g. after a restart. Dead-lettered rooms stay
    /// parked. Returns how many were launched.
    pub async fn resume_active_rooms(&self) -> EngineResult<usize> {
        let rooms = &self.engine.stores.rooms;
        let active = self
            .engine
            .with_retry("list active rooms", || rooms.list_rooms_with_status(RoomStatus::Active))
            .await?;

        let mut launched = 0;
        for room_id in active {
            if self.dead_letters.contains(&room_id).await {
                debug!("Room {} is dead-lettered; not resuming", room_id);
                continue;
            }
            match self.launch(&room_id).await {
                Ok(Some(_)) => launched += 1,
                Ok(None) => {}
                Err(e) => error!("Failed to resume room {}: {}", room_id, e),
            }
        }

        if launched > 0 {
            info!("Resumed {} active rooms", launched);
        }
        Ok(launched)
    }
}
