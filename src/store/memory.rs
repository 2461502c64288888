use super::*;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Store operations that can be told to fail, for exercising retry and failure paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetRoom,
    RecordRoundStart,
    SetPhase,
    CommitScores,
    FinishRoom,
    PutRoundState,
    UpdateTimer,
    SetRoundWinner,
    RandomPrompt,
    ReadSubmissions,
    ReadVotes,
    ApplyIncrements,
    AppendHistory,
    SaveCheckpoint,
    RenewLease,
}

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

type InboxKey = (RoomId, u32);

/// In-memory implementation of every collaborator store
#[derive(Clone)]
pub struct MemoryStore {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
    round_states: Arc<RwLock<HashMap<RoomId, RoundState>>>,
    prompts: Arc<RwLock<Vec<Prompt>>>,
    submissions: Arc<RwLock<HashMap<InboxKey, HashMap<PlayerId, String>>>>,
    votes: Arc<RwLock<HashMap<InboxKey, HashMap<VoterId, PlayerId>>>>,
    profiles: Arc<RwLock<HashMap<PlayerId, UserProfile>>>,
    history: Arc<RwLock<Vec<MatchHistory>>>,
    leases: Arc<RwLock<HashMap<RoomId, Lease>>>,
    checkpoints: Arc<RwLock<HashMap<RoomId, PhaseMachine>>>,
    faults: Arc<RwLock<HashMap<StoreOp, u32>>>,
    /// Broadcast channel for room lifecycle changes (activation trigger listens here)
    status_tx: broadcast::Sender<RoomStatusChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_prompts(Vec::new())
    }

    pub fn with_prompts(prompts: Vec<Prompt>) -> Self {
        let (status_tx, _rx) = broadcast::channel(100);
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            round_states: Arc::new(RwLock::new(HashMap::new())),
            prompts: Arc::new(RwLock::new(prompts)),
            submissions: Arc::new(RwLock::new(HashMap::new())),
            votes: Arc::new(RwLock::new(HashMap::new())),
            profiles: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            leases: Arc::new(RwLock::new(HashMap::new())),
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(RwLock::new(HashMap::new())),
            status_tx,
        }
    }

    pub async fn add_prompt(&self, prompt: Prompt) {
        self.prompts.write().await.push(prompt);
    }

    /// Make the next `times` calls of `op` fail with a transient error
    pub async fn fail_next(&self, op: StoreOp, times: u32) {
        self.faults.write().await.insert(op, times);
    }

    /// Number of history records across all rooms
    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    async fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.write().await;
        if let Some(remaining) = faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!("injected failure for {:?}", op)));
            }
        }
        Ok(())
    }

    fn room_not_found(room_id: &str) -> StoreError {
        StoreError::NotFound(format!("room {}", room_id))
    }

    fn round_state_not_found(room_id: &str) -> StoreError {
        StoreError::NotFound(format!("round state for room {}", room_id))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn insert_room(&self, room: Room) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return Err(StoreError::Conflict(format!("room {} already exists", room.id)));
        }
        rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>> {
        self.check_fault(StoreOp::GetRoom).await?;
        Ok(self.rooms.read().await.get(room_id).cloned())
    }

    async fn list_rooms_with_status(&self, status: RoomStatus) -> StoreResult<Vec<RoomId>> {
        let mut ids: Vec<RoomId> = self
            .rooms
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_status(&self, room_id: &str, status: RoomStatus) -> StoreResult<()> {
        let change = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.get_mut(room_id).ok_or_else(|| Self::room_not_found(room_id))?;

            if status == RoomStatus::Finished {
                return Err(StoreError::Conflict(
                    "rooms are finished through finish_room".to_string(),
                ));
            }
            if room.status == RoomStatus::Finished {
                return Err(StoreError::Conflict(format!("room {} is already finished", room_id)));
            }
            if room.status == status {
                return Ok(());
            }

            let from = room.status;
            room.status = status;
            if status == RoomStatus::Active && room.started_at.is_none() {
                room.started_at = Some(chrono::Utc::now().to_rfc3339());
            }
            RoomStatusChange {
                room_id: room_id.to_string(),
                from,
                to: status,
            }
        };

        // Ignore send errors (no subscribers is fine)
        let _ = self.status_tx.send(change);
        Ok(())
    }

    async fn set_player_connected(
        &self,
        room_id: &str,
        player_id: &str,
        connected: bool,
    ) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| Self::room_not_found(room_id))?;
        let player = room
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or_else(|| StoreError::NotFound(format!("player {}", player_id)))?;
        player.connected = connected;
        Ok(())
    }

    async fn record_round_start(
        &self,
        room_id: &str,
        round_number: u32,
        prompt: &Prompt,
    ) -> StoreResult<()> {
        self.check_fault(StoreOp::RecordRoundStart).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| Self::room_not_found(room_id))?;
        room.current_round = round_number;
        room.current_phase = Some(Phase::Prompt);
        room.current_prompt = Some(prompt.clone());
        if !room.used_prompts.contains(&prompt.id) {
            room.used_prompts.push(prompt.id.clone());
        }
        Ok(())
    }

    async fn set_phase(&self, room_id: &str, phase: Phase) -> StoreResult<()> {
        self.check_fault(StoreOp::SetPhase).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| Self::room_not_found(room_id))?;
        room.current_phase = Some(phase);
        Ok(())
    }

    async fn commit_round_scores(
        &self,
        room_id: &str,
        round_number: u32,
        scores: HashMap<PlayerId, Score>,
    ) -> StoreResult<()> {
        self.check_fault(StoreOp::CommitScores).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| Self::room_not_found(room_id))?;
        room.scores = scores;
        room.last_scored_round = room.last_scored_round.max(round_number);
        Ok(())
    }

    async fn finish_room(&self, room_id: &str, record: &FinishRecord) -> StoreResult<bool> {
        self.check_fault(StoreOp::FinishRoom).await?;
        let change = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.get_mut(room_id).ok_or_else(|| Self::room_not_found(room_id))?;
            if room.status == RoomStatus::Finished {
                return Ok(false);
            }

            let from = room.status;
            room.status = RoomStatus::Finished;
            room.winner_id = record.winner_id.clone();
            room.ended_at = Some(record.ended_at.clone());
            room.end_reason = record.reason.reason_code().map(str::to_string);
            room.current_phase = None;
            RoomStatusChange {
                room_id: room_id.to_string(),
                from,
                to: RoomStatus::Finished,
            }
        };

        let _ = self.status_tx.send(change);
        Ok(true)
    }

    fn subscribe_status_changes(&self) -> broadcast::Receiver<RoomStatusChange> {
        self.status_tx.subscribe()
    }
}

#[async_trait]
impl RoundStateStore for MemoryStore {
    async fn put_round_state(&self, state: RoundState) -> StoreResult<()> {
        self.check_fault(StoreOp::PutRoundState).await?;
        self.round_states
            .write()
            .await
            .insert(state.room_id.clone(), state);
        Ok(())
    }

    async fn update_timer(&self, room_id: &str, phase: Phase, remaining_secs: u32) -> StoreResult<()> {
        self.check_fault(StoreOp::UpdateTimer).await?;
        let mut states = self.round_states.write().await;
        let state = states
            .get_mut(room_id)
            .ok_or_else(|| Self::round_state_not_found(room_id))?;
        state.phase = phase;
        state.remaining_secs = remaining_secs;
        Ok(())
    }

    async fn set_submissions(
        &self,
        room_id: &str,
        submissions: HashMap<PlayerId, String>,
    ) -> StoreResult<()> {
        let mut states = self.round_states.write().await;
        let state = states
            .get_mut(room_id)
            .ok_or_else(|| Self::round_state_not_found(room_id))?;
        state.submissions = submissions;
        Ok(())
    }

    async fn set_votes(&self, room_id: &str, votes: HashMap<VoterId, PlayerId>) -> StoreResult<()> {
        let mut states = self.round_states.write().await;
        let state = states
            .get_mut(room_id)
            .ok_or_else(|| Self::round_state_not_found(room_id))?;
        state.votes = votes;
        Ok(())
    }

    async fn set_round_winner(&self, room_id: &str, winner: Option<PlayerId>) -> StoreResult<()> {
        self.check_fault(StoreOp::SetRoundWinner).await?;
        let mut states = self.round_states.write().await;
        let state = states
            .get_mut(room_id)
            .ok_or_else(|| Self::round_state_not_found(room_id))?;
        state.round_winner = winner;
        Ok(())
    }

    async fn get_round_state(&self, room_id: &str) -> StoreResult<Option<RoundState>> {
        Ok(self.round_states.read().await.get(room_id).cloned())
    }

    async fn remove_round_state(&self, room_id: &str) -> StoreResult<()> {
        self.round_states.write().await.remove(room_id);
        Ok(())
    }
}

#[async_trait]
impl PromptCatalog for MemoryStore {
    async fn random_prompt(&self, exclude: &[PromptId]) -> StoreResult<Option<Prompt>> {
        self.check_fault(StoreOp::RandomPrompt).await?;
        let prompts = self.prompts.read().await;
        let candidates: Vec<&Prompt> = prompts.iter().filter(|p| !exclude.contains(&p.id)).collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let index = rand::rng().random_range(0..candidates.len());
        Ok(Some(candidates[index].clone()))
    }
}

#[async_trait]
impl InboxStore for MemoryStore {
    async fn record_submission(
        &self,
        room_id: &str,
        round_number: u32,
        player_id: &str,
        text: String,
    ) -> StoreResult<()> {
        self.submissions
            .write()
            .await
            .entry((room_id.to_string(), round_number))
            .or_default()
            .insert(player_id.to_string(), text);
        Ok(())
    }

    async fn record_vote(
        &self,
        room_id: &str,
        round_number: u32,
        voter_id: &str,
        candidate_id: &str,
    ) -> StoreResult<()> {
        self.votes
            .write()
            .await
            .entry((room_id.to_string(), round_number))
            .or_default()
            .insert(voter_id.to_string(), candidate_id.to_string());
        Ok(())
    }

    async fn submissions(&self, room_id: &str, round_number: u32) -> StoreResult<HashMap<PlayerId, String>> {
        self.check_fault(StoreOp::ReadSubmissions).await?;
        Ok(self
            .submissions
            .read()
            .await
            .get(&(room_id.to_string(), round_number))
            .cloned()
            .unwrap_or_default())
    }

    async fn votes(&self, room_id: &str, round_number: u32) -> StoreResult<HashMap<VoterId, PlayerId>> {
        self.check_fault(StoreOp::ReadVotes).await?;
        Ok(self
            .votes
            .read()
            .await
            .get(&(room_id.to_string(), round_number))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn apply_increments(&self, batch: &[ProfileIncrement]) -> StoreResult<()> {
        self.check_fault(StoreOp::ApplyIncrements).await?;
        // Single write lock for the whole batch: all increments land together
        let mut profiles = self.profiles.write().await;
        for inc in batch {
            profiles
                .entry(inc.user_id.clone())
                .or_insert_with(|| UserProfile {
                    user_id: inc.user_id.clone(),
                    ..Default::default()
                })
                .apply(inc);
        }
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, record: MatchHistory) -> StoreResult<bool> {
        self.check_fault(StoreOp::AppendHistory).await?;
        let mut history = self.history.write().await;
        if history.iter().any(|h| h.room_id == record.room_id) {
            return Ok(false);
        }
        history.push(record);
        Ok(true)
    }

    async fn get_by_room(&self, room_id: &str) -> StoreResult<Option<MatchHistory>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .find(|h| h.room_id == room_id)
            .cloned())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire(&self, room_id: &str, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.write().await;
        if let Some(lease) = leases.get(room_id) {
            if lease.holder != holder && lease.expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(
            room_id.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn renew(&self, room_id: &str, holder: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_fault(StoreOp::RenewLease).await?;
        // Same rules as acquiring: an expired lease nobody took over is ours again
        self.try_acquire(room_id, holder, ttl).await
    }

    async fn release(&self, room_id: &str, holder: &str) -> StoreResult<()> {
        let mut leases = self.leases.write().await;
        if leases.get(room_id).is_some_and(|l| l.holder == holder) {
            leases.remove(room_id);
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save_checkpoint(&self, machine: &PhaseMachine) -> StoreResult<()> {
        self.check_fault(StoreOp::SaveCheckpoint).await?;
        self.checkpoints
            .write()
            .await
            .insert(machine.room_id.clone(), machine.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, room_id: &str) -> StoreResult<Option<PhaseMachine>> {
        Ok(self.checkpoints.read().await.get(room_id).cloned())
    }

    async fn clear_checkpoint(&self, room_id: &str) -> StoreResult<()> {
        self.checkpoints.write().await.remove(room_id);
        Ok(())
    }
}
