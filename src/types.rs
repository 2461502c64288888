use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type VoterId = String;
pub type PromptId = String;
pub type HistoryId = String;

/// Reason code persisted on rooms that end before anyone reaches the win threshold.
pub const INSUFFICIENT_PLAYERS_REASON: &str = "Insufficient players";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Active,
    Finished,
}

/// Named stages of a round, in the order they are played.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prompt,
    Submission,
    Waiting,
    Voting,
    Results,
}

impl Phase {
    /// The phase that follows this one, or `None` after `Results`.
    /// Rounds never wrap around; a new round is a fresh machine.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Prompt => Some(Phase::Submission),
            Phase::Submission => Some(Phase::Waiting),
            Phase::Waiting => Some(Phase::Voting),
            Phase::Voting => Some(Phase::Results),
            Phase::Results => None,
        }
    }

    /// Time budget of this phase in seconds
    pub fn budget(self, durations: &PhaseDurations) -> u32 {
        match self {
            Phase::Prompt => durations.prompt_secs,
            Phase::Submission => durations.submission_secs,
            Phase::Waiting => durations.waiting_secs,
            Phase::Voting => durations.voting_secs,
            Phase::Results => durations.results_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseDurations {
    pub prompt_secs: u32,
    pub submission_secs: u32,
    pub waiting_secs: u32,
    pub voting_secs: u32,
    pub results_secs: u32,
}

impl PhaseDurations {
    /// Wall-clock length of one full round
    pub fn total_secs(&self) -> u32 {
        self.prompt_secs + self.submission_secs + self.waiting_secs + self.voting_secs + self.results_secs
    }
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            prompt_secs: 3,
            submission_secs: 25,
            waiting_secs: 5,
            voting_secs: 10,
            results_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSettings {
    /// Cumulative votes a player needs to win the match
    pub win_threshold: u32,
    /// Minimum connected players required to keep playing
    pub min_players: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            win_threshold: 20,
            min_players: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomPlayer {
    pub id: PlayerId,
    pub display_name: Option<String>,
    pub connected: bool,
}

/// Per-player cumulative totals carried across a match.
/// Only `total_votes` decides the match; the others are stats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Score {
    pub total_votes: u32,
    pub round_wins: u32,
    pub stars: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: PromptId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub status: RoomStatus,
    pub players: Vec<RoomPlayer>,
    pub current_round: u32,
    pub current_phase: Option<Phase>,
    pub current_prompt: Option<Prompt>,
    /// Prompts already played in this match (never picked twice)
    #[serde(default)]
    pub used_prompts: Vec<PromptId>,
    pub scores: HashMap<PlayerId, Score>,
    pub settings: RoomSettings,
    /// Highest round whose votes have been merged into `scores` (for idempotency)
    #[serde(default)]
    pub last_scored_round: u32,
    pub winner_id: Option<PlayerId>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub end_reason: Option<String>,
}

impl Room {
    /// Create a room in the waiting state
    pub fn new(id: impl Into<RoomId>, players: Vec<RoomPlayer>, settings: RoomSettings) -> Self {
        Self {
            id: id.into(),
            status: RoomStatus::Waiting,
            players,
            current_round: 0,
            current_phase: None,
            current_prompt: None,
            used_prompts: Vec::new(),
            scores: HashMap::new(),
            settings,
            last_scored_round: 0,
            winner_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            started_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected).count()
    }

    /// Highest `total_votes` of any player (0 when nobody has scored)
    pub fn leading_total_votes(&self) -> u32 {
        self.scores.values().map(|s| s.total_votes).max().unwrap_or(0)
    }

    pub fn score_of(&self, player_id: &str) -> Score {
        self.scores.get(player_id).copied().unwrap_or_default()
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }
}

/// Ephemeral per-room round data mirrored to clients through the low-latency store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundState {
    pub room_id: RoomId,
    pub round_number: u32,
    pub phase: Phase,
    pub remaining_secs: u32,
    pub prompt_text: String,
    pub submissions: HashMap<PlayerId, String>,
    pub votes: HashMap<VoterId, PlayerId>,
    /// Display-only; has no effect on scoring
    pub round_winner: Option<PlayerId>,
}

impl RoundState {
    pub fn new(room_id: &str, round_number: u32, prompt: &Prompt, phase: Phase, remaining_secs: u32) -> Self {
        Self {
            room_id: room_id.to_string(),
            round_number,
            phase,
            remaining_secs,
            prompt_text: prompt.text.clone(),
            submissions: HashMap::new(),
            votes: HashMap::new(),
            round_winner: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Somebody reached the win threshold
    WinThreshold,
    /// Too few connected players at a round boundary
    InsufficientPlayers,
}

impl FinishReason {
    /// Reason code stored on the room; only early terminations carry one
    pub fn reason_code(self) -> Option<&'static str> {
        match self {
            FinishReason::WinThreshold => None,
            FinishReason::InsufficientPlayers => Some(INSUFFICIENT_PLAYERS_REASON),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishRecord {
    pub winner_id: Option<PlayerId>,
    pub ended_at: String,
    pub reason: FinishReason,
}

/// Immutable snapshot of a finished match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchHistory {
    pub id: HistoryId,
    pub room_id: RoomId,
    pub players: Vec<RoomPlayer>,
    pub final_scores: HashMap<PlayerId, Score>,
    pub winner_id: Option<PlayerId>,
    pub rounds_played: u32,
    pub finish_reason: FinishReason,
    pub started_at: Option<String>,
    pub ended_at: String,
}

impl MatchHistory {
    pub fn from_room(room: &Room, record: &FinishRecord) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            room_id: room.id.clone(),
            players: room.players.clone(),
            final_scores: room.scores.clone(),
            winner_id: record.winner_id.clone(),
            rounds_played: room.current_round,
            finish_reason: record.reason,
            started_at: room.started_at.clone(),
            ended_at: record.ended_at.clone(),
        }
    }
}

/// One user's share of an atomic batch of profile increments
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileIncrement {
    pub user_id: PlayerId,
    pub xp: u64,
    pub rounds_won: u32,
    pub stars_earned: u32,
    pub total_votes: u32,
    pub games_played: u32,
    pub games_won: u32,
}

impl ProfileIncrement {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

/// Lifetime stats of a user across matches
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: PlayerId,
    pub xp: u64,
    pub rounds_won: u32,
    pub stars_earned: u32,
    pub total_votes: u32,
    pub games_played: u32,
    pub games_won: u32,
}

impl UserProfile {
    pub fn apply(&mut self, inc: &ProfileIncrement) {
        self.xp += inc.xp;
        self.rounds_won += inc.rounds_won;
        self.stars_earned += inc.stars_earned;
        self.total_votes += inc.total_votes;
        self.games_played += inc.games_played;
        self.games_won += inc.games_won;
    }
}

/// Published by the room store whenever a room's lifecycle status changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatusChange {
    pub room_id: RoomId,
    pub from: RoomStatus,
    pub to: RoomStatus,
}

/// A room whose match run kept failing and was parked for inspection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub room_id: RoomId,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: String,
}
